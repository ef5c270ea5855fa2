//! TOML configuration file for the server binary.
//!
//! Every section and field is optional; CLI arguments override whatever
//! the file provides.

use std::net::SocketAddr;
use std::path::Path;

use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub uring: UringSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    #[serde(default = "default_backlog")]
    pub backlog: i32,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            backlog: default_backlog(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UringSection {
    #[serde(default = "default_queue_depth")]
    pub queue_depth: u32,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: u32,
    #[serde(default = "default_buffer_count")]
    pub buffer_count: u16,
}

impl Default for UringSection {
    fn default() -> Self {
        Self {
            queue_depth: default_queue_depth(),
            buffer_size: default_buffer_size(),
            buffer_count: default_buffer_count(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_backlog() -> i32 {
    1024
}

fn default_queue_depth() -> u32 {
    256
}

fn default_buffer_size() -> u32 {
    16384
}

fn default_buffer_count() -> u16 {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config: FileConfig = toml::from_str("").unwrap();
        assert_eq!(config.server.listen.port(), 8080);
        assert_eq!(config.uring.queue_depth, 256);
        assert_eq!(config.uring.buffer_size, 16384);
        assert_eq!(config.uring.buffer_count, 1024);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn partial_sections_are_merged() {
        let config: FileConfig = toml::from_str(
            "[server]\nlisten = \"0.0.0.0:9090\"\n\n[uring]\nqueue_depth = 64\n",
        )
        .unwrap();
        assert_eq!(config.server.listen.port(), 9090);
        assert_eq!(config.uring.queue_depth, 64);
        assert_eq!(config.uring.buffer_count, 1024);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let result: Result<FileConfig, _> = toml::from_str("[server]\nbogus = 1\n");
        assert!(result.is_err());
    }
}
