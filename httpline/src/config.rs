use std::net::SocketAddr;

/// Configuration for the server and its ring.
#[derive(Clone, Debug)]
pub struct Config {
    /// TCP listen address.
    pub listen: SocketAddr,
    /// Number of SQ entries. Must be a power of two.
    pub queue_depth: u32,
    /// Size of each pool buffer in bytes.
    pub buffer_size: u32,
    /// Number of pool buffers.
    pub buffer_count: u16,
    /// TCP listen backlog.
    pub backlog: i32,
    /// Initial capacity for per-connection reassembly buffers.
    pub reassembly_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8080)),
            queue_depth: 256,
            buffer_size: 16384,
            buffer_count: 1024,
            backlog: 1024,
            reassembly_capacity: 4096,
        }
    }
}

impl Config {
    /// Validate configuration values. Returns an error if any value is out of range.
    pub fn validate(&self) -> Result<(), crate::error::Error> {
        if self.queue_depth == 0 || !self.queue_depth.is_power_of_two() {
            return Err(crate::error::Error::RingSetup(
                "queue_depth must be > 0 and a power of two".into(),
            ));
        }
        if self.buffer_count == 0 {
            return Err(crate::error::Error::RingSetup(
                "buffer_count must be > 0".into(),
            ));
        }
        if self.buffer_size == 0 {
            return Err(crate::error::Error::RingSetup(
                "buffer_size must be > 0".into(),
            ));
        }
        if self.backlog <= 0 {
            return Err(crate::error::Error::RingSetup(
                "backlog must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`Config`] with discoverable methods and `build()` validation.
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with default config values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the TCP listen address.
    pub fn listen(mut self, addr: SocketAddr) -> Self {
        self.config.listen = addr;
        self
    }

    /// Set the number of SQ entries. Must be a power of two.
    pub fn queue_depth(mut self, n: u32) -> Self {
        self.config.queue_depth = n;
        self
    }

    /// Set the size of each pool buffer in bytes.
    pub fn buffer_size(mut self, n: u32) -> Self {
        self.config.buffer_size = n;
        self
    }

    /// Set the number of pool buffers.
    pub fn buffer_count(mut self, n: u16) -> Self {
        self.config.buffer_count = n;
        self
    }

    /// Set the TCP listen backlog.
    pub fn backlog(mut self, n: i32) -> Self {
        self.config.backlog = n;
        self
    }

    /// Set the initial capacity for per-connection reassembly buffers.
    pub fn reassembly_capacity(mut self, n: usize) -> Self {
        self.config.reassembly_capacity = n;
        self
    }

    /// Validate and build the final [`Config`].
    pub fn build(self) -> Result<Config, crate::error::Error> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn non_power_of_two_depth_rejected() {
        let config = ConfigBuilder::new().queue_depth(100).build();
        assert!(config.is_err());
    }

    #[test]
    fn zero_buffers_rejected() {
        assert!(ConfigBuilder::new().buffer_count(0).build().is_err());
        assert!(ConfigBuilder::new().buffer_size(0).build().is_err());
    }

    #[test]
    fn builder_overrides() {
        let config = ConfigBuilder::new()
            .listen("0.0.0.0:9000".parse().unwrap())
            .queue_depth(64)
            .buffer_size(4096)
            .buffer_count(32)
            .build()
            .unwrap();
        assert_eq!(config.listen.port(), 9000);
        assert_eq!(config.queue_depth, 64);
        assert_eq!(config.buffer_size, 4096);
        assert_eq!(config.buffer_count, 32);
    }
}
