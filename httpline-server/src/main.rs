//! HTTP/1.x server on raw io_uring.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use httpline::{ConfigBuilder, Server, ShutdownHandle};

mod config;
mod logging;

use config::FileConfig;

#[derive(Parser)]
#[command(name = "httpline-server")]
#[command(about = "HTTP/1.x server on raw io_uring")]
struct Args {
    /// Config file path (optional, CLI args override config)
    config: Option<PathBuf>,

    /// Listen address
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Submission queue depth (power of two)
    #[arg(long)]
    queue_depth: Option<u32>,

    /// Size of each pool buffer in bytes
    #[arg(long)]
    buffer_size: Option<u32>,

    /// Number of pool buffers
    #[arg(long)]
    buffer_count: Option<u16>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let file = match &args.config {
        Some(path) => match FileConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("failed to load config {}: {e}", path.display());
                return ExitCode::FAILURE;
            }
        },
        None => FileConfig::default(),
    };

    logging::init(&file.logging);

    let config = ConfigBuilder::new()
        .listen(args.listen.unwrap_or(file.server.listen))
        .backlog(file.server.backlog)
        .queue_depth(args.queue_depth.unwrap_or(file.uring.queue_depth))
        .buffer_size(args.buffer_size.unwrap_or(file.uring.buffer_size))
        .buffer_count(args.buffer_count.unwrap_or(file.uring.buffer_count))
        .build();
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(%e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let mut server = match Server::bind(config) {
        Ok(server) => server,
        Err(e) => {
            tracing::error!(%e, "failed to start server");
            return ExitCode::FAILURE;
        }
    };

    install_signal_handler(server.shutdown_handle());

    match server.run() {
        Ok(()) => {
            tracing::info!("server stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(%e, "server failed");
            ExitCode::FAILURE
        }
    }
}

/// Install SIGINT/SIGTERM handlers for graceful shutdown. A second signal
/// forces immediate exit.
fn install_signal_handler(handle: ShutdownHandle) {
    let fired = AtomicBool::new(false);
    ctrlc::set_handler(move || {
        if fired.swap(true, Ordering::SeqCst) {
            tracing::warn!("received second signal, forcing immediate exit");
            std::process::exit(1);
        }
        tracing::info!("received shutdown signal, initiating graceful shutdown");
        handle.stop();
    })
    .expect("failed to set signal handler");
}
