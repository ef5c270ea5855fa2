//! httpline — HTTP/1.x server core built directly on Linux io_uring.
//!
//! httpline drives TCP accept, recv, send, and close through the kernel's
//! shared-memory submission/completion rings with no intermediate event-loop
//! abstraction: the ring mappings, cursor arithmetic, and enter syscalls are
//! all handled in-crate.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use httpline::{ConfigBuilder, Server};
//!
//! fn main() -> Result<(), httpline::Error> {
//!     let config = ConfigBuilder::new()
//!         .listen("127.0.0.1:8080".parse().unwrap())
//!         .build()?;
//!     let mut server = Server::bind(config)?;
//!     let _shutdown = server.shutdown_handle();
//!     server.run()
//! }
//! ```
//!
//! # Platform
//!
//! Linux 5.6+ only. Requires io_uring with the accept, recv, send, and
//! close opcodes.

pub mod buffer;
pub mod completion;
pub mod config;
pub mod connection;
pub mod error;
pub mod http;
pub mod metrics;
pub mod ring;
pub mod server;

// Public API re-exports
pub use buffer::pool::BufferPool;
pub use buffer::queue::IndexQueue;
pub use completion::{IoRequest, OpKind};
pub use config::{Config, ConfigBuilder};
pub use connection::{ClientConnection, ConnectionTable};
pub use error::{Error, SqFull};
pub use http::{Header, Method, ParseError, ParseOutcome, Request, Version};
pub use ring::{Cqe, Ring, Sqe};
pub use server::{Server, ShutdownHandle};
