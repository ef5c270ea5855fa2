use std::io;

use thiserror::Error;

/// Errors returned by the httpline driver.
#[derive(Debug, Error)]
pub enum Error {
    /// io_uring setup or operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Ring setup failed (e.g., invalid configuration values).
    #[error("ring setup: {0}")]
    RingSetup(String),
}

/// Returned by SQE acquisition when the submission queue is full.
///
/// Non-fatal: the caller drops the submission for this iteration and
/// retries once completions have drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("submission queue full")]
pub struct SqFull;
