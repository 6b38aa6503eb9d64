//! Error types for the chunk write pipeline.
//!
//! Mirrors the layered-enum convention used elsewhere in this codebase: a
//! top-level [`Error`] that the coordinator's public API returns, wrapping
//! subsystem errors from the locator, connector, and executor via `#[from]`.

use thiserror::Error;

/// Result type used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type returned by [`crate::writer::ChunkWriter`] and its
/// collaborators.
#[derive(Error, Debug)]
pub enum Error {
    /// A chunk type tag on the wire did not match any recognized variant.
    #[error("bad chunk type encoding: {0}")]
    BadEncoding(u8),

    /// A deadline elapsed before the operation could complete.
    #[error("operation timed out")]
    Timeout,

    /// Locator-level errors: lock acquisition, version resolution.
    #[error("locator error: {0}")]
    Locator(#[from] LocatorError),

    /// Chain-connection errors.
    #[error("connector error: {0}")]
    Connector(#[from] ConnectorError),

    /// Per-server write-executor errors.
    #[error("executor error: {0}")]
    Executor(#[from] ExecutorError),

    /// The caller used the coordinator's API in a way its current state
    /// does not allow (e.g. `addOperation` after `startFlushMode`).
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// I/O errors bubbled up from the underlying transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while resolving chunk locations or managing the
/// master-side write lock.
#[derive(Error, Debug)]
pub enum LocatorError {
    /// A lock request exceeded its deadline.
    #[error("timed out waiting for chunk write lock")]
    Timeout,

    /// Another client already holds the write lock for this chunk.
    #[error("chunk is locked by another writer")]
    Locked,

    /// The caller's view of the chunk version is stale.
    #[error("chunk version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Version the caller expected.
        expected: u32,
        /// Version the locator actually reports.
        found: u32,
    },
}

/// Errors raised while establishing or using the chained connection to the
/// storage servers that hold a chunk's parts.
#[derive(Error, Debug)]
pub enum ConnectorError {
    /// A server in the chain could not be reached.
    #[error("server unreachable: {0}")]
    Unreachable(String),

    /// The connection attempt exceeded its deadline.
    #[error("timed out connecting to chain")]
    Timeout,
}

/// Errors surfaced by a single [`crate::executor::WriteExecutor`].
#[derive(Error, Debug)]
pub enum ExecutorError {
    /// The storage server reported a non-zero status for a write.
    #[error("server reported error status {0}")]
    ServerError(u32),

    /// The connection to the server was lost.
    #[error("disconnected from server")]
    Disconnect,

    /// The server sent a frame the executor did not expect (unknown
    /// writeId, malformed frame, out-of-order WRITE_INIT_STATUS, ...).
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
}

impl Error {
    /// True for errors that the layer above may reasonably retry by
    /// releasing the journal, obtaining a fresh chunk version, and creating
    /// a new `ChunkWriter` — as opposed to caller misuse ([`Error::InvalidState`])
    /// or permanent encoding errors.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout
                | Error::Locator(LocatorError::Timeout)
                | Error::Locator(LocatorError::Locked)
                | Error::Connector(_)
                | Error::Executor(ExecutorError::Disconnect)
                | Error::Io(_)
        )
    }
}
