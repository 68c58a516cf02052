//! Error types for the dispatch subsystem.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for dispatch operations.
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Errors that can occur while ingesting, delivering or retrying a job file.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The destination did not answer its reachability probe.
    #[error("destination {address} is not reachable")]
    NotReachable {
        /// Network address of the destination.
        address: String,
    },

    /// The transfer ran but the device or the upload tool reported a failure.
    #[error("transfer to {address} failed: {reason}")]
    TransferFailed {
        /// Network address of the destination.
        address: String,
        /// What the protocol reported.
        reason: String,
    },

    /// The source file declares no target, or its target matches no destination.
    #[error("malformed source {path}: {reason}")]
    MalformedSource {
        /// Source file path.
        path: PathBuf,
        /// Why no attempt could be built.
        reason: String,
    },

    /// A pending record could not be written, read or removed.
    #[error("pending record {path}: {source}")]
    Persistence {
        /// Path of the durable record.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// Shutdown is in progress.
    #[error("operation cancelled")]
    Cancelled,

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// HTTP client error.
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl DispatchError {
    /// Returns true when the error only signals shutdown.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DispatchError::Cancelled)
    }

    /// Returns true for failures that a later retry pass may resolve.
    pub fn is_recoverable(&self) -> bool {
        match self {
            DispatchError::NotReachable { .. } => true,
            DispatchError::TransferFailed { .. } => true,
            DispatchError::Http(_) => true,
            DispatchError::Io(_) => true,
            DispatchError::Persistence { .. } => true,
            DispatchError::MalformedSource { .. } => false,
            DispatchError::Cancelled => false,
        }
    }
}
