//! Error types for the snapshot pipeline.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Convenience alias for snapshot-pipeline results.
pub type Result<T> = std::result::Result<T, SnapshotError>;

/// Errors produced by the snapshot pipeline.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// A path or generation directory is missing where one was
    /// expected.
    #[error("snapshot path not found: {path}")]
    NotFound {
        /// The missing path.
        path: PathBuf,
    },

    /// The sink is in a state that no longer accepts the requested
    /// operation; only cancellation is valid.
    #[error("sink is {state} and cannot accept the operation")]
    Poisoned {
        /// Name of the sink state the operation was attempted in.
        state: &'static str,
    },

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Snapshot metadata could not be encoded or decoded.
    #[error("metadata error: {0}")]
    Meta(#[from] serde_json::Error),

    /// The underlying data source failed.
    #[error(transparent)]
    Source(#[from] quorum_sql::SqlError),
}
