//! Error types for the SQL layer.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::checkpoint::CheckpointMode;

/// Convenience alias for SQL-layer results.
pub type Result<T> = std::result::Result<T, SqlError>;

/// Errors produced by the SQL layer.
#[derive(Debug, Error)]
pub enum SqlError {
    /// A database file was expected at a path but is missing.
    #[error("database not found at {path}")]
    NotFound {
        /// Path that was checked.
        path: PathBuf,
    },

    /// A checkpoint could not complete because a reader holds a
    /// snapshot lock. Retryable.
    #[error("checkpoint {mode} blocked by an active reader")]
    CheckpointBusy {
        /// The checkpoint mode that was attempted.
        mode: CheckpointMode,
    },

    /// The deadline elapsed while waiting for readers to clear.
    /// The WAL file is byte-identical to its state at call entry.
    #[error("checkpoint {mode} timed out after {waited:?}")]
    CheckpointTimeout {
        /// The checkpoint mode that was attempted.
        mode: CheckpointMode,
        /// How long the call waited before giving up.
        waited: Duration,
    },

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The SQL engine returned an error (syntax, constraint, corruption).
    #[error("engine error: {0}")]
    Engine(#[from] rusqlite::Error),
}

impl SqlError {
    /// Whether this error reports checkpoint contention (busy or timed
    /// out waiting for readers). Such errors are retryable.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            SqlError::CheckpointBusy { .. } | SqlError::CheckpointTimeout { .. }
        )
    }
}
