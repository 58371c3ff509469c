//! SQL layer: a handle to an embedded SQL database with write-ahead
//! logging, plus checkpoint control.
//!
//! - `db`: the [`Database`] handle (open, execute, query, backup,
//!   checkpoint, path introspection)
//! - `checkpoint`: [`CheckpointMode`] and the [`Checkpointer`]
//!   controller with its post-condition bookkeeping
//! - `error`: [`SqlError`]
//!
//! The handle is the seam between the SQL engine and the rest of the
//! system: the consensus layer drives checkpoints through it to bound
//! WAL growth, and the snapshot pipeline reads consistent images
//! through its backup primitive.

#![warn(missing_docs)]

pub mod checkpoint;
pub mod db;
pub mod error;

pub use checkpoint::{CheckpointMode, CheckpointReport, CheckpointResult, Checkpointer};
pub use db::{
    BackupFormat, BackupRequest, Database, ExecuteResult, Rows, Value, DEFAULT_BUSY_TIMEOUT,
};
pub use error::{Result, SqlError};
