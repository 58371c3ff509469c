//! # quorumdb
//!
//! Core of a distributed, replicated relational database: the seam
//! where the embedded SQL engine, the consensus log, and the snapshot
//! store meet.
//!
//! The pieces, in dependency order:
//!
//! - [`Database`]: a handle to an embedded SQL database in
//!   journal-delete or write-ahead-log mode (execute, query, backup,
//!   checkpoint, path introspection).
//! - [`Checkpointer`]: bounded-time checkpoint control with
//!   post-condition bookkeeping over the WAL file.
//! - [`Provider`]: streams a consistent database image to a file,
//!   absorbing transient backup failures, for upload by the consensus
//!   layer.
//! - [`Sink`]: receives such an image and installs it atomically as
//!   the new current generation.
//! - [`Servers`]: the cluster membership model the snapshot metadata
//!   carries.
//!
//! # Quick start
//!
//! ```no_run
//! use quorumdb::{CheckpointMode, Database};
//! use std::time::Duration;
//!
//! fn main() -> quorumdb::sql::Result<()> {
//!     let db = Database::open("node.db", false, true)?;
//!     db.execute_string_stmt("CREATE TABLE foo (id INTEGER PRIMARY KEY, name TEXT)")?;
//!     db.execute_string_stmt("INSERT INTO foo(name) VALUES('fiona')")?;
//!
//!     // Migrate WAL frames into the main file, waiting up to a
//!     // second for readers to clear.
//!     db.checkpoint_with_timeout(CheckpointMode::Truncate, Duration::from_secs(1))?;
//!     db.close();
//!     Ok(())
//! }
//! ```
//!
//! The member crates are re-exported in full as [`sql`], [`snapshot`]
//! and [`cluster`]; the most commonly used types are lifted to the
//! crate root.

pub use quorum_cluster as cluster;
pub use quorum_snapshot as snapshot;
pub use quorum_sql as sql;

pub use quorum_cluster::{Server, Servers, Suffrage};
pub use quorum_snapshot::{
    BackupSource, CommitPolicy, Provider, ProviderConfig, Sink, SnapshotError, SnapshotMeta,
};
pub use quorum_sql::{
    BackupFormat, BackupRequest, CheckpointMode, CheckpointReport, CheckpointResult, Checkpointer,
    Database, ExecuteResult, Rows, SqlError, Value,
};
