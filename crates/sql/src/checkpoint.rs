//! Checkpoint modes and the bookkeeping controller.
//!
//! A checkpoint migrates committed WAL frames into the main database
//! file. The modes differ in how aggressively they treat concurrent
//! readers and writers, and in what they leave behind in the WAL file:
//!
//! | Mode | Blocks | WAL file on success |
//! |------|--------|---------------------|
//! | Passive | nobody | may shrink or stay |
//! | Full | new writers | may shrink or stay |
//! | Restart | new writers; next writer restarts the WAL | bytes unchanged |
//! | Truncate | new writers; next writer restarts the WAL | zero length |
//!
//! On any non-success the WAL file is byte-identical to its pre-call
//! state.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::db::Database;
use crate::error::Result;

/// How a checkpoint treats concurrent readers and the WAL file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointMode {
    /// Migrate as many frames as possible without blocking readers.
    /// Never errors due to contention.
    Passive,
    /// Block new writers, wait for existing ones, migrate all frames.
    Full,
    /// Like Full, additionally ensuring the next writer restarts the
    /// WAL from offset zero. The WAL file bytes remain unchanged.
    Restart,
    /// Like Restart, additionally truncating the WAL file to zero
    /// length.
    Truncate,
}

impl CheckpointMode {
    /// The engine-facing name of the mode.
    pub(crate) fn as_pragma_arg(&self) -> &'static str {
        match self {
            CheckpointMode::Passive => "PASSIVE",
            CheckpointMode::Full => "FULL",
            CheckpointMode::Restart => "RESTART",
            CheckpointMode::Truncate => "TRUNCATE",
        }
    }

    /// Whether contention with readers is reported as an error.
    ///
    /// Passive checkpoints migrate what they can and report remaining
    /// frames through the result instead.
    pub(crate) fn reports_busy(&self) -> bool {
        !matches!(self, CheckpointMode::Passive)
    }
}

impl fmt::Display for CheckpointMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_pragma_arg())
    }
}

/// Frame counts reported by the engine for a completed checkpoint.
///
/// Both counts are `-1` when the engine had nothing to report, e.g. for
/// a checkpoint against a database with no WAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointResult {
    /// Frames currently in the WAL.
    pub wal_frames: i64,
    /// Frames migrated into the main database file.
    pub checkpointed_frames: i64,
}

impl Default for CheckpointResult {
    fn default() -> Self {
        CheckpointResult {
            wal_frames: -1,
            checkpointed_frames: -1,
        }
    }
}

/// Outcome of a [`Checkpointer`] run: the engine's frame counts plus
/// the WAL-file side effects observed around the call.
#[derive(Debug, Clone, Copy)]
pub struct CheckpointReport {
    /// The mode that was run.
    pub mode: CheckpointMode,
    /// Frame counts reported by the engine.
    pub result: CheckpointResult,
    /// WAL file size before the checkpoint, 0 if absent.
    pub wal_size_before: u64,
    /// WAL file size after the checkpoint, 0 if absent.
    pub wal_size_after: u64,
}

/// Bounded-time checkpoint controller.
///
/// A thin wrapper around [`Database::checkpoint_with_timeout`] whose
/// value is the post-condition bookkeeping: the report records the WAL
/// size on both sides of the call, so callers can observe the
/// file-level guarantees (Restart leaves bytes unchanged, Truncate
/// leaves zero length, failures leave the file untouched). The
/// checkpointer never retries; retries are the caller's concern.
pub struct Checkpointer {
    db: Arc<Database>,
}

impl Checkpointer {
    /// Create a checkpointer over the given database handle.
    pub fn new(db: Arc<Database>) -> Self {
        Checkpointer { db }
    }

    /// Run a single checkpoint attempt, bounded by `timeout` if given.
    ///
    /// With no timeout the engine's default busy handling applies. On
    /// contention the error from the database surfaces unchanged and no
    /// file is created or removed.
    pub fn run(&self, mode: CheckpointMode, timeout: Option<Duration>) -> Result<CheckpointReport> {
        let wal_size_before = self.db.wal_size()?;

        let outcome = match timeout {
            Some(d) => self.db.checkpoint_with_timeout(mode, d),
            None => self.db.checkpoint(mode),
        };

        match outcome {
            Ok(result) => {
                let wal_size_after = self.db.wal_size()?;
                info!(
                    %mode,
                    wal_frames = result.wal_frames,
                    checkpointed_frames = result.checkpointed_frames,
                    wal_size_before,
                    wal_size_after,
                    "checkpoint complete"
                );
                Ok(CheckpointReport {
                    mode,
                    result,
                    wal_size_before,
                    wal_size_after,
                })
            }
            Err(err) => {
                debug!(%mode, error = %err, "checkpoint did not complete");
                Err(err)
            }
        }
    }
}
