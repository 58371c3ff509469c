//! Snapshot sink: receives a full database image into a working
//! directory and promotes it across generation directories.
//!
//! A generation is a complete, installed database image identified by
//! its directory. The sink stages the incoming image under `work/`,
//! materializes it as the next generation, and installs it in place of
//! the current one with directory renames on the same filesystem:
//!
//! ```text
//!        open()              write()*        commit()
//! new ──────────► open ──────────► open ──────────► committed
//!                      │                     cancel()
//!                      └──────────────────────────► cancelled
//! ```
//!
//! Any write error poisons the sink; from there only cancellation is
//! valid. A concurrent reader of the current generation observes either
//! the full pre-image or the full post-image, never a prefix.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{Result, SnapshotError};
use crate::meta::SnapshotMeta;

/// File name of the database image inside a generation directory.
pub const GENERATION_DB_FILE: &str = "db.sqlite";

/// File name of the snapshot metadata inside a generation directory.
pub const GENERATION_META_FILE: &str = "meta.json";

const STAGING_FILE: &str = "snapshot.db.tmp";

/// What commit does with the materialized generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommitPolicy {
    /// Replace the current generation with the new one and remove the
    /// previous image.
    #[default]
    Install,
    /// Leave the new generation staged in the next-generation
    /// directory; the store promotes it later.
    Stage,
}

enum SinkState {
    New,
    Open { file: File },
    Errored,
    Committed,
    Cancelled,
}

impl SinkState {
    fn name(&self) -> &'static str {
        match self {
            SinkState::New => "new",
            SinkState::Open { .. } => "open",
            SinkState::Errored => "errored",
            SinkState::Committed => "committed",
            SinkState::Cancelled => "cancelled",
        }
    }
}

/// Receives a point-in-time database image and installs it as the new
/// current generation.
///
/// The sink serializes nothing itself; callers drive it from one
/// thread at a time. Its promise is purely about what is visible on
/// disk: staging artefacts never escape `work/`, and generation
/// directories flip atomically.
pub struct Sink {
    work_dir: PathBuf,
    curr_gen_dir: PathBuf,
    next_gen_dir: PathBuf,
    meta: SnapshotMeta,
    policy: CommitPolicy,
    state: SinkState,
}

impl Sink {
    /// Create a sink staging under `work_dir` and installing across
    /// the two generation directories.
    pub fn new(
        work_dir: impl Into<PathBuf>,
        curr_gen_dir: impl Into<PathBuf>,
        next_gen_dir: impl Into<PathBuf>,
        meta: SnapshotMeta,
    ) -> Self {
        Sink {
            work_dir: work_dir.into(),
            curr_gen_dir: curr_gen_dir.into(),
            next_gen_dir: next_gen_dir.into(),
            meta,
            policy: CommitPolicy::default(),
            state: SinkState::New,
        }
    }

    /// Replace the commit policy.
    pub fn with_policy(mut self, policy: CommitPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Name of the current sink state, for diagnostics.
    pub fn state_name(&self) -> &'static str {
        self.state.name()
    }

    /// Path of the staging file the incoming image is written to.
    pub fn staging_path(&self) -> PathBuf {
        self.work_dir.join(STAGING_FILE)
    }

    /// Prepare the sink: ensure the working directory exists, check
    /// that the generation directories are addressable, and create an
    /// empty staging file.
    pub fn open(&mut self) -> Result<()> {
        if !matches!(self.state, SinkState::New) {
            return Err(SnapshotError::Poisoned {
                state: self.state.name(),
            });
        }

        fs::create_dir_all(&self.work_dir)?;
        for gen_dir in [&self.curr_gen_dir, &self.next_gen_dir] {
            if let Some(parent) = gen_dir.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    return Err(SnapshotError::NotFound {
                        path: parent.to_path_buf(),
                    });
                }
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(self.staging_path())?;
        debug!(staging = %self.staging_path().display(), "snapshot sink open");
        self.state = SinkState::Open { file };
        Ok(())
    }

    /// Append bytes to the staging file.
    ///
    /// An I/O failure poisons the sink; only [`Sink::cancel`] is valid
    /// afterwards.
    pub fn write(&mut self, buf: &[u8]) -> Result<()> {
        let SinkState::Open { file } = &mut self.state else {
            return Err(SnapshotError::Poisoned {
                state: self.state.name(),
            });
        };
        if let Err(err) = file.write_all(buf) {
            self.state = SinkState::Errored;
            return Err(SnapshotError::Io(err));
        }
        Ok(())
    }

    /// Seal the staged image and install it.
    ///
    /// The staging file is fsynced and renamed into the next-generation
    /// directory together with the snapshot metadata. Under
    /// [`CommitPolicy::Install`] the new generation then replaces the
    /// current one via directory rename and the previous generation is
    /// removed best-effort. Any failure along the way poisons the sink.
    pub fn commit(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.state, SinkState::Errored) {
            SinkState::Open { file } => {
                file.sync_all()?;
                drop(file);
                self.install()?;
                self.state = SinkState::Committed;
                Ok(())
            }
            other => {
                let state = other.name();
                self.state = other;
                Err(SnapshotError::Poisoned { state })
            }
        }
    }

    /// Abandon the snapshot: remove staging artefacts and leave both
    /// generation directories untouched.
    ///
    /// Valid from any state except committed; cancelling twice is a
    /// no-op.
    pub fn cancel(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.state, SinkState::Cancelled) {
            SinkState::Open { file } => {
                drop(file);
                self.remove_staging()
            }
            SinkState::Errored => self.remove_staging(),
            SinkState::New | SinkState::Cancelled => Ok(()),
            committed @ SinkState::Committed => {
                self.state = committed;
                Err(SnapshotError::Poisoned { state: "committed" })
            }
        }
    }

    fn remove_staging(&self) -> Result<()> {
        match fs::remove_file(self.staging_path()) {
            Ok(()) => {
                debug!(staging = %self.staging_path().display(), "snapshot sink cancelled");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn install(&self) -> Result<()> {
        fs::create_dir_all(&self.next_gen_dir)?;
        fs::rename(
            self.staging_path(),
            self.next_gen_dir.join(GENERATION_DB_FILE),
        )?;
        let meta_bytes = serde_json::to_vec_pretty(&self.meta)?;
        fs::write(self.next_gen_dir.join(GENERATION_META_FILE), meta_bytes)?;
        sync_dir(&self.next_gen_dir)?;
        info!(
            generation = %self.next_gen_dir.display(),
            id = %self.meta.id,
            index = self.meta.index,
            "materialized snapshot generation"
        );

        if self.policy == CommitPolicy::Stage {
            return Ok(());
        }

        // Swap: previous generation moves aside, the new one takes its
        // place, the old image is removed once nothing points at it.
        let old = previous_gen_path(&self.curr_gen_dir);
        if old.exists() {
            fs::remove_dir_all(&old)?;
        }
        let had_previous = self.curr_gen_dir.exists();
        if had_previous {
            fs::rename(&self.curr_gen_dir, &old)?;
        }
        fs::rename(&self.next_gen_dir, &self.curr_gen_dir)?;
        if let Some(parent) = self.curr_gen_dir.parent() {
            if !parent.as_os_str().is_empty() {
                sync_dir(parent)?;
            }
        }
        if had_previous {
            if let Err(err) = fs::remove_dir_all(&old) {
                warn!(
                    path = %old.display(),
                    error = %err,
                    "failed to remove previous generation"
                );
            }
        }
        info!(
            generation = %self.curr_gen_dir.display(),
            id = %self.meta.id,
            "installed snapshot generation"
        );
        Ok(())
    }
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Sink::write(self, buf).map_err(io::Error::other)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.state {
            SinkState::Open { file } => file.flush(),
            _ => Ok(()),
        }
    }
}

impl Drop for Sink {
    fn drop(&mut self) {
        if matches!(self.state, SinkState::Open { .. } | SinkState::Errored) {
            warn!(
                staging = %self.staging_path().display(),
                "sink dropped while open, cancelling"
            );
            let _ = self.cancel();
        }
    }
}

/// Where the outgoing generation is parked during the swap.
fn previous_gen_path(curr_gen_dir: &Path) -> PathBuf {
    let mut os = curr_gen_dir.to_path_buf().into_os_string();
    os.push(".old");
    PathBuf::from(os)
}

fn sync_dir(path: &Path) -> io::Result<()> {
    File::open(path)?.sync_all()
}
