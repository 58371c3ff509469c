//! Data provider: adapts a database as a retry-resilient snapshot
//! source.
//!
//! A backup can transiently fail while the engine is busy snapshotting
//! or checkpointing concurrently; those failures clear on their own.
//! The provider absorbs them with a bounded retry loop and hands the
//! uploader a single pass/fail with no partial output. Permanent
//! failures still surface once the retry budget is spent.

use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime};

use quorum_sql::{BackupRequest, Database, SqlError};
use tracing::{debug, warn};

use crate::error::Result;

/// A consistent-image byte source.
///
/// The seam between the SQL layer and the snapshot pipeline: anything
/// that can stream a consistent binary image of itself and report when
/// that image last changed.
pub trait BackupSource {
    /// Stream a consistent binary image into `writer`.
    fn backup_to(
        &self,
        req: &BackupRequest,
        writer: &mut dyn Write,
    ) -> std::result::Result<(), SqlError>;

    /// When the source data last changed.
    fn last_modified(&self) -> std::result::Result<SystemTime, SqlError>;
}

impl BackupSource for Database {
    fn backup_to(
        &self,
        req: &BackupRequest,
        writer: &mut dyn Write,
    ) -> std::result::Result<(), SqlError> {
        self.backup(req, writer)
    }

    fn last_modified(&self) -> std::result::Result<SystemTime, SqlError> {
        Database::last_modified(self)
    }
}

impl<T: BackupSource + ?Sized> BackupSource for Arc<T> {
    fn backup_to(
        &self,
        req: &BackupRequest,
        writer: &mut dyn Write,
    ) -> std::result::Result<(), SqlError> {
        (**self).backup_to(req, writer)
    }

    fn last_modified(&self) -> std::result::Result<SystemTime, SqlError> {
        (**self).last_modified()
    }
}

impl<T: BackupSource + ?Sized> BackupSource for &T {
    fn backup_to(
        &self,
        req: &BackupRequest,
        writer: &mut dyn Write,
    ) -> std::result::Result<(), SqlError> {
        (**self).backup_to(req, writer)
    }

    fn last_modified(&self) -> std::result::Result<SystemTime, SqlError> {
        (**self).last_modified()
    }
}

/// Retry policy for [`Provider::provide`].
///
/// The defaults suit a consensus layer that snapshots every few
/// minutes; a layer that owns a different upload cadence tunes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Retries after the first failed attempt.
    pub n_retries: usize,
    /// Sleep between attempts.
    pub retry_interval: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig {
            n_retries: 10,
            retry_interval: Duration::from_millis(500),
        }
    }
}

impl ProviderConfig {
    /// Set the retry budget.
    pub fn with_retries(mut self, n_retries: usize) -> Self {
        self.n_retries = n_retries;
        self
    }

    /// Set the sleep between attempts.
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// A tight policy for tests.
    pub fn for_testing() -> Self {
        ProviderConfig {
            n_retries: 2,
            retry_interval: Duration::from_millis(1),
        }
    }
}

/// Streams a point-in-time database image to a file, retrying
/// transient backup failures.
pub struct Provider<S> {
    source: S,
    vacuum: bool,
    config: ProviderConfig,
}

impl<S: BackupSource> Provider<S> {
    /// Create a provider over `source`. When `vacuum` is set, provided
    /// images are compacted.
    pub fn new(source: S, vacuum: bool) -> Self {
        Provider {
            source,
            vacuum,
            config: ProviderConfig::default(),
        }
    }

    /// Replace the retry policy.
    pub fn with_config(mut self, config: ProviderConfig) -> Self {
        self.config = config;
        self
    }

    /// When the data managed by this provider last changed.
    pub fn last_modified(&self) -> Result<SystemTime> {
        Ok(self.source.last_modified()?)
    }

    /// Write the database image to `path`, overwriting any existing
    /// file, and return the source's last-modified time.
    ///
    /// The output file is opened truncated at the start of the call and
    /// reset between attempts, so no return path leaves a partial image
    /// behind.
    pub fn provide(&self, path: impl AsRef<Path>) -> Result<SystemTime> {
        let path = path.as_ref();
        let mut file = File::create(path)?;
        let req = BackupRequest {
            vacuum: self.vacuum,
            ..BackupRequest::binary()
        };

        let mut attempt = 0usize;
        loop {
            match self.source.backup_to(&req, &mut file) {
                Ok(()) => break,
                Err(err) => {
                    attempt += 1;
                    if attempt > self.config.n_retries {
                        warn!(
                            path = %path.display(),
                            attempts = attempt,
                            error = %err,
                            "backup retries exhausted"
                        );
                        file.set_len(0)?;
                        return Err(err.into());
                    }
                    debug!(attempt, error = %err, "backup failed, retrying");
                    thread::sleep(self.config.retry_interval);
                    file.set_len(0)?;
                    file.seek(SeekFrom::Start(0))?;
                }
            }
        }

        file.sync_all()?;
        debug!(path = %path.display(), "provided database image");
        Ok(self.source.last_modified()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SnapshotError;
    use parking_lot::Mutex;
    use std::fs;
    use std::io;
    use tempfile::tempdir;

    /// A source that fails a fixed number of times before succeeding,
    /// writing garbage bytes during failed attempts.
    struct FlakySource {
        failures_left: Mutex<usize>,
        attempts: Mutex<usize>,
        payload: &'static [u8],
    }

    impl FlakySource {
        fn new(failures: usize) -> Self {
            FlakySource {
                failures_left: Mutex::new(failures),
                attempts: Mutex::new(0),
                payload: b"complete image",
            }
        }

        fn attempts(&self) -> usize {
            *self.attempts.lock()
        }
    }

    impl BackupSource for FlakySource {
        fn backup_to(
            &self,
            _req: &BackupRequest,
            writer: &mut dyn Write,
        ) -> std::result::Result<(), SqlError> {
            *self.attempts.lock() += 1;
            let mut failures = self.failures_left.lock();
            if *failures > 0 {
                *failures -= 1;
                writer.write_all(b"partial garbage").unwrap();
                return Err(SqlError::Io(io::Error::new(
                    io::ErrorKind::Other,
                    "engine busy",
                )));
            }
            writer.write_all(self.payload).unwrap();
            Ok(())
        }

        fn last_modified(&self) -> std::result::Result<SystemTime, SqlError> {
            Ok(SystemTime::UNIX_EPOCH + Duration::from_secs(1))
        }
    }

    #[test]
    fn test_provide_succeeds_first_try() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("out.db");
        let source = FlakySource::new(0);

        let provider = Provider::new(&source, false).with_config(ProviderConfig::for_testing());
        provider.provide(&out).unwrap();

        assert_eq!(source.attempts(), 1);
        assert_eq!(fs::read(&out).unwrap(), b"complete image");
    }

    #[test]
    fn test_provide_retries_transient_failures() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("out.db");
        let source = FlakySource::new(2);

        let provider = Provider::new(&source, false).with_config(ProviderConfig::for_testing());
        provider.provide(&out).unwrap();

        assert_eq!(source.attempts(), 3);
        // Garbage from failed attempts never survives into the output.
        assert_eq!(fs::read(&out).unwrap(), b"complete image");
    }

    #[test]
    fn test_provide_surfaces_last_error_when_budget_spent() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("out.db");
        let source = FlakySource::new(usize::MAX);

        let provider = Provider::new(&source, false).with_config(ProviderConfig::for_testing());
        let err = provider.provide(&out).unwrap_err();

        assert!(matches!(err, SnapshotError::Source(SqlError::Io(_))));
        // First attempt plus the configured retries.
        assert_eq!(source.attempts(), 3);
        // No partial image survives a failed provide.
        assert_eq!(fs::read(&out).unwrap(), b"");
    }

    #[test]
    fn test_config_builders() {
        let config = ProviderConfig::default()
            .with_retries(4)
            .with_retry_interval(Duration::from_millis(7));
        assert_eq!(config.n_retries, 4);
        assert_eq!(config.retry_interval, Duration::from_millis(7));
    }
}
