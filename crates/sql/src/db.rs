//! WAL-mode database handle over the embedded SQL engine.
//!
//! A [`Database`] owns one engine connection, opened either in
//! journal-delete mode or write-ahead-log mode. Multiple handles may
//! coexist over the same path; they compete through the engine's
//! file-level locking. That interleaving is what makes checkpointing
//! interesting: a read transaction on one handle is precisely what
//! blocks a Restart or Truncate checkpoint on another.
//!
//! Filesystem layout at a database path `P`:
//!
//! ```text
//! P        # main database file (binary page format, engine-owned)
//! P-wal    # write-ahead log; appears on first write in WAL mode
//! P-shm    # shared-memory index; transient, engine-owned
//! ```

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, ErrorCode, OpenFlags};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::checkpoint::{CheckpointMode, CheckpointResult};
use crate::error::{Result, SqlError};

/// Busy timeout applied to every connection at open.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Pages copied per backup step before yielding the source lock.
const BACKUP_PAGES_PER_STEP: std::os::raw::c_int = 512;

/// How a backup renders the database image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackupFormat {
    /// A contiguous binary image, byte-compatible with a file copy of a
    /// quiesced database.
    #[default]
    Binary,
}

/// Parameters for [`Database::backup`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BackupRequest {
    /// Output rendering.
    pub format: BackupFormat,
    /// Compact the image while producing it. Bytes differ from the
    /// source file but semantics are preserved.
    pub vacuum: bool,
}

impl BackupRequest {
    /// A plain binary backup.
    pub fn binary() -> Self {
        BackupRequest {
            format: BackupFormat::Binary,
            vacuum: false,
        }
    }

    /// A compacted binary backup.
    pub fn vacuumed() -> Self {
        BackupRequest {
            format: BackupFormat::Binary,
            vacuum: true,
        }
    }
}

/// Result of a mutating statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExecuteResult {
    /// Rows changed by the statement.
    pub rows_affected: u64,
    /// Rowid of the most recent successful INSERT on this handle.
    pub last_insert_id: i64,
}

/// A single SQL value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// SQL NULL.
    Null,
    /// 64-bit signed integer.
    Integer(i64),
    /// 64-bit float.
    Real(f64),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Blob(Vec<u8>),
}

impl Value {
    /// Engine type name for this value, empty for NULL.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "",
            Value::Integer(_) => "integer",
            Value::Real(_) => "real",
            Value::Text(_) => "text",
            Value::Blob(_) => "blob",
        }
    }
}

impl From<ValueRef<'_>> for Value {
    fn from(v: ValueRef<'_>) -> Self {
        match v {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(r) => Value::Real(r),
            ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Value::Blob(b.to_vec()),
        }
    }
}

/// Result rows of a query: the column set plus row values.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Rows {
    /// Column names, in statement order.
    pub columns: Vec<String>,
    /// Per-column type names. Taken from the column declaration where
    /// one exists, otherwise inferred from the first row.
    pub types: Vec<String>,
    /// Row values.
    pub values: Vec<Vec<Value>>,
}

/// Handle to an embedded SQL database.
///
/// One handle exclusively owns its engine connection; the connection
/// mutex serializes all operations on the handle, including concurrent
/// checkpoint invocations. Path-level state (the main file, the WAL,
/// the shared-memory index) is shared with every other handle on the
/// same path and governed by the engine's file locking.
pub struct Database {
    conn: Mutex<Connection>,
    path: PathBuf,
    wal_enabled: bool,
    read_only: bool,
    busy_timeout: Duration,
}

impl Database {
    /// Open a database at `path`.
    ///
    /// `wal_mode` selects write-ahead logging; otherwise the database
    /// runs in journal-delete mode and this handle never produces a WAL
    /// file. The journal mode is applied explicitly on every writable
    /// open, so a re-open can move a database between modes. In WAL
    /// mode the engine's automatic checkpointing is disabled:
    /// checkpoint scheduling belongs to the callers of
    /// [`Database::checkpoint`].
    pub fn open(path: impl AsRef<Path>, read_only: bool, wal_mode: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if read_only && !path.exists() {
            return Err(SqlError::NotFound { path });
        }

        let flags = if read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX
        };
        let conn = Connection::open_with_flags(&path, flags)?;
        conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;

        if !read_only {
            if wal_mode {
                conn.pragma_update(None, "journal_mode", "WAL")?;
                conn.pragma_update(None, "wal_autocheckpoint", 0)?;
            } else {
                conn.pragma_update(None, "journal_mode", "DELETE")?;
            }
        }

        info!(
            path = %path.display(),
            wal = wal_mode,
            read_only,
            "opened database"
        );
        Ok(Database {
            conn: Mutex::new(conn),
            path,
            wal_enabled: wal_mode,
            read_only,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        })
    }

    /// Close the handle, releasing the engine connection.
    ///
    /// Teardown errors are logged and swallowed; there is nothing a
    /// caller can do with a connection that failed to close.
    pub fn close(self) {
        let Database { conn, path, .. } = self;
        if let Err((_conn, err)) = conn.into_inner().close() {
            warn!(path = %path.display(), error = %err, "error closing database");
        }
    }

    /// Whether this handle runs in write-ahead-log mode.
    pub fn wal_enabled(&self) -> bool {
        self.wal_enabled
    }

    /// Whether this handle was opened read-only.
    pub fn read_only(&self) -> bool {
        self.read_only
    }

    /// Path of the main database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the write-ahead log sidecar file.
    pub fn wal_path(&self) -> PathBuf {
        let mut os = self.path.clone().into_os_string();
        os.push("-wal");
        PathBuf::from(os)
    }

    /// Execute one or more mutating statements.
    pub fn execute_string_stmt(&self, sql: &str) -> Result<ExecuteResult> {
        let conn = self.conn.lock();
        conn.execute_batch(sql)?;
        Ok(ExecuteResult {
            rows_affected: conn.changes(),
            last_insert_id: conn.last_insert_rowid(),
        })
    }

    /// Run a query and collect its full result set.
    pub fn query_string_stmt(&self, sql: &str) -> Result<Rows> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;

        let columns: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(|c| c.to_string())
            .collect();
        let decl_types: Vec<Option<String>> = stmt
            .columns()
            .iter()
            .map(|c| c.decl_type().map(|t| t.to_ascii_lowercase()))
            .collect();
        let ncols = columns.len();

        let mut values: Vec<Vec<Value>> = Vec::new();
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let mut out = Vec::with_capacity(ncols);
            for i in 0..ncols {
                out.push(Value::from(row.get_ref(i)?));
            }
            values.push(out);
        }
        drop(rows);

        let types = (0..ncols)
            .map(|i| match &decl_types[i] {
                Some(t) => t.clone(),
                None => values
                    .first()
                    .map(|row| row[i].type_name().to_string())
                    .unwrap_or_default(),
            })
            .collect();

        Ok(Rows {
            columns,
            types,
            values,
        })
    }

    /// Issue a single-shot checkpoint with the engine's default busy
    /// handling.
    ///
    /// When the handle is not in WAL mode, or no WAL file exists yet,
    /// this succeeds without touching disk (a Truncate in particular
    /// succeeds and leaves no file behind). When a reader holds an
    /// incompatible lock, Restart and Truncate report contention;
    /// Passive never does.
    pub fn checkpoint(&self, mode: CheckpointMode) -> Result<CheckpointResult> {
        self.checkpoint_inner(mode, None)
    }

    /// Issue a checkpoint, waiting up to `timeout` for readers to clear.
    ///
    /// The wait happens inside the engine's busy handler, not by
    /// polling. On timeout the error is
    /// [`SqlError::CheckpointTimeout`] and the WAL file is
    /// byte-identical to its state at call entry: no partial
    /// truncation, no partial restart.
    pub fn checkpoint_with_timeout(
        &self,
        mode: CheckpointMode,
        timeout: Duration,
    ) -> Result<CheckpointResult> {
        self.checkpoint_inner(mode, Some(timeout))
    }

    fn checkpoint_inner(
        &self,
        mode: CheckpointMode,
        timeout: Option<Duration>,
    ) -> Result<CheckpointResult> {
        if !self.wal_enabled {
            return Ok(CheckpointResult::default());
        }

        let conn = self.conn.lock();
        if let Some(d) = timeout {
            conn.busy_timeout(d)?;
        }

        let sql = format!("PRAGMA wal_checkpoint({})", mode.as_pragma_arg());
        let outcome = conn.query_row(&sql, [], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
            ))
        });

        // The handle's blocking behavior must not change after a timed
        // call, whatever the outcome.
        if timeout.is_some() {
            if let Err(err) = conn.busy_timeout(self.busy_timeout) {
                warn!(
                    path = %self.path.display(),
                    error = %err,
                    "failed to restore busy timeout after checkpoint"
                );
            }
        }

        let contention_error = |mode| match timeout {
            Some(waited) => SqlError::CheckpointTimeout { mode, waited },
            None => SqlError::CheckpointBusy { mode },
        };

        match outcome {
            Ok((busy, wal_frames, checkpointed_frames)) => {
                if busy != 0 && mode.reports_busy() {
                    return Err(contention_error(mode));
                }
                debug!(
                    %mode,
                    busy,
                    wal_frames,
                    checkpointed_frames,
                    "checkpointed"
                );
                Ok(CheckpointResult {
                    wal_frames,
                    checkpointed_frames,
                })
            }
            Err(err) if is_contention(&err) => Err(contention_error(mode)),
            Err(err) => Err(SqlError::Engine(err)),
        }
    }

    /// Stream a consistent binary image of the database into `writer`.
    ///
    /// The image is staged in a temporary directory next to the
    /// database and copied to the writer only once complete, so the
    /// writer never observes a partial image. A vacuumed request
    /// produces a compacted image via the engine's rebuild; otherwise
    /// the engine's page-level backup primitive is used.
    pub fn backup(&self, req: &BackupRequest, writer: &mut dyn Write) -> Result<()> {
        match req.format {
            BackupFormat::Binary => {}
        }

        let staging_root = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let staging = tempfile::tempdir_in(staging_root)?;
        let image = staging.path().join("backup.db");

        if req.vacuum {
            self.vacuum_into(&image)?;
        } else {
            let conn = self.conn.lock();
            let mut dst = Connection::open(&image)?;
            let backup = rusqlite::backup::Backup::new(&conn, &mut dst)?;
            backup.run_to_completion(BACKUP_PAGES_PER_STEP, Duration::ZERO, None)?;
        }

        let mut file = File::open(&image)?;
        io::copy(&mut file, writer)?;
        Ok(())
    }

    /// Rebuild the database in place, reclaiming free pages.
    pub fn vacuum(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch("VACUUM")?;
        Ok(())
    }

    /// Write a compacted copy of the database to `path`.
    ///
    /// The target must not already exist.
    pub fn vacuum_into(&self, path: impl AsRef<Path>) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "VACUUM INTO ?1",
            [path.as_ref().to_string_lossy().as_ref()],
        )?;
        Ok(())
    }

    /// Logical size of the database in bytes (page count × page size).
    pub fn size(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let page_count: u64 = conn.pragma_query_value(None, "page_count", |row| row.get(0))?;
        let page_size: u64 = conn.pragma_query_value(None, "page_size", |row| row.get(0))?;
        Ok(page_count * page_size)
    }

    /// On-disk size of the main database file.
    pub fn file_size(&self) -> Result<u64> {
        Ok(fs::metadata(&self.path)?.len())
    }

    /// On-disk size of the WAL file, 0 when no WAL file exists.
    pub fn wal_size(&self) -> Result<u64> {
        match fs::metadata(self.wal_path()) {
            Ok(md) => Ok(md.len()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(err) => Err(err.into()),
        }
    }

    /// When the data behind this handle last changed: the newest
    /// modification time across the main file and the WAL.
    pub fn last_modified(&self) -> Result<SystemTime> {
        let mut latest = fs::metadata(&self.path)?.modified()?;
        if let Ok(md) = fs::metadata(self.wal_path()) {
            let wal_mtime = md.modified()?;
            if wal_mtime > latest {
                latest = wal_mtime;
            }
        }
        Ok(latest)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .field("wal_enabled", &self.wal_enabled)
            .field("read_only", &self.read_only)
            .finish_non_exhaustive()
    }
}

fn is_contention(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn db_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("test.db")
    }

    #[test]
    fn test_open_delete_mode_never_creates_wal() {
        let dir = tempdir().unwrap();
        let db = Database::open(db_path(&dir), false, false).unwrap();
        assert!(!db.wal_enabled());

        db.execute_string_stmt("CREATE TABLE foo (id INTEGER PRIMARY KEY)")
            .unwrap();
        db.execute_string_stmt("INSERT INTO foo(id) VALUES(1)")
            .unwrap();
        assert!(!db.wal_path().exists());
        db.close();
    }

    #[test]
    fn test_open_wal_mode_creates_wal_on_first_write() {
        let dir = tempdir().unwrap();
        let db = Database::open(db_path(&dir), false, true).unwrap();
        assert!(db.wal_enabled());
        assert!(
            !db.wal_path().exists(),
            "WAL file must not exist before the first write"
        );

        db.execute_string_stmt("CREATE TABLE foo (id INTEGER PRIMARY KEY)")
            .unwrap();
        assert!(db.wal_path().exists());
        db.close();
    }

    #[test]
    fn test_open_read_only_missing_file() {
        let dir = tempdir().unwrap();
        let err = Database::open(dir.path().join("missing.db"), true, false).unwrap_err();
        assert!(matches!(err, SqlError::NotFound { .. }));
    }

    #[test]
    fn test_wal_path_derivation() {
        let dir = tempdir().unwrap();
        let db = Database::open(db_path(&dir), false, true).unwrap();
        assert_eq!(
            db.wal_path().file_name().unwrap().to_str().unwrap(),
            "test.db-wal"
        );
        db.close();
    }

    #[test]
    fn test_execute_reports_changes_and_rowid() {
        let dir = tempdir().unwrap();
        let db = Database::open(db_path(&dir), false, false).unwrap();
        db.execute_string_stmt("CREATE TABLE foo (id INTEGER PRIMARY KEY, name TEXT)")
            .unwrap();

        let res = db
            .execute_string_stmt("INSERT INTO foo(name) VALUES('fiona')")
            .unwrap();
        assert_eq!(res.rows_affected, 1);
        assert_eq!(res.last_insert_id, 1);
        db.close();
    }

    #[test]
    fn test_query_columns_types_values() {
        let dir = tempdir().unwrap();
        let db = Database::open(db_path(&dir), false, false).unwrap();
        db.execute_string_stmt(
            "CREATE TABLE foo (id INTEGER PRIMARY KEY, name TEXT, weight REAL)",
        )
        .unwrap();
        db.execute_string_stmt("INSERT INTO foo(name, weight) VALUES('fiona', 2.5)")
            .unwrap();

        let rows = db.query_string_stmt("SELECT * FROM foo").unwrap();
        assert_eq!(rows.columns, ["id", "name", "weight"]);
        assert_eq!(rows.types, ["integer", "text", "real"]);
        assert_eq!(
            rows.values,
            vec![vec![
                Value::Integer(1),
                Value::Text("fiona".to_string()),
                Value::Real(2.5)
            ]]
        );
        db.close();
    }

    #[test]
    fn test_query_infers_type_of_expression_columns() {
        let dir = tempdir().unwrap();
        let db = Database::open(db_path(&dir), false, false).unwrap();
        db.execute_string_stmt("CREATE TABLE foo (id INTEGER PRIMARY KEY)")
            .unwrap();
        db.execute_string_stmt("INSERT INTO foo(id) VALUES(1)")
            .unwrap();

        let rows = db.query_string_stmt("SELECT COUNT(*) FROM foo").unwrap();
        assert_eq!(rows.columns, ["COUNT(*)"]);
        assert_eq!(rows.types, ["integer"]);
        assert_eq!(rows.values, vec![vec![Value::Integer(1)]]);
        db.close();
    }

    #[test]
    fn test_query_syntax_error_is_engine_error() {
        let dir = tempdir().unwrap();
        let db = Database::open(db_path(&dir), false, false).unwrap();
        let err = db.query_string_stmt("SELECTx 1").unwrap_err();
        assert!(matches!(err, SqlError::Engine(_)));
        db.close();
    }

    #[test]
    fn test_size_and_file_size() {
        let dir = tempdir().unwrap();
        let db = Database::open(db_path(&dir), false, false).unwrap();
        db.execute_string_stmt("CREATE TABLE foo (id INTEGER PRIMARY KEY)")
            .unwrap();

        assert!(db.size().unwrap() > 0);
        assert!(db.file_size().unwrap() > 0);
        assert_eq!(db.wal_size().unwrap(), 0);
        db.close();
    }

    #[test]
    fn test_last_modified_advances_on_write() {
        let dir = tempdir().unwrap();
        let db = Database::open(db_path(&dir), false, true).unwrap();
        db.execute_string_stmt("CREATE TABLE foo (id INTEGER PRIMARY KEY)")
            .unwrap();
        let before = db.last_modified().unwrap();

        std::thread::sleep(Duration::from_millis(20));
        db.execute_string_stmt("INSERT INTO foo(id) VALUES(1)")
            .unwrap();
        let after = db.last_modified().unwrap();
        assert!(after >= before);
        db.close();
    }

    #[test]
    fn test_backup_produces_openable_image() {
        let dir = tempdir().unwrap();
        let db = Database::open(db_path(&dir), false, true).unwrap();
        db.execute_string_stmt("CREATE TABLE foo (id INTEGER PRIMARY KEY, name TEXT)")
            .unwrap();
        db.execute_string_stmt("INSERT INTO foo(name) VALUES('fiona')")
            .unwrap();

        let mut image = Vec::new();
        db.backup(&BackupRequest::binary(), &mut image).unwrap();
        assert!(!image.is_empty());

        let copy_path = dir.path().join("copy.db");
        fs::write(&copy_path, &image).unwrap();
        let copy = Database::open(&copy_path, false, false).unwrap();
        let rows = copy.query_string_stmt("SELECT COUNT(*) FROM foo").unwrap();
        assert_eq!(rows.values, vec![vec![Value::Integer(1)]]);
        copy.close();
        db.close();
    }

    #[test]
    fn test_vacuumed_backup_preserves_content() {
        let dir = tempdir().unwrap();
        let db = Database::open(db_path(&dir), false, true).unwrap();
        db.execute_string_stmt("CREATE TABLE foo (id INTEGER PRIMARY KEY, name TEXT)")
            .unwrap();
        for _ in 0..10 {
            db.execute_string_stmt("INSERT INTO foo(name) VALUES('fiona')")
                .unwrap();
        }
        db.execute_string_stmt("DELETE FROM foo WHERE id <= 5")
            .unwrap();

        let mut image = Vec::new();
        db.backup(&BackupRequest::vacuumed(), &mut image).unwrap();

        let copy_path = dir.path().join("copy.db");
        fs::write(&copy_path, &image).unwrap();
        let copy = Database::open(&copy_path, false, false).unwrap();
        let rows = copy.query_string_stmt("SELECT COUNT(*) FROM foo").unwrap();
        assert_eq!(rows.values, vec![vec![Value::Integer(5)]]);
        copy.close();
        db.close();
    }

    #[test]
    fn test_rows_serialize_to_json() {
        let dir = tempdir().unwrap();
        let db = Database::open(db_path(&dir), false, false).unwrap();
        db.execute_string_stmt("CREATE TABLE foo (id INTEGER PRIMARY KEY, name TEXT)")
            .unwrap();
        db.execute_string_stmt("INSERT INTO foo(name) VALUES('fiona')")
            .unwrap();

        let rows = db.query_string_stmt("SELECT id, name FROM foo").unwrap();
        let json = serde_json::to_string(&rows).unwrap();
        assert_eq!(
            json,
            r#"{"columns":["id","name"],"types":["integer","text"],"values":[[1,"fiona"]]}"#
        );
        db.close();
    }
}
