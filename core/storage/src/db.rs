//! SQLite database handle with schema initialization and transactions.
//!
//! All writes go through [`Database::write`], which holds the single writer
//! connection for the duration of one immediate transaction. Callers put an
//! entry change and its audit record in the same closure so both commit
//! together or not at all.

use rusqlite::{params, Connection, ErrorCode, OpenFlags, Transaction, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

use crate::retry::RetryConfig;
use crate::schema::{
    AUDIT_APPEND_ONLY, CREATE_INDEXES, CREATE_TABLES, CREATE_TRIGGERS, SCHEMA_VERSION,
};
use cryptosafe_common::{Error, Result};

/// How long SQLite itself waits on a held lock before reporting busy.
const BUSY_TIMEOUT: Duration = Duration::from_millis(250);

/// Map a rusqlite error onto the common taxonomy.
///
/// Lock contention becomes `StorageBusy` (retryable); the audit triggers'
/// abort becomes `UnsupportedOperation`.
pub fn storage_error(err: rusqlite::Error) -> Error {
    match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
        {
            Error::StorageBusy(err.to_string())
        }
        rusqlite::Error::SqliteFailure(e, Some(msg))
            if e.code == ErrorCode::ConstraintViolation && msg.contains(AUDIT_APPEND_ONLY) =>
        {
            Error::UnsupportedOperation(msg.clone())
        }
        _ => Error::Storage(err.to_string()),
    }
}

/// Handle to the vault database.
pub struct Database {
    writer: Mutex<Connection>,
    /// Separate read connection; `None` for in-memory databases.
    reader: Option<Mutex<Connection>>,
    path: Option<PathBuf>,
    retry: RetryConfig,
}

impl Database {
    /// Open (or create) a database file with the default retry policy.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_retry(path, RetryConfig::default())
    }

    /// Open (or create) a database file.
    ///
    /// # Postconditions
    /// - Schema exists and the version marker equals SCHEMA_VERSION
    /// - Journal mode is WAL; reads use their own connection
    ///
    /// # Errors
    /// - Database cannot be opened
    /// - Stored schema version is not supported
    pub fn open_with_retry(path: impl AsRef<Path>, retry: RetryConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        debug!(path = %path.display(), "Opening database");

        let mut writer = Connection::open(&path).map_err(storage_error)?;
        configure(&writer)?;
        writer
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .map_err(storage_error)?;
        initialize_schema(&mut writer)?;

        let reader = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(storage_error)?;
        reader.busy_timeout(BUSY_TIMEOUT).map_err(storage_error)?;

        info!(path = %path.display(), "Database opened");
        Ok(Self {
            writer: Mutex::new(writer),
            reader: Some(Mutex::new(reader)),
            path: Some(path),
            retry,
        })
    }

    /// Create a private in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let mut writer = Connection::open_in_memory().map_err(storage_error)?;
        configure(&writer)?;
        initialize_schema(&mut writer)?;

        Ok(Self {
            writer: Mutex::new(writer),
            reader: None,
            path: None,
            retry: RetryConfig::default(),
        })
    }

    /// Path of the database file, if file backed.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `f` inside one immediate transaction on the writer connection.
    ///
    /// Commits when `f` returns `Ok`, rolls back otherwise. Lock contention
    /// is retried per the configured policy; the closure may therefore run
    /// more than once, each time in a fresh transaction.
    pub fn write<T, F>(&self, mut f: F) -> Result<T>
    where
        F: FnMut(&Transaction<'_>) -> Result<T>,
    {
        self.retry.run(|| {
            let mut conn = self.lock_writer()?;
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(storage_error)?;
            let value = f(&tx)?;
            tx.commit().map_err(storage_error)?;
            Ok(value)
        })
    }

    /// Run a read-only closure.
    ///
    /// File databases use the reader connection, so reads do not wait for
    /// the writer lock.
    pub fn read<T, F>(&self, mut f: F) -> Result<T>
    where
        F: FnMut(&Connection) -> Result<T>,
    {
        self.retry.run(|| match &self.reader {
            Some(reader) => {
                let conn = reader
                    .lock()
                    .map_err(|_| Error::Storage("Reader connection poisoned".to_string()))?;
                f(&conn)
            }
            None => {
                let conn = self.lock_writer()?;
                f(&conn)
            }
        })
    }

    /// Current value of the schema version marker.
    pub fn schema_version(&self) -> Result<i64> {
        let conn = self.lock_writer()?;
        user_version(&conn)
    }

    /// Names of the user tables in the database.
    pub fn table_names(&self) -> Result<Vec<String>> {
        self.read(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT name FROM sqlite_master \
                     WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
                )
                .map_err(storage_error)?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(storage_error)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(storage_error)?;
            Ok(names)
        })
    }

    /// Write a consistent copy of the database to `dest`.
    ///
    /// # Errors
    /// - `AlreadyExists` if `dest` exists
    /// - Storage failure
    pub fn backup_to(&self, dest: &Path) -> Result<()> {
        if dest.exists() {
            return Err(Error::AlreadyExists(format!(
                "Backup target {} exists",
                dest.display()
            )));
        }
        let dest_str = dest
            .to_str()
            .ok_or_else(|| Error::InvalidInput("Backup path is not valid UTF-8".to_string()))?;

        let conn = self.lock_writer()?;
        conn.execute("VACUUM INTO ?1", params![dest_str])
            .map_err(storage_error)?;

        info!(dest = %dest.display(), "Database backup written");
        Ok(())
    }

    fn lock_writer(&self) -> Result<MutexGuard<'_, Connection>> {
        self.writer
            .lock()
            .map_err(|_| Error::Storage("Writer connection poisoned".to_string()))
    }
}

fn configure(conn: &Connection) -> Result<()> {
    conn.busy_timeout(BUSY_TIMEOUT).map_err(storage_error)?;
    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(storage_error)?;
    Ok(())
}

fn user_version(conn: &Connection) -> Result<i64> {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(storage_error)
}

/// Create the schema on first connection; later connections skip it.
fn initialize_schema(conn: &mut Connection) -> Result<()> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(storage_error)?;

    match user_version(&tx)? {
        0 => {
            for stmt in CREATE_TABLES
                .iter()
                .chain(CREATE_INDEXES)
                .chain(CREATE_TRIGGERS)
            {
                tx.execute_batch(stmt).map_err(storage_error)?;
            }
            tx.pragma_update(None, "user_version", SCHEMA_VERSION)
                .map_err(storage_error)?;
            tx.commit().map_err(storage_error)?;
            info!(version = SCHEMA_VERSION, "Database schema created");
            Ok(())
        }
        SCHEMA_VERSION => {
            debug!(version = SCHEMA_VERSION, "Database schema up to date");
            Ok(())
        }
        other => Err(Error::Storage(format!(
            "Unsupported schema version {} (expected {})",
            other, SCHEMA_VERSION
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TABLES;

    #[test]
    fn test_in_memory_schema_created() {
        let db = Database::open_in_memory().unwrap();

        assert_eq!(db.schema_version().unwrap(), SCHEMA_VERSION);
        let tables = db.table_names().unwrap();
        for table in TABLES {
            assert!(tables.iter().any(|t| t == table), "missing {}", table);
        }
    }

    #[test]
    fn test_schema_initialization_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.db");

        let first = Database::open(&path).unwrap();
        first
            .write(|tx| {
                tx.execute(
                    "INSERT INTO settings (setting_key, setting_value, encrypted) VALUES ('k', x'00', 0)",
                    [],
                )
                .map_err(storage_error)?;
                Ok(())
            })
            .unwrap();
        let tables_before = first.table_names().unwrap();
        drop(first);

        let second = Database::open(&path).unwrap();
        assert_eq!(second.schema_version().unwrap(), SCHEMA_VERSION);
        assert_eq!(second.table_names().unwrap(), tables_before);

        let rows: i64 = second
            .read(|conn| {
                conn.query_row("SELECT COUNT(*) FROM settings", [], |row| row.get(0))
                    .map_err(storage_error)
            })
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn test_unknown_schema_version_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("future.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.pragma_update(None, "user_version", 99).unwrap();
        }

        assert!(matches!(Database::open(&path), Err(Error::Storage(_))));
    }

    #[test]
    fn test_failed_write_rolls_back() {
        let db = Database::open_in_memory().unwrap();

        let result: Result<()> = db.write(|tx| {
            tx.execute(
                "INSERT INTO settings (setting_key, setting_value, encrypted) VALUES ('k', x'00', 0)",
                [],
            )
            .map_err(storage_error)?;
            Err(Error::InvalidInput("abort".to_string()))
        });
        assert!(result.is_err());

        let rows: i64 = db
            .read(|conn| {
                conn.query_row("SELECT COUNT(*) FROM settings", [], |row| row.get(0))
                    .map_err(storage_error)
            })
            .unwrap();
        assert_eq!(rows, 0);
    }

    #[test]
    fn test_held_write_lock_is_busy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.db");
        let retry = RetryConfig::new(1)
            .with_initial_delay(Duration::from_millis(1))
            .with_jitter(false);
        let db = Database::open_with_retry(&path, retry).unwrap();

        let other = Connection::open(&path).unwrap();
        other.execute_batch("BEGIN IMMEDIATE").unwrap();

        let insert = |tx: &Transaction<'_>| -> Result<()> {
            tx.execute(
                "INSERT INTO settings (setting_key, setting_value, encrypted) VALUES ('k', x'00', 0)",
                [],
            )
            .map_err(storage_error)?;
            Ok(())
        };
        assert!(matches!(db.write(insert), Err(Error::StorageBusy(_))));

        other.execute_batch("ROLLBACK").unwrap();
        db.write(insert).unwrap();
    }

    #[test]
    fn test_audit_rows_cannot_be_rewritten() {
        let db = Database::open_in_memory().unwrap();
        db.write(|tx| {
            tx.execute(
                "INSERT INTO audit_log (action, timestamp) VALUES ('LoginFailed', 'now')",
                [],
            )
            .map_err(storage_error)?;
            Ok(())
        })
        .unwrap();

        let update = db.write(|tx| {
            tx.execute("UPDATE audit_log SET details = 'x'", [])
                .map_err(storage_error)
        });
        assert!(matches!(update, Err(Error::UnsupportedOperation(_))));

        let delete = db.write(|tx| {
            tx.execute("DELETE FROM audit_log", []).map_err(storage_error)
        });
        assert!(matches!(delete, Err(Error::UnsupportedOperation(_))));
    }

    #[test]
    fn test_backup_copies_data() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("vault.db")).unwrap();
        db.write(|tx| {
            tx.execute(
                "INSERT INTO settings (setting_key, setting_value, encrypted) VALUES ('theme', x'01', 0)",
                [],
            )
            .map_err(storage_error)?;
            Ok(())
        })
        .unwrap();

        let dest = dir.path().join("backup.db");
        db.backup_to(&dest).unwrap();
        assert!(matches!(db.backup_to(&dest), Err(Error::AlreadyExists(_))));

        let copy = Database::open(&dest).unwrap();
        assert_eq!(copy.schema_version().unwrap(), SCHEMA_VERSION);
        let rows: i64 = copy
            .read(|conn| {
                conn.query_row("SELECT COUNT(*) FROM settings", [], |row| row.get(0))
                    .map_err(storage_error)
            })
            .unwrap();
        assert_eq!(rows, 1);
    }
}
