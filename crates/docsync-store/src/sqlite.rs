//! SQLite persistence backend using rusqlite.
//!
//! Every collection and every op log gets its own table, created on first
//! write. Rows and operations are stored as JSON text. Uses WAL mode by
//! default for concurrent read/write performance.
//!
//! # Example
//!
//! ```no_run
//! use docsync_store::{DocStore, SqliteStore};
//!
//! let store = DocStore::new(SqliteStore::open("docs.db").unwrap());
//! let doc = store.get("todos", "t1").unwrap();
//! assert!(doc.is_none());
//! ```

use std::path::Path;
use std::sync::Mutex;

use docsync::Operation;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

use crate::traits::{AppendOutcome, OpLogBackend, Row, SnapshotBackend};

/// SQLite configuration options.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// SQLite journal mode. Defaults to WAL.
    pub journal_mode: JournalMode,
    /// Busy timeout in milliseconds. Defaults to 5000.
    pub busy_timeout_ms: u32,
    /// SQLite page size. Defaults to 4096.
    pub page_size: u32,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            journal_mode: JournalMode::Wal,
            busy_timeout_ms: 5000,
            page_size: 4096,
        }
    }
}

/// SQLite journal mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalMode {
    /// Write-Ahead Logging: allows concurrent reads during writes.
    Wal,
    /// Traditional rollback journal.
    Delete,
    /// In-memory journal (fastest, no crash recovery).
    Memory,
}

impl JournalMode {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Wal => "WAL",
            Self::Delete => "DELETE",
            Self::Memory => "MEMORY",
        }
    }
}

/// Error type for the SQLite backend.
#[derive(Debug, Error)]
pub enum SqliteError {
    /// An error from rusqlite.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Lock poisoned.
    #[error("sqlite lock poisoned")]
    LockPoisoned,
    /// A stored row or operation is not valid JSON.
    #[error("stored json is invalid: {0}")]
    Json(#[from] serde_json::Error),
}

/// SQLite persistence backend.
///
/// Wraps a `rusqlite::Connection` behind a `Mutex` for safe shared access.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at the given path with default config.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SqliteError> {
        Self::open_with_config(path, SqliteConfig::default())
    }

    /// Open with custom configuration.
    pub fn open_with_config<P: AsRef<Path>>(
        path: P,
        config: SqliteConfig,
    ) -> Result<Self, SqliteError> {
        let conn = Connection::open(path)?;
        Self::init_connection(&conn, &config)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (useful for testing).
    pub fn open_in_memory() -> Result<Self, SqliteError> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(&conn, &SqliteConfig::default())?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_connection(conn: &Connection, config: &SqliteConfig) -> Result<(), SqliteError> {
        conn.execute_batch(&format!(
            "PRAGMA journal_mode = {};
             PRAGMA busy_timeout = {};
             PRAGMA page_size = {};
             PRAGMA synchronous = NORMAL;",
            config.journal_mode.as_str(),
            config.busy_timeout_ms,
            config.page_size,
        ))?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, SqliteError> {
        self.conn.lock().map_err(|_| SqliteError::LockPoisoned)
    }

    fn now_ms() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }

    /// Get the database file size in bytes (0 for in-memory).
    pub fn file_size(&self) -> Result<u64, SqliteError> {
        let conn = self.lock()?;
        let page_count: i64 = conn.query_row("PRAGMA page_count", [], |row| row.get(0))?;
        let page_size: i64 = conn.query_row("PRAGMA page_size", [], |row| row.get(0))?;
        Ok((page_count * page_size) as u64)
    }

    /// Get the current journal mode.
    pub fn journal_mode(&self) -> Result<String, SqliteError> {
        let conn = self.lock()?;
        let mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
        Ok(mode)
    }
}

/// Quote a collection name for use as an SQL identifier.
fn ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn table_exists(conn: &Connection, name: &str) -> Result<bool, SqliteError> {
    let found = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![name],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

fn create_row_table(conn: &Connection, collection: &str) -> Result<(), SqliteError> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {} (
            id          TEXT PRIMARY KEY,
            row         TEXT NOT NULL,
            updated_at  INTEGER NOT NULL DEFAULT 0
        );",
        ident(collection)
    ))?;
    Ok(())
}

fn create_op_table(conn: &Connection, log: &str) -> Result<(), SqliteError> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {} (
            key         TEXT PRIMARY KEY,
            id          TEXT NOT NULL,
            v           INTEGER NOT NULL,
            op          TEXT NOT NULL,
            created_at  INTEGER NOT NULL DEFAULT 0
        );",
        ident(log)
    ))?;
    Ok(())
}

fn decode_rows(texts: Vec<String>) -> Result<Vec<Row>, SqliteError> {
    texts
        .iter()
        .map(|text| serde_json::from_str(text).map_err(SqliteError::from))
        .collect()
}

impl SnapshotBackend for SqliteStore {
    type Error = SqliteError;

    fn put_row(&mut self, collection: &str, id: &str, row: &Row) -> Result<(), Self::Error> {
        let text = serde_json::to_string(row)?;
        let conn = self.lock()?;
        create_row_table(&conn, collection)?;
        conn.execute(
            &format!(
                "INSERT INTO {} (id, row, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(id)
                 DO UPDATE SET row = excluded.row, updated_at = excluded.updated_at",
                ident(collection)
            ),
            params![id, text, Self::now_ms() as i64],
        )?;
        Ok(())
    }

    fn get_row(&self, collection: &str, id: &str) -> Result<Option<Row>, Self::Error> {
        let conn = self.lock()?;
        if !table_exists(&conn, collection)? {
            return Ok(None);
        }
        let text: Option<String> = conn
            .query_row(
                &format!("SELECT row FROM {} WHERE id = ?1", ident(collection)),
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        text.map(|t| serde_json::from_str(&t).map_err(SqliteError::from))
            .transpose()
    }

    fn scan_rows(&self, collection: &str) -> Result<Vec<Row>, Self::Error> {
        let conn = self.lock()?;
        if !table_exists(&conn, collection)? {
            return Ok(Vec::new());
        }
        let mut stmt = conn.prepare(&format!("SELECT row FROM {} ORDER BY id", ident(collection)))?;
        let texts = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        decode_rows(texts)
    }
}

impl OpLogBackend for SqliteStore {
    fn ensure_op_index(&self, log: &str) -> Result<(), Self::Error> {
        let conn = self.lock()?;
        create_op_table(&conn, log)?;
        conn.execute_batch(&format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {}(id, v);",
            ident(&format!("{log}_id_v")),
            ident(log)
        ))?;
        Ok(())
    }

    fn put_op(
        &mut self,
        log: &str,
        id: &str,
        version: u64,
        op: &Operation,
    ) -> Result<AppendOutcome, Self::Error> {
        let key = format!("{id} v{version}");
        let text = serde_json::to_string(op)?;
        let conn = self.lock()?;
        create_op_table(&conn, log)?;
        let inserted = conn.execute(
            &format!(
                "INSERT INTO {} (key, id, v, op, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(key) DO NOTHING",
                ident(log)
            ),
            params![key, id, version as i64, text, Self::now_ms() as i64],
        )?;
        if inserted == 1 {
            return Ok(AppendOutcome::Written);
        }
        let existing: String = conn.query_row(
            &format!("SELECT op FROM {} WHERE key = ?1", ident(log)),
            params![key],
            |row| row.get(0),
        )?;
        let existing: Operation = serde_json::from_str(&existing)?;
        if &existing == op {
            Ok(AppendOutcome::Unchanged)
        } else {
            Ok(AppendOutcome::Occupied(existing))
        }
    }

    fn max_op_version(&self, log: &str, id: &str) -> Result<Option<u64>, Self::Error> {
        let conn = self.lock()?;
        if !table_exists(&conn, log)? {
            return Ok(None);
        }
        let max: Option<i64> = conn.query_row(
            &format!("SELECT MAX(v) FROM {} WHERE id = ?1", ident(log)),
            params![id],
            |row| row.get(0),
        )?;
        Ok(max.map(|v| v as u64))
    }

    fn ops_in_range(
        &self,
        log: &str,
        id: &str,
        start: u64,
        end: Option<u64>,
    ) -> Result<Vec<(u64, Operation)>, Self::Error> {
        let conn = self.lock()?;
        if !table_exists(&conn, log)? {
            return Ok(Vec::new());
        }
        let end = end.map_or(i64::MAX, |e| e.min(i64::MAX as u64) as i64);
        let mut stmt = conn.prepare(&format!(
            "SELECT v, op FROM {}
             WHERE id = ?1 AND v >= ?2 AND v < ?3
             ORDER BY v",
            ident(log)
        ))?;
        let rows = stmt
            .query_map(params![id, start as i64, end], |row| {
                Ok((row.get::<_, i64>(0)? as u64, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(v, text)| -> Result<_, SqliteError> { Ok((v, serde_json::from_str(&text)?)) })
            .collect()
    }

    fn truncate_ops_before(&mut self, log: &str, id: &str, version: u64) -> Result<usize, Self::Error> {
        let conn = self.lock()?;
        if !table_exists(&conn, log)? {
            return Ok(0);
        }
        let removed = conn.execute(
            &format!("DELETE FROM {} WHERE id = ?1 AND v < ?2", ident(log)),
            params![id, version as i64],
        )?;
        Ok(removed)
    }
}
