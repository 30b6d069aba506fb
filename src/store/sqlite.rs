//! SQLite-backed message store

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params};

use crate::message::Message;
use crate::store::{MessageStore, StoreError};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS messages (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    from_address TEXT NOT NULL,
    to_address TEXT NOT NULL,
    subject TEXT NOT NULL,
    body BLOB NOT NULL,
    date TEXT NOT NULL,
    headers TEXT NOT NULL DEFAULT '{}',
    created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
);
";

const SELECT_COLUMNS: &str = "SELECT id, from_address, to_address, subject, body, date, headers FROM messages";

/// How long a statement waits on a lock held by another process
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Message store in a single SQLite file.
///
/// The connection is guarded by a mutex, so every operation runs alone and
/// no lock is held between two calls.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database at `path` and make sure the schema exists.
    /// Missing parent directories are created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path)?;
        let store = Self::init(conn)?;
        tracing::debug!(path = %path.display(), "Opened message store");
        Ok(store)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA)?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A row as stored, before the headers column is decoded
struct MessageRow {
    id: String,
    from: String,
    to: String,
    subject: String,
    body: Vec<u8>,
    date: String,
    headers: String,
}

impl MessageRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            from: row.get(1)?,
            to: row.get(2)?,
            subject: row.get(3)?,
            body: row.get(4)?,
            date: row.get(5)?,
            headers: row.get(6)?,
        })
    }

    fn into_message(self) -> Result<Message, StoreError> {
        let headers: BTreeMap<String, String> = serde_json::from_str(&self.headers)?;
        Ok(Message {
            id: self.id,
            from: self.from,
            to: self.to,
            subject: self.subject,
            body: self.body,
            date: self.date,
            headers,
        })
    }
}

impl MessageStore for SqliteStore {
    fn insert(&self, message: &Message) -> Result<(), StoreError> {
        let headers = serde_json::to_string(&message.headers)?;
        let result = self.conn().execute(
            "INSERT INTO messages (id, from_address, to_address, subject, body, date, headers)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                message.id,
                message.from,
                message.to,
                message.subject,
                message.body,
                message.date,
                headers
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::Conflict(message.id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self) -> Result<Vec<Message>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} ORDER BY seq DESC"))?;
        let rows = stmt
            .query_map([], MessageRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(MessageRow::into_message).collect()
    }

    fn get(&self, id: &str) -> Result<Message, StoreError> {
        let row = self
            .conn()
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                [id],
                MessageRow::from_row,
            )
            .optional()?;

        match row {
            Some(row) => row.into_message(),
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.conn()
            .execute("DELETE FROM messages WHERE id = ?1", [id])?;
        Ok(())
    }

    fn delete_all(&self) -> Result<(), StoreError> {
        self.conn().execute("DELETE FROM messages", [])?;
        Ok(())
    }

    fn count(&self) -> Result<usize, StoreError> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}
