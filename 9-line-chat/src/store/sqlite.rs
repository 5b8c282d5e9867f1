//! SQLite-backed implementation of both storage traits.
//!
//! Tables:
//! - `users`: id, name (unique), password_hash, created_at
//! - `messages`: id, user_id, user_name, addr, text, created_at
//!
//! Timestamps are stored as unix milliseconds.

use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};

use super::{Author, ChatRecord, CredentialStore, MessageLog, NewChatRecord, StoreError, User};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        created_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER REFERENCES users(id),
        user_name TEXT,
        addr TEXT NOT NULL,
        text TEXT NOT NULL,
        created_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_messages_created ON messages(created_at);";

/// One SQLite connection serialised behind a mutex.
///
/// Calls hold the lock only for the duration of a single statement and never
/// across network I/O.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (or creates) the database at `path` and applies the schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )?;
        Self::with_connection(conn)
    }

    /// A private database that disappears when the store is dropped.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl CredentialStore for SqliteStore {
    fn create(&self, name: &str, password_hash: &str) -> Result<User, StoreError> {
        let created_at = now_millis();
        let conn = self.conn.lock();
        let result = conn.execute(
            "INSERT INTO users (name, password_hash, created_at) VALUES (?1, ?2, ?3)",
            params![name, password_hash, created_at],
        );

        match result {
            Ok(_) => Ok(User {
                id: conn.last_insert_rowid(),
                name: name.to_string(),
                password_hash: password_hash.to_string(),
                created_at: from_millis(created_at),
            }),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::NameTaken)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn find_by_name(&self, name: &str) -> Result<User, StoreError> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, name, password_hash, created_at FROM users WHERE name = ?1",
            params![name],
            user_from_row,
        )
        .optional()?
        .ok_or(StoreError::NotFound)
    }

    fn list_all(&self) -> Result<Vec<User>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT id, name, password_hash, created_at FROM users ORDER BY id")?;
        let users = stmt
            .query_map([], user_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }
}

impl MessageLog for SqliteStore {
    fn append(&self, record: &NewChatRecord) -> Result<(), StoreError> {
        let (user_id, user_name) = match &record.author {
            Some(author) => (Some(author.id), Some(author.name.as_str())),
            None => (None, None),
        };
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO messages (user_id, user_name, addr, text, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user_id,
                user_name,
                record.origin_address,
                record.text,
                record.created_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    fn scan_ordered(&self) -> Result<Vec<ChatRecord>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, user_name, addr, text, created_at
             FROM messages ORDER BY created_at ASC, id ASC",
        )?;
        let records = stmt
            .query_map([], |row| {
                let user_id: Option<i64> = row.get(1)?;
                let user_name: Option<String> = row.get(2)?;
                let author = match (user_id, user_name) {
                    (Some(id), Some(name)) => Some(Author { id, name }),
                    _ => None,
                };
                Ok(ChatRecord {
                    id: row.get(0)?,
                    author,
                    origin_address: row.get(3)?,
                    text: row.get(4)?,
                    created_at: from_millis(row.get(5)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }
}

fn user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        password_hash: row.get(2)?,
        created_at: from_millis(row.get(3)?),
    })
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}
