//! Storage collaborators for the connection engine.
//!
//! The engine only depends on the two traits below. [`SqliteStore`]
//! implements both and is shared between connections behind an `Arc`.
//! Trait methods are blocking; async callers go through [`run_blocking`].

mod sqlite;

pub use sqlite::SqliteStore;

use chrono::{DateTime, Utc};
use thiserror::Error;

pub type UserId = i64;

/// A registered account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Author of a chat line sent over an authenticated session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub id: UserId,
    pub name: String,
}

/// A chat line as it is handed to [`MessageLog::append`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChatRecord {
    pub author: Option<Author>,
    pub origin_address: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// A chat line read back from the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRecord {
    pub id: i64,
    pub author: Option<Author>,
    pub origin_address: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl ChatRecord {
    /// The author's name, or the network origin for anonymous lines.
    pub fn display_name(&self) -> &str {
        match &self.author {
            Some(author) => &author.name,
            None => &self.origin_address,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("name already taken")]
    NameTaken,
    #[error("not found")]
    NotFound,
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Durable mapping from user name to password hash.
pub trait CredentialStore: Send + Sync {
    /// Inserts a new user; fails with [`StoreError::NameTaken`] if the name exists.
    fn create(&self, name: &str, password_hash: &str) -> Result<User, StoreError>;

    fn find_by_name(&self, name: &str) -> Result<User, StoreError>;

    /// All users in registration order.
    fn list_all(&self) -> Result<Vec<User>, StoreError>;
}

/// Append-only, time-ordered log of chat lines.
pub trait MessageLog: Send + Sync {
    fn append(&self, record: &NewChatRecord) -> Result<(), StoreError>;

    /// Every record, oldest first.
    fn scan_ordered(&self) -> Result<Vec<ChatRecord>, StoreError>;
}

/// Runs a blocking storage call on Tokio's blocking pool.
pub async fn run_blocking<T, F>(f: F) -> Result<T, StoreError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}
