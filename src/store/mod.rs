//! Persistence for captured messages

pub mod memory;
pub mod sqlite;

use std::path::PathBuf;

use thiserror::Error;

use crate::message::Message;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Message id already exists: {0}")]
    Conflict(String),

    #[error("Message not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Storage backend shared by every capture session.
///
/// Each call is a self-contained operation; implementations must tolerate
/// concurrent callers from different connection threads.
pub trait MessageStore: Send + Sync {
    /// Persist a newly captured message. Fails with [`StoreError::Conflict`]
    /// when the id is already taken.
    fn insert(&self, message: &Message) -> Result<(), StoreError>;

    /// All messages, most recently captured first
    fn list(&self) -> Result<Vec<Message>, StoreError>;

    /// Fetch one message by id
    fn get(&self, id: &str) -> Result<Message, StoreError>;

    /// Delete one message. Unknown ids are not an error.
    fn delete(&self, id: &str) -> Result<(), StoreError>;

    /// Delete every message
    fn delete_all(&self) -> Result<(), StoreError>;

    /// Number of stored messages
    fn count(&self) -> Result<usize, StoreError>;
}
