//! Storage error types

use thiserror::Error;

/// Failure to open or initialize a store's container.
///
/// Cloneable so the memoized connection attempt can hand the same outcome
/// to every operation waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("error opening the store named {name}: {message}")]
pub struct ConnectionError {
    pub name: String,
    pub message: String,
}

impl ConnectionError {
    pub fn new(name: impl Into<String>, message: impl ToString) -> Self {
        Self {
            name: name.into(),
            message: message.to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Request error: {0}")]
    Request(String),

    #[error("The store named {name} has been destroyed")]
    Terminal { name: String },

    #[error("Value encoding error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl StorageError {
    pub(crate) fn transaction(err: rusqlite::Error) -> Self {
        StorageError::Transaction(err.to_string())
    }

    /// True when the failure belongs to the shared connection and therefore
    /// affects every operation on the store, not just this call.
    pub fn is_connection(&self) -> bool {
        matches!(self, StorageError::Connection(_))
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StorageError::Terminal { .. })
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::Request(err.to_string())
    }
}

impl From<tokio::task::JoinError> for StorageError {
    fn from(err: tokio::task::JoinError) -> Self {
        StorageError::Request(format!("storage task failed: {err}"))
    }
}
