//! Larder Storage Layer
//!
//! SQLite-backed persistent key-value stores. Each named store owns one
//! container holding a single flat record namespace; every operation runs
//! as its own transaction against a lazily-opened, shared connection.

mod connection;
mod database;
mod error;
mod migrations;
mod record;
mod store;

pub use connection::ConnectionManager;
pub use database::{validate_name, Database, StorageLocation, TransactionMode};
pub use error::{ConnectionError, StorageError};
pub use migrations::SCHEMA_VERSION;
pub use record::{BatchResult, RecordKey, RecordValue};
pub use store::{KeyValueStore, PersistentStore};

pub type Result<T> = std::result::Result<T, StorageError>;
