//! Larder Cache Layer
//!
//! Write-through in-memory cache fronting a persistent key-value store.
//! - Resolved keys, including confirmed-absent ones, are answered from memory
//! - Writes are visible immediately; the durable write follows in order
//! - A batch with any unresolved key is fetched from the store in full

mod cache;
mod entry;
mod writer;

pub use cache::CachedStore;
pub use entry::CacheEntry;
pub use writer::PendingWrite;

pub use larder_storage::{BatchResult, StorageError};

pub type Result<T> = std::result::Result<T, StorageError>;
