//! Persistent key-value store
//!
//! Every operation awaits the shared connection, then runs as a single
//! transaction on the blocking pool. Values are stored as JSON text.

use async_trait::async_trait;
use rusqlite::{params, params_from_iter, OptionalExtension};
use std::collections::HashMap;
use std::marker::PhantomData;

use crate::connection::ConnectionManager;
use crate::database::{StorageLocation, TransactionMode};
use crate::record::{BatchResult, RecordKey, RecordValue};
use crate::Result;

/// Keys per `IN (...)` lookup, well under SQLite's bound-parameter limit.
const BATCH_CHUNK: usize = 500;

/// Asynchronous key-value operations over one named store.
#[async_trait]
pub trait KeyValueStore<K: RecordKey, V: RecordValue>: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn is_destroyed(&self) -> bool;

    /// `None` when no record exists for `key`.
    async fn get(&self, key: &K) -> Result<Option<V>>;

    /// One lookup for all `keys`. Every requested key is present in the
    /// result, in request order.
    async fn get_batch(&self, keys: &[K]) -> Result<BatchResult<K, V>>;

    /// Upsert.
    async fn set(&self, key: &K, value: &V) -> Result<()>;

    /// Deleting a key with no record is not an error.
    async fn delete(&self, key: &K) -> Result<()>;

    async fn destroy(&self) -> Result<()>;
}

pub struct PersistentStore<K, V> {
    connection: ConnectionManager,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K: RecordKey, V: RecordValue> PersistentStore<K, V> {
    pub fn new(name: impl Into<String>, location: StorageLocation) -> Self {
        Self::with_connection(ConnectionManager::new(name, location))
    }

    pub fn with_connection(connection: ConnectionManager) -> Self {
        Self {
            connection,
            _marker: PhantomData,
        }
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }
}

#[async_trait]
impl<K: RecordKey, V: RecordValue> KeyValueStore<K, V> for PersistentStore<K, V> {
    fn name(&self) -> &str {
        self.connection.name()
    }

    fn is_destroyed(&self) -> bool {
        self.connection.is_destroyed()
    }

    async fn get(&self, key: &K) -> Result<Option<V>> {
        let key = key.clone();
        let raw: Option<String> = self
            .connection
            .transaction(TransactionMode::ReadOnly, move |conn| {
                let raw = conn
                    .query_row(
                        "SELECT value FROM records WHERE key = ?1",
                        params![key],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(raw)
            })
            .await?;

        Ok(raw.map(|raw| serde_json::from_str(&raw)).transpose()?)
    }

    async fn get_batch(&self, keys: &[K]) -> Result<BatchResult<K, V>> {
        let keys = keys.to_vec();
        let (keys, found) = self
            .connection
            .transaction(TransactionMode::ReadOnly, move |conn| {
                // Row order is whatever the engine picks; pair by key below
                let mut found: HashMap<K, String> = HashMap::with_capacity(keys.len());
                for chunk in keys.chunks(BATCH_CHUNK) {
                    let sql = format!(
                        "SELECT key, value FROM records WHERE key IN ({})",
                        placeholders(chunk.len())
                    );
                    let mut stmt = conn.prepare_cached(&sql)?;
                    let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| {
                        Ok((row.get::<_, K>(0)?, row.get::<_, String>(1)?))
                    })?;
                    for row in rows {
                        let (key, value) = row?;
                        found.insert(key, value);
                    }
                }
                Ok((keys, found))
            })
            .await?;

        keys.into_iter()
            .map(|key| -> Result<(K, Option<V>)> {
                let value = found
                    .get(&key)
                    .map(|raw| serde_json::from_str(raw))
                    .transpose()?;
                Ok((key, value))
            })
            .collect()
    }

    async fn set(&self, key: &K, value: &V) -> Result<()> {
        let key = key.clone();
        let raw = serde_json::to_string(value)?;

        self.connection
            .transaction(TransactionMode::ReadWrite, move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO records (key, value) VALUES (?1, ?2)",
                    params![key, raw],
                )?;
                Ok(())
            })
            .await
    }

    async fn delete(&self, key: &K) -> Result<()> {
        let key = key.clone();

        self.connection
            .transaction(TransactionMode::ReadWrite, move |conn| {
                conn.execute("DELETE FROM records WHERE key = ?1", params![key])?;
                Ok(())
            })
            .await
    }

    async fn destroy(&self) -> Result<()> {
        self.connection.destroy().await
    }
}

fn placeholders(count: usize) -> String {
    let mut out = String::with_capacity(count * 2);
    for i in 0..count {
        if i > 0 {
            out.push(',');
        }
        out.push('?');
    }
    out
}

impl<K, V> Clone for PersistentStore<K, V> {
    fn clone(&self) -> Self {
        Self {
            connection: self.connection.clone(),
            _marker: PhantomData,
        }
    }
}
