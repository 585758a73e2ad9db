//! Ordered write-behind queue
//!
//! Cache writes reach the persistent store through one worker task per
//! cache, so they land in the order the cache accepted them. The worker is
//! spawned on the first write and exits once every handle to the queue is
//! dropped or its runtime shuts down. The queue is bounded; a write that
//! does not fit is rejected rather than buffered.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;

use larder_storage::{KeyValueStore, RecordKey, RecordValue, StorageError};

use crate::Result;

pub(crate) enum WriteCommand<K, V> {
    Set {
        key: K,
        value: V,
        done: oneshot::Sender<Result<()>>,
    },
    Delete {
        key: K,
        done: oneshot::Sender<Result<()>>,
    },
}

/// Completion signal of a write accepted by the queue.
///
/// Awaiting it is optional: dropping the handle leaves the write running
/// and its failure is only logged.
#[derive(Debug)]
pub struct PendingWrite {
    done: oneshot::Receiver<Result<()>>,
}

impl PendingWrite {
    /// Resolves once the persistent store has applied (or rejected) the write.
    pub async fn durable(self) -> Result<()> {
        self.done.await.map_err(|_| {
            StorageError::Request("write queue stopped before applying the write".to_string())
        })?
    }
}

/// Commands a queue holds before `set` and `delete` are rejected.
pub(crate) const WRITE_QUEUE_BOUND: usize = 1024;

pub(crate) struct WriteQueue<K, V> {
    capacity: usize,
    /// Sender of the running worker; replaced when the worker is gone.
    tx: Mutex<Option<mpsc::Sender<WriteCommand<K, V>>>>,
}

impl<K: RecordKey, V: RecordValue> WriteQueue<K, V> {
    pub(crate) fn new() -> Self {
        Self::with_capacity(WRITE_QUEUE_BOUND)
    }

    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            tx: Mutex::new(None),
        }
    }

    /// Queues the write. Nothing is queued when this returns an error.
    pub(crate) fn set<S>(&self, store: &Arc<S>, key: K, value: V) -> Result<PendingWrite>
    where
        S: KeyValueStore<K, V>,
    {
        let (done, rx) = oneshot::channel();
        self.submit(store, WriteCommand::Set { key, value, done })?;
        Ok(PendingWrite { done: rx })
    }

    pub(crate) fn delete<S>(&self, store: &Arc<S>, key: K) -> Result<PendingWrite>
    where
        S: KeyValueStore<K, V>,
    {
        let (done, rx) = oneshot::channel();
        self.submit(store, WriteCommand::Delete { key, done })?;
        Ok(PendingWrite { done: rx })
    }

    /// Hands `cmd` to the worker, spawning one on the current Tokio runtime
    /// when none is running. A worker whose runtime has shut down is
    /// replaced; its unapplied writes resolve with an error.
    fn submit<S>(&self, store: &Arc<S>, cmd: WriteCommand<K, V>) -> Result<()>
    where
        S: KeyValueStore<K, V>,
    {
        let mut slot = self.tx.lock();

        let running = slot.as_ref().is_some_and(|tx| !tx.is_closed());
        if !running {
            let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
                StorageError::Request(format!("cache writes need a Tokio runtime: {e}"))
            })?;
            if slot.is_some() {
                tracing::warn!(store = %store.name(), "Write queue worker exited, restarting");
            }

            let (tx, rx) = mpsc::channel(self.capacity);
            runtime.spawn(writer_loop(Arc::clone(store), rx));
            *slot = Some(tx);
        }

        let Some(tx) = slot.as_ref() else {
            return Err(StorageError::Request("write queue disconnected".to_string()));
        };
        tx.try_send(cmd).map_err(|e| match e {
            TrySendError::Full(_) => {
                tracing::warn!(
                    store = %store.name(),
                    capacity = self.capacity,
                    "Write queue full, rejecting write"
                );
                StorageError::Request("write queue full".to_string())
            }
            TrySendError::Closed(_) => {
                StorageError::Request("write queue disconnected".to_string())
            }
        })
    }
}

async fn writer_loop<K, V, S>(store: Arc<S>, mut rx: mpsc::Receiver<WriteCommand<K, V>>)
where
    K: RecordKey,
    V: RecordValue,
    S: KeyValueStore<K, V>,
{
    tracing::debug!(store = %store.name(), "Write queue started");

    while let Some(cmd) = rx.recv().await {
        match cmd {
            WriteCommand::Set { key, value, done } => {
                let result = store.set(&key, &value).await;
                if let Err(e) = &result {
                    tracing::warn!(
                        store = %store.name(),
                        key = ?key,
                        error = %e,
                        "Write-through to persistent store failed"
                    );
                }
                let _ = done.send(result);
            }
            WriteCommand::Delete { key, done } => {
                let result = store.delete(&key).await;
                if let Err(e) = &result {
                    tracing::warn!(
                        store = %store.name(),
                        key = ?key,
                        error = %e,
                        "Delete from persistent store failed"
                    );
                }
                let _ = done.send(result);
            }
        }
    }

    tracing::debug!(store = %store.name(), "Write queue stopped");
}
