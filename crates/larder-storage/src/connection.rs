//! Lazily-opened, memoized connection to a named store

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use rusqlite::Connection;
use std::sync::Arc;

use crate::database::{Database, StorageLocation, TransactionMode};
use crate::error::{ConnectionError, StorageError};
use crate::Result;

type ConnectAttempt = Shared<BoxFuture<'static, std::result::Result<Database, ConnectionError>>>;

enum ConnectionState {
    /// The one open attempt for this instance, polled on first use and
    /// shared by every later caller.
    Pending(ConnectAttempt),
    Destroyed,
}

/// Owns the single connection of one store instance.
///
/// Nothing touches the platform until the first operation awaits
/// [`ConnectionManager::connection`]. Every caller awaits the same attempt,
/// so an open failure reaches all of them identically.
pub struct ConnectionManager {
    name: Arc<str>,
    location: StorageLocation,
    state: Arc<Mutex<ConnectionState>>,
}

impl ConnectionManager {
    pub fn new(name: impl Into<String>, location: StorageLocation) -> Self {
        let name: Arc<str> = Arc::from(name.into());
        let attempt = connect(Arc::clone(&name), location.clone());

        Self {
            name,
            location,
            state: Arc::new(Mutex::new(ConnectionState::Pending(attempt))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn location(&self) -> &StorageLocation {
        &self.location
    }

    pub fn is_destroyed(&self) -> bool {
        matches!(*self.state.lock(), ConnectionState::Destroyed)
    }

    pub async fn connection(&self) -> Result<Database> {
        let attempt = {
            let state = self.state.lock();
            match &*state {
                ConnectionState::Pending(attempt) => attempt.clone(),
                ConnectionState::Destroyed => return Err(self.terminal()),
            }
        };

        Ok(attempt.await?)
    }

    /// Awaits the connection, then runs `f` in one transaction on the
    /// blocking pool.
    pub async fn transaction<F, T>(&self, mode: TransactionMode, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.connection().await?;
        tokio::task::spawn_blocking(move || db.transaction(mode, f)).await?
    }

    /// Closes the connection and deletes the container. The instance is
    /// terminal from here on: later operations, and ones that have not yet
    /// reached the connection, fail with [`StorageError::Terminal`].
    pub async fn destroy(&self) -> Result<()> {
        let db = self.connection().await?;
        *self.state.lock() = ConnectionState::Destroyed;

        tracing::info!(store = %self.name, "Destroying store");

        tokio::task::spawn_blocking(move || db.destroy()).await?
    }

    fn terminal(&self) -> StorageError {
        StorageError::Terminal {
            name: self.name.to_string(),
        }
    }
}

fn connect(name: Arc<str>, location: StorageLocation) -> ConnectAttempt {
    async move {
        let open_name = Arc::clone(&name);
        let opened =
            tokio::task::spawn_blocking(move || Database::open(&open_name, &location)).await;

        match opened {
            Ok(result) => result,
            Err(e) => Err(ConnectionError::new(&*name, format!("open task failed: {e}"))),
        }
    }
    .boxed()
    .shared()
}

impl Clone for ConnectionManager {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            location: self.location.clone(),
            state: Arc::clone(&self.state),
        }
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("name", &self.name)
            .field("location", &self.location)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}
