//! Database connection and transactions

use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ConnectionError, StorageError};
use crate::migrations::{drop_schema, run_migrations};
use crate::Result;

const FILE_EXTENSION: &str = "sqlite3";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Where a store's container lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageLocation {
    /// One database file per store name inside this directory.
    Directory(PathBuf),
    /// Process-local in-memory containers, keyed by store name. Every
    /// connection to a name sees the same data. A container lives as long
    /// as one connection to it stays open.
    Memory,
}

impl StorageLocation {
    pub fn file_path(&self, name: &str) -> Option<PathBuf> {
        match self {
            StorageLocation::Directory(dir) => Some(dir.join(format!("{name}.{FILE_EXTENSION}"))),
            StorageLocation::Memory => None,
        }
    }

    fn connect(&self, name: &str) -> std::result::Result<Connection, ConnectionError> {
        match self.file_path(name) {
            Some(path) => {
                if let Some(dir) = path.parent() {
                    std::fs::create_dir_all(dir).map_err(|e| ConnectionError::new(name, e))?;
                }
                let conn = Connection::open(&path).map_err(|e| ConnectionError::new(name, e))?;

                // WAL so a second instance on the same file can read while one writes
                let _: String = conn
                    .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
                    .map_err(|e| ConnectionError::new(name, e))?;
                Ok(conn)
            }
            None => {
                // memdb with a leading '/' is shared across connections and
                // locks like a file, so busy_timeout covers contention
                let uri = format!("file:/larder-{name}?vfs=memdb");
                Connection::open_with_flags(uri, OpenFlags::default())
                    .map_err(|e| ConnectionError::new(name, e))
            }
        }
    }

    fn remove(&self, name: &str) -> Result<()> {
        let Some(path) = self.file_path(name) else {
            return Ok(());
        };

        for suffix in ["", "-wal", "-shm"] {
            let mut target = path.clone().into_os_string();
            target.push(suffix);
            remove_if_exists(Path::new(&target))?;
        }
        Ok(())
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StorageError::Request(format!(
            "failed to delete {}: {e}",
            path.display()
        ))),
    }
}

/// Store names become file names and URI segments, so keep them plain.
pub fn validate_name(name: &str) -> std::result::Result<(), ConnectionError> {
    if name.is_empty() {
        return Err(ConnectionError::new(name, "store name cannot be empty"));
    }
    if name.starts_with('.') {
        return Err(ConnectionError::new(name, "store name cannot start with '.'"));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(ConnectionError::new(
            name,
            format!("store name contains invalid character {bad:?}"),
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    ReadOnly,
    ReadWrite,
}

impl TransactionMode {
    fn behavior(self) -> TransactionBehavior {
        match self {
            TransactionMode::ReadOnly => TransactionBehavior::Deferred,
            // Take the write lock up front so the upsert never has to upgrade
            TransactionMode::ReadWrite => TransactionBehavior::Immediate,
        }
    }
}

/// Open handle to one store's container.
///
/// Clones share the same underlying connection. Once [`Database::destroy`]
/// has run, every clone reports [`StorageError::Terminal`].
pub struct Database {
    name: Arc<str>,
    location: StorageLocation,
    conn: Arc<Mutex<Option<Connection>>>,
}

impl Database {
    pub fn open(name: &str, location: &StorageLocation) -> std::result::Result<Self, ConnectionError> {
        validate_name(name)?;

        let conn = location.connect(name)?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| ConnectionError::new(name, e))?;
        run_migrations(&conn).map_err(|e| ConnectionError::new(name, e))?;

        tracing::info!(store = %name, location = ?location, "Opened store container");

        Ok(Self {
            name: Arc::from(name),
            location: location.clone(),
            conn: Arc::new(Mutex::new(Some(conn))),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_closed(&self) -> bool {
        self.conn.lock().is_none()
    }

    /// Runs `f` inside one transaction. An error from `f` rolls the
    /// transaction back without partial effect.
    pub fn transaction<F, T>(&self, mode: TransactionMode, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let mut guard = self.conn.lock();
        let conn = guard.as_mut().ok_or_else(|| StorageError::Terminal {
            name: self.name.to_string(),
        })?;

        let tx = conn
            .transaction_with_behavior(mode.behavior())
            .map_err(StorageError::transaction)?;
        let result = f(&tx)?;
        tx.commit().map_err(StorageError::transaction)?;
        Ok(result)
    }

    /// Closes the connection and deletes the container. Every clone of this
    /// handle fails with [`StorageError::Terminal`] afterwards.
    pub fn destroy(&self) -> Result<()> {
        let conn = self.conn.lock().take();

        if let Some(conn) = conn {
            if self.location == StorageLocation::Memory {
                drop_schema(&conn)?;
            }
            conn.close().map_err(|(_, e)| StorageError::from(e))?;
        }

        self.location.remove(&self.name)?;
        tracing::info!(store = %self.name, "Deleted store container");
        Ok(())
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            location: self.location.clone(),
            conn: Arc::clone(&self.conn),
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.name)
            .field("location", &self.location)
            .field("closed", &self.is_closed())
            .finish()
    }
}
