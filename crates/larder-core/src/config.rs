//! Store configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use larder_storage::StorageLocation;

use crate::error::CoreError;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding one database file per store
    pub data_dir: PathBuf,
    /// Keep stores in process memory instead of files
    #[serde(default)]
    pub in_memory: bool,
}

impl Config {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            in_memory: false,
        }
    }

    /// Stores shared by name within this process and gone when the last
    /// connection to them closes.
    pub fn in_memory() -> Self {
        Self {
            data_dir: PathBuf::new(),
            in_memory: true,
        }
    }

    /// `larder` under the platform data root, or `.larder` in the working
    /// directory when the root is unknown.
    pub fn default_data_dir() -> PathBuf {
        match platform_data_dir() {
            Some(root) => root.join("larder"),
            None => PathBuf::from(".larder"),
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn location(&self) -> Result<StorageLocation> {
        if self.in_memory {
            return Ok(StorageLocation::Memory);
        }
        if self.data_dir.as_os_str().is_empty() {
            return Err(CoreError::Config(
                "data_dir must be set unless in_memory is enabled".to_string(),
            ));
        }
        Ok(StorageLocation::Directory(self.data_dir.clone()))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(Self::default_data_dir())
    }
}

/// Per-user data root of the current platform, if its variables are set.
fn platform_data_dir() -> Option<PathBuf> {
    let env_dir = |var: &str| {
        std::env::var_os(var)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
    };

    if cfg!(target_os = "windows") {
        env_dir("LOCALAPPDATA")
    } else if cfg!(target_os = "macos") {
        env_dir("HOME").map(|home| home.join("Library").join("Application Support"))
    } else if cfg!(unix) {
        env_dir("XDG_DATA_HOME")
            .or_else(|| env_dir("HOME").map(|home| home.join(".local").join("share")))
    } else {
        None
    }
}
