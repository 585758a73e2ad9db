//! Larder Core
//!
//! Application-facing layer over the cached record stores: configuration,
//! an explicit context owning the stores, and typed views of the records
//! the application keeps per post.

mod bookmarks;
mod config;
mod context;
mod error;
mod posts;
mod seen;

pub use bookmarks::{Bookmarks, BOOKMARKS_STORE};
pub use config::Config;
pub use context::AppContext;
pub use error::CoreError;
pub use posts::{record_key, PostRef};
pub use seen::{SeenPost, SeenPosts, SEEN_POSTS_STORE};

// Re-export the store layers
pub use larder_cache::{CacheEntry, CachedStore, PendingWrite};
pub use larder_storage::{
    BatchResult, ConnectionError, KeyValueStore, PersistentStore, StorageError, StorageLocation,
};

pub type Result<T> = std::result::Result<T, CoreError>;

/// Filter used when `RUST_LOG` is unset: store lifecycle at info, cache
/// traffic only on request.
pub const DEFAULT_LOG_FILTER: &str = "info,larder_cache=warn";

/// Installs the global `tracing` subscriber. `RUST_LOG` overrides
/// [`DEFAULT_LOG_FILTER`]. Returns `false` when a subscriber was already set.
pub fn init_logging() -> bool {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
