//! Bookmarked posts

use larder_cache::{CachedStore, PendingWrite};
use larder_storage::StorageLocation;

use crate::posts::PostRef;
use crate::Result;

pub const BOOKMARKS_STORE: &str = "bookmarked";

/// Bookmark flags keyed by post identity.
#[derive(Clone)]
pub struct Bookmarks {
    store: CachedStore<String, bool>,
}

impl Bookmarks {
    pub fn new(store: CachedStore<String, bool>) -> Self {
        Self { store }
    }

    pub fn open(location: StorageLocation) -> Self {
        Self::new(CachedStore::open(BOOKMARKS_STORE, location))
    }

    pub fn store(&self) -> &CachedStore<String, bool> {
        &self.store
    }

    /// A post that was never bookmarked reads as `false`.
    pub async fn is_bookmarked(&self, post: &PostRef) -> Result<bool> {
        let bookmarked = self.store.get(&post.record_key()).await?;
        Ok(bookmarked.unwrap_or(false))
    }

    pub fn set_bookmarked(&self, post: &PostRef, bookmarked: bool) -> Result<PendingWrite> {
        tracing::debug!(uri = %post.uri, bookmarked, "Updating bookmark");
        Ok(self.store.set(post.record_key(), bookmarked)?)
    }
}
