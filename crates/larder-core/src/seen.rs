//! Posts the user has already scrolled past

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use larder_cache::{CachedStore, PendingWrite};
use larder_storage::StorageLocation;

use crate::posts::PostRef;
use crate::Result;

pub const SEEN_POSTS_STORE: &str = "seen-posts";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeenPost {
    pub post: PostRef,
    pub last_seen_at: DateTime<Utc>,
    /// Descriptor of the feed the post was last seen in
    pub last_seen_feed: String,
}

#[derive(Clone)]
pub struct SeenPosts {
    store: CachedStore<String, SeenPost>,
}

impl SeenPosts {
    pub fn new(store: CachedStore<String, SeenPost>) -> Self {
        Self { store }
    }

    pub fn open(location: StorageLocation) -> Self {
        Self::new(CachedStore::open(SEEN_POSTS_STORE, location))
    }

    pub fn store(&self) -> &CachedStore<String, SeenPost> {
        &self.store
    }

    pub fn mark_seen(&self, post: &PostRef, feed: &str) -> Result<PendingWrite> {
        let seen = SeenPost {
            post: post.clone(),
            last_seen_at: Utc::now(),
            last_seen_feed: feed.to_string(),
        };
        Ok(self.store.set(post.record_key(), seen)?)
    }

    pub async fn last_seen(&self, post: &PostRef) -> Result<Option<SeenPost>> {
        Ok(self.store.get(&post.record_key()).await?)
    }

    pub async fn is_seen(&self, post: &PostRef) -> Result<bool> {
        Ok(self.last_seen(post).await?.is_some())
    }

    /// True when every post of a non-empty slice has been seen. Resolved
    /// with a single batched read.
    pub async fn is_slice_seen(&self, posts: &[PostRef]) -> Result<bool> {
        if posts.is_empty() {
            return Ok(false);
        }

        let keys: Vec<String> = posts.iter().map(PostRef::record_key).collect();
        let seen = self.store.get_batch(&keys).await?;
        let all_seen = seen.values().all(|post| post.is_some());

        tracing::debug!(posts = posts.len(), all_seen, "Resolved slice seen state");
        Ok(all_seen)
    }
}
