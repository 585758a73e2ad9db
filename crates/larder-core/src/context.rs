//! Application context
//!
//! Owns the record stores the application reads and writes. Callers build
//! one context and hand it (or its stores) to whatever needs them; the
//! context decides when the stores are created and destroyed.

use crate::bookmarks::Bookmarks;
use crate::config::Config;
use crate::seen::SeenPosts;
use crate::Result;

#[derive(Clone)]
pub struct AppContext {
    config: Config,
    bookmarks: Bookmarks,
    seen_posts: SeenPosts,
}

impl AppContext {
    /// Builds every store. Containers are opened lazily on first use.
    pub fn open(config: Config) -> Result<Self> {
        let location = config.location()?;

        tracing::info!(location = ?location, "Opening application stores");

        Ok(Self {
            bookmarks: Bookmarks::open(location.clone()),
            seen_posts: SeenPosts::open(location),
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn bookmarks(&self) -> &Bookmarks {
        &self.bookmarks
    }

    pub fn seen_posts(&self) -> &SeenPosts {
        &self.seen_posts
    }

    /// Destroys every store. Both are attempted; the first failure is
    /// returned.
    pub async fn destroy(&self) -> Result<()> {
        let bookmarks = self.bookmarks.store().destroy().await;
        let seen_posts = self.seen_posts.store().destroy().await;

        tracing::info!("Destroyed application stores");

        bookmarks?;
        seen_posts?;
        Ok(())
    }
}
