//! Triage interface over the archive
//!
//! Editors list the stream of captured articles, pick the ones worth following
//! up, and archive or discard them. Any number of triage processes can open the
//! same database file while the monitor keeps writing to it.
//!
//! # Example
//!
//! ```no_run
//! use snapwire::storage::StreamFilter;
//! use snapwire::triage::Triage;
//! use snapwire::ArticleStatus;
//! use std::path::Path;
//!
//! let triage = Triage::open_read_only(Path::new("data/articles.db")).unwrap();
//! let new = StreamFilter::with_status(ArticleStatus::New);
//! for article in triage.get_stream(&new, 20).unwrap() {
//!     println!("{} {}", article.id, article.url);
//! }
//! ```

use crate::state::ArticleStatus;
use crate::storage::{
    ArticleRecord, ArticleSummary, ImageRecord, SqliteStorage, Storage, StorageResult, StreamFilter,
};
use std::path::Path;

pub struct Triage<S: Storage> {
    storage: S,
}

impl Triage<SqliteStorage> {
    /// Opens the archive for reading and status changes
    pub fn open(path: &Path) -> StorageResult<Self> {
        Ok(Self::new(SqliteStorage::new(path)?))
    }

    /// Opens the archive for listing and search only
    ///
    /// Status changes on a read-only triage fail with a storage error.
    pub fn open_read_only(path: &Path) -> StorageResult<Self> {
        Ok(Self::new(SqliteStorage::open_read_only(path)?))
    }
}

impl<S: Storage> Triage<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// Articles matching `filter`, newest first
    pub fn get_stream(
        &self,
        filter: &StreamFilter,
        limit: usize,
    ) -> StorageResult<Vec<ArticleSummary>> {
        self.storage.query_stream(filter, limit)
    }

    /// Flags a new article for follow-up
    pub fn pick(&mut self, id: &str) -> StorageResult<()> {
        self.storage.set_status(id, ArticleStatus::Picked)
    }

    /// Keeps an article permanently
    pub fn archive(&mut self, id: &str) -> StorageResult<()> {
        self.storage.set_status(id, ArticleStatus::Archived)
    }

    /// Rejects an article; it is pruned once past retention
    pub fn discard(&mut self, id: &str) -> StorageResult<()> {
        self.storage.set_status(id, ArticleStatus::Discarded)
    }

    /// Full-text search, best match first
    pub fn search(&self, text: &str, limit: usize) -> StorageResult<Vec<ArticleSummary>> {
        self.storage.query_archive(text, limit)
    }

    pub fn article(&self, id: &str) -> StorageResult<ArticleRecord> {
        self.storage.get_article(id)
    }

    pub fn images(&self, article_id: &str) -> StorageResult<Vec<ImageRecord>> {
        self.storage.article_images(article_id)
    }
}
