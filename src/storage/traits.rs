//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::state::ArticleStatus;
use crate::storage::{
    ArticleMetadata, ArticleRecord, ArticleSummary, DeepScanCheckpoint, ErrorKind, ErrorLogEntry,
    ImageRecord, ImportReport, StreamFilter,
};
use chrono::{DateTime, NaiveDate, Utc};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Article not found: {0}")]
    ArticleNotFound(String),

    #[error("Image not found: {0}")]
    ImageNotFound(String),

    #[error("Invalid status transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: ArticleStatus,
        to: ArticleStatus,
    },

    #[error("Refusing to store empty content for {url}")]
    EmptyContent { url: String },

    #[error("Unsupported snapshot: {0}")]
    UnsupportedSnapshot(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// This trait defines every archive operation used by the crawler and by
/// triage tools.
pub trait Storage {
    // ===== Article Capture =====

    /// Inserts a captured article unless its URL is already stored
    ///
    /// # Arguments
    ///
    /// * `url` - The normalized article URL
    /// * `source_name` - Name of the source that produced the URL
    /// * `content_html` - Raw HTML body; must not be empty
    /// * `metadata` - Title, summary, author, publication time and category
    ///
    /// # Returns
    ///
    /// The article id and whether a new row was created. An existing URL keeps
    /// its original content and metadata.
    fn capture_article(
        &mut self,
        url: &str,
        source_name: &str,
        content_html: &str,
        metadata: &ArticleMetadata,
    ) -> StorageResult<(String, bool)>;

    /// Same as `capture_article` with a title as the only metadata
    fn upsert_article(
        &mut self,
        url: &str,
        source_name: &str,
        content_html: &str,
        title: Option<&str>,
    ) -> StorageResult<(String, bool)> {
        self.capture_article(url, source_name, content_html, &ArticleMetadata::titled(title))
    }

    /// Gets a full article by id
    fn get_article(&self, id: &str) -> StorageResult<ArticleRecord>;

    /// Checks whether a URL has already been captured
    fn is_known(&self, url: &str) -> StorageResult<bool>;

    /// Returns the URLs not yet captured, preserving input order
    fn filter_new_urls(&self, urls: &[String]) -> StorageResult<Vec<String>>;

    // ===== Triage =====

    /// Moves an article to a new status
    ///
    /// Rejected with `InvalidTransition` when the move is not in the
    /// transition table, including same-state moves.
    fn set_status(&mut self, id: &str, status: ArticleStatus) -> StorageResult<()>;

    /// Records whether the original URL still resolves
    fn record_link_check(&mut self, id: &str, alive: bool) -> StorageResult<()>;

    /// Newest articles still in triage (New or Picked), for link checks
    fn articles_for_link_check(&self, limit: usize) -> StorageResult<Vec<ArticleSummary>>;

    // ===== Images =====

    /// Records an image URL for an article; idempotent
    fn save_image(&mut self, article_id: &str, source_url: &str) -> StorageResult<String>;

    /// Marks an image as downloaded to `local_path`
    fn mark_image_downloaded(&mut self, image_id: &str, local_path: &str) -> StorageResult<()>;

    /// Images still waiting for download, oldest first
    fn pending_images(&self, limit: usize) -> StorageResult<Vec<ImageRecord>>;

    /// All images of an article
    fn article_images(&self, article_id: &str) -> StorageResult<Vec<ImageRecord>>;

    // ===== Queries =====

    /// Lists articles matching the filter, newest first
    fn query_stream(&self, filter: &StreamFilter, limit: usize)
        -> StorageResult<Vec<ArticleSummary>>;

    /// Full-text search over title, summary and content, best match first
    fn query_archive(&self, text: &str, limit: usize) -> StorageResult<Vec<ArticleSummary>>;

    // ===== Maintenance =====

    /// Deletes articles in `statuses` captured before `older_than`
    ///
    /// Returns the ids of the deleted articles so callers can remove their
    /// image directories. Image rows cascade.
    fn prune(
        &mut self,
        older_than: DateTime<Utc>,
        statuses: &[ArticleStatus],
    ) -> StorageResult<Vec<String>>;

    /// Writes a complete binary copy of the database to `dest`
    fn export_snapshot(&self, dest: &Path) -> StorageResult<()>;

    /// Writes archived articles and their images as JSON; returns the count
    fn export_archived_json(&self, dest: &Path) -> StorageResult<u64>;

    /// Loads a snapshot produced by either export
    ///
    /// With `merge`, only articles whose URL is unseen are inserted. Without it
    /// the archive is replaced by the snapshot contents.
    fn import_snapshot(&mut self, src: &Path, merge: bool) -> StorageResult<ImportReport>;

    // ===== Deep-Scan Checkpoints =====

    /// Loads the checkpoint for a source and target date
    fn load_checkpoint(
        &self,
        source_name: &str,
        target_date: NaiveDate,
    ) -> StorageResult<Option<DeepScanCheckpoint>>;

    /// Inserts or replaces a checkpoint
    fn save_checkpoint(&mut self, checkpoint: &DeepScanCheckpoint) -> StorageResult<()>;

    // ===== Error Log =====

    /// Appends a failure to the error log
    fn log_error(
        &mut self,
        source_name: &str,
        kind: ErrorKind,
        message: &str,
        url: Option<&str>,
    ) -> StorageResult<()>;

    /// Most recent error log entries, newest first, optionally for one source
    fn recent_errors(
        &self,
        source_name: Option<&str>,
        limit: usize,
    ) -> StorageResult<Vec<ErrorLogEntry>>;

    /// Deletes error log entries older than `older_than`; returns the count
    fn prune_error_log(&mut self, older_than: DateTime<Utc>) -> StorageResult<u64>;

    // ===== Statistics =====

    /// Counts articles in a status
    fn count_by_status(&self, status: ArticleStatus) -> StorageResult<u64>;

    /// Gets total article count
    fn count_total_articles(&self) -> StorageResult<u64>;

    /// Counts articles whose original URL no longer resolves
    fn count_dead_links(&self) -> StorageResult<u64>;

    /// Counts articles captured at or after `since`
    fn count_captured_since(&self, since: DateTime<Utc>) -> StorageResult<u64>;

    /// Counts error log entries written at or after `since`
    fn count_errors_since(&self, since: DateTime<Utc>) -> StorageResult<u64>;

    /// Counts images as (total, pending)
    fn count_images(&self) -> StorageResult<(u64, u64)>;

    /// Gets article counts per source, sorted by name
    fn count_by_source(&self) -> StorageResult<Vec<(String, u64)>>;

    /// Size of the database in bytes
    fn database_size(&self) -> StorageResult<u64>;
}
