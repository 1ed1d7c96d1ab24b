//! Storage module for the article archive
//!
//! This module handles all database operations, including:
//! - SQLite database initialization and schema management (WAL mode, FTS5 index)
//! - Write-once article capture with URL deduplication
//! - The triage status state machine
//! - Image bookkeeping and deep-scan checkpoints
//! - The error log of scan and capture failures
//! - Pruning, snapshot export and import

mod handle;
mod schema;
mod snapshot;
mod sqlite;
mod traits;

pub use handle::StoreHandle;
pub use snapshot::{SnapshotArticle, SnapshotDocument, SnapshotImage};
pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use crate::state::ArticleStatus;
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};

/// Length of the hex ids derived from URLs
const ID_LENGTH: usize = 16;

/// Deterministic article id: the first 16 hex chars of SHA-256 over the URL
pub fn article_id_for(url: &str) -> String {
    short_hash(&[url])
}

/// Deterministic image id, scoped to its article
pub fn image_id_for(article_id: &str, image_url: &str) -> String {
    short_hash(&[article_id, image_url])
}

fn short_hash(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
    }
    let mut id = hex::encode(hasher.finalize());
    id.truncate(ID_LENGTH);
    id
}

/// Timestamp format stored in the database
///
/// Fixed width and UTC so that string comparison orders chronologically.
pub fn db_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// A fully captured article
#[derive(Debug, Clone, PartialEq)]
pub struct ArticleRecord {
    pub id: String,
    pub source_name: String,
    pub url: String,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub author: Option<String>,
    pub published_at: Option<String>,
    pub category: Option<String>,
    pub content_html: String,
    pub status: ArticleStatus,
    pub link_alive: bool,
    pub crawled_at: String,
    pub status_changed_at: Option<String>,
}

/// Metadata lifted from an article page at capture time
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArticleMetadata {
    pub title: Option<String>,
    /// Lead paragraph or description
    pub summary: Option<String>,
    pub author: Option<String>,
    /// Publication time as written by the site, usually RFC 3339
    pub published_at: Option<String>,
    pub category: Option<String>,
}

impl ArticleMetadata {
    /// Metadata carrying only a title
    pub fn titled(title: Option<&str>) -> Self {
        Self {
            title: title.map(str::to_string),
            ..Self::default()
        }
    }
}

/// Article metadata without the stored HTML, used for listings
#[derive(Debug, Clone, PartialEq)]
pub struct ArticleSummary {
    pub id: String,
    pub source_name: String,
    pub url: String,
    pub title: Option<String>,
    pub status: ArticleStatus,
    pub link_alive: bool,
    pub crawled_at: String,
}

/// An image referenced by an article
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRecord {
    pub id: String,
    pub article_id: String,
    pub source_url: String,
    pub local_path: Option<String>,
    pub downloaded: bool,
    pub created_at: String,
}

/// Filter for the triage stream
#[derive(Debug, Clone, Default)]
pub struct StreamFilter {
    pub status: Option<ArticleStatus>,
    pub source_name: Option<String>,
    pub since: Option<DateTime<Utc>>,
}

impl StreamFilter {
    pub fn with_status(status: ArticleStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

/// Progress of a deep scan for one (source, target date) pair
#[derive(Debug, Clone, PartialEq)]
pub struct DeepScanCheckpoint {
    pub source_name: String,
    pub target_date: NaiveDate,
    /// Next listing page to fetch (1-based)
    pub current_page: u32,
    /// Oldest date seen on the last dated page
    pub last_date_seen: Option<NaiveDateTime>,
    pub run_status: ScanRunStatus,
    pub pages_visited: u32,
    pub articles_found: u32,
    pub updated_at: String,
}

impl DeepScanCheckpoint {
    /// A fresh checkpoint positioned on the first listing page
    pub fn new(source_name: &str, target_date: NaiveDate) -> Self {
        Self {
            source_name: source_name.to_string(),
            target_date,
            current_page: 1,
            last_date_seen: None,
            run_status: ScanRunStatus::Running,
            pages_visited: 0,
            articles_found: 0,
            updated_at: db_timestamp(Utc::now()),
        }
    }
}

/// Status of a deep-scan run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanRunStatus {
    Running,
    Completed,
    Failed,
}

impl ScanRunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// What failed when an error log entry was written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Listing or feed scan
    Scan,
    /// Fetching or storing a single article
    Capture,
}

impl ErrorKind {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Scan => "scan",
            Self::Capture => "capture",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "scan" => Some(Self::Scan),
            "capture" => Some(Self::Capture),
            _ => None,
        }
    }
}

/// One row of the error log
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorLogEntry {
    pub id: i64,
    pub source_name: String,
    pub kind: ErrorKind,
    pub message: String,
    pub url: Option<String>,
    pub logged_at: String,
}

/// Outcome of merging or replacing from a snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub articles_imported: u64,
    pub articles_skipped: u64,
    pub images_imported: u64,
}
