//! Statistics generation from the archive
//!
//! This module provides functionality for extracting and displaying
//! archive statistics from the storage layer.

use crate::state::ArticleStatus;
use crate::storage::{ErrorLogEntry, Storage, StorageResult};
use chrono::{Duration as ChronoDuration, Utc};

/// Archive statistics summary
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArchiveStatistics {
    pub total_articles: u64,

    /// Count of articles per triage status, in `ArticleStatus::ALL` order
    pub articles_by_status: Vec<(ArticleStatus, u64)>,

    /// Articles per source, sorted by source name
    pub articles_by_source: Vec<(String, u64)>,

    /// Articles captured in the last 24 hours
    pub captured_last_day: u64,

    /// Articles whose original URL no longer resolves
    pub dead_links: u64,

    pub total_images: u64,
    pub pending_images: u64,

    /// Error log entries written in the last 24 hours
    pub errors_last_day: u64,

    /// Newest error log entries
    pub recent_errors: Vec<ErrorLogEntry>,

    pub database_bytes: u64,
}

/// Error log entries shown in the report
const RECENT_ERRORS: usize = 5;

/// Loads statistics from storage
pub fn load_statistics(storage: &dyn Storage) -> StorageResult<ArchiveStatistics> {
    let mut articles_by_status = Vec::new();
    for status in ArticleStatus::ALL {
        articles_by_status.push((status, storage.count_by_status(status)?));
    }

    let (total_images, pending_images) = storage.count_images()?;
    let day_ago = Utc::now() - ChronoDuration::hours(24);

    Ok(ArchiveStatistics {
        total_articles: storage.count_total_articles()?,
        articles_by_status,
        articles_by_source: storage.count_by_source()?,
        captured_last_day: storage.count_captured_since(day_ago)?,
        dead_links: storage.count_dead_links()?,
        total_images,
        pending_images,
        errors_last_day: storage.count_errors_since(day_ago)?,
        recent_errors: storage.recent_errors(None, RECENT_ERRORS)?,
        database_bytes: storage.database_size()?,
    })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &ArchiveStatistics) {
    println!("=== Archive Statistics ===\n");

    println!("Overview:");
    println!("  Total articles: {}", stats.total_articles);
    println!("  Captured in the last 24h: {}", stats.captured_last_day);
    println!("  Dead links: {}", stats.dead_links);
    println!(
        "  Database size: {:.1} MiB",
        stats.database_bytes as f64 / (1024.0 * 1024.0)
    );
    println!();

    println!("Articles by Status:");
    for (status, count) in &stats.articles_by_status {
        let percentage = if stats.total_articles > 0 {
            (*count as f64 / stats.total_articles as f64) * 100.0
        } else {
            0.0
        };
        println!("  {}: {} ({:.1}%)", status, count, percentage);
    }
    println!();

    if !stats.articles_by_source.is_empty() {
        println!("Articles by Source ({}):", stats.articles_by_source.len());
        for (source, count) in &stats.articles_by_source {
            println!("  - {}: {}", source, count);
        }
        println!();
    }

    println!(
        "Images: {} ({} waiting for download)",
        stats.total_images, stats.pending_images
    );

    println!("\nErrors in the last 24h: {}", stats.errors_last_day);
    for entry in &stats.recent_errors {
        println!(
            "  {} [{}] {}: {}{}",
            entry.logged_at,
            entry.source_name,
            entry.kind.to_db_string(),
            entry.message,
            entry
                .url
                .as_deref()
                .map(|url| format!(" ({})", url))
                .unwrap_or_default()
        );
    }
}
