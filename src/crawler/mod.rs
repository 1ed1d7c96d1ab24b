//! Crawler module for fetching and capturing articles
//!
//! This module contains the live capture machinery, including:
//! - HTTP fetching with conditional requests, retries and proxy rotation
//! - Title and image extraction from captured pages
//! - The capture pipeline and background image downloads
//! - Per-source polling loops and their coordination

mod archiver;
mod coordinator;
mod fetcher;
mod images;
mod parser;
mod proxy;
mod retry;
mod scheduler;

pub use archiver::{Archiver, CaptureOutcome, LinkCheckReport};
pub use coordinator::{run_cleanup, run_monitor, CleanupReport, Coordinator, ReconcileReport};
pub use fetcher::{build_http_client, fetch_url, CacheValidators, FetchOutcome, Fetcher, LinkStatus};
pub use images::{
    extension_for_content_type, remove_image_dirs, requeue_pending, spawn_image_downloader,
    ImageJob, ImageQueue,
};
pub use parser::{parse_article, parse_display_date, resolve_link, ParsedArticle};
pub use proxy::{ProxyClient, ProxyPool};
pub use retry::{classify_status, FailureType, RetryDecision, RetryPolicy};
pub use scheduler::{jitter, poll_interval, CycleOutcome, SourceLoop};
