//! Output module for operator-facing reporting
//!
//! This module handles:
//! - Alert events for rate limiting, failing sources and store outages
//! - Archive statistics for the `--stats` report
//! - Standalone HTML pages for single articles

pub mod alerts;
pub mod html;
pub mod stats;

pub use alerts::{log_alerts, AlertEvent, AlertSender};
pub use html::{export_article_html, format_article_html, generate_article_html};
pub use stats::{load_statistics, print_statistics, ArchiveStatistics};
