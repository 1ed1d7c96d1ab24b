//! Candidate discovery for each source kind
//!
//! - `feed`: live mode, polling an RSS/Atom feed or a sitemap
//! - `deep_scan`: historical mode, walking paginated listing pages back to a date

pub mod deep_scan;
pub mod feed;

pub use deep_scan::{parse_listing, parse_listing_date, DeepScanner, ListingItem};
pub use feed::{is_article_url, parse_feed, FeedScanner, ParsedFeed};

/// Result of one live-mode scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Unseen article URLs, in feed order
    Candidates(Vec<String>),

    /// The feed answered 304
    NotModified,

    /// The feed itself answered 429
    RateLimited,

    /// Fetch or parse failure; the loop retries next cycle
    Failed(String),
}
