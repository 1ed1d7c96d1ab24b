//! Snapwire: a news capture engine
//!
//! Snapwire watches news sources (RSS feeds and sitemaps), captures the full HTML
//! of every newly published article the moment it appears, and keeps it in a
//! SQLite archive that triage tools can read while the crawl keeps writing.
//! A deep-scan mode walks paginated listings backwards to a target date.

pub mod config;
pub mod crawler;
pub mod output;
pub mod scanner;
pub mod state;
pub mod storage;
pub mod triage;
pub mod url;

use thiserror::Error;

/// Main error type for Snapwire operations
#[derive(Debug, Error)]
pub enum SnapwireError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("URL error: {0}")]
    Url(#[from] UrlError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("Unknown source: {0}")]
    UnknownSource(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for Snapwire operations
pub type Result<T> = std::result::Result<T, SnapwireError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use state::{ArticleStatus, SourceState};
pub use storage::{SqliteStorage, Storage, StorageError};
pub use url::normalize_url;
