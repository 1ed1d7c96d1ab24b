//! Configuration module for Snapwire
//!
//! This module handles loading, parsing, and validating TOML configuration files,
//! and watching them for changes while the monitor runs.
//!
//! # Example
//!
//! ```no_run
//! use snapwire::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("snapwire.toml")).unwrap();
//! println!("Watching {} sources", config.sources.len());
//! ```

mod parser;
mod types;
mod validation;
mod watcher;

// Re-export types
pub use types::{
    CleanupConfig, Config, CrawlerConfig, DeepScanConfig, ProxyConfig, ProxyRotation,
    SourceConfig, SourceKind, StorageConfig,
};

// Re-export parser functions
pub use parser::{
    compute_config_hash, hash_content, load_config, load_config_with_hash, parse_config,
};

pub use watcher::{watch_config, ConfigWatcher};
