//! Config file change detection
//!
//! The watcher polls the file's content hash and publishes every new valid
//! snapshot on a `watch` channel. Invalid edits are logged and ignored so the
//! running snapshot stays in effect.

use crate::config::parser::{hash_content, parse_config};
use crate::config::types::Config;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Tracks the last seen content hash of a config file
#[derive(Debug)]
pub struct ConfigWatcher {
    path: PathBuf,
    last_hash: String,
}

impl ConfigWatcher {
    pub fn new(path: PathBuf, initial_hash: String) -> Self {
        Self {
            path,
            last_hash: initial_hash,
        }
    }

    /// Checks the file once
    ///
    /// Returns a new config only when the content changed and the new content
    /// is valid. A broken edit is reported once, not on every poll.
    pub fn poll(&mut self) -> Option<Config> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!("Cannot read config {}: {}", self.path.display(), e);
                return None;
            }
        };

        let hash = hash_content(&content);
        if hash == self.last_hash {
            return None;
        }
        self.last_hash = hash;

        match parse_config(&content) {
            Ok(config) => {
                tracing::info!("Configuration change detected in {}", self.path.display());
                Some(config)
            }
            Err(e) => {
                tracing::warn!("Ignoring invalid configuration change: {}", e);
                None
            }
        }
    }
}

/// Polls the config file until shutdown, publishing new snapshots
pub async fn watch_config(
    mut watcher: ConfigWatcher,
    interval: Duration,
    updates: watch::Sender<Arc<Config>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }

        if let Some(config) = watcher.poll() {
            if updates.send(Arc::new(config)).is_err() {
                tracing::debug!("No config subscribers left, stopping watcher");
                break;
            }
        }
    }
}
