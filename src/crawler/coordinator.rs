//! Monitor coordination
//!
//! The coordinator owns one polling loop per enabled source and reconciles the
//! running set against every new config snapshot:
//! - removed or disabled sources are stopped
//! - new sources are started
//! - sources whose settings changed are restarted
//! - a change to crawler or proxy settings restarts everything with a fresh
//!   fetcher
//!
//! `run_monitor` wires the coordinator to the store, the image downloader, the
//! config watcher and the daily cleanup task.

use crate::config::{watch_config, CleanupConfig, Config, ConfigWatcher, SourceConfig};
use crate::crawler::archiver::Archiver;
use crate::crawler::fetcher::Fetcher;
use crate::crawler::images::{
    remove_image_dirs, requeue_pending, spawn_image_downloader, ImageQueue,
};
use crate::crawler::scheduler::SourceLoop;
use crate::output::{AlertEvent, AlertSender};
use crate::state::ArticleStatus;
use crate::storage::{SqliteStorage, Storage, StorageResult, StoreHandle};
use crate::SnapwireError;
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Bounded queue between capture and image download
const IMAGE_QUEUE_CAPACITY: usize = 1024;

/// Pending images re-queued at startup
const PENDING_REQUEUE_LIMIT: usize = 1024;

const CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

struct RunningSource {
    config: SourceConfig,
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// What a reconcile pass changed, by source name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub started: Vec<String>,
    pub stopped: Vec<String>,
    pub restarted: Vec<String>,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.started.is_empty() && self.stopped.is_empty() && self.restarted.is_empty()
    }
}

pub struct Coordinator {
    config: Arc<Config>,
    store: StoreHandle,
    alerts: AlertSender,
    images: Option<ImageQueue>,
    archiver: Archiver,
    loops: HashMap<String, RunningSource>,
    retired: Vec<JoinHandle<()>>,
}

impl Coordinator {
    /// Creates a coordinator with no running loops
    ///
    /// # Errors
    ///
    /// Fails when the HTTP clients for the configured proxies cannot be built.
    pub fn new(
        config: Arc<Config>,
        store: StoreHandle,
        alerts: AlertSender,
        images: Option<ImageQueue>,
    ) -> Result<Self, SnapwireError> {
        let archiver = build_archiver(&config, &store, &alerts, &images)?;
        Ok(Self {
            config,
            store,
            alerts,
            images,
            archiver,
            loops: HashMap::new(),
            retired: Vec::new(),
        })
    }

    /// Names of the sources currently polled, sorted
    pub fn running_sources(&self) -> Vec<String> {
        let mut names: Vec<String> = self.loops.keys().cloned().collect();
        names.sort();
        names
    }

    /// Starts the loops of `config.enabled_sources()` that are not running yet
    pub fn start(&mut self) -> ReconcileReport {
        let config = Arc::clone(&self.config);
        self.reconcile(config)
    }

    /// Brings the running loops in line with `next`
    pub fn reconcile(&mut self, next: Arc<Config>) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        let shared_changed =
            next.crawler != self.config.crawler || next.proxy != self.config.proxy;

        if shared_changed {
            match build_archiver(&next, &self.store, &self.alerts, &self.images) {
                Ok(archiver) => {
                    tracing::info!("Crawler settings changed, restarting all sources");
                    self.archiver = archiver;
                }
                Err(e) => {
                    tracing::error!("Keeping previous HTTP settings: {}", e);
                }
            }
        }

        let wanted: HashMap<&str, &SourceConfig> =
            next.enabled_sources().map(|s| (s.name.as_str(), s)).collect();

        let running: Vec<String> = self.loops.keys().cloned().collect();
        for name in running {
            match wanted.get(name.as_str()) {
                None => {
                    self.stop(&name);
                    report.stopped.push(name);
                }
                Some(source) => {
                    let changed = self
                        .loops
                        .get(&name)
                        .map(|running| running.config != **source)
                        .unwrap_or(true);
                    if changed || shared_changed {
                        self.stop(&name);
                        report.restarted.push(name);
                    }
                }
            }
        }

        self.config = Arc::clone(&next);

        for source in next.enabled_sources() {
            if self.loops.contains_key(&source.name) {
                continue;
            }
            self.spawn(source.clone());
            if !report.restarted.contains(&source.name) {
                report.started.push(source.name.clone());
            }
        }

        report.started.sort();
        report.stopped.sort();
        report.restarted.sort();

        if !report.is_empty() {
            tracing::info!(
                "Sources reconciled: started {:?}, stopped {:?}, restarted {:?}",
                report.started,
                report.stopped,
                report.restarted
            );
        }

        report
    }

    fn spawn(&mut self, source: SourceConfig) {
        let (cancel, cancel_rx) = watch::channel(false);
        let source_loop = SourceLoop::new(
            source.clone(),
            self.config.crawler.clone(),
            self.archiver.clone(),
            self.alerts.clone(),
        );
        let handle = tokio::spawn(source_loop.run(cancel_rx));

        self.loops.insert(
            source.name.clone(),
            RunningSource {
                config: source,
                cancel,
                handle,
            },
        );
    }

    fn stop(&mut self, name: &str) {
        if let Some(running) = self.loops.remove(name) {
            let _ = running.cancel.send(true);
            self.retired.push(running.handle);
        }
        self.retired.retain(|handle| !handle.is_finished());
    }

    /// Cancels every loop and waits for in-flight work to finish
    pub async fn shutdown(mut self) {
        let names: Vec<String> = self.loops.keys().cloned().collect();
        for name in names {
            self.stop(&name);
        }
        for handle in self.retired.drain(..) {
            if let Err(e) = handle.await {
                tracing::warn!("Source loop ended abnormally: {}", e);
            }
        }
    }

    /// Runs until `shutdown` turns true, applying config updates as they come
    pub async fn run(
        mut self,
        mut updates: watch::Receiver<Arc<Config>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        self.start();
        let mut watching = true;

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                changed = updates.changed(), if watching => {
                    if changed.is_err() {
                        watching = false;
                        continue;
                    }
                    let next = Arc::clone(&updates.borrow_and_update());
                    self.reconcile(next);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Stopping {} source loops", self.loops.len());
        self.shutdown().await;
    }
}

fn build_archiver(
    config: &Config,
    store: &StoreHandle,
    alerts: &AlertSender,
    images: &Option<ImageQueue>,
) -> Result<Archiver, SnapwireError> {
    let fetcher = Fetcher::from_config(&config.crawler, &config.proxy)?;
    Ok(Archiver::new(
        Arc::new(fetcher),
        store.clone(),
        images.clone(),
        alerts.clone(),
        config.crawler.max_images_per_article,
    ))
}

/// What one cleanup pass removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub articles: usize,
    pub error_entries: u64,
}

/// Deletes discarded articles past retention with their image directories,
/// then error log entries older than `error-log-days`
pub async fn run_cleanup(
    store: &StoreHandle,
    images_dir: &Path,
    cleanup: &CleanupConfig,
) -> StorageResult<CleanupReport> {
    let cutoff = Utc::now() - chrono::Duration::days(i64::from(cleanup.discard_after_days));
    let pruned = store
        .call(move |s| s.prune(cutoff, &[ArticleStatus::Discarded]))
        .await?;

    let dirs = remove_image_dirs(images_dir, &pruned).await;
    if !pruned.is_empty() {
        tracing::info!(
            "Pruned {} discarded articles ({} image directories)",
            pruned.len(),
            dirs
        );
    }

    let error_cutoff = Utc::now() - chrono::Duration::days(i64::from(cleanup.error_log_days));
    let error_entries = store
        .call(move |s| s.prune_error_log(error_cutoff))
        .await?;
    if error_entries > 0 {
        tracing::info!("Removed {} old error log entries", error_entries);
    }

    Ok(CleanupReport {
        articles: pruned.len(),
        error_entries,
    })
}

/// Runs cleanup every `interval` with the newest config snapshot
///
/// A snapshot with cleanup disabled skips the round without stopping the task.
async fn cleanup_task(
    store: StoreHandle,
    images_dir: PathBuf,
    config: watch::Receiver<Arc<Config>>,
    alerts: AlertSender,
    mut shutdown: watch::Receiver<bool>,
    interval: Duration,
) {
    let mut run_now = config.borrow().cleanup.run_on_start;

    loop {
        let cleanup = config.borrow().cleanup.clone();
        if run_now && cleanup.enabled {
            if let Err(e) = run_cleanup(&store, &images_dir, &cleanup).await {
                tracing::error!("Cleanup failed: {}", e);
                alerts.emit(AlertEvent::StoreUnavailable {
                    source_name: None,
                    reason: e.to_string(),
                });
            }
        }
        run_now = true;

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

/// Runs the live monitor until `shutdown` turns true
///
/// # Arguments
///
/// * `config` - The loaded configuration
/// * `config_path` - Watched for changes while running
/// * `config_hash` - Hash of the content `config` was loaded from
/// * `shutdown` - Flips to true on Ctrl-C
/// * `alerts` - Sink for operator alerts
pub async fn run_monitor(
    config: Config,
    config_path: PathBuf,
    config_hash: String,
    shutdown: watch::Receiver<bool>,
    alerts: AlertSender,
) -> Result<(), SnapwireError> {
    let db_path = PathBuf::from(&config.storage.database_path);
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let images_dir = PathBuf::from(&config.storage.images_dir);
    std::fs::create_dir_all(&images_dir)?;

    let storage = SqliteStorage::new(&db_path)?;
    let store = StoreHandle::new(storage);
    tracing::info!("Archive opened at {}", db_path.display());

    let download_client = Fetcher::from_config(&config.crawler, &config.proxy)?.client();
    let (image_queue, downloader) = spawn_image_downloader(
        download_client,
        store.clone(),
        images_dir.clone(),
        config.crawler.image_concurrency,
        IMAGE_QUEUE_CAPACITY,
    );
    requeue_pending(&store, &image_queue, PENDING_REQUEUE_LIMIT).await;

    let config = Arc::new(config);
    let (updates_tx, updates_rx) = watch::channel(Arc::clone(&config));
    let watcher = tokio::spawn(watch_config(
        ConfigWatcher::new(config_path, config_hash),
        config.crawler.config_poll_interval(),
        updates_tx,
        shutdown.clone(),
    ));

    let cleanup = tokio::spawn(cleanup_task(
        store.clone(),
        images_dir,
        updates_rx.clone(),
        alerts.clone(),
        shutdown.clone(),
        CLEANUP_INTERVAL,
    ));

    let coordinator = Coordinator::new(
        Arc::clone(&config),
        store,
        alerts,
        Some(image_queue),
    )?;
    coordinator.run(updates_rx, shutdown).await;

    let _ = watcher.await;
    let _ = cleanup.await;
    // The queue's last sender went away with the coordinator
    let _ = downloader.await;

    tracing::info!("Monitor stopped");
    Ok(())
}
