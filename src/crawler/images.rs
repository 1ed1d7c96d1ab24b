//! Background image downloader
//!
//! Captures enqueue image jobs on a bounded channel; a single consumer task
//! downloads them with bounded concurrency. A capture never waits on an image.

use crate::storage::{ImageRecord, Storage, StoreHandle};
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;

/// One image to download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageJob {
    pub image_id: String,
    pub article_id: String,
    pub url: String,
}

impl From<ImageRecord> for ImageJob {
    fn from(record: ImageRecord) -> Self {
        Self {
            image_id: record.id,
            article_id: record.article_id,
            url: record.source_url,
        }
    }
}

/// Producer side of the image channel
#[derive(Debug, Clone)]
pub struct ImageQueue {
    tx: mpsc::Sender<ImageJob>,
}

impl ImageQueue {
    /// Queues a job without waiting
    ///
    /// Returns false when the queue is full or closed. The image row stays
    /// pending and is picked up by the next startup resweep.
    pub fn enqueue(&self, job: ImageJob) -> bool {
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(job)) => {
                tracing::warn!("Image queue full, leaving {} pending", job.url);
                false
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                tracing::debug!("Image downloader stopped, leaving {} pending", job.url);
                false
            }
        }
    }
}

/// Starts the downloader task
///
/// The task ends once every `ImageQueue` clone is dropped and the in-flight
/// downloads finish.
pub fn spawn_image_downloader(
    client: Client,
    store: StoreHandle,
    images_dir: PathBuf,
    concurrency: usize,
    capacity: usize,
) -> (ImageQueue, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<ImageJob>(capacity.max(1));
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));

    let handle = tokio::spawn(async move {
        let mut workers = Vec::new();

        while let Some(job) = rx.recv().await {
            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let client = client.clone();
            let store = store.clone();
            let images_dir = images_dir.clone();

            workers.push(tokio::spawn(async move {
                let _permit = permit;
                if let Err(e) = download_image(&client, &store, &images_dir, &job).await {
                    tracing::warn!(
                        "Image {} for article {} failed: {}",
                        job.url,
                        job.article_id,
                        e
                    );
                }
            }));
            workers.retain(|worker: &JoinHandle<()>| !worker.is_finished());
        }

        for worker in workers {
            let _ = worker.await;
        }
        tracing::debug!("Image downloader stopped");
    });

    (ImageQueue { tx }, handle)
}

async fn download_image(
    client: &Client,
    store: &StoreHandle,
    images_dir: &Path,
    job: &ImageJob,
) -> Result<(), String> {
    let response = client
        .get(&job.url)
        .send()
        .await
        .map_err(|e| e.to_string())?;

    if !response.status().is_success() {
        return Err(format!("HTTP {}", response.status().as_u16()));
    }

    let extension = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(extension_for_content_type)
        .unwrap_or("bin");

    let bytes = response.bytes().await.map_err(|e| e.to_string())?;
    if bytes.is_empty() {
        return Err("empty body".to_string());
    }

    let dir = images_dir.join(&job.article_id);
    tokio::fs::create_dir_all(&dir).await.map_err(|e| e.to_string())?;
    let path = dir.join(format!("{}.{}", job.image_id, extension));
    tokio::fs::write(&path, &bytes).await.map_err(|e| e.to_string())?;

    let image_id = job.image_id.clone();
    let local_path = path.to_string_lossy().into_owned();
    store
        .call(move |s| s.mark_image_downloaded(&image_id, &local_path))
        .await
        .map_err(|e| e.to_string())?;

    tracing::debug!("Saved image {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}

/// Maps an image Content-Type to a file extension
pub fn extension_for_content_type(content_type: &str) -> &'static str {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    match mime.as_str() {
        "image/jpeg" | "image/jpg" | "image/pjpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/avif" => "avif",
        "image/svg+xml" => "svg",
        "image/bmp" => "bmp",
        _ => "bin",
    }
}

/// Re-enqueues images still marked pending, oldest first
pub async fn requeue_pending(store: &StoreHandle, queue: &ImageQueue, limit: usize) -> usize {
    let pending = match store.call(move |s| s.pending_images(limit)).await {
        Ok(pending) => pending,
        Err(e) => {
            tracing::warn!("Could not load pending images: {}", e);
            return 0;
        }
    };

    let mut queued = 0;
    for record in pending {
        if !queue.enqueue(ImageJob::from(record)) {
            break;
        }
        queued += 1;
    }

    if queued > 0 {
        tracing::info!("Re-queued {} pending images", queued);
    }
    queued
}

/// Removes the image directories of pruned articles
pub async fn remove_image_dirs(images_dir: &Path, article_ids: &[String]) -> usize {
    let mut removed = 0;
    for id in article_ids {
        let dir = images_dir.join(id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Could not remove {}: {}", dir.display(), e),
        }
    }
    removed
}
