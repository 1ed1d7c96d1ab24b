//! Article capture pipeline
//!
//! A candidate URL is normalized, checked against the archive, fetched once,
//! and stored with its extracted metadata. Failures are written to the error
//! log. Image downloads are handed to the
//! background downloader so a capture never waits on them.

use crate::crawler::fetcher::{FetchOutcome, Fetcher, LinkStatus};
use crate::crawler::images::{ImageJob, ImageQueue};
use crate::crawler::parser::parse_article;
use crate::output::{AlertEvent, AlertSender};
use crate::storage::{ErrorKind, Storage, StorageError, StoreHandle};
use crate::url::normalize_url;
use std::sync::Arc;
use url::Url;

/// Result of one capture attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// A new article row was written
    Captured { article_id: String, images: usize },

    /// The URL was already archived; nothing was fetched
    Duplicate,

    /// HTTP 429; the caller owns the cool-down
    RateLimited { url: String },

    /// The page could not be captured; no row was written
    Failed { url: String, reason: String },
}

/// Counts from a link-liveness sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkCheckReport {
    pub alive: usize,
    pub dead: usize,
    pub unknown: usize,
}

#[derive(Clone)]
pub struct Archiver {
    fetcher: Arc<Fetcher>,
    store: StoreHandle,
    images: Option<ImageQueue>,
    alerts: AlertSender,
    max_images: usize,
}

impl Archiver {
    pub fn new(
        fetcher: Arc<Fetcher>,
        store: StoreHandle,
        images: Option<ImageQueue>,
        alerts: AlertSender,
        max_images: usize,
    ) -> Self {
        Self {
            fetcher,
            store,
            images,
            alerts,
            max_images,
        }
    }

    pub fn fetcher(&self) -> &Arc<Fetcher> {
        &self.fetcher
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    /// Captures one candidate URL for `source_name`
    ///
    /// Only storage failures are returned as errors; every network outcome is
    /// reported through `CaptureOutcome`.
    pub async fn capture(
        &self,
        url: &str,
        source_name: &str,
    ) -> Result<CaptureOutcome, StorageError> {
        let normalized = match normalize_url(url) {
            Ok(normalized) => normalized.to_string(),
            Err(e) => return Ok(self.fail(source_name, url, e.to_string()).await),
        };

        let key = normalized.clone();
        if self.store.call(move |s| s.is_known(&key)).await? {
            tracing::trace!("Already archived: {}", normalized);
            return Ok(CaptureOutcome::Duplicate);
        }

        let (final_url, body) = match self.fetcher.fetch(&normalized, None).await {
            FetchOutcome::Success {
                final_url, body, ..
            } => (final_url, body),
            FetchOutcome::RateLimited { .. } => {
                return Ok(CaptureOutcome::RateLimited { url: normalized })
            }
            other => return Ok(self.fail(source_name, &normalized, other.describe()).await),
        };

        if body.trim().is_empty() {
            let reason = "empty response body".to_string();
            return Ok(self.fail(source_name, &normalized, reason).await);
        }

        let base = Url::parse(&final_url).or_else(|_| Url::parse(&normalized));
        let parsed = match base {
            Ok(base) => parse_article(&body, &base, self.max_images),
            Err(e) => return Ok(self.fail(source_name, &normalized, e.to_string()).await),
        };

        let article_url = normalized.clone();
        let source = source_name.to_string();
        let metadata = parsed.metadata.clone();
        let image_urls = parsed.image_urls;

        let stored = self
            .store
            .call(move |s| {
                let (article_id, created) =
                    s.capture_article(&article_url, &source, &body, &metadata)?;
                let mut jobs = Vec::new();
                if created {
                    for image_url in image_urls {
                        let image_id = s.save_image(&article_id, &image_url)?;
                        jobs.push(ImageJob {
                            image_id,
                            article_id: article_id.clone(),
                            url: image_url,
                        });
                    }
                }
                Ok((article_id, created, jobs))
            })
            .await;

        let (article_id, created, jobs) = match stored {
            Ok(stored) => stored,
            Err(StorageError::EmptyContent { .. }) => {
                let reason = "empty content".to_string();
                return Ok(self.fail(source_name, &normalized, reason).await);
            }
            Err(e) => return Err(e),
        };

        if !created {
            return Ok(CaptureOutcome::Duplicate);
        }

        let images = jobs.len();
        if let Some(queue) = &self.images {
            for job in jobs {
                queue.enqueue(job);
            }
        }

        tracing::info!(
            "Captured [{}] {} ({})",
            source_name,
            parsed.metadata.title.as_deref().unwrap_or("untitled"),
            normalized
        );

        Ok(CaptureOutcome::Captured { article_id, images })
    }

    async fn fail(&self, source_name: &str, url: &str, reason: String) -> CaptureOutcome {
        tracing::warn!("Capture of {} failed: {}", url, reason);

        let (source, logged_url, message) =
            (source_name.to_string(), url.to_string(), reason.clone());
        let logged = self
            .store
            .call(move |s| s.log_error(&source, ErrorKind::Capture, &message, Some(logged_url.as_str())))
            .await;
        if let Err(e) = logged {
            tracing::warn!("Could not write error log entry for {}: {}", url, e);
        }

        self.alerts.emit(AlertEvent::CaptureFailed {
            source_name: source_name.to_string(),
            url: url.to_string(),
            reason: reason.clone(),
        });
        CaptureOutcome::Failed {
            url: url.to_string(),
            reason,
        }
    }

    /// Checks whether an archived article's URL still resolves and records it
    pub async fn check_link(&self, id: &str, url: &str) -> Result<LinkStatus, StorageError> {
        let status = self.fetcher.check_link(url).await;

        let alive = match status {
            LinkStatus::Alive => true,
            LinkStatus::Dead => false,
            LinkStatus::Unknown => return Ok(status),
        };

        let id = id.to_string();
        self.store
            .call(move |s| s.record_link_check(&id, alive))
            .await?;
        Ok(status)
    }

    /// Checks the newest `limit` articles still in triage
    pub async fn check_recent_links(&self, limit: usize) -> Result<LinkCheckReport, StorageError> {
        let articles = self
            .store
            .call(move |s| s.articles_for_link_check(limit))
            .await?;

        let mut report = LinkCheckReport::default();
        for article in articles {
            match self.check_link(&article.id, &article.url).await? {
                LinkStatus::Alive => report.alive += 1,
                LinkStatus::Dead => {
                    tracing::info!("Original link gone: {}", article.url);
                    report.dead += 1
                }
                LinkStatus::Unknown => report.unknown += 1,
            }
        }
        Ok(report)
    }
}
