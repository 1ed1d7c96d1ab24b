//! Historical deep scan over paginated listing pages
//!
//! Listing pages are assumed newest first. The walker captures every item
//! dated on or after the target date and keeps paging while a page still holds
//! such an item. Progress is checkpointed on every page so an interrupted run
//! resumes where it stopped.

use crate::config::{CrawlerConfig, DeepScanConfig, SourceConfig};
use crate::crawler::{Archiver, CaptureOutcome, FetchOutcome};
use crate::output::{AlertEvent, AlertSender};
use crate::state::SourceState;
use crate::storage::{db_timestamp, DeepScanCheckpoint, ScanRunStatus, Storage};
use crate::{ConfigError, SnapwireError};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use scraper::{ElementRef, Html, Selector};
use url::Url;

/// One entry of a listing page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingItem {
    pub url: String,
    pub date: Option<NaiveDateTime>,
}

/// Builds the URL of listing page `page`
pub fn listing_page_url(base: &Url, page_param: &str, page: u32) -> Url {
    let retained: Vec<(String, String)> = base
        .query_pairs()
        .filter(|(key, _)| key != page_param)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let mut url = base.clone();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(retained)
        .append_pair(page_param, &page.to_string());
    url
}

/// Parses a listing date with the configured `strftime` format
///
/// Date-only formats are read as midnight; formats with an offset are read in
/// the listing's local time.
///
/// # Examples
///
/// ```
/// use snapwire::scanner::parse_listing_date;
///
/// let dt = parse_listing_date("09/10/2024 08:30", "%d/%m/%Y %H:%M").unwrap();
/// assert_eq!(dt.to_string(), "2024-10-09 08:30:00");
///
/// let midnight = parse_listing_date("2024-10-09", "%Y-%m-%d").unwrap();
/// assert_eq!(midnight.to_string(), "2024-10-09 00:00:00");
/// ```
pub fn parse_listing_date(text: &str, format: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    NaiveDateTime::parse_from_str(text, format)
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(text, format)
                .ok()
                .map(|date| date.and_time(NaiveTime::MIN))
        })
        .or_else(|| {
            DateTime::parse_from_str(text, format)
                .ok()
                .map(|dt| dt.naive_local())
        })
}

fn parse_selector(selector: &str) -> Result<Selector, String> {
    Selector::parse(selector).map_err(|e| format!("invalid selector {:?}: {}", selector, e))
}

fn item_date(
    item: &ElementRef<'_>,
    selector: &Selector,
    descriptor: &DeepScanConfig,
) -> Option<NaiveDateTime> {
    item.select(selector).find_map(|element| {
        let raw = match &descriptor.date_attribute {
            Some(attribute) => element.value().attr(attribute)?.to_string(),
            None => element.text().collect::<String>(),
        };
        parse_listing_date(&raw, &descriptor.date_format)
    })
}

/// Extracts (url, date) pairs from a listing page
///
/// Items without a resolvable link are dropped. Items whose date cannot be
/// read are kept with `date: None`.
pub fn parse_listing(
    html: &str,
    base: &Url,
    descriptor: &DeepScanConfig,
) -> Result<Vec<ListingItem>, String> {
    let item_selector = parse_selector(&descriptor.item_selector)?;
    let link_selector = parse_selector(&descriptor.link_selector)?;
    let date_selector = parse_selector(&descriptor.date_selector)?;

    let document = Html::parse_document(html);
    let mut items = Vec::new();

    for item in document.select(&item_selector) {
        let href = if item.value().name() == "a" {
            item.value().attr("href")
        } else {
            item.select(&link_selector)
                .find_map(|link| link.value().attr("href"))
        };

        let Some(url) = href.and_then(|href| crate::crawler::resolve_link(href, base)) else {
            continue;
        };

        if items.iter().any(|existing: &ListingItem| existing.url == url) {
            continue;
        }

        items.push(ListingItem {
            url,
            date: item_date(&item, &date_selector, descriptor),
        });
    }

    Ok(items)
}

/// Walks a source's listing pages back to a target date
pub struct DeepScanner {
    archiver: Archiver,
    alerts: AlertSender,
    crawler: CrawlerConfig,
}

enum PageFetch {
    Items(Vec<ListingItem>),
    Malformed(String),
    RateLimited,
}

impl DeepScanner {
    pub fn new(archiver: Archiver, alerts: AlertSender, crawler: CrawlerConfig) -> Self {
        Self {
            archiver,
            alerts,
            crawler,
        }
    }

    async fn save(&self, checkpoint: &mut DeepScanCheckpoint) -> Result<(), SnapwireError> {
        checkpoint.updated_at = db_timestamp(Utc::now());
        let snapshot = checkpoint.clone();
        self.archiver
            .store()
            .call(move |s| s.save_checkpoint(&snapshot))
            .await?;
        Ok(())
    }

    async fn fetch_page(&self, url: &Url, descriptor: &DeepScanConfig) -> PageFetch {
        match self.archiver.fetcher().fetch(url.as_str(), None).await {
            FetchOutcome::Success {
                body, final_url, ..
            } => {
                let base = Url::parse(&final_url).unwrap_or_else(|_| url.clone());
                match parse_listing(&body, &base, descriptor) {
                    Ok(items) => PageFetch::Items(items),
                    Err(e) => PageFetch::Malformed(e),
                }
            }
            FetchOutcome::RateLimited { .. } => PageFetch::RateLimited,
            other => PageFetch::Malformed(other.describe()),
        }
    }

    /// Records a strike; returns false once the strike budget is spent
    async fn cool_down(&self, source: &SourceConfig, state: &mut SourceState) -> bool {
        let cooldown = state.record_rate_limit(&self.crawler);
        let exhausted = state.is_exhausted(&self.crawler);

        self.alerts.emit(AlertEvent::RateLimited {
            source_name: source.name.clone(),
            strikes: state.strikes,
            cooldown,
            exhausted,
        });

        if exhausted {
            tracing::error!(
                "[{}] deep scan rate limited {} times in a row, giving up",
                source.name,
                state.strikes
            );
            return false;
        }

        tracing::warn!(
            "[{}] deep scan rate limited, waiting {}s",
            source.name,
            cooldown.as_secs()
        );
        tokio::time::sleep(cooldown).await;
        true
    }

    /// Runs (or resumes) the deep scan of `source` back to `target`
    ///
    /// A completed checkpoint is returned unchanged. Running and failed
    /// checkpoints resume at their `current_page`.
    pub async fn run(
        &self,
        source: &SourceConfig,
        target: NaiveDate,
    ) -> Result<DeepScanCheckpoint, SnapwireError> {
        let descriptor = source.deep_scan.as_ref().ok_or_else(|| {
            ConfigError::Validation(format!("source {} has no deep-scan settings", source.name))
        })?;
        let base = Url::parse(&descriptor.base_url)?;

        let name = source.name.clone();
        let existing = self
            .archiver
            .store()
            .call(move |s| s.load_checkpoint(&name, target))
            .await?;

        let mut checkpoint = match existing {
            Some(checkpoint) if checkpoint.run_status == ScanRunStatus::Completed => {
                tracing::info!("[{}] deep scan to {} already completed", source.name, target);
                return Ok(checkpoint);
            }
            Some(mut checkpoint) => {
                tracing::info!(
                    "[{}] resuming deep scan to {} at page {}",
                    source.name,
                    target,
                    checkpoint.current_page
                );
                checkpoint.run_status = ScanRunStatus::Running;
                checkpoint
            }
            None => DeepScanCheckpoint::new(&source.name, target),
        };
        self.save(&mut checkpoint).await?;

        let threshold = target.and_time(NaiveTime::MIN);
        let mut state = SourceState::new();
        let mut malformed_run = 0u32;
        let mut pages_this_run = 0u32;

        'pages: loop {
            if pages_this_run >= self.crawler.deep_scan_max_pages {
                tracing::warn!(
                    "[{}] deep scan stopped after {} pages without reaching {}",
                    source.name,
                    pages_this_run,
                    target
                );
                checkpoint.run_status = ScanRunStatus::Failed;
                break;
            }

            let page_url = listing_page_url(&base, &descriptor.page_param, checkpoint.current_page);
            tracing::debug!("[{}] listing page {}", source.name, page_url);

            let items = match self.fetch_page(&page_url, descriptor).await {
                PageFetch::RateLimited => {
                    if self.cool_down(source, &mut state).await {
                        continue;
                    }
                    checkpoint.run_status = ScanRunStatus::Failed;
                    break;
                }
                PageFetch::Malformed(reason) => {
                    tracing::warn!(
                        "[{}] page {} unusable: {}",
                        source.name,
                        checkpoint.current_page,
                        reason
                    );
                    Vec::new()
                }
                PageFetch::Items(items) => items,
            };

            pages_this_run += 1;
            checkpoint.pages_visited += 1;

            let oldest = items.iter().filter_map(|item| item.date).min();
            let Some(oldest) = oldest else {
                malformed_run += 1;
                tracing::warn!(
                    "[{}] no dates on page {} ({} of {} allowed in a row)",
                    source.name,
                    checkpoint.current_page,
                    malformed_run,
                    self.crawler.deep_scan_max_malformed_pages
                );
                if malformed_run >= self.crawler.deep_scan_max_malformed_pages {
                    checkpoint.run_status = ScanRunStatus::Failed;
                    break;
                }
                checkpoint.current_page += 1;
                self.save(&mut checkpoint).await?;
                continue;
            };

            malformed_run = 0;
            state.clear_rate_limit();

            let mut reached_target = false;
            for item in &items {
                match item.date {
                    Some(date) if date >= threshold => reached_target = true,
                    _ => continue,
                }

                loop {
                    match self.archiver.capture(&item.url, &source.name).await? {
                        CaptureOutcome::Captured { .. } => checkpoint.articles_found += 1,
                        CaptureOutcome::RateLimited { .. } => {
                            if self.cool_down(source, &mut state).await {
                                continue;
                            }
                            checkpoint.run_status = ScanRunStatus::Failed;
                            break 'pages;
                        }
                        CaptureOutcome::Duplicate | CaptureOutcome::Failed { .. } => {}
                    }
                    break;
                }
            }

            checkpoint.last_date_seen = Some(oldest);

            if !reached_target {
                checkpoint.run_status = ScanRunStatus::Completed;
                break;
            }

            checkpoint.current_page += 1;
            self.save(&mut checkpoint).await?;
        }

        self.save(&mut checkpoint).await?;

        tracing::info!(
            "[{}] deep scan to {} {} ({} pages, {} articles)",
            source.name,
            target,
            checkpoint.run_status.to_db_string(),
            checkpoint.pages_visited,
            checkpoint.articles_found
        );
        self.alerts.emit(AlertEvent::DeepScanCompleted {
            source_name: source.name.clone(),
            checkpoint: checkpoint.clone(),
        });

        Ok(checkpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProxyConfig, SourceKind};
    use crate::crawler::Fetcher;
    use crate::storage::{SqliteStorage, StoreHandle};
    use std::sync::Arc;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn descriptor(base_url: &str) -> DeepScanConfig {
        DeepScanConfig {
            base_url: base_url.to_string(),
            page_param: "page".to_string(),
            date_selector: ".time".to_string(),
            date_format: "%Y-%m-%d".to_string(),
            item_selector: "article".to_string(),
            link_selector: "a[href]".to_string(),
            date_attribute: None,
        }
    }

    fn listing(server: &str, days: &[u32]) -> String {
        let items: String = days
            .iter()
            .map(|day| {
                format!(
                    r#"<article><a href="{}/story-{}.html">Story {}</a><span class="time">2024-10-0{}</span></article>"#,
                    server, day, day, day
                )
            })
            .collect();
        format!("<html><body>{}</body></html>", items)
    }

    fn crawler() -> CrawlerConfig {
        CrawlerConfig {
            max_retries: 0,
            retry_base_delay_ms: 1,
            deep_scan_max_malformed_pages: 2,
            max_rate_limit_strikes: 1,
            ..CrawlerConfig::default()
        }
    }

    fn scanner(store: StoreHandle, alerts: AlertSender) -> DeepScanner {
        let crawler = crawler();
        let fetcher = Fetcher::from_config(&crawler, &ProxyConfig::default()).unwrap();
        let archiver = Archiver::new(Arc::new(fetcher), store, None, alerts.clone(), 0);
        DeepScanner::new(archiver, alerts, crawler)
    }

    fn source(server: &str) -> SourceConfig {
        SourceConfig {
            name: "example".to_string(),
            url: format!("{}/rss", server),
            kind: SourceKind::Rss,
            frequency: 60.0,
            enabled: true,
            deep_scan: Some(descriptor(&format!("{}/latest?cat=news", server))),
        }
    }

    async fn mount_article(server: &MockServer, day: u32) {
        Mock::given(method("GET"))
            .and(path(format!("/story-{}.html", day)))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!("<p>story {}</p>", day)))
            .mount(server)
            .await;
    }

    #[test]
    fn test_listing_page_url_replaces_page_param() {
        let base = Url::parse("https://example.com/latest?page=9&cat=news").unwrap();
        assert_eq!(
            listing_page_url(&base, "page", 2).as_str(),
            "https://example.com/latest?cat=news&page=2"
        );
    }

    #[test]
    fn test_parse_listing_date_formats() {
        assert!(parse_listing_date("09/10/2024 08:30", "%d/%m/%Y %H:%M").is_some());
        assert!(parse_listing_date("2024-10-09T08:30:00+07:00", "%Y-%m-%dT%H:%M:%S%z").is_some());
        assert_eq!(parse_listing_date("yesterday", "%Y-%m-%d"), None);
        assert_eq!(parse_listing_date("   ", "%Y-%m-%d"), None);
    }

    #[test]
    fn test_parse_listing_items() {
        let base = Url::parse("https://example.com/latest").unwrap();
        let html = r#"<html><body>
            <article><a href="/a.html">A</a><time datetime="2024-10-09">9 Oct</time></article>
            <article><a href="/b.html">B</a></article>
            <article><span>no link</span><time datetime="2024-10-08">8 Oct</time></article>
            <article><a href="/a.html">A again</a></article>
        </body></html>"#;

        let mut desc = descriptor("https://example.com/latest");
        desc.date_selector = "time".to_string();
        desc.date_attribute = Some("datetime".to_string());

        let items = parse_listing(html, &base, &desc).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].url, "https://example.com/a.html");
        assert_eq!(
            items[0].date,
            NaiveDate::from_ymd_opt(2024, 10, 9).map(|d| d.and_time(NaiveTime::MIN))
        );
        assert_eq!(items[1].date, None);
    }

    #[tokio::test]
    async fn test_resume_from_checkpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/latest"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(listing(&server.uri(), &[9, 8])))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/latest"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(listing(&server.uri(), &[4, 3])))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/latest"))
            .and(query_param("page", "3"))
            .respond_with(ResponseTemplate::new(200).set_body_string(listing(&server.uri(), &[2, 1])))
            .expect(1)
            .mount(&server)
            .await;
        mount_article(&server, 4).await;

        let store = StoreHandle::new(SqliteStorage::new_in_memory().unwrap());
        let target = NaiveDate::from_ymd_opt(2024, 10, 4).unwrap();
        let mut interrupted = DeepScanCheckpoint::new("example", target);
        interrupted.current_page = 2;
        interrupted.pages_visited = 1;
        store
            .call(move |s| s.save_checkpoint(&interrupted))
            .await
            .unwrap();

        let checkpoint = scanner(store.clone(), AlertSender::disabled())
            .run(&source(&server.uri()), target)
            .await
            .unwrap();

        assert_eq!(checkpoint.run_status, ScanRunStatus::Completed);
        assert_eq!(checkpoint.current_page, 3);
        assert_eq!(checkpoint.pages_visited, 3);
        assert_eq!(checkpoint.articles_found, 1);
        assert_eq!(
            checkpoint.last_date_seen,
            NaiveDate::from_ymd_opt(2024, 10, 1).map(|d| d.and_time(NaiveTime::MIN))
        );

        // A completed scan is not walked again
        let again = scanner(store, AlertSender::disabled())
            .run(&source(&server.uri()), target)
            .await
            .unwrap();
        assert_eq!(again.pages_visited, 3);
    }

    #[tokio::test]
    async fn test_fails_after_consecutive_malformed_pages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/latest"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html><body>maintenance</body></html>"))
            .expect(2)
            .mount(&server)
            .await;

        let store = StoreHandle::new(SqliteStorage::new_in_memory().unwrap());
        let (alerts, mut rx) = AlertSender::channel(8);
        let target = NaiveDate::from_ymd_opt(2024, 10, 1).unwrap();

        let checkpoint = scanner(store.clone(), alerts)
            .run(&source(&server.uri()), target)
            .await
            .unwrap();

        assert_eq!(checkpoint.run_status, ScanRunStatus::Failed);
        assert_eq!(checkpoint.pages_visited, 2);
        assert!(matches!(
            rx.recv().await,
            Some(AlertEvent::DeepScanCompleted { .. })
        ));

        let stored = store
            .call(move |s| s.load_checkpoint("example", target))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.run_status, ScanRunStatus::Failed);
    }

    #[tokio::test]
    async fn test_rate_limit_exhaustion_fails_scan() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/latest"))
            .respond_with(ResponseTemplate::new(429))
            .expect(1)
            .mount(&server)
            .await;

        let store = StoreHandle::new(SqliteStorage::new_in_memory().unwrap());
        let (alerts, mut rx) = AlertSender::channel(8);
        let target = NaiveDate::from_ymd_opt(2024, 10, 1).unwrap();

        let checkpoint = scanner(store, alerts)
            .run(&source(&server.uri()), target)
            .await
            .unwrap();

        assert_eq!(checkpoint.run_status, ScanRunStatus::Failed);
        assert!(matches!(
            rx.recv().await,
            Some(AlertEvent::RateLimited { exhausted: true, .. })
        ));
    }

    #[tokio::test]
    async fn test_source_without_deep_scan_settings() {
        let store = StoreHandle::new(SqliteStorage::new_in_memory().unwrap());
        let mut source = source("https://example.com");
        source.deep_scan = None;

        let result = scanner(store, AlertSender::disabled())
            .run(&source, NaiveDate::from_ymd_opt(2024, 10, 1).unwrap())
            .await;
        assert!(matches!(result, Err(SnapwireError::Config(_))));
    }
}
