//! Per-source polling loop
//!
//! Each enabled source runs its own loop: wait one jitter, then scan, capture
//! every candidate in feed order, and sleep `frequency + jitter`. A
//! rate-limited cycle sleeps the source cool-down instead. Cancellation is only
//! observed while sleeping, so an in-flight fetch always completes.
//!
//! Failed cycles are counted per source. Reaching `error-alert-threshold` in a
//! row raises one `SourceFailing` alert; any successful cycle resets the count.

use crate::config::{CrawlerConfig, SourceConfig};
use crate::crawler::archiver::{Archiver, CaptureOutcome};
use crate::output::{AlertEvent, AlertSender};
use crate::scanner::{FeedScanner, ScanOutcome};
use crate::state::SourceState;
use crate::storage::{ErrorKind, Storage, StorageError};
use rand::Rng;
use std::time::Duration;
use tokio::sync::watch;

/// Result of one scan-and-capture cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed {
        captured: usize,
        duplicates: usize,
        failed: usize,
    },
    NotModified,
    /// The cycle stopped at a 429; the loop sleeps `cooldown`
    RateLimited { cooldown: Duration },
    /// Feed fetch or parse failure
    Failed(String),
    StoreUnavailable(String),
}

/// Random delay in `[jitter-min-ms, jitter-max-ms]`
pub fn jitter(config: &CrawlerConfig) -> Duration {
    let (min, max) = (config.jitter_min_ms, config.jitter_max_ms);
    if max <= min {
        return Duration::from_millis(min);
    }
    Duration::from_millis(rand::thread_rng().gen_range(min..=max))
}

/// Time between two polls of a source
pub fn poll_interval(source: &SourceConfig, config: &CrawlerConfig) -> Duration {
    source.poll_interval() + jitter(config)
}

/// State and collaborators of one running source
pub struct SourceLoop {
    source: SourceConfig,
    crawler: CrawlerConfig,
    scanner: FeedScanner,
    archiver: Archiver,
    alerts: AlertSender,
    state: SourceState,
}

impl SourceLoop {
    pub fn new(
        source: SourceConfig,
        crawler: CrawlerConfig,
        archiver: Archiver,
        alerts: AlertSender,
    ) -> Self {
        let scanner = FeedScanner::new(archiver.fetcher().clone(), archiver.store().clone());
        Self {
            source,
            crawler,
            scanner,
            archiver,
            alerts,
            state: SourceState::new(),
        }
    }

    pub fn state(&self) -> &SourceState {
        &self.state
    }

    /// Runs one cycle: scan, then capture candidates in order
    ///
    /// The first rate-limited request ends the cycle. Candidates not reached
    /// are still unseen and come back on the next scan.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let outcome = self.scan_and_capture().await;
        self.track_failures(&outcome);
        outcome
    }

    async fn scan_and_capture(&mut self) -> CycleOutcome {
        let candidates = match self.scanner.scan(&self.source).await {
            Ok(ScanOutcome::Candidates(candidates)) => candidates,
            Ok(ScanOutcome::NotModified) => {
                self.state.clear_rate_limit();
                return CycleOutcome::NotModified;
            }
            Ok(ScanOutcome::RateLimited) => return self.rate_limited(),
            Ok(ScanOutcome::Failed(reason)) => return self.scan_failed(reason).await,
            Err(e) => return self.store_unavailable(e),
        };

        let (mut captured, mut duplicates, mut failed) = (0, 0, 0);

        for url in &candidates {
            match self.archiver.capture(url, &self.source.name).await {
                Ok(CaptureOutcome::Captured { .. }) => captured += 1,
                Ok(CaptureOutcome::Duplicate) => duplicates += 1,
                Ok(CaptureOutcome::Failed { .. }) => failed += 1,
                Ok(CaptureOutcome::RateLimited { .. }) => return self.rate_limited(),
                Err(e) => return self.store_unavailable(e),
            }
        }

        self.state.clear_rate_limit();

        if captured > 0 || failed > 0 {
            tracing::info!(
                "[{}] cycle done: {} captured, {} failed, {} duplicates",
                self.source.name,
                captured,
                failed,
                duplicates
            );
        }

        CycleOutcome::Completed {
            captured,
            duplicates,
            failed,
        }
    }

    /// Updates the failure streak from a finished cycle
    ///
    /// A cycle fails when its scan failed or when every capture attempt failed.
    /// Rate-limited and store-unavailable cycles have their own alerts and
    /// leave the streak alone.
    fn track_failures(&mut self, outcome: &CycleOutcome) {
        let last_error = match outcome {
            CycleOutcome::Failed(reason) => reason.clone(),
            CycleOutcome::Completed {
                captured: 0,
                failed,
                ..
            } if *failed > 0 => format!("{} captures failed", failed),
            CycleOutcome::Completed { .. } | CycleOutcome::NotModified => {
                self.state.record_success();
                return;
            }
            CycleOutcome::RateLimited { .. } | CycleOutcome::StoreUnavailable(_) => return,
        };

        if self.state.record_failure(&self.crawler) {
            tracing::error!(
                "[{}] {} failed cycles in a row, last error: {}",
                self.source.name,
                self.state.consecutive_failures,
                last_error
            );
            self.alerts.emit(AlertEvent::SourceFailing {
                source_name: self.source.name.clone(),
                consecutive_failures: self.state.consecutive_failures,
                last_error,
            });
        }
    }

    async fn scan_failed(&self, reason: String) -> CycleOutcome {
        tracing::warn!("[{}] scan failed: {}", self.source.name, reason);

        let (source, message) = (self.source.name.clone(), reason.clone());
        let logged = self
            .archiver
            .store()
            .call(move |s| s.log_error(&source, ErrorKind::Scan, &message, None))
            .await;
        if let Err(e) = logged {
            tracing::warn!(
                "[{}] could not write error log entry: {}",
                self.source.name,
                e
            );
        }

        CycleOutcome::Failed(reason)
    }

    fn rate_limited(&mut self) -> CycleOutcome {
        let cooldown = self.state.record_rate_limit(&self.crawler);
        let exhausted = self.state.is_exhausted(&self.crawler);

        if exhausted {
            tracing::error!(
                "[{}] rate limited {} times in a row, cooling down {}s",
                self.source.name,
                self.state.strikes,
                cooldown.as_secs()
            );
        } else {
            tracing::warn!(
                "[{}] rate limited (strike {}), cooling down {}s",
                self.source.name,
                self.state.strikes,
                cooldown.as_secs()
            );
        }

        self.alerts.emit(AlertEvent::RateLimited {
            source_name: self.source.name.clone(),
            strikes: self.state.strikes,
            cooldown,
            exhausted,
        });

        CycleOutcome::RateLimited { cooldown }
    }

    fn store_unavailable(&self, error: StorageError) -> CycleOutcome {
        tracing::error!("[{}] storage error: {}", self.source.name, error);
        self.alerts.emit(AlertEvent::StoreUnavailable {
            source_name: Some(self.source.name.clone()),
            reason: error.to_string(),
        });
        CycleOutcome::StoreUnavailable(error.to_string())
    }

    /// Loops until `cancel` turns true or its sender is dropped
    pub async fn run(mut self, mut cancel: watch::Receiver<bool>) {
        tracing::info!(
            "[{}] polling {} every {:.1}s",
            self.source.name,
            self.source.url,
            self.source.frequency
        );

        // Spread the first polls of sources started together
        tokio::select! {
            _ = tokio::time::sleep(jitter(&self.crawler)) => {}
            _ = cancel.changed() => {
                tracing::info!("[{}] polling stopped", self.source.name);
                return;
            }
        }

        loop {
            if *cancel.borrow() {
                break;
            }

            let wait = match self.run_cycle().await {
                CycleOutcome::RateLimited { cooldown } => cooldown,
                _ => poll_interval(&self.source, &self.crawler),
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = cancel.changed() => break,
            }
        }

        tracing::info!("[{}] polling stopped", self.source.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProxyConfig, SourceKind};
    use crate::crawler::Fetcher;
    use crate::storage::{SqliteStorage, StoreHandle};
    use std::sync::Arc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn crawler() -> CrawlerConfig {
        CrawlerConfig {
            max_retries: 0,
            retry_base_delay_ms: 1,
            jitter_min_ms: 0,
            jitter_max_ms: 0,
            cooldown_base_secs: 60,
            max_rate_limit_strikes: 2,
            ..CrawlerConfig::default()
        }
    }

    fn source(server: &str) -> SourceConfig {
        SourceConfig {
            name: "example".to_string(),
            url: format!("{}/rss", server),
            kind: SourceKind::Rss,
            frequency: 0.05,
            enabled: true,
            deep_scan: None,
        }
    }

    fn source_loop(server: &str, alerts: AlertSender) -> (SourceLoop, StoreHandle) {
        source_loop_with(server, alerts, crawler())
    }

    fn source_loop_with(
        server: &str,
        alerts: AlertSender,
        crawler: CrawlerConfig,
    ) -> (SourceLoop, StoreHandle) {
        let store = StoreHandle::new(SqliteStorage::new_in_memory().unwrap());
        let fetcher = Fetcher::from_config(&crawler, &ProxyConfig::default()).unwrap();
        let archiver = Archiver::new(Arc::new(fetcher), store.clone(), None, alerts.clone(), 0);
        (SourceLoop::new(source(server), crawler, archiver, alerts), store)
    }

    #[test]
    fn test_jitter_bounds() {
        let config = CrawlerConfig {
            jitter_min_ms: 500,
            jitter_max_ms: 2000,
            ..CrawlerConfig::default()
        };
        for _ in 0..200 {
            let j = jitter(&config);
            assert!(j >= Duration::from_millis(500) && j <= Duration::from_millis(2000));
        }

        let fixed = CrawlerConfig {
            jitter_min_ms: 300,
            jitter_max_ms: 300,
            ..CrawlerConfig::default()
        };
        assert_eq!(jitter(&fixed), Duration::from_millis(300));
    }

    #[test]
    fn test_poll_interval_adds_frequency() {
        let config = CrawlerConfig {
            jitter_min_ms: 0,
            jitter_max_ms: 0,
            ..CrawlerConfig::default()
        };
        let mut source = source("https://example.com");
        source.frequency = 5.0;
        assert_eq!(poll_interval(&source, &config), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_cycle_captures_candidates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rss"))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!(
                "<rss><channel><item><link>{0}/a.html</link></item><item><link>{0}/b.html</link></item></channel></rss>",
                server.uri()
            )))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/a.html"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<p>a</p>"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/b.html"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let (mut source_loop, store) = source_loop(&server.uri(), AlertSender::disabled());

        let first = source_loop.run_cycle().await;
        assert_eq!(
            first,
            CycleOutcome::Completed {
                captured: 1,
                duplicates: 0,
                failed: 1
            }
        );

        // a.html is now known, b.html is retried
        let second = source_loop.run_cycle().await;
        assert_eq!(
            second,
            CycleOutcome::Completed {
                captured: 0,
                duplicates: 0,
                failed: 1
            }
        );
        assert_eq!(store.call(|s| s.count_total_articles()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_escalates_and_clears() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rss"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rss"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<rss><channel></channel></rss>"))
            .mount(&server)
            .await;

        let (alerts, mut rx) = AlertSender::channel(8);
        let (mut source_loop, _store) = source_loop(&server.uri(), alerts);

        assert_eq!(
            source_loop.run_cycle().await,
            CycleOutcome::RateLimited {
                cooldown: Duration::from_secs(60)
            }
        );
        assert_eq!(
            source_loop.run_cycle().await,
            CycleOutcome::RateLimited {
                cooldown: Duration::from_secs(120)
            }
        );
        assert!(matches!(
            rx.recv().await,
            Some(AlertEvent::RateLimited { strikes: 1, exhausted: false, .. })
        ));
        assert!(matches!(
            rx.recv().await,
            Some(AlertEvent::RateLimited { strikes: 2, exhausted: true, .. })
        ));

        assert!(matches!(
            source_loop.run_cycle().await,
            CycleOutcome::Completed { .. }
        ));
        assert_eq!(source_loop.state().strikes, 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<rss><channel></channel></rss>"))
            .mount(&server)
            .await;

        let (source_loop, _store) = source_loop(&server.uri(), AlertSender::disabled());
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let handle = tokio::spawn(source_loop.run(cancel_rx));

        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel_tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("loop should stop")
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        assert!(requests.len() >= 2);
    }

    #[tokio::test]
    async fn test_first_poll_waits_for_jitter() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<rss><channel></channel></rss>"))
            .mount(&server)
            .await;

        let config = CrawlerConfig {
            jitter_min_ms: 400,
            jitter_max_ms: 400,
            ..crawler()
        };
        let (source_loop, _store) =
            source_loop_with(&server.uri(), AlertSender::disabled(), config);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let handle = tokio::spawn(source_loop.run(cancel_rx));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(server.received_requests().await.unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(700)).await;
        assert!(!server.received_requests().await.unwrap().is_empty());

        cancel_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("loop should stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancel_during_initial_jitter() {
        let server = MockServer::start().await;

        let config = CrawlerConfig {
            jitter_min_ms: 60_000,
            jitter_max_ms: 60_000,
            ..crawler()
        };
        let (source_loop, _store) =
            source_loop_with(&server.uri(), AlertSender::disabled(), config);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let handle = tokio::spawn(source_loop.run(cancel_rx));

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel_tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("loop should stop")
            .unwrap();
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failure_streak_alerts_and_logs() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rss"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(3)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rss"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<rss><channel></channel></rss>"))
            .mount(&server)
            .await;

        let config = CrawlerConfig {
            error_alert_threshold: 2,
            ..crawler()
        };
        let (alerts, mut rx) = AlertSender::channel(8);
        let (mut source_loop, store) = source_loop_with(&server.uri(), alerts, config);

        assert!(matches!(source_loop.run_cycle().await, CycleOutcome::Failed(_)));
        assert!(rx.try_recv().is_err());

        assert!(matches!(source_loop.run_cycle().await, CycleOutcome::Failed(_)));
        assert!(matches!(
            rx.try_recv(),
            Ok(AlertEvent::SourceFailing {
                consecutive_failures: 2,
                ..
            })
        ));

        // Past the threshold the streak keeps counting without new alerts
        assert!(matches!(source_loop.run_cycle().await, CycleOutcome::Failed(_)));
        assert!(rx.try_recv().is_err());
        assert_eq!(source_loop.state().consecutive_failures, 3);

        let errors = store
            .call(|s| s.recent_errors(Some("example"), 10))
            .await
            .unwrap();
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().all(|e| e.kind == ErrorKind::Scan));

        assert!(matches!(
            source_loop.run_cycle().await,
            CycleOutcome::Completed { .. }
        ));
        assert_eq!(source_loop.state().consecutive_failures, 0);
    }
}
