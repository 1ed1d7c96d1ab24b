//! Alert events emitted to an external collaborator
//!
//! Delivery is best effort: the sender never blocks a source loop, and a full
//! or closed channel only drops the event with a log line.

use crate::storage::DeepScanCheckpoint;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;

/// Something an operator should hear about
#[derive(Debug, Clone, PartialEq)]
pub enum AlertEvent {
    /// A source hit HTTP 429 and is cooling down
    RateLimited {
        source_name: String,
        strikes: u32,
        cooldown: Duration,
        /// Strikes reached `max-rate-limit-strikes`
        exhausted: bool,
    },

    DeepScanCompleted {
        source_name: String,
        checkpoint: DeepScanCheckpoint,
    },

    CaptureFailed {
        source_name: String,
        url: String,
        reason: String,
    },

    /// Consecutive failed cycles reached `error-alert-threshold`
    SourceFailing {
        source_name: String,
        consecutive_failures: u32,
        last_error: String,
    },

    StoreUnavailable {
        source_name: Option<String>,
        reason: String,
    },
}

impl AlertEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::DeepScanCompleted { .. } => "deep_scan_completed",
            Self::CaptureFailed { .. } => "capture_failed",
            Self::SourceFailing { .. } => "source_failing",
            Self::StoreUnavailable { .. } => "store_unavailable",
        }
    }
}

impl fmt::Display for AlertEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimited {
                source_name,
                strikes,
                cooldown,
                exhausted,
            } => {
                write!(
                    f,
                    "{} rate limited (strike {}), cooling down {}s",
                    source_name,
                    strikes,
                    cooldown.as_secs()
                )?;
                if *exhausted {
                    write!(f, "; strike limit reached")?;
                }
                Ok(())
            }
            Self::DeepScanCompleted {
                source_name,
                checkpoint,
            } => write!(
                f,
                "deep scan of {} to {} finished as {} after {} pages, {} articles",
                source_name,
                checkpoint.target_date,
                checkpoint.run_status.to_db_string(),
                checkpoint.pages_visited,
                checkpoint.articles_found
            ),
            Self::CaptureFailed {
                source_name,
                url,
                reason,
            } => write!(f, "{} failed to capture {}: {}", source_name, url, reason),
            Self::SourceFailing {
                source_name,
                consecutive_failures,
                last_error,
            } => write!(
                f,
                "{} failed {} cycles in a row, last error: {}",
                source_name, consecutive_failures, last_error
            ),
            Self::StoreUnavailable {
                source_name: Some(source_name),
                reason,
            } => write!(f, "store unavailable for {}: {}", source_name, reason),
            Self::StoreUnavailable {
                source_name: None,
                reason,
            } => write!(f, "store unavailable: {}", reason),
        }
    }
}

/// Non-blocking handle for emitting alerts
#[derive(Debug, Clone)]
pub struct AlertSender {
    tx: Option<mpsc::Sender<AlertEvent>>,
}

impl AlertSender {
    /// Creates a bounded alert channel
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<AlertEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx: Some(tx) }, rx)
    }

    /// A sender that drops everything
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: AlertEvent) {
        let Some(tx) = &self.tx else {
            return;
        };

        match tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                tracing::warn!("Alert queue full, dropping {} alert", event.kind());
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                tracing::debug!("Alert receiver gone, dropping {} alert", event.kind());
            }
        }
    }
}

/// Drains alerts into the log until every sender is dropped
pub async fn log_alerts(mut rx: mpsc::Receiver<AlertEvent>) {
    while let Some(event) = rx.recv().await {
        match &event {
            AlertEvent::RateLimited {
                exhausted: true, ..
            }
            | AlertEvent::SourceFailing { .. }
            | AlertEvent::StoreUnavailable { .. } => {
                tracing::error!("[alert:{}] {}", event.kind(), event)
            }
            _ => tracing::warn!("[alert:{}] {}", event.kind(), event),
        }
    }
}
