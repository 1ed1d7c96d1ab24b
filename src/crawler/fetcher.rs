//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for the crawler, including:
//! - Building HTTP clients with the configured user agent and proxy
//! - Conditional GET with ETag / Last-Modified validators
//! - Retry with backoff for transient failures
//! - Proxy rotation when a route is rate limited
//! - Liveness checks of captured URLs

use crate::config::{CrawlerConfig, ProxyConfig};
use crate::crawler::proxy::ProxyPool;
use crate::crawler::retry::{classify_status, FailureType, RetryDecision, RetryPolicy};
use reqwest::header::{
    CONTENT_TYPE, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED, RETRY_AFTER,
};
use reqwest::{redirect::Policy, Client, StatusCode};
use std::time::Duration;

/// Cache validators returned by a previous fetch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheValidators {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl CacheValidators {
    pub fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none()
    }
}

/// Result of a fetch operation
#[derive(Debug)]
pub enum FetchOutcome {
    /// Successfully fetched the page
    Success {
        /// Final URL after redirects
        final_url: String,
        status_code: u16,
        content_type: String,
        body: String,
        validators: CacheValidators,
    },

    /// 304 in answer to a conditional request
    NotModified,

    /// HTTP 429
    RateLimited {
        /// Parsed `Retry-After` seconds, if present
        retry_after: Option<Duration>,
    },

    /// Non-success status other than 429
    HttpError { status_code: u16, transient: bool },

    /// Network error (connection refused, timeout, etc.)
    NetworkError { error: String, transient: bool },
}

impl FetchOutcome {
    fn failure_type(&self) -> Option<FailureType> {
        match self {
            Self::Success { .. } | Self::NotModified => None,
            Self::RateLimited { .. } => Some(FailureType::RateLimited),
            Self::HttpError { transient, .. } | Self::NetworkError { transient, .. } => {
                Some(if *transient {
                    FailureType::Transient
                } else {
                    FailureType::Permanent
                })
            }
        }
    }

    /// Short description for logs and alerts
    pub fn describe(&self) -> String {
        match self {
            Self::Success { status_code, .. } => format!("HTTP {}", status_code),
            Self::NotModified => "not modified".to_string(),
            Self::RateLimited { .. } => "HTTP 429".to_string(),
            Self::HttpError { status_code, .. } => format!("HTTP {}", status_code),
            Self::NetworkError { error, .. } => error.clone(),
        }
    }
}

/// Whether a captured URL still resolves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Alive,
    Dead,
    /// Network failure or ambiguous answer; nothing is recorded
    Unknown,
}

/// Builds an HTTP client, optionally routed through `proxy`
///
/// # Example
///
/// ```no_run
/// use snapwire::config::CrawlerConfig;
/// use snapwire::crawler::build_http_client;
///
/// let client = build_http_client(&CrawlerConfig::default(), None).unwrap();
/// ```
pub fn build_http_client(
    config: &CrawlerConfig,
    proxy: Option<&str>,
) -> Result<Client, reqwest::Error> {
    let timeout = config.request_timeout();

    let mut builder = Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .redirect(Policy::limited(10))
        .gzip(true)
        .brotli(true);

    if let Some(proxy) = proxy {
        builder = builder.proxy(reqwest::Proxy::all(proxy)?);
    }

    builder.build()
}

fn header_string(
    response: &reqwest::Response,
    name: reqwest::header::HeaderName,
) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Sends one GET, conditional when validators are given
///
/// # Classification
///
/// | Condition | Outcome |
/// |-----------|---------|
/// | 2xx | Success |
/// | 304 | NotModified |
/// | 429 | RateLimited |
/// | 408, 5xx | HttpError, transient |
/// | other 4xx | HttpError, permanent |
/// | Timeout, connect error | NetworkError, transient |
pub async fn fetch_url(
    client: &Client,
    url: &str,
    validators: Option<&CacheValidators>,
) -> FetchOutcome {
    let mut request = client.get(url);
    if let Some(validators) = validators {
        if let Some(etag) = &validators.etag {
            request = request.header(IF_NONE_MATCH, etag);
        }
        if let Some(last_modified) = &validators.last_modified {
            request = request.header(IF_MODIFIED_SINCE, last_modified);
        }
    }

    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => return network_error(e),
    };

    let status = response.status();

    if status == StatusCode::NOT_MODIFIED {
        return FetchOutcome::NotModified;
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = header_string(&response, RETRY_AFTER)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        return FetchOutcome::RateLimited { retry_after };
    }

    if !status.is_success() {
        return FetchOutcome::HttpError {
            status_code: status.as_u16(),
            transient: classify_status(status.as_u16()) == FailureType::Transient,
        };
    }

    let final_url = response.url().to_string();
    let content_type = header_string(&response, CONTENT_TYPE).unwrap_or_default();
    let validators = CacheValidators {
        etag: header_string(&response, ETAG),
        last_modified: header_string(&response, LAST_MODIFIED),
    };

    match response.text().await {
        Ok(body) => FetchOutcome::Success {
            final_url,
            status_code: status.as_u16(),
            content_type,
            body,
            validators,
        },
        Err(e) => network_error(e),
    }
}

fn network_error(e: reqwest::Error) -> FetchOutcome {
    if e.is_timeout() {
        FetchOutcome::NetworkError {
            error: "Request timeout".to_string(),
            transient: true,
        }
    } else if e.is_connect() {
        FetchOutcome::NetworkError {
            error: format!("Connection failed: {}", e),
            transient: true,
        }
    } else if e.is_body() || e.is_decode() {
        FetchOutcome::NetworkError {
            error: format!("Body read failed: {}", e),
            transient: true,
        }
    } else {
        FetchOutcome::NetworkError {
            error: e.to_string(),
            transient: false,
        }
    }
}

/// Fetches with retries and proxy rotation
#[derive(Debug)]
pub struct Fetcher {
    pool: ProxyPool,
    retry: RetryPolicy,
}

impl Fetcher {
    pub fn from_config(
        crawler: &CrawlerConfig,
        proxy: &ProxyConfig,
    ) -> Result<Self, reqwest::Error> {
        let base = crawler.retry_base_delay();
        Ok(Self {
            pool: ProxyPool::from_config(crawler, proxy)?,
            retry: RetryPolicy::new(crawler.max_retries, base, base.saturating_mul(16)),
        })
    }

    /// A client for work outside the retry loop, such as image downloads
    pub fn client(&self) -> Client {
        self.pool.next().1.client.clone()
    }

    /// Fetches `url`
    ///
    /// Transient failures are retried with backoff. A 429 is retried once
    /// through a different proxy when the pool has one; a second 429 is
    /// returned as `RateLimited`.
    pub async fn fetch(&self, url: &str, validators: Option<&CacheValidators>) -> FetchOutcome {
        let (mut idx, mut route) = self.pool.next();
        let mut rotated = false;
        let mut attempt = 1;

        loop {
            let outcome = fetch_url(&route.client, url, validators).await;

            let failure = match outcome.failure_type() {
                Some(failure) => failure,
                None => return outcome,
            };

            if failure == FailureType::RateLimited {
                if !rotated {
                    if let Some((next_idx, next_route)) = self.pool.alternate(idx) {
                        tracing::warn!(
                            "Rate limited on {} via {}, rotating to {}",
                            url,
                            route.label,
                            next_route.label
                        );
                        idx = next_idx;
                        route = next_route;
                        rotated = true;
                        continue;
                    }
                }
                return outcome;
            }

            match self.retry.should_retry(failure, attempt) {
                RetryDecision::Retry { delay, attempt: next } => {
                    tracing::debug!(
                        "Retrying {} after {} ({}ms)",
                        url,
                        outcome.describe(),
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                    attempt = next;
                }
                RetryDecision::DoNotRetry { reason } => {
                    tracing::debug!("Giving up on {}: {} ({})", url, outcome.describe(), reason);
                    return outcome;
                }
            }
        }
    }

    /// Checks whether `url` still resolves
    ///
    /// Sends HEAD and falls back to GET when the server rejects HEAD.
    pub async fn check_link(&self, url: &str) -> LinkStatus {
        let client = &self.pool.next().1.client;

        let status = match client.head(url).send().await {
            Ok(response) if response.status() == StatusCode::METHOD_NOT_ALLOWED => {
                match client.get(url).send().await {
                    Ok(response) => response.status(),
                    Err(_) => return LinkStatus::Unknown,
                }
            }
            Ok(response) => response.status(),
            Err(_) => return LinkStatus::Unknown,
        };

        if status.is_success() || status.is_redirection() {
            LinkStatus::Alive
        } else if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            LinkStatus::Dead
        } else {
            LinkStatus::Unknown
        }
    }
}
