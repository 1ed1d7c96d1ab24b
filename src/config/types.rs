use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Snapwire
///
/// A loaded `Config` is treated as an immutable snapshot. Reloads produce a new
/// snapshot which the coordinator diffs against the running one.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub crawler: CrawlerConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub cleanup: CleanupConfig,
    #[serde(default, rename = "source")]
    pub sources: Vec<SourceConfig>,
}

impl Config {
    /// Looks up a source by name
    pub fn source(&self, name: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.name == name)
    }

    /// Sources whose polling loop should be running
    pub fn enabled_sources(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| s.enabled)
    }
}

/// Fetching, retry and pacing behavior shared by every source
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// User-Agent header sent with every request
    #[serde(rename = "user-agent")]
    pub user_agent: String,

    /// Whole-request timeout in seconds
    #[serde(rename = "request-timeout-secs")]
    pub request_timeout_secs: u64,

    /// Retries after the first attempt for transient failures
    #[serde(rename = "max-retries")]
    pub max_retries: u32,

    /// First backoff delay; doubles on every retry
    #[serde(rename = "retry-base-delay-ms")]
    pub retry_base_delay_ms: u64,

    /// Lower bound of the random delay added to every poll interval
    #[serde(rename = "jitter-min-ms")]
    pub jitter_min_ms: u64,

    /// Upper bound of the random delay added to every poll interval
    #[serde(rename = "jitter-max-ms")]
    pub jitter_max_ms: u64,

    /// Cool-down after the first rate-limit strike
    #[serde(rename = "cooldown-base-secs")]
    pub cooldown_base_secs: u64,

    /// Cool-down ceiling
    #[serde(rename = "cooldown-max-secs")]
    pub cooldown_max_secs: u64,

    /// Consecutive strikes before a source is reported as exhausted
    #[serde(rename = "max-rate-limit-strikes")]
    pub max_rate_limit_strikes: u32,

    /// Consecutive undated listing pages before a deep scan gives up
    #[serde(rename = "deep-scan-max-malformed-pages")]
    pub deep_scan_max_malformed_pages: u32,

    /// Hard bound on listing pages visited in one deep-scan run
    #[serde(rename = "deep-scan-max-pages")]
    pub deep_scan_max_pages: u32,

    /// Concurrent image downloads
    #[serde(rename = "image-concurrency")]
    pub image_concurrency: usize,

    /// Images recorded per captured article
    #[serde(rename = "max-images-per-article")]
    pub max_images_per_article: usize,

    /// Consecutive failed cycles before a source is reported as failing
    #[serde(rename = "error-alert-threshold")]
    pub error_alert_threshold: u32,

    /// How often the config file is checked for changes
    #[serde(rename = "config-poll-secs")]
    pub config_poll_secs: u64,
}

impl CrawlerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn cooldown_base(&self) -> Duration {
        Duration::from_secs(self.cooldown_base_secs)
    }

    pub fn cooldown_max(&self) -> Duration {
        Duration::from_secs(self.cooldown_max_secs)
    }

    pub fn config_poll_interval(&self) -> Duration {
        Duration::from_secs(self.config_poll_secs)
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("Mozilla/5.0 (compatible; Snapwire/{})", env!("CARGO_PKG_VERSION")),
            request_timeout_secs: 10,
            max_retries: 3,
            retry_base_delay_ms: 500,
            jitter_min_ms: 500,
            jitter_max_ms: 2000,
            cooldown_base_secs: 60,
            cooldown_max_secs: 900,
            max_rate_limit_strikes: 5,
            deep_scan_max_malformed_pages: 3,
            deep_scan_max_pages: 500,
            image_concurrency: 4,
            max_images_per_article: 10,
            error_alert_threshold: 5,
            config_poll_secs: 5,
        }
    }
}

/// Where the archive lives on disk
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// Directory that receives downloaded images, one subdirectory per article
    #[serde(rename = "images-dir", default = "default_images_dir")]
    pub images_dir: String,
}

fn default_images_dir() -> String {
    "./data/images".to_string()
}

/// Outbound proxy pool
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub enabled: bool,
    pub rotate: ProxyRotation,
    pub list: Vec<String>,
}

/// How the next proxy is chosen for a request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProxyRotation {
    #[default]
    RoundRobin,
    Random,
}

/// Periodic removal of discarded articles and old error log entries
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    pub enabled: bool,

    #[serde(rename = "discard-after-days")]
    pub discard_after_days: u32,

    #[serde(rename = "run-on-start")]
    pub run_on_start: bool,

    /// Age after which error log entries are removed
    #[serde(rename = "error-log-days")]
    pub error_log_days: u32,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            discard_after_days: 7,
            run_on_start: true,
            error_log_days: 30,
        }
    }
}

/// A monitored news source
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SourceConfig {
    /// Unique source name, also stored on every captured article
    pub name: String,

    /// Feed or sitemap URL polled in live mode
    pub url: String,

    #[serde(rename = "type")]
    pub kind: SourceKind,

    /// Poll interval in seconds (fractional values allowed)
    pub frequency: f64,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Paginated listing used for historical backfill
    #[serde(rename = "deep-scan", default)]
    pub deep_scan: Option<DeepScanConfig>,
}

fn default_enabled() -> bool {
    true
}

/// Longest accepted poll interval, one week
pub const MAX_FREQUENCY_SECS: f64 = 7.0 * 24.0 * 3600.0;

impl SourceConfig {
    /// Poll interval, clamped to `0..=MAX_FREQUENCY_SECS`
    pub fn poll_interval(&self) -> Duration {
        let max = Duration::from_secs(MAX_FREQUENCY_SECS as u64);
        Duration::try_from_secs_f64(self.frequency.clamp(0.0, MAX_FREQUENCY_SECS))
            .unwrap_or(max)
    }
}

/// What the live-mode URL points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Rss,
    Sitemap,
}

/// Describes a source's paginated archive listing
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeepScanConfig {
    /// Listing URL; the page number is added as a query parameter
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Query parameter carrying the page number
    #[serde(rename = "page-param")]
    pub page_param: String,

    /// CSS selector (relative to an item) for the publication date
    #[serde(rename = "date-selector")]
    pub date_selector: String,

    /// chrono format string for the publication date
    #[serde(rename = "date-format")]
    pub date_format: String,

    /// CSS selector for one listing entry
    #[serde(rename = "item-selector", default = "default_item_selector")]
    pub item_selector: String,

    /// CSS selector (relative to an item) for the article link
    #[serde(rename = "link-selector", default = "default_link_selector")]
    pub link_selector: String,

    /// Read the date from this attribute instead of the element text
    #[serde(rename = "date-attribute", default)]
    pub date_attribute: Option<String>,
}

fn default_item_selector() -> String {
    "article".to_string()
}

fn default_link_selector() -> String {
    "a[href]".to_string()
}
