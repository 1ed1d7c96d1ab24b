use crate::config::types::{
    CleanupConfig, Config, CrawlerConfig, DeepScanConfig, ProxyConfig, SourceConfig,
    StorageConfig, MAX_FREQUENCY_SECS,
};
use crate::ConfigError;
use scraper::Selector;
use std::collections::HashSet;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_storage_config(&config.storage)?;
    validate_proxy_config(&config.proxy)?;
    validate_cleanup_config(&config.cleanup)?;
    validate_sources(&config.sources)?;
    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user-agent cannot be empty".to_string(),
        ));
    }

    if config.request_timeout_secs < 1 {
        return Err(ConfigError::Validation(format!(
            "request-timeout-secs must be >= 1, got {}",
            config.request_timeout_secs
        )));
    }

    if config.jitter_min_ms > config.jitter_max_ms {
        return Err(ConfigError::Validation(format!(
            "jitter-min-ms ({}) must not exceed jitter-max-ms ({})",
            config.jitter_min_ms, config.jitter_max_ms
        )));
    }

    if config.cooldown_base_secs < 1 {
        return Err(ConfigError::Validation(format!(
            "cooldown-base-secs must be >= 1, got {}",
            config.cooldown_base_secs
        )));
    }

    if config.cooldown_max_secs < config.cooldown_base_secs {
        return Err(ConfigError::Validation(format!(
            "cooldown-max-secs ({}) must be >= cooldown-base-secs ({})",
            config.cooldown_max_secs, config.cooldown_base_secs
        )));
    }

    if config.max_rate_limit_strikes < 1 {
        return Err(ConfigError::Validation(
            "max-rate-limit-strikes must be >= 1".to_string(),
        ));
    }

    if config.error_alert_threshold < 1 {
        return Err(ConfigError::Validation(
            "error-alert-threshold must be >= 1".to_string(),
        ));
    }

    if config.deep_scan_max_malformed_pages < 1 || config.deep_scan_max_pages < 1 {
        return Err(ConfigError::Validation(
            "deep-scan page limits must be >= 1".to_string(),
        ));
    }

    if config.image_concurrency < 1 || config.image_concurrency > 64 {
        return Err(ConfigError::Validation(format!(
            "image-concurrency must be between 1 and 64, got {}",
            config.image_concurrency
        )));
    }

    if config.config_poll_secs < 1 {
        return Err(ConfigError::Validation(format!(
            "config-poll-secs must be >= 1, got {}",
            config.config_poll_secs
        )));
    }

    Ok(())
}

/// Validates storage configuration
fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }

    if config.images_dir.is_empty() {
        return Err(ConfigError::Validation(
            "images-dir cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates the proxy pool
fn validate_proxy_config(config: &ProxyConfig) -> Result<(), ConfigError> {
    if !config.enabled {
        return Ok(());
    }

    if config.list.is_empty() {
        return Err(ConfigError::Validation(
            "proxy is enabled but proxy list is empty".to_string(),
        ));
    }

    for proxy in &config.list {
        let url = Url::parse(proxy)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid proxy '{}': {}", proxy, e)))?;

        if !matches!(url.scheme(), "http" | "https" | "socks5" | "socks5h") {
            return Err(ConfigError::Validation(format!(
                "Proxy '{}' must use http, https or socks5",
                proxy
            )));
        }
    }

    Ok(())
}

/// Validates cleanup configuration
fn validate_cleanup_config(config: &CleanupConfig) -> Result<(), ConfigError> {
    if config.enabled && config.discard_after_days < 1 {
        return Err(ConfigError::Validation(
            "discard-after-days must be >= 1 when cleanup is enabled".to_string(),
        ));
    }

    if config.enabled && config.error_log_days < 1 {
        return Err(ConfigError::Validation(
            "error-log-days must be >= 1 when cleanup is enabled".to_string(),
        ));
    }
    Ok(())
}

/// Validates source entries
fn validate_sources(sources: &[SourceConfig]) -> Result<(), ConfigError> {
    let mut names = HashSet::new();

    for source in sources {
        if source.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "source name cannot be empty".to_string(),
            ));
        }

        if !names.insert(source.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate source name '{}'",
                source.name
            )));
        }

        validate_http_url(&source.url, &source.name)?;

        if !source.frequency.is_finite() || source.frequency <= 0.0 {
            return Err(ConfigError::Validation(format!(
                "Source '{}' frequency must be a positive number of seconds, got {}",
                source.name, source.frequency
            )));
        }

        if source.frequency > MAX_FREQUENCY_SECS {
            return Err(ConfigError::Validation(format!(
                "Source '{}' frequency must be at most {} seconds, got {}",
                source.name, MAX_FREQUENCY_SECS, source.frequency
            )));
        }

        if let Some(deep) = &source.deep_scan {
            validate_deep_scan(deep, &source.name)?;
        }
    }

    Ok(())
}

fn validate_deep_scan(config: &DeepScanConfig, source: &str) -> Result<(), ConfigError> {
    validate_http_url(&config.base_url, source)?;

    if config.page_param.trim().is_empty() {
        return Err(ConfigError::Validation(format!(
            "Source '{}' deep-scan page-param cannot be empty",
            source
        )));
    }

    if config.date_format.trim().is_empty() {
        return Err(ConfigError::Validation(format!(
            "Source '{}' deep-scan date-format cannot be empty",
            source
        )));
    }

    for selector in [
        &config.item_selector,
        &config.link_selector,
        &config.date_selector,
    ] {
        validate_selector(selector, source)?;
    }

    Ok(())
}

fn validate_selector(selector: &str, source: &str) -> Result<(), ConfigError> {
    Selector::parse(selector).map(|_| ()).map_err(|e| {
        ConfigError::Validation(format!(
            "Source '{}' has invalid CSS selector '{}': {:?}",
            source, selector, e
        ))
    })
}

fn validate_http_url(raw: &str, source: &str) -> Result<(), ConfigError> {
    let url = Url::parse(raw).map_err(|e| {
        ConfigError::InvalidUrl(format!("Source '{}' has invalid URL '{}': {}", source, raw, e))
    })?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::Validation(format!(
            "Source '{}' URL '{}' must use HTTP or HTTPS",
            source, raw
        )));
    }

    Ok(())
}
