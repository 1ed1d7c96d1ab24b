use snapwire::config::{parse_config, Config, DeepScanConfig, SourceConfig, SourceKind};

/// A config with fast, deterministic pacing and no sources
pub fn test_config(db_path: &str, images_dir: &str) -> Config {
    let mut config = parse_config(&format!(
        r#"
[storage]
database-path = "{}"
images-dir = "{}"
"#,
        db_path, images_dir
    ))
    .expect("valid test config");

    config.crawler.max_retries = 0;
    config.crawler.retry_base_delay_ms = 1;
    config.crawler.jitter_min_ms = 0;
    config.crawler.jitter_max_ms = 0;
    config.cleanup.enabled = false;
    config
}

pub fn rss_source(name: &str, feed_url: String, frequency: f64) -> SourceConfig {
    SourceConfig {
        name: name.to_string(),
        url: feed_url,
        kind: SourceKind::Rss,
        frequency,
        enabled: true,
        deep_scan: None,
    }
}

pub fn rss(links: &[String]) -> String {
    let items: String = links
        .iter()
        .map(|link| format!("<item><title>t</title><link>{}</link></item>", link))
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><rss version="2.0"><channel><title>feed</title>{}</channel></rss>"#,
        items
    )
}

pub fn listing_descriptor(base_url: String) -> DeepScanConfig {
    DeepScanConfig {
        base_url,
        page_param: "page".to_string(),
        date_selector: ".time".to_string(),
        date_format: "%d/%m/%Y %H:%M".to_string(),
        item_selector: ".story".to_string(),
        link_selector: "a".to_string(),
        date_attribute: None,
    }
}
