//! Snapwire main entry point
//!
//! This is the command-line interface for the Snapwire news capture engine.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use snapwire::config::{load_config_with_hash, Config};
use snapwire::crawler::{run_cleanup, run_monitor, spawn_image_downloader, Archiver, Fetcher};
use snapwire::output::{
    export_article_html, load_statistics, log_alerts, print_statistics, AlertSender,
};
use snapwire::scanner::DeepScanner;
use snapwire::storage::{SqliteStorage, Storage, StoreHandle, StreamFilter};
use snapwire::triage::Triage;
use snapwire::{ArticleStatus, SnapwireError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

const ALERT_QUEUE_CAPACITY: usize = 256;
const IMAGE_QUEUE_CAPACITY: usize = 1024;

/// Snapwire: a news capture engine
///
/// Snapwire polls RSS feeds and sitemaps, captures every new article's HTML the
/// moment it appears, and keeps it in a SQLite archive for editorial triage.
#[derive(Parser, Debug)]
#[command(name = "snapwire")]
#[command(version = "1.0.0")]
#[command(about = "A news capture engine", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show what would be monitored
    #[arg(long)]
    dry_run: bool,

    /// Show archive statistics and exit
    #[arg(long)]
    stats: bool,

    /// Delete discarded articles past retention and exit
    #[arg(long)]
    prune: bool,

    /// Write a binary copy of the archive
    #[arg(long, value_name = "PATH")]
    export_db: Option<PathBuf>,

    /// Write archived articles as JSON
    #[arg(long, value_name = "PATH")]
    export_json: Option<PathBuf>,

    /// Write one article as a standalone HTML page to --output
    #[arg(long, value_name = "ID", requires = "output")]
    export_html: Option<String>,

    /// Destination for --export-html
    #[arg(long, value_name = "PATH", requires = "export_html")]
    output: Option<PathBuf>,

    /// Load a snapshot produced by --export-db or --export-json
    #[arg(long, value_name = "PATH")]
    import: Option<PathBuf>,

    /// Replace the archive instead of merging into it
    #[arg(long, requires = "import")]
    replace: bool,

    /// Walk a source's listing pages back to --until
    #[arg(long, value_name = "SOURCE", requires = "until")]
    deep_scan: Option<String>,

    /// Target date for --deep-scan (YYYY-MM-DD)
    #[arg(long, value_name = "DATE", requires = "deep_scan")]
    until: Option<NaiveDate>,

    /// Re-check the original URLs of the N newest articles in triage
    #[arg(long, value_name = "N")]
    check_links: Option<usize>,

    /// List captured articles, newest first
    #[arg(long)]
    stream: bool,

    /// Restrict --stream to one status (new, picked, archived, discarded)
    #[arg(long, requires = "stream")]
    status: Option<ArticleStatus>,

    /// Restrict --stream to one source
    #[arg(long, value_name = "SOURCE", requires = "stream")]
    source: Option<String>,

    /// Full-text search over the archive
    #[arg(long, value_name = "TEXT")]
    search: Option<String>,

    /// Rows shown by --stream and --search
    #[arg(long, default_value_t = 20)]
    limit: usize,

    /// Flag an article for follow-up
    #[arg(long, value_name = "ID")]
    pick: Option<String>,

    /// Keep an article permanently
    #[arg(long, value_name = "ID")]
    archive: Option<String>,

    /// Reject an article
    #[arg(long, value_name = "ID")]
    discard: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config);
    } else if cli.stats {
        handle_stats(&config)?;
    } else if cli.prune {
        handle_prune(&config).await?;
    } else if let Some(dest) = &cli.export_db {
        open_storage(&config)?
            .export_snapshot(dest)
            .with_context(|| format!("failed to export to {}", dest.display()))?;
        println!("✓ Archive copied to {}", dest.display());
    } else if let Some(dest) = &cli.export_json {
        let count = open_storage(&config)?
            .export_archived_json(dest)
            .with_context(|| format!("failed to export to {}", dest.display()))?;
        println!("✓ {} archived articles written to {}", count, dest.display());
    } else if let (Some(id), Some(dest)) = (&cli.export_html, &cli.output) {
        let storage = SqliteStorage::open_read_only(Path::new(&config.storage.database_path))
            .context("failed to open the archive")?;
        export_article_html(&storage, id, dest)
            .with_context(|| format!("failed to export {} to {}", id, dest.display()))?;
        println!("✓ Article {} written to {}", id, dest.display());
    } else if let Some(src) = &cli.import {
        let report = open_storage(&config)?
            .import_snapshot(src, !cli.replace)
            .with_context(|| format!("failed to import {}", src.display()))?;
        println!(
            "✓ Imported {} articles ({} already present), {} images",
            report.articles_imported, report.articles_skipped, report.images_imported
        );
    } else if let (Some(source), Some(until)) = (&cli.deep_scan, cli.until) {
        handle_deep_scan(&config, source, until).await?;
    } else if let Some(limit) = cli.check_links {
        handle_check_links(&config, limit).await?;
    } else if cli.stream || cli.search.is_some() {
        handle_listing(&config, &cli)?;
    } else if cli.pick.is_some() || cli.archive.is_some() || cli.discard.is_some() {
        handle_triage(&config, &cli)?;
    } else {
        handle_monitor(config, cli.config.clone(), config_hash).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("snapwire=info,warn"),
            1 => EnvFilter::new("snapwire=debug,info"),
            2 => EnvFilter::new("snapwire=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

fn open_storage(config: &Config) -> Result<SqliteStorage> {
    let path = Path::new(&config.storage.database_path);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    SqliteStorage::new(path).with_context(|| format!("failed to open {}", path.display()))
}

/// Starts the alert logger; the returned sender feeds it
fn spawn_alert_logger() -> (AlertSender, tokio::task::JoinHandle<()>) {
    let (alerts, rx) = AlertSender::channel(ALERT_QUEUE_CAPACITY);
    (alerts, tokio::spawn(log_alerts(rx)))
}

/// Handles the --dry-run mode: validates config and shows what would run
fn handle_dry_run(config: &Config) {
    println!("=== Snapwire Dry Run ===\n");

    println!("Crawler Configuration:");
    println!("  User agent: {}", config.crawler.user_agent);
    println!("  Request timeout: {}s", config.crawler.request_timeout_secs);
    println!("  Max retries: {}", config.crawler.max_retries);
    println!(
        "  Jitter: {}-{}ms",
        config.crawler.jitter_min_ms, config.crawler.jitter_max_ms
    );
    println!(
        "  Cool-down: {}s doubling to {}s, {} strikes",
        config.crawler.cooldown_base_secs,
        config.crawler.cooldown_max_secs,
        config.crawler.max_rate_limit_strikes
    );
    println!(
        "  Failing-source alert after {} failed cycles",
        config.crawler.error_alert_threshold
    );

    println!("\nStorage:");
    println!("  Database: {}", config.storage.database_path);
    println!("  Images: {}", config.storage.images_dir);

    if config.proxy.enabled {
        println!(
            "\nProxies ({}, {:?}):",
            config.proxy.list.len(),
            config.proxy.rotate
        );
        for proxy in &config.proxy.list {
            println!("  - {}", proxy);
        }
    }

    if config.cleanup.enabled {
        println!(
            "\nCleanup: discarded articles removed after {} days, error log after {} days",
            config.cleanup.discard_after_days, config.cleanup.error_log_days
        );
    }

    println!("\nSources ({}):", config.sources.len());
    for source in &config.sources {
        println!(
            "  - {} [{:?}] every {}s{}{}",
            source.name,
            source.kind,
            source.frequency,
            if source.enabled { "" } else { " (disabled)" },
            if source.deep_scan.is_some() { " +deep-scan" } else { "" }
        );
        println!("    * {}", source.url);
    }

    println!("\n✓ Configuration is valid");
    println!(
        "✓ Would monitor {} sources",
        config.enabled_sources().count()
    );
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> Result<()> {
    println!("Database: {}\n", config.storage.database_path);

    let storage = SqliteStorage::open_read_only(Path::new(&config.storage.database_path))
        .context("failed to open the archive")?;
    let stats = load_statistics(&storage)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the --prune mode
async fn handle_prune(config: &Config) -> Result<()> {
    let store = StoreHandle::new(open_storage(config)?);
    let report = run_cleanup(
        &store,
        Path::new(&config.storage.images_dir),
        &config.cleanup,
    )
    .await?;
    println!(
        "✓ Pruned {} discarded articles and {} error log entries",
        report.articles, report.error_entries
    );
    Ok(())
}

/// Handles the --deep-scan mode
async fn handle_deep_scan(config: &Config, source_name: &str, until: NaiveDate) -> Result<()> {
    let source = config
        .source(source_name)
        .ok_or_else(|| SnapwireError::UnknownSource(source_name.to_string()))?;

    let store = StoreHandle::new(open_storage(config)?);
    let (alerts, alert_logger) = spawn_alert_logger();
    let fetcher = Arc::new(Fetcher::from_config(&config.crawler, &config.proxy)?);

    let images_dir = PathBuf::from(&config.storage.images_dir);
    std::fs::create_dir_all(&images_dir)?;
    let (images, downloader) = spawn_image_downloader(
        fetcher.client(),
        store.clone(),
        images_dir,
        config.crawler.image_concurrency,
        IMAGE_QUEUE_CAPACITY,
    );

    let archiver = Archiver::new(
        fetcher,
        store,
        Some(images),
        alerts.clone(),
        config.crawler.max_images_per_article,
    );
    let scanner = DeepScanner::new(archiver, alerts, config.crawler.clone());
    let checkpoint = scanner.run(source, until).await?;
    drop(scanner);

    let _ = downloader.await;
    let _ = alert_logger.await;

    println!(
        "✓ Deep scan of {} to {}: {} ({} pages, {} articles)",
        source.name,
        until,
        checkpoint.run_status.to_db_string(),
        checkpoint.pages_visited,
        checkpoint.articles_found
    );
    Ok(())
}

/// Handles the --check-links mode
async fn handle_check_links(config: &Config, limit: usize) -> Result<()> {
    let store = StoreHandle::new(open_storage(config)?);
    let fetcher = Arc::new(Fetcher::from_config(&config.crawler, &config.proxy)?);
    let archiver = Archiver::new(fetcher, store, None, AlertSender::disabled(), 0);

    let report = archiver.check_recent_links(limit).await?;
    println!(
        "✓ Links checked: {} alive, {} dead, {} unknown",
        report.alive, report.dead, report.unknown
    );
    Ok(())
}

/// Handles --stream and --search
fn handle_listing(config: &Config, cli: &Cli) -> Result<()> {
    let triage = Triage::open_read_only(Path::new(&config.storage.database_path))
        .context("failed to open the archive")?;

    let articles = match &cli.search {
        Some(text) => triage.search(text, cli.limit)?,
        None => {
            let filter = StreamFilter {
                status: cli.status,
                source_name: cli.source.clone(),
                since: None,
            };
            triage.get_stream(&filter, cli.limit)?
        }
    };

    for article in &articles {
        println!(
            "{}  {:<9}  {:<12}  {}{}",
            article.id,
            article.status.as_str(),
            article.source_name,
            article.title.as_deref().unwrap_or(&article.url),
            if article.link_alive { "" } else { "  [dead link]" }
        );
    }
    println!("\n{} articles", articles.len());
    Ok(())
}

/// Handles --pick, --archive and --discard
fn handle_triage(config: &Config, cli: &Cli) -> Result<()> {
    let mut triage = Triage::open(Path::new(&config.storage.database_path))
        .context("failed to open the archive")?;

    if let Some(id) = &cli.pick {
        triage.pick(id)?;
        println!("✓ {} picked", id);
    }
    if let Some(id) = &cli.archive {
        triage.archive(id)?;
        println!("✓ {} archived", id);
    }
    if let Some(id) = &cli.discard {
        triage.discard(id)?;
        println!("✓ {} discarded", id);
    }
    Ok(())
}

/// Handles the default mode: runs the monitor until Ctrl-C
async fn handle_monitor(config: Config, config_path: PathBuf, config_hash: String) -> Result<()> {
    tracing::info!(
        "Monitoring {} of {} sources",
        config.enabled_sources().count(),
        config.sources.len()
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested, finishing in-flight requests");
            let _ = shutdown_tx.send(true);
        }
    });

    let (alerts, alert_logger) = spawn_alert_logger();
    run_monitor(config, config_path, config_hash, shutdown_rx, alerts)
        .await
        .context("monitor failed")?;
    let _ = alert_logger.await;

    Ok(())
}
