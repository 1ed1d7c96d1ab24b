use crate::common::{rss, rss_source, test_config};
use snapwire::config::{hash_content, Config};
use snapwire::crawler::{run_monitor, Archiver, Coordinator, CycleOutcome, Fetcher, SourceLoop};
use snapwire::output::{AlertEvent, AlertSender};
use snapwire::storage::{SqliteStorage, Storage, StoreHandle, StreamFilter};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn memory_store() -> StoreHandle {
    StoreHandle::new(SqliteStorage::new_in_memory().expect("in-memory store"))
}

fn source_loop(config: &Config, store: StoreHandle, alerts: AlertSender) -> SourceLoop {
    let fetcher = Fetcher::from_config(&config.crawler, &config.proxy).expect("http client");
    let archiver = Archiver::new(Arc::new(fetcher), store, None, alerts.clone(), 0);
    SourceLoop::new(
        config.sources[0].clone(),
        config.crawler.clone(),
        archiver,
        alerts,
    )
}

#[tokio::test]
async fn test_article_fetched_once_across_polls() {
    let server = MockServer::start().await;
    let article = format!("{}/news/flood-warning.html", server.uri());

    Mock::given(method("GET"))
        .and(path("/rss"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rss(&[
            article.clone(),
            format!("{}?utm_source=rss#comments", article),
            article.clone(),
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/news/flood-warning.html"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html><head><title>Flood warning</title></head><body>Rivers rising</body></html>"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let mut config = test_config("unused.db", "unused-images");
    config.sources = vec![rss_source("example", format!("{}/rss", server.uri()), 60.0)];

    let store = memory_store();
    let mut source_loop = source_loop(&config, store.clone(), AlertSender::disabled());

    for _ in 0..3 {
        source_loop.run_cycle().await;
    }

    let articles = store
        .call(|s| s.query_stream(&StreamFilter::default(), 10))
        .await
        .unwrap();
    assert_eq!(articles.len(), 1);
    assert_eq!(articles[0].url, article);
    assert_eq!(articles[0].title.as_deref(), Some("Flood warning"));
    assert_eq!(articles[0].source_name, "example");
}

#[tokio::test]
async fn test_feed_revalidated_with_etag() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rss"))
        .and(header("if-none-match", "\"v1\""))
        .respond_with(ResponseTemplate::new(304))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rss"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("etag", "\"v1\"")
                .set_body_string(rss(&[])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let mut config = test_config("unused.db", "unused-images");
    config.sources = vec![rss_source("example", format!("{}/rss", server.uri()), 60.0)];
    let mut source_loop = source_loop(&config, memory_store(), AlertSender::disabled());

    assert!(matches!(
        source_loop.run_cycle().await,
        CycleOutcome::Completed { captured: 0, .. }
    ));
    assert_eq!(source_loop.run_cycle().await, CycleOutcome::NotModified);
}

#[tokio::test]
async fn test_rate_limit_isolated_to_one_source() {
    let limited = MockServer::start().await;
    let healthy = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rss"))
        .respond_with(ResponseTemplate::new(429))
        .expect(1)
        .mount(&limited)
        .await;
    Mock::given(method("GET"))
        .and(path("/rss"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rss(&[])))
        .mount(&healthy)
        .await;

    let mut config = test_config("unused.db", "unused-images");
    config.crawler.cooldown_base_secs = 60;
    config.sources = vec![
        rss_source("limited", format!("{}/rss", limited.uri()), 0.05),
        rss_source("healthy", format!("{}/rss", healthy.uri()), 0.05),
    ];

    let (alerts, mut rx) = AlertSender::channel(16);
    let mut coordinator =
        Coordinator::new(Arc::new(config), memory_store(), alerts, None).expect("coordinator");
    coordinator.start();

    tokio::time::sleep(Duration::from_secs(1)).await;
    coordinator.shutdown().await;

    let healthy_requests = healthy.received_requests().await.unwrap();
    assert!(
        healthy_requests.len() >= 3,
        "healthy source polled {} times",
        healthy_requests.len()
    );

    match rx.recv().await {
        Some(AlertEvent::RateLimited {
            source_name,
            strikes,
            cooldown,
            exhausted,
        }) => {
            assert_eq!(source_name, "limited");
            assert_eq!(strikes, 1);
            assert_eq!(cooldown, Duration::from_secs(60));
            assert!(!exhausted);
        }
        other => panic!("expected a rate-limit alert, got {:?}", other),
    }
}

#[tokio::test]
async fn test_monitor_captures_article_and_images() {
    let server = MockServer::start().await;
    let article = format!("{}/news/budget.html", server.uri());

    Mock::given(method("GET"))
        .and(path("/rss"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rss(&[article.clone()])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/news/budget.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<html><head><meta property="og:title" content="Budget approved"></head>
               <body><img src="/img/council.jpg"><p>The council voted.</p></body></html>"#,
        ))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/img/council.jpg"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/jpeg")
                .set_body_bytes(vec![0xFF, 0xD8, 0xFF, 0xE0]),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("data").join("archive.db");
    let images_dir = dir.path().join("images");
    let config_path = dir.path().join("snapwire.toml");
    let content = format!(
        r#"
[crawler]
max-retries = 0
jitter-min-ms = 0
jitter-max-ms = 0

[storage]
database-path = "{}"
images-dir = "{}"

[cleanup]
enabled = false

[[source]]
name = "city"
url = "{}/rss"
type = "rss"
frequency = 0.2
"#,
        db_path.display(),
        images_dir.display(),
        server.uri()
    );
    std::fs::write(&config_path, &content).unwrap();
    let config = snapwire::config::load_config(&config_path).unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor = tokio::spawn(run_monitor(
        config,
        config_path,
        hash_content(&content),
        shutdown_rx,
        AlertSender::disabled(),
    ));

    let article_id = snapwire::storage::article_id_for(&article);
    let image_dir = images_dir.join(&article_id);
    let mut downloaded = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if image_dir.exists() && std::fs::read_dir(&image_dir).unwrap().count() == 1 {
            downloaded = true;
            break;
        }
    }
    assert!(downloaded, "image was not downloaded");

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(10), monitor)
        .await
        .expect("monitor should stop")
        .unwrap()
        .unwrap();

    let storage = SqliteStorage::open_read_only(&db_path).unwrap();
    let stored = storage.get_article(&article_id).unwrap();
    assert_eq!(stored.title.as_deref(), Some("Budget approved"));
    assert!(stored.content_html.contains("The council voted."));

    let images = storage.article_images(&article_id).unwrap();
    assert_eq!(images.len(), 1);
    assert!(images[0].downloaded);
    assert!(images[0]
        .local_path
        .as_deref()
        .is_some_and(|p| p.ends_with(".jpg")));
}
