use crate::common::{listing_descriptor, rss_source, test_config};
use chrono::NaiveDate;
use snapwire::crawler::{Archiver, Fetcher};
use snapwire::output::{AlertEvent, AlertSender};
use snapwire::scanner::DeepScanner;
use snapwire::storage::{ScanRunStatus, SqliteStorage, Storage, StoreHandle};
use std::sync::Arc;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn listing_page(server: &str, days: &[u32]) -> String {
    let stories: String = days
        .iter()
        .map(|day| {
            format!(
                r#"<div class="story"><a href="{}/story/{}.html">Story {}</a><span class="time">0{}/10/2024 09:15</span></div>"#,
                server, day, day, day
            )
        })
        .collect();
    format!("<html><body><main>{}</main></body></html>", stories)
}

async fn mount_page(server: &MockServer, page: &str, days: &[u32], hits: u64) {
    Mock::given(method("GET"))
        .and(path("/latest"))
        .and(query_param("page", page))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_page(&server.uri(), days)))
        .expect(hits)
        .mount(server)
        .await;
}

async fn mount_story(server: &MockServer, day: u32, hits: u64) {
    Mock::given(method("GET"))
        .and(path(format!("/story/{}.html", day)))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(format!("<html><head><title>Story {0}</title></head><body>{0}</body></html>", day)),
        )
        .expect(hits)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_deep_scan_stops_at_target_date() {
    let server = MockServer::start().await;
    mount_page(&server, "1", &[5, 4, 3], 1).await;
    mount_page(&server, "2", &[2, 1], 1).await;
    mount_page(&server, "3", &[], 0).await;
    for day in [5, 4, 3] {
        mount_story(&server, day, 1).await;
    }
    for day in [2, 1] {
        mount_story(&server, day, 0).await;
    }

    let mut config = test_config("unused.db", "unused-images");
    let mut source = rss_source("example", format!("{}/rss", server.uri()), 60.0);
    source.deep_scan = Some(listing_descriptor(format!("{}/latest", server.uri())));
    config.sources = vec![source];

    let store = StoreHandle::new(SqliteStorage::new_in_memory().unwrap());
    let (alerts, mut rx) = AlertSender::channel(8);
    let fetcher = Fetcher::from_config(&config.crawler, &config.proxy).unwrap();
    let archiver = Archiver::new(Arc::new(fetcher), store.clone(), None, alerts.clone(), 0);
    let scanner = DeepScanner::new(archiver, alerts, config.crawler.clone());

    let target = NaiveDate::from_ymd_opt(2024, 10, 3).unwrap();
    let checkpoint = scanner.run(&config.sources[0], target).await.unwrap();

    assert_eq!(checkpoint.run_status, ScanRunStatus::Completed);
    assert_eq!(checkpoint.articles_found, 3);
    assert_eq!(checkpoint.pages_visited, 2);
    assert_eq!(store.call(|s| s.count_total_articles()).await.unwrap(), 3);

    let stored = store
        .call(move |s| s.load_checkpoint("example", target))
        .await
        .unwrap()
        .expect("checkpoint persisted");
    assert_eq!(stored.run_status, ScanRunStatus::Completed);
    assert_eq!(stored.pages_visited, 2);

    assert!(matches!(
        rx.recv().await,
        Some(AlertEvent::DeepScanCompleted { .. })
    ));

    // A completed scan is not repeated
    let again = scanner.run(&config.sources[0], target).await.unwrap();
    assert_eq!(again.pages_visited, 2);
}
