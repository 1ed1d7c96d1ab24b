use snapwire::storage::{SqliteStorage, Storage, StorageError, StreamFilter};
use snapwire::ArticleStatus;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn test_capture_is_write_once() {
    let mut storage = SqliteStorage::new_in_memory().unwrap();
    let url = "https://example.com/a.html";

    let (id, created) = storage
        .upsert_article(url, "example", "<p>first version</p>", Some("First"))
        .unwrap();
    assert!(created);

    let (same_id, created_again) = storage
        .upsert_article(url, "other", "<p>edited later</p>", Some("Edited"))
        .unwrap();
    assert_eq!(same_id, id);
    assert!(!created_again);

    let article = storage.get_article(&id).unwrap();
    assert_eq!(article.content_html, "<p>first version</p>");
    assert_eq!(article.title.as_deref(), Some("First"));
    assert_eq!(article.source_name, "example");
    assert_eq!(storage.count_total_articles().unwrap(), 1);
}

#[test]
fn test_empty_content_is_rejected() {
    let mut storage = SqliteStorage::new_in_memory().unwrap();
    assert!(matches!(
        storage.upsert_article("https://example.com/a.html", "example", "  \n", None),
        Err(StorageError::EmptyContent { .. })
    ));
    assert!(!storage.is_known("https://example.com/a.html").unwrap());
}

#[test]
fn test_status_transitions_never_move_backwards() {
    for from in ArticleStatus::ALL {
        for to in ArticleStatus::ALL {
            let mut storage = SqliteStorage::new_in_memory().unwrap();
            let (id, _) = storage
                .upsert_article("https://example.com/a.html", "example", "<p>a</p>", None)
                .unwrap();

            match from {
                ArticleStatus::New => {}
                ArticleStatus::Picked => storage.set_status(&id, ArticleStatus::Picked).unwrap(),
                other => storage.set_status(&id, other).unwrap(),
            }

            let result = storage.set_status(&id, to);
            let after = storage.get_article(&id).unwrap().status;

            if from.can_transition_to(to) {
                assert!(result.is_ok(), "{} -> {} should be allowed", from, to);
                assert_eq!(after, to);
            } else {
                assert!(
                    matches!(result, Err(StorageError::InvalidTransition { .. })),
                    "{} -> {} should be rejected",
                    from,
                    to
                );
                assert_eq!(after, from);
            }
        }
    }
}

#[test]
fn test_full_text_search_over_unicode_text() {
    let mut storage = SqliteStorage::new_in_memory().unwrap();
    let (id, _) = storage
        .upsert_article(
            "https://example.vn/vu-an-xyz.html",
            "example",
            "<h1>Vụ án XYZ</h1><p>Phiên tòa mở lại vào sáng nay.</p>",
            Some("Vụ án XYZ"),
        )
        .unwrap();
    storage
        .upsert_article(
            "https://example.vn/weather.html",
            "example",
            "<p>Trời nắng</p>",
            Some("Thời tiết"),
        )
        .unwrap();

    storage.set_status(&id, ArticleStatus::Archived).unwrap();

    let hits = storage.query_archive("XYZ", 10).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, id);
    assert_eq!(hits[0].status, ArticleStatus::Archived);
    assert_eq!(storage.query_archive("Vụ án XYZ", 10).unwrap().len(), 1);

    assert_eq!(storage.query_archive("phiên tòa", 10).unwrap().len(), 1);
    assert!(storage.query_archive("unrelated-token", 10).unwrap().is_empty());
}

#[test]
fn test_readers_see_writes_while_crawl_writes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("archive.db");
    let mut writer = SqliteStorage::new(&path).unwrap();
    let reader = SqliteStorage::open_read_only(&path).unwrap();

    let barrier = Arc::new(Barrier::new(2));
    let writer_barrier = Arc::clone(&barrier);
    let writes = thread::spawn(move || {
        writer_barrier.wait();
        for i in 0..200 {
            writer
                .upsert_article(
                    &format!("https://example.com/{}.html", i),
                    "example",
                    &format!("<p>story {}</p>", i),
                    None,
                )
                .unwrap();
        }
    });

    barrier.wait();
    let mut last_seen = 0;
    for _ in 0..50 {
        let seen = reader
            .query_stream(&StreamFilter::default(), 1000)
            .unwrap()
            .len();
        assert!(seen >= last_seen);
        last_seen = seen;
    }

    writes.join().unwrap();
    assert_eq!(reader.count_total_articles().unwrap(), 200);
}

#[test]
fn test_open_read_transaction_does_not_block_writer() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("archive.db");
    let mut writer = SqliteStorage::new(&path).unwrap();
    writer
        .upsert_article("https://example.com/0.html", "example", "<p>0</p>", None)
        .unwrap();

    let mut reader = rusqlite::Connection::open(&path).unwrap();
    let read = reader.transaction().unwrap();
    let before: i64 = read
        .query_row("SELECT COUNT(*) FROM articles", [], |row| row.get(0))
        .unwrap();

    let started = Instant::now();
    for i in 1..=20 {
        writer
            .upsert_article(
                &format!("https://example.com/{}.html", i),
                "example",
                &format!("<p>{}</p>", i),
                None,
            )
            .unwrap();
    }
    assert!(started.elapsed() < Duration::from_secs(2));

    // The open read keeps its snapshot
    let during: i64 = read
        .query_row("SELECT COUNT(*) FROM articles", [], |row| row.get(0))
        .unwrap();
    assert_eq!(before, during);
    read.commit().unwrap();

    assert_eq!(writer.count_total_articles().unwrap(), 21);
}

#[test]
fn test_snapshot_round_trip_between_archives() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot = dir.path().join("snapshot.db");
    let json = dir.path().join("archived.json");

    let mut source = SqliteStorage::new(&dir.path().join("source.db")).unwrap();
    let (kept, _) = source
        .upsert_article("https://example.com/kept.html", "example", "<p>kept</p>", Some("Kept"))
        .unwrap();
    source
        .upsert_article("https://example.com/new.html", "example", "<p>new</p>", None)
        .unwrap();
    source.set_status(&kept, ArticleStatus::Archived).unwrap();
    source
        .save_image(&kept, "https://cdn.example.com/kept.jpg")
        .unwrap();

    source.export_snapshot(&snapshot).unwrap();
    assert_eq!(source.export_archived_json(&json).unwrap(), 1);

    let mut target = SqliteStorage::new(&dir.path().join("target.db")).unwrap();
    target
        .upsert_article("https://example.com/local.html", "local", "<p>local</p>", None)
        .unwrap();

    let report = target.import_snapshot(&snapshot, true).unwrap();
    assert_eq!(report.articles_imported, 2);
    assert_eq!(target.count_total_articles().unwrap(), 3);
    assert_eq!(target.get_article(&kept).unwrap().status, ArticleStatus::Archived);
    assert_eq!(target.article_images(&kept).unwrap().len(), 1);

    let again = target.import_snapshot(&json, true).unwrap();
    assert_eq!(again.articles_imported, 0);
    assert_eq!(again.articles_skipped, 1);

    let mut fresh = SqliteStorage::new(&dir.path().join("fresh.db")).unwrap();
    let report = fresh.import_snapshot(&json, true).unwrap();
    assert_eq!(report.articles_imported, 1);
    assert_eq!(report.images_imported, 1);
    assert_eq!(fresh.query_archive("kept", 10).unwrap().len(), 1);
}
