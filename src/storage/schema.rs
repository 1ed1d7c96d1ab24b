//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Snapwire archive.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Captured articles; content is write-once
CREATE TABLE IF NOT EXISTS articles (
    pk INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    source_name TEXT NOT NULL,
    url TEXT NOT NULL UNIQUE,
    title TEXT,
    summary TEXT,
    author TEXT,
    published_at TEXT,
    category TEXT,
    content_html TEXT NOT NULL CHECK (length(content_html) > 0),
    status INTEGER NOT NULL DEFAULT 0 CHECK (status IN (-1, 0, 1, 2)),
    link_alive INTEGER NOT NULL DEFAULT 1,
    crawled_at TEXT NOT NULL,
    status_changed_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_articles_status_crawled ON articles(status, crawled_at);
CREATE INDEX IF NOT EXISTS idx_articles_source ON articles(source_name);
CREATE INDEX IF NOT EXISTS idx_articles_crawled ON articles(crawled_at);

-- Images referenced by articles
CREATE TABLE IF NOT EXISTS images (
    id TEXT PRIMARY KEY,
    article_id TEXT NOT NULL REFERENCES articles(id) ON DELETE CASCADE,
    source_url TEXT NOT NULL,
    local_path TEXT,
    downloaded INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_images_article ON images(article_id);
CREATE INDEX IF NOT EXISTS idx_images_downloaded ON images(downloaded);

-- Full-text index over title, summary and body, kept in sync by triggers
CREATE VIRTUAL TABLE IF NOT EXISTS articles_fts USING fts5(
    title,
    summary,
    content_html,
    content = 'articles',
    content_rowid = 'pk'
);

CREATE TRIGGER IF NOT EXISTS articles_fts_insert AFTER INSERT ON articles BEGIN
    INSERT INTO articles_fts(rowid, title, summary, content_html)
    VALUES (new.pk, new.title, new.summary, new.content_html);
END;

CREATE TRIGGER IF NOT EXISTS articles_fts_delete AFTER DELETE ON articles BEGIN
    INSERT INTO articles_fts(articles_fts, rowid, title, summary, content_html)
    VALUES ('delete', old.pk, old.title, old.summary, old.content_html);
END;

CREATE TRIGGER IF NOT EXISTS articles_fts_update AFTER UPDATE OF title, summary, content_html ON articles BEGIN
    INSERT INTO articles_fts(articles_fts, rowid, title, summary, content_html)
    VALUES ('delete', old.pk, old.title, old.summary, old.content_html);
    INSERT INTO articles_fts(rowid, title, summary, content_html)
    VALUES (new.pk, new.title, new.summary, new.content_html);
END;

-- Deep-scan progress, one row per (source, target date)
CREATE TABLE IF NOT EXISTS deep_scan_checkpoints (
    source_name TEXT NOT NULL,
    target_date TEXT NOT NULL,
    current_page INTEGER NOT NULL,
    last_date_seen TEXT,
    run_status TEXT NOT NULL,
    pages_visited INTEGER NOT NULL DEFAULT 0,
    articles_found INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (source_name, target_date)
);

-- Scan and capture failures, newest last
CREATE TABLE IF NOT EXISTS error_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_name TEXT NOT NULL,
    kind TEXT NOT NULL,
    message TEXT NOT NULL,
    url TEXT,
    logged_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_error_log_source ON error_log(source_name, logged_at);
"#;

/// Brings a version 1 archive up to the current layout
///
/// Adds the metadata columns and drops the old full-text index so that
/// `SCHEMA_SQL` recreates it with the summary column.
const MIGRATE_V1_SQL: &str = r#"
ALTER TABLE articles ADD COLUMN summary TEXT;
ALTER TABLE articles ADD COLUMN author TEXT;
ALTER TABLE articles ADD COLUMN published_at TEXT;
ALTER TABLE articles ADD COLUMN category TEXT;
DROP TRIGGER IF EXISTS articles_fts_insert;
DROP TRIGGER IF EXISTS articles_fts_delete;
DROP TRIGGER IF EXISTS articles_fts_update;
DROP TABLE IF EXISTS articles_fts;
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    let version: u32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    let migrate = version == 1;
    if migrate {
        tracing::info!("Migrating archive schema from version 1 to {}", SCHEMA_VERSION);
        conn.execute_batch(MIGRATE_V1_SQL)?;
    }

    conn.execute_batch(SCHEMA_SQL)?;

    if migrate {
        conn.execute("INSERT INTO articles_fts(articles_fts) VALUES ('rebuild')", [])?;
    }
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}

/// Current schema version, stored in `PRAGMA user_version`
pub const SCHEMA_VERSION: u32 = 2;

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_schema_initializes() {
        let conn = Connection::open_in_memory().unwrap();
        let result = initialize_schema(&conn);
        assert!(result.is_ok());
    }

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        initialize_schema(&conn).unwrap();
        let result = initialize_schema(&conn);

        assert!(result.is_ok());
    }

    #[test]
    fn test_tables_exist_after_init() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        for table in [
            "articles",
            "images",
            "articles_fts",
            "deep_scan_checkpoints",
            "error_log",
        ] {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "Table {} should exist", table);
        }

        let version: u32 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_empty_content_rejected_by_constraint() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        let result = conn.execute(
            "INSERT INTO articles (id, source_name, url, content_html, crawled_at)
             VALUES ('a', 's', 'https://example.com/a', '', '2024-01-01T00:00:00.000000Z')",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_fts_follows_inserts_and_deletes() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        conn.execute(
            "INSERT INTO articles (id, source_name, url, title, content_html, crawled_at)
             VALUES ('a', 's', 'https://example.com/a', 'Flood warning', '<p>river</p>',
                     '2024-01-01T00:00:00.000000Z')",
            [],
        )
        .unwrap();

        let hits = |conn: &Connection| -> i64 {
            conn.query_row(
                "SELECT COUNT(*) FROM articles_fts WHERE articles_fts MATCH 'river'",
                [],
                |row| row.get(0),
            )
            .unwrap()
        };
        assert_eq!(hits(&conn), 1);

        conn.execute("DELETE FROM articles WHERE id = 'a'", []).unwrap();
        assert_eq!(hits(&conn), 0);
    }

    #[test]
    fn test_version_1_archive_is_migrated() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE articles (
                pk INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                source_name TEXT NOT NULL,
                url TEXT NOT NULL UNIQUE,
                title TEXT,
                content_html TEXT NOT NULL CHECK (length(content_html) > 0),
                status INTEGER NOT NULL DEFAULT 0 CHECK (status IN (-1, 0, 1, 2)),
                link_alive INTEGER NOT NULL DEFAULT 1,
                crawled_at TEXT NOT NULL,
                status_changed_at TEXT
            );
            CREATE VIRTUAL TABLE articles_fts USING fts5(
                title, content_html, content = 'articles', content_rowid = 'pk'
            );
            INSERT INTO articles (id, source_name, url, title, content_html, crawled_at)
            VALUES ('a', 's', 'https://example.com/a', 'Old story', '<p>harbour</p>',
                    '2024-01-01T00:00:00.000000Z');
            PRAGMA user_version = 1;",
        )
        .unwrap();

        initialize_schema(&conn).unwrap();

        let version: u32 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);

        // Rows written before the migration are searchable again
        let hits: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM articles_fts WHERE articles_fts MATCH 'harbour'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(hits, 1);

        conn.execute("UPDATE articles SET summary = 'Tóm tắt' WHERE id = 'a'", [])
            .unwrap();
    }
}
