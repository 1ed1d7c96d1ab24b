//! Snapshot export and import
//!
//! Two formats are supported:
//! - a binary copy of the whole database (`VACUUM INTO`), indexes included
//! - a portable JSON document holding archived articles and their images
//!
//! Import detects the format from the file header.

use crate::state::ArticleStatus;
use crate::storage::traits::{StorageError, StorageResult};
use crate::storage::{db_timestamp, ImportReport};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read};
use std::path::Path;

const SQLITE_HEADER: &[u8; 16] = b"SQLite format 3\0";

/// Article columns added after the first archive layout
const METADATA_COLUMNS: [&str; 4] = ["summary", "author", "published_at", "category"];

/// Portable export document
#[derive(Debug, Serialize, Deserialize)]
pub struct SnapshotDocument {
    pub exported_at: String,
    pub articles: Vec<SnapshotArticle>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SnapshotArticle {
    pub id: String,
    pub source_name: String,
    pub url: String,
    pub title: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub published_at: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    pub content_html: String,
    pub status: String,
    pub link_alive: bool,
    pub crawled_at: String,
    #[serde(default)]
    pub status_changed_at: Option<String>,
    #[serde(default)]
    pub images: Vec<SnapshotImage>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SnapshotImage {
    pub id: String,
    pub source_url: String,
    pub local_path: Option<String>,
    pub downloaded: bool,
}

enum SnapshotFormat {
    Sqlite,
    Json,
}

fn path_str(path: &Path) -> StorageResult<&str> {
    path.to_str().ok_or_else(|| {
        StorageError::UnsupportedSnapshot(format!("non UTF-8 path {}", path.display()))
    })
}

/// Writes a full binary copy of the database
pub(crate) fn export_binary(conn: &Connection, dest: &Path) -> StorageResult<()> {
    // VACUUM INTO refuses to overwrite
    if dest.exists() {
        std::fs::remove_file(dest)?;
    }
    conn.execute("VACUUM INTO ?1", params![path_str(dest)?])?;
    tracing::info!("Database snapshot written to {}", dest.display());
    Ok(())
}

/// Writes archived articles with their images as JSON
pub(crate) fn export_archived_json(conn: &Connection, dest: &Path) -> StorageResult<u64> {
    let mut article_stmt = conn.prepare(
        "SELECT id, source_name, url, title, summary, author, published_at, category,
                content_html, link_alive, crawled_at, status_changed_at
         FROM articles WHERE status = ?1
         ORDER BY crawled_at",
    )?;
    let mut image_stmt = conn.prepare(
        "SELECT id, source_url, local_path, downloaded
         FROM images WHERE article_id = ?1
         ORDER BY created_at, id",
    )?;

    let mut articles = article_stmt
        .query_map(params![ArticleStatus::Archived.to_db_value()], |row| {
            Ok(SnapshotArticle {
                id: row.get(0)?,
                source_name: row.get(1)?,
                url: row.get(2)?,
                title: row.get(3)?,
                summary: row.get(4)?,
                author: row.get(5)?,
                published_at: row.get(6)?,
                category: row.get(7)?,
                content_html: row.get(8)?,
                status: ArticleStatus::Archived.as_str().to_string(),
                link_alive: row.get(9)?,
                crawled_at: row.get(10)?,
                status_changed_at: row.get(11)?,
                images: Vec::new(),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    for article in &mut articles {
        article.images = image_stmt
            .query_map(params![article.id], |row| {
                Ok(SnapshotImage {
                    id: row.get(0)?,
                    source_url: row.get(1)?,
                    local_path: row.get(2)?,
                    downloaded: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
    }

    let count = articles.len() as u64;
    let document = SnapshotDocument {
        exported_at: db_timestamp(Utc::now()),
        articles,
    };

    let writer = BufWriter::new(File::create(dest)?);
    serde_json::to_writer_pretty(writer, &document)?;

    tracing::info!("Exported {} archived articles to {}", count, dest.display());
    Ok(count)
}

/// Imports a snapshot in either format
pub(crate) fn import(
    conn: &mut Connection,
    src: &Path,
    merge: bool,
) -> StorageResult<ImportReport> {
    let report = match detect_format(src)? {
        SnapshotFormat::Sqlite => import_sqlite(conn, src, merge)?,
        SnapshotFormat::Json => import_json(conn, src, merge)?,
    };

    tracing::info!(
        "Imported {} articles ({} skipped, {} images) from {}",
        report.articles_imported,
        report.articles_skipped,
        report.images_imported,
        src.display()
    );
    Ok(report)
}

fn detect_format(src: &Path) -> StorageResult<SnapshotFormat> {
    let mut header = Vec::with_capacity(SQLITE_HEADER.len());
    File::open(src)?
        .take(SQLITE_HEADER.len() as u64)
        .read_to_end(&mut header)?;

    if header.as_slice() == SQLITE_HEADER {
        return Ok(SnapshotFormat::Sqlite);
    }

    let first = header.iter().find(|b| !b.is_ascii_whitespace());
    if first == Some(&b'{') {
        return Ok(SnapshotFormat::Json);
    }

    Err(StorageError::UnsupportedSnapshot(format!(
        "{} is neither a SQLite database nor a JSON export",
        src.display()
    )))
}

fn import_sqlite(conn: &mut Connection, src: &Path, merge: bool) -> StorageResult<ImportReport> {
    conn.execute("ATTACH DATABASE ?1 AS snapshot", params![path_str(src)?])?;
    let result = copy_from_attached(conn, merge);
    conn.execute("DETACH DATABASE snapshot", [])?;
    result
}

fn attached_table_exists(conn: &Connection, table: &str) -> StorageResult<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM snapshot.sqlite_master WHERE type = 'table' AND name = ?1",
            params![table],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn attached_columns(conn: &Connection, table: &str) -> StorageResult<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA snapshot.table_info({})", table))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(columns)
}

/// Select list for the metadata columns, NULL where an older snapshot lacks one
fn metadata_select(present: &[String]) -> String {
    METADATA_COLUMNS
        .iter()
        .map(|column| {
            if present.iter().any(|p| p == column) {
                format!("s.{}", column)
            } else {
                "NULL".to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn copy_from_attached(conn: &mut Connection, merge: bool) -> StorageResult<ImportReport> {
    if !attached_table_exists(conn, "articles")? {
        return Err(StorageError::UnsupportedSnapshot(
            "snapshot has no articles table".to_string(),
        ));
    }
    let has_images = attached_table_exists(conn, "images")?;
    let has_checkpoints = attached_table_exists(conn, "deep_scan_checkpoints")?;
    let metadata = metadata_select(&attached_columns(conn, "articles")?);

    let tx = conn.transaction()?;

    if !merge {
        tx.execute("DELETE FROM main.images", [])?;
        tx.execute("DELETE FROM main.articles", [])?;
        tx.execute("DELETE FROM main.deep_scan_checkpoints", [])?;
    }

    let total: i64 = tx.query_row("SELECT COUNT(*) FROM snapshot.articles", [], |row| {
        row.get(0)
    })?;

    let imported = tx.execute(
        &format!(
            "INSERT INTO main.articles
             (id, source_name, url, title, summary, author, published_at, category,
              content_html, status, link_alive, crawled_at, status_changed_at)
             SELECT s.id, s.source_name, s.url, s.title, {}, s.content_html, s.status,
                    s.link_alive, s.crawled_at, s.status_changed_at
             FROM snapshot.articles AS s
             WHERE length(s.content_html) > 0
               AND NOT EXISTS (
                   SELECT 1 FROM main.articles m WHERE m.url = s.url OR m.id = s.id
               )
             ORDER BY s.pk",
            metadata
        ),
        [],
    )?;

    let images = if has_images {
        tx.execute(
            "INSERT OR IGNORE INTO main.images
             (id, article_id, source_url, local_path, downloaded, created_at)
             SELECT i.id, i.article_id, i.source_url, i.local_path, i.downloaded, i.created_at
             FROM snapshot.images AS i
             WHERE EXISTS (SELECT 1 FROM main.articles m WHERE m.id = i.article_id)",
            [],
        )?
    } else {
        0
    };

    if has_checkpoints {
        tx.execute(
            "INSERT OR IGNORE INTO main.deep_scan_checkpoints
             SELECT * FROM snapshot.deep_scan_checkpoints",
            [],
        )?;
    }

    tx.commit()?;

    Ok(ImportReport {
        articles_imported: imported as u64,
        articles_skipped: (total as u64).saturating_sub(imported as u64),
        images_imported: images as u64,
    })
}

fn import_json(conn: &mut Connection, src: &Path, merge: bool) -> StorageResult<ImportReport> {
    let document: SnapshotDocument = serde_json::from_reader(BufReader::new(File::open(src)?))?;
    let mut report = ImportReport::default();

    let tx = conn.transaction()?;

    if !merge {
        tx.execute("DELETE FROM images", [])?;
        tx.execute("DELETE FROM articles", [])?;
    }

    {
        let mut insert_article = tx.prepare(
            "INSERT INTO articles
             (id, source_name, url, title, summary, author, published_at, category,
              content_html, status, link_alive, crawled_at, status_changed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
             ON CONFLICT DO NOTHING",
        )?;
        let mut insert_image = tx.prepare(
            "INSERT OR IGNORE INTO images
             (id, article_id, source_url, local_path, downloaded, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;

        for article in &document.articles {
            let status: ArticleStatus = article
                .status
                .parse()
                .map_err(StorageError::UnsupportedSnapshot)?;

            if article.content_html.trim().is_empty() {
                tracing::warn!("Skipping {} from snapshot: empty content", article.url);
                report.articles_skipped += 1;
                continue;
            }

            let inserted = insert_article.execute(params![
                article.id,
                article.source_name,
                article.url,
                article.title,
                article.summary,
                article.author,
                article.published_at,
                article.category,
                article.content_html,
                status.to_db_value(),
                article.link_alive,
                article.crawled_at,
                article.status_changed_at,
            ])?;

            if inserted == 0 {
                report.articles_skipped += 1;
                continue;
            }
            report.articles_imported += 1;

            for image in &article.images {
                report.images_imported += insert_image.execute(params![
                    image.id,
                    article.id,
                    image.source_url,
                    image.local_path,
                    image.downloaded,
                    article.crawled_at,
                ])? as u64;
            }
        }
    }

    tx.commit()?;
    Ok(report)
}
