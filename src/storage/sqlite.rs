//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.
//! The database runs in WAL mode so one writing crawl process and any number of
//! reading triage processes can work on the same file concurrently.

use crate::state::ArticleStatus;
use crate::storage::schema::initialize_schema;
use crate::storage::snapshot;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{
    article_id_for, db_timestamp, image_id_for, ArticleMetadata, ArticleRecord, ArticleSummary,
    DeepScanCheckpoint, ErrorKind, ErrorLogEntry, ImageRecord, ImportReport, ScanRunStatus,
    StreamFilter,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{
    params, params_from_iter, Connection, OpenFlags, OptionalExtension, Row, TransactionBehavior,
};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// How long a connection waits on a locked database before giving up
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SUMMARY_COLUMNS: &str = "id, source_name, url, title, status, link_alive, crawled_at";

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Opens (or creates) the archive for reading and writing
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Opens an existing archive without write access
    ///
    /// Readers never block the writer in WAL mode, so triage and reporting
    /// tools can use this while a crawl is running.
    pub fn open_read_only(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA query_only = ON;")?;
        Ok(Self { conn })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Same as `upsert_article` with an explicit capture time
    pub fn insert_article_at(
        &mut self,
        url: &str,
        source_name: &str,
        content_html: &str,
        title: Option<&str>,
        crawled_at: DateTime<Utc>,
    ) -> StorageResult<(String, bool)> {
        let metadata = ArticleMetadata::titled(title);
        self.capture_article_at(url, source_name, content_html, &metadata, crawled_at)
    }

    /// Same as `capture_article` with an explicit capture time
    pub fn capture_article_at(
        &mut self,
        url: &str,
        source_name: &str,
        content_html: &str,
        metadata: &ArticleMetadata,
        crawled_at: DateTime<Utc>,
    ) -> StorageResult<(String, bool)> {
        if content_html.trim().is_empty() {
            return Err(StorageError::EmptyContent {
                url: url.to_string(),
            });
        }

        let id = article_id_for(url);
        let inserted = self.conn.execute(
            "INSERT INTO articles (id, source_name, url, title, summary, author, published_at,
                                   category, content_html, status, link_alive, crawled_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 1, ?11)
             ON CONFLICT DO NOTHING",
            params![
                id,
                source_name,
                url,
                metadata.title,
                metadata.summary,
                metadata.author,
                metadata.published_at,
                metadata.category,
                content_html,
                ArticleStatus::New.to_db_value(),
                db_timestamp(crawled_at)
            ],
        )?;

        if inserted == 1 {
            return Ok((id, true));
        }

        let existing: Option<String> = self
            .conn
            .query_row(
                "SELECT id FROM articles WHERE url = ?1",
                params![url],
                |row| row.get(0),
            )
            .optional()?;

        match existing {
            Some(existing_id) => Ok((existing_id, false)),
            None => Err(StorageError::ConstraintViolation(format!(
                "article id {} already used by a different URL than {}",
                id, url
            ))),
        }
    }

    /// Same as `log_error` with an explicit timestamp
    pub fn log_error_at(
        &mut self,
        source_name: &str,
        kind: ErrorKind,
        message: &str,
        url: Option<&str>,
        logged_at: DateTime<Utc>,
    ) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO error_log (source_name, kind, message, url, logged_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                source_name,
                kind.to_db_string(),
                message,
                url,
                db_timestamp(logged_at)
            ],
        )?;
        Ok(())
    }
}

fn status_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<ArticleStatus> {
    let value: i64 = row.get(idx)?;
    ArticleStatus::from_db_value(value).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Integer,
            format!("unknown article status {}", value).into(),
        )
    })
}

fn summary_from_row(row: &Row<'_>) -> rusqlite::Result<ArticleSummary> {
    Ok(ArticleSummary {
        id: row.get(0)?,
        source_name: row.get(1)?,
        url: row.get(2)?,
        title: row.get(3)?,
        status: status_column(row, 4)?,
        link_alive: row.get(5)?,
        crawled_at: row.get(6)?,
    })
}

fn error_from_row(row: &Row<'_>) -> rusqlite::Result<ErrorLogEntry> {
    let kind: String = row.get(2)?;
    let kind = ErrorKind::from_db_string(&kind).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            Type::Text,
            format!("unknown error kind {}", kind).into(),
        )
    })?;

    Ok(ErrorLogEntry {
        id: row.get(0)?,
        source_name: row.get(1)?,
        kind,
        message: row.get(3)?,
        url: row.get(4)?,
        logged_at: row.get(5)?,
    })
}

fn image_from_row(row: &Row<'_>) -> rusqlite::Result<ImageRecord> {
    Ok(ImageRecord {
        id: row.get(0)?,
        article_id: row.get(1)?,
        source_url: row.get(2)?,
        local_path: row.get(3)?,
        downloaded: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn checkpoint_from_row(row: &Row<'_>) -> rusqlite::Result<DeepScanCheckpoint> {
    let target: String = row.get(1)?;
    let target_date = NaiveDate::parse_from_str(&target, DATE_FORMAT)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?;

    let last_seen: Option<String> = row.get(3)?;
    let last_date_seen = last_seen
        .map(|s| NaiveDateTime::parse_from_str(&s, DATETIME_FORMAT))
        .transpose()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;

    let status: String = row.get(4)?;
    let run_status = ScanRunStatus::from_db_string(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            Type::Text,
            format!("unknown run status {}", status).into(),
        )
    })?;

    Ok(DeepScanCheckpoint {
        source_name: row.get(0)?,
        target_date,
        current_page: row.get(2)?,
        last_date_seen,
        run_status,
        pages_visited: row.get(5)?,
        articles_found: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

/// Turns free text into an FTS5 query
///
/// Every whitespace-separated term becomes a quoted phrase, so user input is
/// never interpreted as FTS5 syntax. Terms are implicitly AND-ed.
fn fts_query(text: &str) -> Option<String> {
    let terms: Vec<String> = text
        .split_whitespace()
        .filter(|term| term.chars().any(char::is_alphanumeric))
        .map(|term| format!("\"{}\"", term.replace('"', "\"\"")))
        .collect();

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" "))
    }
}

impl Storage for SqliteStorage {
    // ===== Article Capture =====

    fn capture_article(
        &mut self,
        url: &str,
        source_name: &str,
        content_html: &str,
        metadata: &ArticleMetadata,
    ) -> StorageResult<(String, bool)> {
        self.capture_article_at(url, source_name, content_html, metadata, Utc::now())
    }

    fn get_article(&self, id: &str) -> StorageResult<ArticleRecord> {
        self.conn
            .query_row(
                "SELECT id, source_name, url, title, summary, author, published_at, category,
                 content_html, status, link_alive, crawled_at, status_changed_at
                 FROM articles WHERE id = ?1",
                params![id],
                |row| {
                    Ok(ArticleRecord {
                        id: row.get(0)?,
                        source_name: row.get(1)?,
                        url: row.get(2)?,
                        title: row.get(3)?,
                        summary: row.get(4)?,
                        author: row.get(5)?,
                        published_at: row.get(6)?,
                        category: row.get(7)?,
                        content_html: row.get(8)?,
                        status: status_column(row, 9)?,
                        link_alive: row.get(10)?,
                        crawled_at: row.get(11)?,
                        status_changed_at: row.get(12)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| StorageError::ArticleNotFound(id.to_string()))
    }

    fn is_known(&self, url: &str) -> StorageResult<bool> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT 1 FROM articles WHERE url = ?1")?;
        Ok(stmt.exists(params![url])?)
    }

    fn filter_new_urls(&self, urls: &[String]) -> StorageResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT 1 FROM articles WHERE url = ?1")?;
        let mut seen = HashSet::new();
        let mut fresh = Vec::new();

        for url in urls {
            if !seen.insert(url.as_str()) {
                continue;
            }
            if !stmt.exists(params![url])? {
                fresh.push(url.clone());
            }
        }

        Ok(fresh)
    }

    // ===== Triage =====

    fn set_status(&mut self, id: &str, status: ArticleStatus) -> StorageResult<()> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current: Option<i64> = tx
            .query_row(
                "SELECT status FROM articles WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        let current = current.ok_or_else(|| StorageError::ArticleNotFound(id.to_string()))?;
        let from = ArticleStatus::from_db_value(current).ok_or_else(|| {
            StorageError::ConstraintViolation(format!("article {} has status {}", id, current))
        })?;

        if !from.can_transition_to(status) {
            return Err(StorageError::InvalidTransition {
                id: id.to_string(),
                from,
                to: status,
            });
        }

        tx.execute(
            "UPDATE articles SET status = ?1, status_changed_at = ?2 WHERE id = ?3",
            params![status.to_db_value(), db_timestamp(Utc::now()), id],
        )?;
        tx.commit()?;

        tracing::debug!("Article {} moved {} -> {}", id, from, status);
        Ok(())
    }

    fn record_link_check(&mut self, id: &str, alive: bool) -> StorageResult<()> {
        let updated = self.conn.execute(
            "UPDATE articles SET link_alive = ?1 WHERE id = ?2",
            params![alive, id],
        )?;
        if updated == 0 {
            return Err(StorageError::ArticleNotFound(id.to_string()));
        }
        Ok(())
    }

    fn articles_for_link_check(&self, limit: usize) -> StorageResult<Vec<ArticleSummary>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM articles
             WHERE status IN (?1, ?2) AND link_alive = 1
             ORDER BY crawled_at DESC LIMIT ?3",
            SUMMARY_COLUMNS
        ))?;

        let articles = stmt
            .query_map(
                params![
                    ArticleStatus::New.to_db_value(),
                    ArticleStatus::Picked.to_db_value(),
                    limit as i64
                ],
                summary_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(articles)
    }

    // ===== Images =====

    fn save_image(&mut self, article_id: &str, source_url: &str) -> StorageResult<String> {
        let id = image_id_for(article_id, source_url);
        self.conn.execute(
            "INSERT OR IGNORE INTO images (id, article_id, source_url, downloaded, created_at)
             VALUES (?1, ?2, ?3, 0, ?4)",
            params![id, article_id, source_url, db_timestamp(Utc::now())],
        )?;
        Ok(id)
    }

    fn mark_image_downloaded(&mut self, image_id: &str, local_path: &str) -> StorageResult<()> {
        let updated = self.conn.execute(
            "UPDATE images SET downloaded = 1, local_path = ?1 WHERE id = ?2",
            params![local_path, image_id],
        )?;
        if updated == 0 {
            return Err(StorageError::ImageNotFound(image_id.to_string()));
        }
        Ok(())
    }

    fn pending_images(&self, limit: usize) -> StorageResult<Vec<ImageRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, article_id, source_url, local_path, downloaded, created_at
             FROM images WHERE downloaded = 0
             ORDER BY created_at LIMIT ?1",
        )?;

        let images = stmt
            .query_map(params![limit as i64], image_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(images)
    }

    fn article_images(&self, article_id: &str) -> StorageResult<Vec<ImageRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, article_id, source_url, local_path, downloaded, created_at
             FROM images WHERE article_id = ?1
             ORDER BY created_at, id",
        )?;

        let images = stmt
            .query_map(params![article_id], image_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(images)
    }

    // ===== Queries =====

    fn query_stream(
        &self,
        filter: &StreamFilter,
        limit: usize,
    ) -> StorageResult<Vec<ArticleSummary>> {
        let mut sql = format!("SELECT {} FROM articles WHERE 1 = 1", SUMMARY_COLUMNS);
        let mut values: Vec<Value> = Vec::new();

        if let Some(status) = filter.status {
            values.push(Value::Integer(status.to_db_value()));
            sql.push_str(&format!(" AND status = ?{}", values.len()));
        }
        if let Some(source) = &filter.source_name {
            values.push(Value::Text(source.clone()));
            sql.push_str(&format!(" AND source_name = ?{}", values.len()));
        }
        if let Some(since) = filter.since {
            values.push(Value::Text(db_timestamp(since)));
            sql.push_str(&format!(" AND crawled_at >= ?{}", values.len()));
        }
        values.push(Value::Integer(limit as i64));
        sql.push_str(&format!(
            " ORDER BY crawled_at DESC, pk DESC LIMIT ?{}",
            values.len()
        ));

        let mut stmt = self.conn.prepare(&sql)?;
        let articles = stmt
            .query_map(params_from_iter(values.iter()), summary_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(articles)
    }

    fn query_archive(&self, text: &str, limit: usize) -> StorageResult<Vec<ArticleSummary>> {
        let query = match fts_query(text) {
            Some(query) => query,
            None => return Ok(Vec::new()),
        };

        let mut stmt = self.conn.prepare(
            "SELECT a.id, a.source_name, a.url, a.title, a.status, a.link_alive, a.crawled_at
             FROM articles_fts
             JOIN articles a ON a.pk = articles_fts.rowid
             WHERE articles_fts MATCH ?1
             ORDER BY articles_fts.rank
             LIMIT ?2",
        )?;

        let articles = stmt
            .query_map(params![query, limit as i64], summary_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(articles)
    }

    // ===== Maintenance =====

    fn prune(
        &mut self,
        older_than: DateTime<Utc>,
        statuses: &[ArticleStatus],
    ) -> StorageResult<Vec<String>> {
        let statuses: &[ArticleStatus] = if statuses.is_empty() {
            &[ArticleStatus::Discarded]
        } else {
            statuses
        };
        let cutoff = db_timestamp(older_than);

        let tx = self.conn.transaction()?;
        let mut pruned = Vec::new();
        {
            let mut select =
                tx.prepare("SELECT id FROM articles WHERE status = ?1 AND crawled_at < ?2")?;
            for status in statuses {
                let ids = select
                    .query_map(params![status.to_db_value(), cutoff], |row| {
                        row.get::<_, String>(0)
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                pruned.extend(ids);
            }
        }
        for status in statuses {
            tx.execute(
                "DELETE FROM articles WHERE status = ?1 AND crawled_at < ?2",
                params![status.to_db_value(), cutoff],
            )?;
        }
        tx.commit()?;

        pruned.sort();
        pruned.dedup();
        Ok(pruned)
    }

    fn export_snapshot(&self, dest: &Path) -> StorageResult<()> {
        snapshot::export_binary(&self.conn, dest)
    }

    fn export_archived_json(&self, dest: &Path) -> StorageResult<u64> {
        snapshot::export_archived_json(&self.conn, dest)
    }

    fn import_snapshot(&mut self, src: &Path, merge: bool) -> StorageResult<ImportReport> {
        snapshot::import(&mut self.conn, src, merge)
    }

    // ===== Deep-Scan Checkpoints =====

    fn load_checkpoint(
        &self,
        source_name: &str,
        target_date: NaiveDate,
    ) -> StorageResult<Option<DeepScanCheckpoint>> {
        let checkpoint = self
            .conn
            .query_row(
                "SELECT source_name, target_date, current_page, last_date_seen, run_status,
                 pages_visited, articles_found, updated_at
                 FROM deep_scan_checkpoints
                 WHERE source_name = ?1 AND target_date = ?2",
                params![source_name, target_date.format(DATE_FORMAT).to_string()],
                checkpoint_from_row,
            )
            .optional()?;

        Ok(checkpoint)
    }

    fn save_checkpoint(&mut self, checkpoint: &DeepScanCheckpoint) -> StorageResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO deep_scan_checkpoints
             (source_name, target_date, current_page, last_date_seen, run_status,
              pages_visited, articles_found, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                checkpoint.source_name,
                checkpoint.target_date.format(DATE_FORMAT).to_string(),
                checkpoint.current_page,
                checkpoint
                    .last_date_seen
                    .map(|d| d.format(DATETIME_FORMAT).to_string()),
                checkpoint.run_status.to_db_string(),
                checkpoint.pages_visited,
                checkpoint.articles_found,
                db_timestamp(Utc::now()),
            ],
        )?;
        Ok(())
    }

    // ===== Error Log =====

    fn log_error(
        &mut self,
        source_name: &str,
        kind: ErrorKind,
        message: &str,
        url: Option<&str>,
    ) -> StorageResult<()> {
        self.log_error_at(source_name, kind, message, url, Utc::now())
    }

    fn recent_errors(
        &self,
        source_name: Option<&str>,
        limit: usize,
    ) -> StorageResult<Vec<ErrorLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, source_name, kind, message, url, logged_at FROM error_log
             WHERE ?1 IS NULL OR source_name = ?1
             ORDER BY logged_at DESC, id DESC LIMIT ?2",
        )?;

        let entries = stmt
            .query_map(params![source_name, limit as i64], error_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(entries)
    }

    fn prune_error_log(&mut self, older_than: DateTime<Utc>) -> StorageResult<u64> {
        let deleted = self.conn.execute(
            "DELETE FROM error_log WHERE logged_at < ?1",
            params![db_timestamp(older_than)],
        )?;
        Ok(deleted as u64)
    }

    // ===== Statistics =====

    fn count_by_status(&self, status: ArticleStatus) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM articles WHERE status = ?1",
            params![status.to_db_value()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn count_total_articles(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM articles", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn count_dead_links(&self) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM articles WHERE link_alive = 0",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn count_captured_since(&self, since: DateTime<Utc>) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM articles WHERE crawled_at >= ?1",
            params![db_timestamp(since)],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn count_errors_since(&self, since: DateTime<Utc>) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM error_log WHERE logged_at >= ?1",
            params![db_timestamp(since)],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn count_images(&self) -> StorageResult<(u64, u64)> {
        let (total, pending): (i64, i64) = self.conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(downloaded = 0), 0) FROM images",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok((total as u64, pending as u64))
    }

    fn count_by_source(&self) -> StorageResult<Vec<(String, u64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT source_name, COUNT(*) FROM articles
             GROUP BY source_name ORDER BY source_name",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    fn database_size(&self) -> StorageResult<u64> {
        let page_count: i64 = self
            .conn
            .query_row("PRAGMA page_count", [], |row| row.get(0))?;
        let page_size: i64 = self
            .conn
            .query_row("PRAGMA page_size", [], |row| row.get(0))?;
        Ok((page_count * page_size) as u64)
    }
}
