//! Live-mode scanning of RSS/Atom feeds and sitemaps
//!
//! Feeds are fetched with conditional GET. Element names are matched on their
//! local part so namespaced feeds (`news:`, `atom:`) parse the same way.

use crate::config::{SourceConfig, SourceKind};
use crate::crawler::{CacheValidators, FetchOutcome, Fetcher};
use crate::scanner::ScanOutcome;
use crate::storage::{Storage, StorageError, StoreHandle};
use crate::url::normalize_url;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashSet;
use std::sync::Arc;
use url::Url;

/// Path fragments of listing and utility pages
const NON_ARTICLE_SEGMENTS: &[&str] = &[
    "/tag/", "/tags/", "/category/", "/author/", "/page/", "/search/", "/login/", "/register/",
];

/// Extensions of static resources and nested sitemaps
const NON_ARTICLE_EXTENSIONS: &[&str] = &[
    ".css", ".js", ".png", ".jpg", ".jpeg", ".gif", ".ico", ".svg", ".webp", ".xml", ".pdf",
];

/// Links found in a feed document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedFeed {
    /// RSS `<item><link>` and Atom `<entry><link href>` values
    pub item_links: Vec<String>,

    /// Sitemap `<url><loc>` values
    pub sitemap_locs: Vec<String>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Capture {
    Link,
    Guid,
    Loc,
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).to_lowercase()
}

/// Atom `<link>` pointing at the entry itself
fn atom_href(e: &BytesStart<'_>) -> Option<String> {
    let rel = e
        .try_get_attribute("rel")
        .ok()
        .flatten()
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()));
    if rel.as_deref().is_some_and(|rel| rel != "alternate") {
        return None;
    }

    e.try_get_attribute("href")
        .ok()
        .flatten()
        .and_then(|a| a.unescape_value().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parses an RSS, Atom or sitemap document
///
/// A `<guid>` that looks like a URL stands in for an empty `<link>`.
///
/// # Examples
///
/// ```
/// use snapwire::scanner::parse_feed;
///
/// let xml = r#"<rss><channel><item><link>https://example.com/a.html</link></item></channel></rss>"#;
/// let feed = parse_feed(xml).unwrap();
/// assert_eq!(feed.item_links, vec!["https://example.com/a.html".to_string()]);
/// ```
pub fn parse_feed(xml: &str) -> Result<ParsedFeed, String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut feed = ParsedFeed::default();
    let mut buf = Vec::new();

    let mut in_item = false;
    let mut in_url = false;
    let mut capture: Option<Capture> = None;
    let mut text = String::new();
    let mut item_link: Option<String> = None;
    let mut item_guid: Option<String> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match local_name(&e).as_str() {
                "item" | "entry" => {
                    in_item = true;
                    item_link = None;
                    item_guid = None;
                }
                "url" => in_url = true,
                "link" if in_item => match atom_href(&e) {
                    Some(href) => item_link = item_link.or(Some(href)),
                    None => {
                        capture = Some(Capture::Link);
                        text.clear();
                    }
                },
                "guid" | "id" if in_item => {
                    capture = Some(Capture::Guid);
                    text.clear();
                }
                "loc" if in_url => {
                    capture = Some(Capture::Loc);
                    text.clear();
                }
                _ => {}
            },
            Ok(Event::Empty(e)) => {
                if in_item && local_name(&e) == "link" {
                    if let Some(href) = atom_href(&e) {
                        item_link = item_link.or(Some(href));
                    }
                }
            }
            Ok(Event::Text(e)) => {
                if capture.is_some() {
                    let value = e.unescape().map_err(|e| e.to_string())?;
                    text.push_str(&value);
                }
            }
            Ok(Event::CData(e)) => {
                if capture.is_some() {
                    text.push_str(&String::from_utf8_lossy(&e.into_inner()));
                }
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_lowercase();
                let value = text.trim();

                match (name.as_str(), capture) {
                    ("link", Some(Capture::Link)) if !value.is_empty() => {
                        item_link = item_link.or(Some(value.to_string()));
                    }
                    ("guid" | "id", Some(Capture::Guid)) if value.starts_with("http") => {
                        item_guid = Some(value.to_string());
                    }
                    ("loc", Some(Capture::Loc)) if !value.is_empty() => {
                        feed.sitemap_locs.push(value.to_string());
                    }
                    ("item" | "entry", _) if in_item => {
                        if let Some(link) = item_link.take().or_else(|| item_guid.take()) {
                            feed.item_links.push(link);
                        }
                        in_item = false;
                    }
                    ("url", _) => in_url = false,
                    _ => {}
                }

                if matches!(name.as_str(), "link" | "guid" | "id" | "loc") {
                    capture = None;
                    text.clear();
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(format!(
                    "XML parse error at position {}: {}",
                    reader.buffer_position(),
                    e
                ))
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(feed)
}

/// Heuristic for sitemap entries that point at articles
///
/// Rejects listing pages (tags, categories, authors, pagination, search),
/// static resources, nested sitemaps and bare section roots.
pub fn is_article_url(url: &Url) -> bool {
    let path = url.path().to_ascii_lowercase();

    if path == "/" || path.is_empty() {
        return false;
    }

    if NON_ARTICLE_SEGMENTS.iter().any(|segment| path.contains(segment)) {
        return false;
    }

    !NON_ARTICLE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// Live-mode scanner for one source
///
/// Remembers the feed's cache validators between scans.
pub struct FeedScanner {
    fetcher: Arc<Fetcher>,
    store: StoreHandle,
    validators: CacheValidators,
}

impl FeedScanner {
    pub fn new(fetcher: Arc<Fetcher>, store: StoreHandle) -> Self {
        Self {
            fetcher,
            store,
            validators: CacheValidators::default(),
        }
    }

    /// Fetches the source feed and returns URLs not yet archived
    pub async fn scan(&mut self, source: &SourceConfig) -> Result<ScanOutcome, StorageError> {
        let validators = (!self.validators.is_empty()).then_some(&self.validators);

        let body = match self.fetcher.fetch(&source.url, validators).await {
            FetchOutcome::Success {
                body, validators, ..
            } => {
                self.validators = validators;
                body
            }
            FetchOutcome::NotModified => {
                tracing::debug!("[{}] feed not modified", source.name);
                return Ok(ScanOutcome::NotModified);
            }
            FetchOutcome::RateLimited { .. } => return Ok(ScanOutcome::RateLimited),
            other => {
                tracing::warn!("[{}] feed fetch failed: {}", source.name, other.describe());
                return Ok(ScanOutcome::Failed(other.describe()));
            }
        };

        let feed = match parse_feed(&body) {
            Ok(feed) => feed,
            Err(e) => {
                tracing::warn!("[{}] {}", source.name, e);
                // Force a full fetch next time instead of trusting a broken copy
                self.validators = CacheValidators::default();
                return Ok(ScanOutcome::Failed(e));
            }
        };

        let urls = candidate_urls(source, feed);
        let found = urls.len();

        let candidates = self.store.call(move |s| s.filter_new_urls(&urls)).await?;
        tracing::debug!(
            "[{}] {} entries, {} unseen",
            source.name,
            found,
            candidates.len()
        );

        Ok(ScanOutcome::Candidates(candidates))
    }
}

/// Normalized, de-duplicated candidate URLs in feed order
fn candidate_urls(source: &SourceConfig, feed: ParsedFeed) -> Vec<String> {
    let ParsedFeed {
        item_links,
        sitemap_locs,
    } = feed;

    let (primary, fallback) = match source.kind {
        SourceKind::Rss => (item_links, sitemap_locs),
        SourceKind::Sitemap => (sitemap_locs, item_links),
    };
    let raw = if primary.is_empty() { fallback } else { primary };

    let mut seen = HashSet::new();
    let mut urls = Vec::new();

    for entry in raw {
        let url = match normalize_url(&entry) {
            Ok(url) => url,
            Err(e) => {
                tracing::debug!("[{}] skipping {}: {}", source.name, entry, e);
                continue;
            }
        };

        if source.kind == SourceKind::Sitemap && !is_article_url(&url) {
            continue;
        }

        let url = url.to_string();
        if seen.insert(url.clone()) {
            urls.push(url);
        }
    }

    urls
}
