//! HTML parser for captured articles
//!
//! Extracts the metadata stored alongside the raw HTML:
//! - Title, summary, author, publication time and category
//! - Image URLs to download

use crate::storage::ArticleMetadata;
use chrono::{NaiveDate, NaiveTime};
use scraper::{Html, Selector};
use url::Url;

/// Extracted information from an article page
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedArticle {
    pub metadata: ArticleMetadata,

    /// Absolute image URLs in document order, deduplicated
    pub image_urls: Vec<String>,
}

/// Parses an article page
///
/// # Title
///
/// `og:title` is preferred, then `<title>`, then the first `<h1>`.
///
/// # Other metadata
///
/// - summary: `description` or `og:description` meta, then `.sapo` or `.description`
/// - author: `author` meta, then `.author`
/// - published: `article:published_time` meta, then `<time datetime>`, then a
///   `dd/mm/yyyy` date with optional `HH:MM` in `.date` or `.time`
/// - category: `article:section` meta, then the last breadcrumb link
///
/// # Images
///
/// `<img src>` and lazy-loaded `<img data-src>` are collected. `data:` URIs
/// and non-HTTP(S) URLs are skipped. At most `max_images` are kept.
///
/// # Example
///
/// ```
/// use snapwire::crawler::parse_article;
/// use url::Url;
///
/// let html = r#"<html><head><title>Test</title></head><body><img src="/a.jpg"></body></html>"#;
/// let base_url = Url::parse("https://example.com/news/1.html").unwrap();
/// let parsed = parse_article(html, &base_url, 10);
/// assert_eq!(parsed.metadata.title, Some("Test".to_string()));
/// assert_eq!(parsed.image_urls, vec!["https://example.com/a.jpg".to_string()]);
/// ```
pub fn parse_article(html: &str, base_url: &Url, max_images: usize) -> ParsedArticle {
    let document = Html::parse_document(html);

    let metadata = ArticleMetadata {
        title: extract_title(&document),
        summary: meta_content(&document, r#"meta[name="description"][content]"#)
            .or_else(|| meta_content(&document, r#"meta[property="og:description"][content]"#))
            .or_else(|| first_text(&document, ".sapo"))
            .or_else(|| first_text(&document, ".description")),
        author: meta_content(&document, r#"meta[name="author"][content]"#)
            .or_else(|| first_text(&document, ".author")),
        published_at: extract_published(&document),
        category: meta_content(&document, r#"meta[property="article:section"][content]"#)
            .or_else(|| last_text(&document, ".breadcrumb a")),
    };

    ParsedArticle {
        metadata,
        image_urls: extract_images(&document, base_url, max_images),
    }
}

fn meta_content(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .filter_map(|element| element.value().attr("content"))
        .map(|content| content.trim().to_string())
        .find(|content| !content.is_empty())
}

fn last_text(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
        .last()
}

fn first_text(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .next()
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn extract_title(document: &Html) -> Option<String> {
    meta_content(document, r#"meta[property="og:title"][content]"#)
        .or_else(|| first_text(document, "title"))
        .or_else(|| first_text(document, "h1"))
}

fn extract_published(document: &Html) -> Option<String> {
    if let Some(published) =
        meta_content(document, r#"meta[property="article:published_time"][content]"#)
    {
        return Some(published);
    }

    let datetime = Selector::parse("time[datetime]").ok().and_then(|selector| {
        document
            .select(&selector)
            .filter_map(|element| element.value().attr("datetime"))
            .map(|value| value.trim().to_string())
            .find(|value| !value.is_empty())
    });

    datetime.or_else(|| {
        [".date", ".time"]
            .iter()
            .filter_map(|selector| first_text(document, selector))
            .find_map(|text| parse_display_date(&text))
    })
}

/// Reads a `dd/mm/yyyy` date and optional `HH:MM` time from display text
///
/// Returns `YYYY-MM-DDTHH:MM:SS`, midnight when no time is present.
pub fn parse_display_date(text: &str) -> Option<String> {
    let tokens: Vec<&str> = text
        .split(|c: char| c.is_whitespace() || c == ',' || c == '|')
        .map(|token| token.trim_matches(|c: char| c == '-' || c == '(' || c == ')'))
        .filter(|token| !token.is_empty())
        .collect();

    let date = tokens
        .iter()
        .find_map(|token| NaiveDate::parse_from_str(token, "%d/%m/%Y").ok())?;
    let time = tokens
        .iter()
        .find_map(|token| NaiveTime::parse_from_str(token, "%H:%M").ok())
        .unwrap_or_default();

    Some(date.and_time(time).format("%Y-%m-%dT%H:%M:%S").to_string())
}

fn extract_images(document: &Html, base_url: &Url, max_images: usize) -> Vec<String> {
    let mut images: Vec<String> = Vec::new();

    let selector = match Selector::parse("img") {
        Ok(selector) => selector,
        Err(_) => return images,
    };

    for element in document.select(&selector) {
        if images.len() >= max_images {
            break;
        }

        let value = element.value();
        let src = value
            .attr("data-src")
            .filter(|s| !s.trim().is_empty())
            .or_else(|| value.attr("src"));

        if let Some(absolute_url) = src.and_then(|href| resolve_link(href, base_url)) {
            if !images.contains(&absolute_url) {
                images.push(absolute_url);
            }
        }
    }

    images
}

/// Resolves a link to an absolute HTTP(S) URL
///
/// Returns None for `javascript:`, `mailto:`, `tel:` and `data:` links,
/// fragment-only links, and anything that does not resolve to HTTP(S).
pub fn resolve_link(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lowered = href.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lowered.starts_with(scheme))
    {
        return None;
    }

    match base_url.join(href) {
        Ok(absolute_url) if matches!(absolute_url.scheme(), "http" | "https") => {
            Some(absolute_url.to_string())
        }
        _ => None,
    }
}
