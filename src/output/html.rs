//! Standalone HTML export of a single article
//!
//! The page carries the captured metadata, the lead, the article body and the
//! original link. Remote `<img>` tags and scripts are stripped from the body;
//! downloaded images are listed from their local copies instead.

use crate::storage::{ArticleRecord, ImageRecord, Storage, StorageResult};
use scraper::{Html, Selector};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Loads an article with its images and writes it to `output_path`
pub fn export_article_html(
    storage: &dyn Storage,
    id: &str,
    output_path: &Path,
) -> StorageResult<()> {
    let article = storage.get_article(id)?;
    let images = storage.article_images(id)?;
    generate_article_html(&article, &images, output_path)?;

    tracing::info!("Article {} exported to {}", id, output_path.display());
    Ok(())
}

/// Writes the HTML page for an article
///
/// # Arguments
///
/// * `article` - The captured article
/// * `images` - Its image records; only downloaded ones are shown
/// * `output_path` - Path where the page should be written
pub fn generate_article_html(
    article: &ArticleRecord,
    images: &[ImageRecord],
    output_path: &Path,
) -> std::io::Result<()> {
    let page = format_article_html(article, images);

    let mut file = File::create(output_path)?;
    file.write_all(page.as_bytes())?;

    Ok(())
}

/// Formats an article as a self-contained HTML page
pub fn format_article_html(article: &ArticleRecord, images: &[ImageRecord]) -> String {
    let title = escape_html(article.title.as_deref().unwrap_or(&article.url));
    let mut html = String::new();

    html.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
    html.push_str(&format!("<title>{}</title>\n", title));
    html.push_str(
        "<style>\n\
         body { max-width: 800px; margin: 0 auto; padding: 20px; font-family: Georgia, serif; }\n\
         .meta { color: #666; font-size: 0.9em; }\n\
         .summary { font-weight: bold; }\n\
         img { max-width: 100%; }\n\
         </style>\n",
    );
    html.push_str("</head>\n<body>\n");
    html.push_str(&format!("<h1>{}</h1>\n", title));

    // Metadata block
    html.push_str("<p class=\"meta\">\n");
    html.push_str(&format!("ID: {}<br>\n", escape_html(&article.id)));
    html.push_str(&format!("Source: {}<br>\n", escape_html(&article.source_name)));
    if let Some(category) = &article.category {
        html.push_str(&format!("Category: {}<br>\n", escape_html(category)));
    }
    if let Some(author) = &article.author {
        html.push_str(&format!("Author: {}<br>\n", escape_html(author)));
    }
    if let Some(published) = &article.published_at {
        html.push_str(&format!("Published: {}<br>\n", escape_html(published)));
    }
    html.push_str(&format!("Captured: {}<br>\n", escape_html(&article.crawled_at)));
    html.push_str(&format!("Status: {}<br>\n", article.status));
    html.push_str(&format!(
        "Link: {}\n",
        if article.link_alive { "alive" } else { "dead" }
    ));
    html.push_str("</p>\n");

    if let Some(summary) = &article.summary {
        html.push_str(&format!(
            "<p class=\"summary\">{}</p>\n",
            escape_html(summary)
        ));
    }

    html.push_str("<div class=\"content\">\n");
    html.push_str(&strip_tags(&article_body(&article.content_html)));
    html.push_str("\n</div>\n");

    let downloaded: Vec<&str> = images
        .iter()
        .filter(|image| image.downloaded)
        .filter_map(|image| image.local_path.as_deref())
        .collect();
    if !downloaded.is_empty() {
        html.push_str("<div class=\"images\">\n");
        for path in downloaded {
            html.push_str(&format!("<img src=\"{}\" alt=\"\">\n", escape_html(path)));
        }
        html.push_str("</div>\n");
    }

    html.push_str("<hr>\n");
    html.push_str(&format!(
        "<p class=\"meta\">Original: <a href=\"{0}\">{0}</a></p>\n",
        escape_html(&article.url)
    ));
    html.push_str("</body>\n</html>\n");

    html
}

/// Inner HTML of the first `<article>`, else of `<body>`, else the input
fn article_body(content_html: &str) -> String {
    let document = Html::parse_document(content_html);
    ["article", "body"]
        .iter()
        .filter_map(|selector| Selector::parse(selector).ok())
        .find_map(|selector| {
            document
                .select(&selector)
                .next()
                .map(|element| element.inner_html())
        })
        .unwrap_or_else(|| content_html.to_string())
}

/// Removes `<img>` tags and `<script>` blocks
fn strip_tags(html: &str) -> String {
    let without_scripts = remove_blocks(html, "<script", "</script>");
    remove_blocks(&without_scripts, "<img", ">")
}

/// Removes every span from `open` through the next `close`, ASCII case-insensitive
///
/// `open` only matches when followed by whitespace, `/` or `>`, so `<imgx>`
/// survives.
fn remove_blocks(html: &str, open: &str, close: &str) -> String {
    // ASCII lowercasing keeps byte offsets aligned with `html`
    let lowered = html.to_ascii_lowercase();
    let mut out = String::with_capacity(html.len());
    let mut pos = 0;

    while let Some(found) = lowered[pos..].find(open) {
        let start = pos + found;
        let after = start + open.len();
        let boundary = lowered[after..]
            .chars()
            .next()
            .map_or(true, |c| c.is_whitespace() || c == '/' || c == '>');

        if !boundary {
            out.push_str(&html[pos..after]);
            pos = after;
            continue;
        }

        out.push_str(&html[pos..start]);
        pos = match lowered[after..].find(close) {
            Some(end) => after + end + close.len(),
            None => html.len(),
        };
    }

    out.push_str(&html[pos..]);
    out
}

/// Escapes text for use in HTML content and attribute values
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
