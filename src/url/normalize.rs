use crate::{UrlError, UrlResult};
use url::Url;

/// Query parameters added by feeds, social shares and newsletters
const TRACKING_PARAMS: &[&str] = &[
    "fbclid",
    "gclid",
    "mc_eid",
    "zarsrc",
    "gidzl",
    "vn_source",
    "vn_medium",
    "vn_campaign",
    "ref",
    "source",
];

/// Normalizes an article URL into its dedup identity
///
/// # Normalization Steps
///
/// 1. Parse the URL; reject anything that is not HTTP(S) with a host
/// 2. Lowercase the host (default ports are dropped by the parser)
/// 3. Collapse duplicate slashes and dot segments in the path
/// 4. Remove the fragment
/// 5. Remove tracking parameters (`utm_*` and the known list)
/// 6. Sort the remaining query parameters; drop an empty query
///
/// The `www.` prefix and trailing slashes are kept: publishers do not
/// reliably serve both forms, and the normalized URL is also the one fetched.
///
/// # Examples
///
/// ```
/// use snapwire::url::normalize_url;
///
/// let url = normalize_url("https://VNEXPRESS.net/bao-so-3.html?utm_source=rss#top").unwrap();
/// assert_eq!(url.as_str(), "https://vnexpress.net/bao-so-3.html");
/// ```
pub fn normalize_url(url_str: &str) -> UrlResult<Url> {
    let mut url = Url::parse(url_str.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(format!(
            "Only HTTP and HTTPS schemes are supported, got: {}",
            url.scheme()
        )));
    }

    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or(UrlError::MissingDomain)?
        .to_lowercase();
    url.set_host(Some(&host))
        .map_err(|e| UrlError::Malformed(format!("Failed to set host: {}", e)))?;

    let path = normalize_path(url.path());
    url.set_path(&path);

    url.set_fragment(None);

    if url.query().is_some() {
        let params = filter_and_sort_query_params(&url);
        if params.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(params);
        }
    }

    Ok(url)
}

/// Collapses empty and dot segments, keeping a trailing slash if present
fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                segments.pop();
            }
            _ => segments.push(segment),
        }
    }

    if segments.is_empty() {
        return "/".to_string();
    }

    let mut result = format!("/{}", segments.join("/"));
    if path.ends_with('/') {
        result.push('/');
    }
    result
}

fn filter_and_sort_query_params(url: &Url) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    params.sort();
    params
}

fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key.as_str())
}
