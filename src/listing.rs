//! Directory index enumeration
//!
//! The product and orbit servers publish plain generated index pages. Entry
//! names are pulled out of their links; navigation links (column sorting,
//! parent directory, absolute paths) are dropped.

use crate::executor::HttpClient;
use crate::executor::http::HttpError;
use crate::session::Session;
use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::debug;

static HREF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<a\s[^>]*?href\s*=\s*["']([^"']+)["']"#).expect("valid href pattern")
});

static INDEX_TABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<table[^>]*id\s*=\s*["']indexlist["'][^>]*>(.*?)</table>"#)
        .expect("valid index table pattern")
});

#[derive(Debug, Error)]
pub enum ListingError {
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("{url} rejected the session (HTTP {status})")]
    Unauthorized { url: String, status: u16 },

    #[error("could not list {url}: {message}")]
    Request { url: String, message: String },
}

impl ListingError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ListingError::Status { status: 404, .. })
    }
}

impl From<HttpError> for ListingError {
    fn from(err: HttpError) -> Self {
        match err {
            HttpError::Status { url, status } => ListingError::Status { url, status },
            HttpError::Unauthorized { url, status } => ListingError::Unauthorized { url, status },
            HttpError::RequestFailed { url, message } => ListingError::Request { url, message },
            HttpError::Timeout { url } => ListingError::Request {
                url,
                message: "timed out".to_string(),
            },
            HttpError::Cancelled { url } => ListingError::Request {
                url,
                message: "cancelled".to_string(),
            },
        }
    }
}

/// Entry names of an index page, in page order
///
/// When the page has an Apache `indexlist` table only that table is read.
/// Directory entries lose their trailing `/`. Each name appears once even if
/// the page links it from several columns.
pub fn parse_index(html: &str) -> Vec<String> {
    let body = INDEX_TABLE
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map_or(html, |m| m.as_str());

    let mut entries: Vec<String> = Vec::new();
    for caps in HREF.captures_iter(body) {
        let href = caps[1].trim();
        if is_navigation(href) {
            continue;
        }
        let name = href.trim_end_matches('/');
        if name.is_empty() || entries.iter().any(|e| e == name) {
            continue;
        }
        entries.push(name.to_string());
    }
    entries
}

fn is_navigation(href: &str) -> bool {
    href.starts_with('?')
        || href.starts_with('/')
        || href.starts_with('#')
        || href.starts_with("..")
        || href == "./"
        || href.contains("://")
}

/// Newest `.EOF` entry per satellite prefix, in `satellites` order
///
/// Index pages list orbit files chronologically, so the last match for a
/// prefix wins. Satellites without an entry are left out.
pub fn parse_orbit_index(html: &str, satellites: &[String]) -> Vec<String> {
    newest_orbits(&parse_index(html), satellites)
}

/// [`parse_orbit_index`] over already extracted entry names
pub fn newest_orbits(entries: &[String], satellites: &[String]) -> Vec<String> {
    satellites
        .iter()
        .filter_map(|sat| {
            entries
                .iter()
                .rfind(|e| e.starts_with(sat.as_str()) && e.ends_with(".EOF"))
                .cloned()
        })
        .collect()
}

/// Source of index pages
#[async_trait]
pub trait Listing: Send + Sync {
    async fn entries(&self, url: &str) -> Result<Vec<String>, ListingError>;
}

/// Lists index pages over a session
pub struct Lister {
    http: HttpClient,
}

impl Lister {
    pub fn new(session: &Session) -> Self {
        Self {
            http: session.http(),
        }
    }
}

#[async_trait]
impl Listing for Lister {
    async fn entries(&self, url: &str) -> Result<Vec<String>, ListingError> {
        let html = self.http.get_text(url).await?;
        let entries = parse_index(&html);
        debug!(url, count = entries.len(), "Listed index");
        Ok(entries)
    }
}
