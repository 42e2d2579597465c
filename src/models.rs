// Core data structures flowing through the crawl pipeline

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Status codes treated as redirects when a Location header is present
const REDIRECT_STATUSES: &[u16] = &[301, 302, 303, 307, 308];

/// URL awaiting dispatch on the frontier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrontierItem {
    pub url: String,
    /// Link distance from a seed; a followed redirect can take it to -1
    pub depth: i32,
}

impl FrontierItem {
    pub fn seed(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            depth: 0,
        }
    }
}

/// Request descriptor emitted by the build stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRequest {
    pub url: String,
    pub depth: i32,
}

/// Raw HTTP response as seen by the crawler (redirects are not followed)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchedPage {
    /// URL that was requested
    pub url: String,
    pub status: u16,
    /// Lowercased header names, last value wins
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl FetchedPage {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Lowercased Content-Type, empty when absent
    pub fn content_type(&self) -> String {
        self.header("content-type")
            .map(str::to_lowercase)
            .unwrap_or_default()
    }

    pub fn location(&self) -> Option<&str> {
        self.header("location")
    }

    pub fn is_redirect(&self) -> bool {
        REDIRECT_STATUSES.contains(&self.status) && self.location().is_some()
    }

    pub fn is_html(&self) -> bool {
        self.content_type().contains("html")
    }
}

/// Fetch stage output; `page` is `None` when every attempt failed
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub page: Option<FetchedPage>,
    pub depth: i32,
}

/// Form control found on a page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputField {
    /// Opening tag markup, up to and including the first `>`
    pub tag: String,
    pub name: String,
    pub value: String,
}

/// Unit of persistence produced by the parse stage
///
/// A record with no status and no body is a placeholder for a URL that was
/// discovered but never fetched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlRecord {
    pub url: String,
    pub visited: bool,
    pub status: Option<u16>,
    pub body: Option<Vec<u8>>,
    pub headers: BTreeMap<String, String>,
    pub links: BTreeSet<String>,
    pub query_params: Vec<(String, String)>,
    pub inputs: Vec<InputField>,
    pub is_redirect: bool,
}

impl CrawlRecord {
    /// Placeholder for a URL seen during the crawl but never fetched
    pub fn placeholder(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            query_params: crate::crawler::url::query_params(&url),
            url,
            visited: false,
            ..Default::default()
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.status.is_none() && self.body.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(status: u16, headers: &[(&str, &str)]) -> FetchedPage {
        FetchedPage {
            url: "https://a.test/".to_string(),
            status,
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            body: Vec::new(),
        }
    }

    #[test]
    fn test_redirect_requires_location() {
        assert!(page(302, &[("location", "/b")]).is_redirect());
        assert!(!page(302, &[]).is_redirect());
        assert!(!page(200, &[("location", "/b")]).is_redirect());
    }

    #[test]
    fn test_content_type_lowercased() {
        let p = page(200, &[("content-type", "Text/HTML; charset=UTF-8")]);
        assert_eq!(p.content_type(), "text/html; charset=utf-8");
        assert!(p.is_html());
        assert_eq!(page(200, &[]).content_type(), "");
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let p = page(200, &[("x-frame-options", "DENY")]);
        assert_eq!(p.header("X-Frame-Options"), Some("DENY"));
    }

    #[test]
    fn test_placeholder() {
        let record = CrawlRecord::placeholder("https://a.test/c?id=7");
        assert!(record.is_placeholder());
        assert!(!record.visited);
        assert!(record.links.is_empty());
        assert_eq!(record.url, "https://a.test/c?id=7");
        assert_eq!(record.query_params, vec![("id".to_string(), "7".to_string())]);

        let fetched = CrawlRecord {
            visited: true,
            status: Some(200),
            body: Some(b"ok".to_vec()),
            ..CrawlRecord::placeholder("https://a.test/")
        };
        assert!(!fetched.is_placeholder());
    }

    #[test]
    fn test_frontier_seed() {
        assert_eq!(FrontierItem::seed("https://a.test/").depth, 0);
    }
}
