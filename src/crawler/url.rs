//! URL helpers for frontier bookkeeping and link classification
//!
//! This module provides functionality for fragment handling, URL validation,
//! link resolution, query parameter extraction and the logout heuristic.

use regex::Regex;
use std::sync::OnceLock;
use url::Url;

/// Substrings that mark a link as likely to end the authenticated session
const LOGOUT_PATTERNS: &[&str] = &[
    "logout",
    "log-out",
    "log%20out",
    "log%2520out",
    "log out",
    "signout",
    "sign-out",
    "sign%20out",
    "sign%2520out",
    "sign out",
];

/// URL with everything from the first `#` removed
pub fn strip_fragment(url: &str) -> &str {
    url.split('#').next().unwrap_or(url)
}

/// Forms under which a URL may already have been recorded as visited
pub fn visited_forms(url: &str) -> [String; 3] {
    let base = strip_fragment(url);
    [url.to_string(), base.to_string(), format!("{base}#")]
}

/// Check whether a link would end the session if followed
pub fn is_logout_link(url: &str) -> bool {
    let lower = url.to_lowercase();
    LOGOUT_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Resolve `link` against `base`, keeping only absolute URLs with a host
pub fn resolve(base: &Url, link: &str) -> Option<String> {
    let joined = base.join(link.trim()).ok()?;
    if joined.host_str().is_none() {
        return None;
    }
    Some(joined.to_string())
}

/// Query parameters of `url` as `(name, value)` pairs
///
/// Pairs with a blank value are dropped and values are grouped under their
/// name in order of the name's first appearance.
pub fn query_params(url: &str) -> Vec<(String, String)> {
    let Ok(parsed) = Url::parse(url) else {
        return Vec::new();
    };

    let mut grouped: Vec<(String, Vec<String>)> = Vec::new();
    for (name, value) in parsed.query_pairs() {
        if value.is_empty() {
            continue;
        }
        match grouped.iter_mut().find(|(n, _)| *n == name) {
            Some((_, values)) => values.push(value.into_owned()),
            None => grouped.push((name.into_owned(), vec![value.into_owned()])),
        }
    }

    grouped
        .into_iter()
        .flat_map(|(name, values)| values.into_iter().map(move |v| (name.clone(), v)))
        .collect()
}

/// URL validation
pub mod validators {
    use super::*;

    fn url_regex() -> Option<&'static Regex> {
        static URL_RE: OnceLock<Option<Regex>> = OnceLock::new();
        URL_RE
            .get_or_init(|| {
                Regex::new(concat!(
                    r"(?i)^(?:http|ftp)s?://",
                    r"(?:(?:[A-Z0-9](?:[A-Z0-9-]{0,61}[A-Z0-9])?\.)+(?:[A-Z]{2,6}\.?|[A-Z0-9-]{2,}\.?)|",
                    r"localhost|",
                    r"\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}|",
                    r"\[?[A-F0-9]*:[A-F0-9:]+\]?)",
                    r"(?::\d+)?",
                    r"(?:/?|[/?]\S+)$",
                ))
                .ok()
            })
            .as_ref()
    }

    /// Check whether a string looks like an absolute http(s)/ftp(s) URL
    ///
    /// # Examples
    ///
    /// ```
    /// use scopecrawl::crawler::url::validators;
    ///
    /// assert!(validators::is_valid_url("https://example.com/a?b=c"));
    /// assert!(validators::is_valid_url("http://localhost:8080/"));
    /// assert!(!validators::is_valid_url("example.com/a"));
    /// ```
    pub fn is_valid_url(candidate: &str) -> bool {
        url_regex().is_some_and(|re| re.is_match(candidate))
    }

    /// Keep the trimmed lines that are valid URLs
    pub fn filter_valid_urls<'a>(lines: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        lines
            .into_iter()
            .map(str::trim)
            .filter(|line| is_valid_url(line))
            .map(str::to_string)
            .collect()
    }

    /// True when every non-empty line is a valid URL and at least one exists
    pub fn is_url_list(text: &str) -> bool {
        let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty()).peekable();
        lines.peek().is_some() && lines.all(is_valid_url)
    }

    /// Validate a seed URL: parseable, http(s), with a host
    pub fn validate_seed(url: &str) -> Result<Url, String> {
        let parsed = Url::parse(url).map_err(|e| format!("Invalid URL format: {url}: {e}"))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(format!("Unsupported scheme: {url}"));
        }
        if parsed.host_str().is_none() {
            return Err(format!("URL has no host: {url}"));
        }
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_fragment() {
        assert_eq!(strip_fragment("https://a.test/x#top"), "https://a.test/x");
        assert_eq!(strip_fragment("https://a.test/x"), "https://a.test/x");
        assert_eq!(strip_fragment("https://a.test/x#"), "https://a.test/x");
    }

    #[test]
    fn test_visited_forms() {
        let forms = visited_forms("https://a.test/x#top");
        assert_eq!(forms[0], "https://a.test/x#top");
        assert_eq!(forms[1], "https://a.test/x");
        assert_eq!(forms[2], "https://a.test/x#");
    }

    #[test]
    fn test_logout_detection() {
        assert!(is_logout_link("https://a.test/account/Logout"));
        assert!(is_logout_link("https://a.test/sign-out?next=/"));
        assert!(is_logout_link("https://a.test/log%20out"));
        assert!(is_logout_link("https://a.test/sign%2520out"));
        assert!(!is_logout_link("https://a.test/login"));
    }

    #[test]
    fn test_resolve() {
        let base = Url::parse("https://a.test/dir/page").unwrap();
        assert_eq!(resolve(&base, "other").as_deref(), Some("https://a.test/dir/other"));
        assert_eq!(resolve(&base, "/root").as_deref(), Some("https://a.test/root"));
        assert_eq!(
            resolve(&base, "https://b.test/x").as_deref(),
            Some("https://b.test/x")
        );
        assert_eq!(resolve(&base, "mailto:someone@a.test"), None);
        assert_eq!(resolve(&base, "javascript:void(0)"), None);
    }

    #[test]
    fn test_query_params_grouping() {
        let params = query_params("https://a.test/?b=1&a=2&b=3&c=&d");
        assert_eq!(
            params,
            vec![
                ("b".to_string(), "1".to_string()),
                ("b".to_string(), "3".to_string()),
                ("a".to_string(), "2".to_string()),
            ]
        );
    }

    #[test]
    fn test_query_params_decoding() {
        let params = query_params("https://a.test/search?q=hello+world&x=%2Fpath");
        assert_eq!(params[0], ("q".to_string(), "hello world".to_string()));
        assert_eq!(params[1], ("x".to_string(), "/path".to_string()));
        assert!(query_params("not a url").is_empty());
    }

    #[test]
    fn test_url_list_detection() {
        assert!(validators::is_url_list("https://a.test/1\n\nhttps://a.test/2\n"));
        assert!(!validators::is_url_list("https://a.test/1\nnot a url"));
        assert!(!validators::is_url_list("   \n"));
    }

    #[test]
    fn test_filter_valid_urls() {
        let urls = validators::filter_valid_urls(["https://a.test/", "junk", " http://b.test/x "]);
        assert_eq!(urls, vec!["https://a.test/", "http://b.test/x"]);
    }

    #[test]
    fn test_validate_seed() {
        assert!(validators::validate_seed("https://a.test/").is_ok());
        assert!(validators::validate_seed("ftp://a.test/").is_err());
        assert!(validators::validate_seed("nope").is_err());
    }
}
