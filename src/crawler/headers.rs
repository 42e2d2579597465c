use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT,
};

/// User-Agent sent by crawl requests and canary probes
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/42.0.2311.135 Safari/537.36 Edge/12.246";

/// Build browser-like default headers for crawl requests
///
/// `extra` entries are applied last and override the defaults. Entries
/// whose name or value is not a valid header are skipped with a warning.
///
/// # Examples
///
/// ```
/// use scopecrawl::crawler::headers::build_crawl_headers;
///
/// let headers = build_crawl_headers(None, &[("X-Scan".to_string(), "1".to_string())]);
/// assert_eq!(headers.get("x-scan").unwrap(), "1");
/// ```
pub fn build_crawl_headers(user_agent: Option<&str>, extra: &[(String, String)]) -> HeaderMap {
    let mut headers = HeaderMap::new();

    let ua = user_agent.unwrap_or(DEFAULT_USER_AGENT);
    match HeaderValue::from_str(ua) {
        Ok(value) => {
            headers.insert(USER_AGENT, value);
        }
        Err(_) => {
            tracing::warn!(user_agent = ua, "Invalid user agent, using default");
            headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
        }
    }
    headers.insert(
        ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
        ),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

    for (name, value) in extra {
        let parsed = (
            HeaderName::from_bytes(name.trim().as_bytes()),
            HeaderValue::from_str(value.trim()),
        );
        match parsed {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => tracing::warn!(header = %name, "Skipping invalid header"),
        }
    }

    headers
}

/// Parse a `Name: value` header line
pub fn parse_header_line(line: &str) -> Option<(String, String)> {
    let (name, value) = line.split_once(':')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_headers() {
        let headers = build_crawl_headers(None, &[]);
        assert_eq!(headers.get(USER_AGENT).unwrap(), DEFAULT_USER_AGENT);
        assert!(headers.contains_key(ACCEPT));
        assert!(headers.contains_key(ACCEPT_LANGUAGE));
    }

    #[test]
    fn test_extra_headers_override() {
        let extra = vec![
            ("User-Agent".to_string(), "scanner/1.0".to_string()),
            ("Authorization".to_string(), "Bearer abc".to_string()),
        ];
        let headers = build_crawl_headers(None, &extra);
        assert_eq!(headers.get(USER_AGENT).unwrap(), "scanner/1.0");
        assert_eq!(headers.get("authorization").unwrap(), "Bearer abc");
    }

    #[test]
    fn test_invalid_header_skipped() {
        let extra = vec![("bad header".to_string(), "x".to_string())];
        let headers = build_crawl_headers(Some("ua"), &extra);
        assert_eq!(headers.len(), 3);
    }

    #[test]
    fn test_parse_header_line() {
        assert_eq!(
            parse_header_line("X-Token:  abc:def "),
            Some(("X-Token".to_string(), "abc:def".to_string()))
        );
        assert_eq!(parse_header_line("novalue"), None);
        assert_eq!(parse_header_line(": x"), None);
    }
}
