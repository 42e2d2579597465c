//! Link and content extraction
//!
//! Turns a fetched page into a [`CrawlRecord`]: outbound links chosen by
//! content type, the page URL's query parameters and its form controls.
//! Extraction never fails; unreadable content yields an empty link set.

pub mod html;
pub mod selectors;
pub mod text;

use crate::crawler::url::{query_params, resolve};
use crate::models::{CrawlRecord, FetchedPage, InputField};
use std::collections::BTreeSet;
use tracing::{debug, warn};
use url::Url;

/// Outbound links of a page
pub fn extract_links(page: &FetchedPage) -> BTreeSet<String> {
    let Ok(base) = Url::parse(&page.url) else {
        warn!(url = %page.url, "Cannot extract links from unparsable URL");
        return BTreeSet::new();
    };

    let mut links = BTreeSet::new();
    if page.is_redirect() {
        if let Some(target) = page.location().and_then(|loc| resolve(&base, loc)) {
            links.insert(target);
        }
    }

    let content_type = page.content_type();
    let path = base.path().to_ascii_lowercase();

    if path.ends_with(".rss") {
        let body = text::decode_text(&page.body, &content_type);
        links.extend(text::rss_links(&body).iter().filter_map(|l| resolve(&base, l)));
    } else if content_type.contains("xml") || content_type.contains("html") {
        let body = text::decode_text(&page.body, &content_type);
        links.extend(html::extract_links(&body, &base));
    } else if content_type.contains("text/plain") {
        let body = text::decode_text(&page.body, &content_type);
        links.extend(text::url_list(&body));
    } else if path.ends_with(".gz") && text::is_gzip(&page.body) {
        match text::inflate(&page.body) {
            Some(inflated) => {
                let body = String::from_utf8_lossy(&inflated);
                if path.ends_with(".txt.gz") {
                    links.extend(text::url_list(&body));
                } else {
                    links.extend(html::extract_links(&body, &base));
                }
            }
            None => warn!(url = %page.url, "Discarding links of corrupt gzip body"),
        }
    }

    debug!(url = %page.url, links = links.len(), "Extracted links");
    links
}

/// Form controls of an HTML page
pub fn extract_inputs(page: &FetchedPage) -> Vec<InputField> {
    let content_type = page.content_type();
    if !content_type.contains("html") {
        return Vec::new();
    }
    html::extract_inputs(&text::decode_text(&page.body, &content_type))
}

/// Build the persisted record for a fetched page
pub fn build_record(page: FetchedPage) -> CrawlRecord {
    let links = extract_links(&page);
    let inputs = extract_inputs(&page);
    let is_redirect = page.is_redirect();

    CrawlRecord {
        query_params: query_params(&page.url),
        visited: true,
        status: Some(page.status),
        links,
        inputs,
        is_redirect,
        headers: page.headers,
        body: Some(page.body),
        url: page.url,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::collections::BTreeMap;
    use std::io::Write;

    fn page(url: &str, status: u16, content_type: Option<&str>, body: &[u8]) -> FetchedPage {
        let mut headers = BTreeMap::new();
        if let Some(ct) = content_type {
            headers.insert("content-type".to_string(), ct.to_string());
        }
        FetchedPage {
            url: url.to_string(),
            status,
            headers,
            body: body.to_vec(),
        }
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_html_dispatch() {
        let p = page(
            "https://a.test/",
            200,
            Some("text/html; charset=utf-8"),
            br#"<a href="/b">b</a><input name="q" value="">"#,
        );
        let record = build_record(p);
        assert!(record.links.contains("https://a.test/b"));
        assert_eq!(record.inputs.len(), 1);
        assert_eq!(record.status, Some(200));
        assert!(record.visited);
        assert!(!record.is_placeholder());
    }

    #[test]
    fn test_redirect_adds_location() {
        let mut p = page("https://a.test/old?x=1", 301, None, b"");
        p.headers.insert("location".to_string(), "/new".to_string());
        let record = build_record(p);
        assert!(record.is_redirect);
        assert_eq!(
            record.links.into_iter().collect::<Vec<_>>(),
            vec!["https://a.test/new"]
        );
        assert_eq!(record.query_params, vec![("x".to_string(), "1".to_string())]);
    }

    #[test]
    fn test_plain_text_url_list() {
        let p = page(
            "https://a.test/sitemap.txt",
            200,
            Some("text/plain"),
            b"https://a.test/1\nhttps://a.test/2\n",
        );
        assert_eq!(extract_links(&p).len(), 2);

        let prose = page("https://a.test/notes.txt", 200, Some("text/plain"), b"just words\n");
        assert!(extract_links(&prose).is_empty());
    }

    #[test]
    fn test_gzip_sitemaps() {
        let txt = page(
            "https://a.test/sitemap.txt.gz",
            200,
            Some("application/octet-stream"),
            &gzip(b"https://a.test/1\n"),
        );
        assert!(extract_links(&txt).contains("https://a.test/1"));

        let xml = page(
            "https://a.test/sitemap.xml.gz",
            200,
            None,
            &gzip(b"<urlset><url><loc>https://a.test/2</loc></url></urlset>"),
        );
        assert!(extract_links(&xml).contains("https://a.test/2"));
    }

    #[test]
    fn test_unknown_content_type_yields_nothing() {
        let p = page("https://a.test/logo.png", 200, Some("image/png"), &[0x89, b'P', b'N', b'G']);
        let record = build_record(p);
        assert!(record.links.is_empty());
        assert!(record.inputs.is_empty());
        assert_eq!(record.body.as_deref(), Some(&[0x89, b'P', b'N', b'G'][..]));
    }

    #[test]
    fn test_inputs_only_for_html() {
        let p = page("https://a.test/feed.xml", 200, Some("application/xml"), br#"<input name="x"/>"#);
        assert!(extract_inputs(&p).is_empty());
    }
}
