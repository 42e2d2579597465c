//! Body decoding: charset detection, gzip inflation and plain-text URL lists.

use crate::crawler::url::validators;
use encoding_rs::{Encoding, UTF_8};
use flate2::read::GzDecoder;
use regex::Regex;
use std::io::Read;
use std::sync::OnceLock;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// How far into a body to look for a `<meta charset>` declaration
const META_SNIFF_LEN: usize = 1024;

pub fn is_gzip(body: &[u8]) -> bool {
    body.starts_with(&GZIP_MAGIC)
}

/// Inflate a gzip body. Returns `None` if it is not gzip or is corrupt.
pub fn inflate(body: &[u8]) -> Option<Vec<u8>> {
    if !is_gzip(body) {
        return None;
    }
    let mut out = Vec::new();
    match GzDecoder::new(body).read_to_end(&mut out) {
        Ok(_) => Some(out),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to inflate gzip body");
            None
        }
    }
}

/// Charset label from a Content-Type value
fn charset_from_content_type(content_type: &str) -> Option<&str> {
    content_type
        .split(';')
        .skip(1)
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("charset"))
        .map(|(_, value)| value.trim().trim_matches(|c| c == '"' || c == '\''))
}

fn charset_from_meta(body: &[u8]) -> Option<&'static Encoding> {
    static META_RE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = META_RE
        .get_or_init(|| Regex::new(r#"(?i)<meta[^>]+charset\s*=\s*["']?([A-Za-z0-9_\-:.]+)"#).ok())
        .as_ref()?;
    let head = String::from_utf8_lossy(&body[..body.len().min(META_SNIFF_LEN)]);
    let label = re.captures(&head)?.get(1)?.as_str().to_string();
    Encoding::for_label(label.as_bytes())
}

/// Decode a body to text
///
/// The charset comes from the Content-Type header, then a BOM, then a
/// `<meta charset>` tag, falling back to UTF-8. Invalid sequences are
/// replaced rather than rejected.
pub fn decode_text(body: &[u8], content_type: &str) -> String {
    let encoding = charset_from_content_type(content_type)
        .and_then(|label| Encoding::for_label(label.as_bytes()))
        .or_else(|| Encoding::for_bom(body).map(|(enc, _)| enc))
        .or_else(|| charset_from_meta(body))
        .unwrap_or(UTF_8);

    let (text, _, had_errors) = encoding.decode(body);
    if had_errors {
        tracing::debug!(encoding = encoding.name(), "Body contained invalid sequences");
    }
    text.into_owned()
}

/// Links from a newline-delimited URL list, only if every non-empty line is a URL
pub fn url_list(text: &str) -> Vec<String> {
    if !validators::is_url_list(text) {
        return Vec::new();
    }
    validators::filter_valid_urls(text.lines())
}

/// `<link>` text of an RSS feed
pub fn rss_links(text: &str) -> Vec<String> {
    static LINK_RE: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(re) = LINK_RE
        .get_or_init(|| Regex::new(r"(?is)<link[^>]*>\s*(?:<!\[CDATA\[)?\s*([^<\s\]]+)\s*(?:\]\]>)?\s*</link>").ok())
        .as_ref()
    else {
        return Vec::new();
    };
    re.captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .collect()
}
