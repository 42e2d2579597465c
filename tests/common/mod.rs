//! Common test utilities

use rusqlite::Connection;
use scopecrawl::config::CrawlConfig;
use std::path::Path;

/// Small, fast configuration for crawling a local mock server
pub fn test_config(seed_url: &str, output: &Path) -> CrawlConfig {
    CrawlConfig {
        seed_url: seed_url.to_string(),
        output: output.to_path_buf(),
        max_depth: 1,
        num_builders: 1,
        num_fetchers: 2,
        num_parsers: 1,
        num_db_workers: 2,
        fetch_retries: 0,
        request_timeout: 5.0,
        poll_interval: 0.05,
        status_interval: 0.0,
        ..Default::default()
    }
}

/// HTML document whose body is one anchor per link
pub fn html_with_links(links: &[&str]) -> String {
    let anchors: String = links
        .iter()
        .map(|href| format!("<a href=\"{href}\">link</a>"))
        .collect();
    format!("<html><head><title>t</title></head><body>{anchors}</body></html>")
}

/// `(url, visited)` for every stored response, ordered by URL
pub fn stored_responses(db: &Path) -> Vec<(String, bool)> {
    let conn = Connection::open(db).unwrap();
    let mut stmt = conn
        .prepare("SELECT url, visited FROM responses ORDER BY url")
        .unwrap();
    stmt.query_map([], |row| Ok((row.get(0)?, row.get::<_, i64>(1)? != 0)))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap()
}

#[allow(dead_code)]
pub fn count_rows(db: &Path, table: &str) -> i64 {
    let conn = Connection::open(db).unwrap();
    conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
        .unwrap()
}
