//! A single SQLite shard owned by one persistence worker.

use super::keys::Keys;
use crate::models::CrawlRecord;
use crate::utils::error::StoreError;
use rusqlite::{params, Connection};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Records written between intermediate commits
pub const COMMIT_EVERY: usize = 500;

pub const SCHEMA: &str = "
    CREATE TABLE responses (
        response_id INTEGER PRIMARY KEY AUTOINCREMENT,
        url TEXT,
        visited INTEGER,
        status_code INTEGER,
        body BLOB
    );
    CREATE TABLE headers (
        header_id INTEGER PRIMARY KEY AUTOINCREMENT,
        response_id INTEGER,
        header_name TEXT,
        header_value TEXT,
        FOREIGN KEY (response_id) REFERENCES responses(response_id)
    );
    CREATE TABLE links (
        link_id INTEGER PRIMARY KEY AUTOINCREMENT,
        response_id INTEGER,
        link TEXT,
        FOREIGN KEY (response_id) REFERENCES responses(response_id)
    );
    CREATE TABLE query_params (
        param_id INTEGER PRIMARY KEY AUTOINCREMENT,
        response_id INTEGER,
        param_name TEXT,
        param_value TEXT,
        FOREIGN KEY (response_id) REFERENCES responses(response_id)
    );
    CREATE TABLE inputs (
        input_id INTEGER PRIMARY KEY AUTOINCREMENT,
        response_id INTEGER,
        tag TEXT,
        tag_name TEXT,
        tag_value TEXT,
        FOREIGN KEY (response_id) REFERENCES responses(response_id)
    );
";

/// Batched writer for one shard file
///
/// Writes happen inside an open transaction that is committed every
/// [`COMMIT_EVERY`] records and once more by [`ShardWriter::finish`].
pub struct ShardWriter {
    conn: Connection,
    path: PathBuf,
    pending: usize,
    written: u64,
    in_transaction: bool,
}

impl ShardWriter {
    /// Create a fresh shard at `path`, replacing any stale file left by an
    /// earlier run.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if path.exists() {
            warn!(path = %path.display(), "Replacing stale shard");
            fs::remove_file(&path)?;
        }

        let conn = Connection::open(&path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        debug!(path = %path.display(), "Shard created");

        Ok(Self {
            conn,
            path,
            pending: 0,
            written: 0,
            in_transaction: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records written so far, committed or not
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Insert `record` and its child rows with keys drawn from `keys`.
    /// Returns the record's `response_id`.
    pub fn write(&mut self, record: &CrawlRecord, keys: &Keys) -> Result<i64, StoreError> {
        if !self.in_transaction {
            self.conn.execute_batch("BEGIN")?;
            self.in_transaction = true;
        }

        let response_id = keys.responses.next();
        self.conn
            .prepare_cached(
                "INSERT INTO responses (response_id, url, visited, status_code, body)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?
            .execute(params![
                response_id,
                record.url,
                record.visited,
                record.status,
                record.body
            ])?;

        {
            let mut stmt = self.conn.prepare_cached(
                "INSERT INTO headers (header_id, response_id, header_name, header_value)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (name, value) in &record.headers {
                stmt.execute(params![keys.headers.next(), response_id, name, value])?;
            }
        }

        {
            let mut stmt = self
                .conn
                .prepare_cached("INSERT INTO links (link_id, response_id, link) VALUES (?1, ?2, ?3)")?;
            for link in &record.links {
                stmt.execute(params![keys.links.next(), response_id, link])?;
            }
        }

        {
            let mut stmt = self.conn.prepare_cached(
                "INSERT INTO query_params (param_id, response_id, param_name, param_value)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (name, value) in &record.query_params {
                stmt.execute(params![keys.query_params.next(), response_id, name, value])?;
            }
        }

        {
            let mut stmt = self.conn.prepare_cached(
                "INSERT INTO inputs (input_id, response_id, tag, tag_name, tag_value)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for input in &record.inputs {
                stmt.execute(params![
                    keys.inputs.next(),
                    response_id,
                    input.tag,
                    input.name,
                    input.value
                ])?;
            }
        }

        self.written += 1;
        self.pending += 1;
        if self.pending >= COMMIT_EVERY {
            self.commit()?;
        }
        Ok(response_id)
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        if self.in_transaction {
            self.conn.execute_batch("COMMIT")?;
            self.in_transaction = false;
            debug!(path = %self.path.display(), records = self.pending, "Shard committed");
        }
        self.pending = 0;
        Ok(())
    }

    /// Final commit; closes the connection.
    pub fn finish(mut self) -> Result<u64, StoreError> {
        self.commit()?;
        let written = self.written;
        self.conn.close().map_err(|(_, e)| StoreError::Sqlite(e))?;
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InputField;
    use tempfile::TempDir;

    fn sample_record(url: &str) -> CrawlRecord {
        let mut record = CrawlRecord {
            url: url.to_string(),
            visited: true,
            status: Some(200),
            body: Some(b"<html></html>".to_vec()),
            ..Default::default()
        };
        record
            .headers
            .insert("content-type".to_string(), "text/html".to_string());
        record.headers.insert("server".to_string(), "test".to_string());
        record.links.insert("https://a.test/b".to_string());
        record.query_params.push(("q".to_string(), "1".to_string()));
        record.inputs.push(InputField {
            tag: "<input name=\"q\">".to_string(),
            name: "q".to_string(),
            value: String::new(),
        });
        record
    }

    fn count(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn test_write_all_tables() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("crawl.db_0");
        let keys = Keys::new();

        let mut writer = ShardWriter::create(&path).unwrap();
        let id = writer.write(&sample_record("https://a.test/?q=1"), &keys).unwrap();
        writer
            .write(&CrawlRecord::placeholder("https://a.test/never"), &keys)
            .unwrap();
        assert_eq!(id, 1);
        assert_eq!(writer.finish().unwrap(), 2);

        let conn = Connection::open(&path).unwrap();
        assert_eq!(count(&conn, "responses"), 2);
        assert_eq!(count(&conn, "headers"), 2);
        assert_eq!(count(&conn, "links"), 1);
        assert_eq!(count(&conn, "query_params"), 1);
        assert_eq!(count(&conn, "inputs"), 1);

        let (visited, status, body): (bool, Option<u16>, Option<Vec<u8>>) = conn
            .query_row(
                "SELECT visited, status_code, body FROM responses WHERE url = ?1",
                ["https://a.test/never"],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap();
        assert!(!visited);
        assert_eq!(status, None);
        assert_eq!(body, None);
    }

    #[test]
    fn test_commits_in_batches() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("batch.db_0");
        let keys = Keys::new();
        let mut writer = ShardWriter::create(&path).unwrap();

        for i in 0..COMMIT_EVERY {
            writer
                .write(&CrawlRecord::placeholder(format!("https://a.test/{i}")), &keys)
                .unwrap();
        }
        // The batch boundary committed, so a second connection sees the rows.
        let reader = Connection::open(&path).unwrap();
        assert_eq!(count(&reader, "responses"), COMMIT_EVERY as i64);
        drop(reader);

        writer.finish().unwrap();
    }

    #[test]
    fn test_replaces_stale_shard() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stale.db_0");
        fs::write(&path, b"garbage").unwrap();
        let writer = ShardWriter::create(&path).unwrap();
        assert_eq!(writer.finish().unwrap(), 0);
    }
}
