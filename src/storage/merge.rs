//! Post-crawl merge of shard files into a single store.

use crate::utils::error::StoreError;
use rusqlite::{Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Primary key and foreign-key column of each table, parents first
const KEY_COLUMNS: &[(&str, &str, Option<&str>)] = &[
    ("responses", "response_id", None),
    ("headers", "header_id", Some("response_id")),
    ("links", "link_id", Some("response_id")),
    ("query_params", "param_id", Some("response_id")),
    ("inputs", "input_id", Some("response_id")),
];

/// Merge `shards` into `dest`.
///
/// When `dest` does not exist the first shard is copied to become it. Rows
/// of every other shard are appended table by table. Keys allocated from a
/// shared allocator never collide and are copied unchanged; shards written
/// with independent counters are shifted past the destination's highest
/// keys, children following their parent. Missing shard files are skipped.
/// Returns the number of shards merged.
pub fn merge_shards(dest: &Path, shards: &[PathBuf]) -> Result<usize, StoreError> {
    let mut pending: Vec<&PathBuf> = shards
        .iter()
        .filter(|shard| shard.as_path() != dest)
        .filter(|shard| {
            let exists = shard.exists();
            if !exists {
                warn!(path = %shard.display(), "Shard missing, skipping");
            }
            exists
        })
        .collect();
    if pending.is_empty() {
        return Ok(0);
    }

    let mut merged = 0;
    if !dest.exists() {
        let first = pending.remove(0);
        fs::copy(first, dest)?;
        debug!(from = %first.display(), to = %dest.display(), "Seeded merged store");
        merged += 1;
    }

    let conn = Connection::open(dest)?;
    for shard in pending {
        append_shard(&conn, shard).map_err(|e| StoreError::Shard {
            path: shard.clone(),
            message: e.to_string(),
        })?;
        merged += 1;
    }
    conn.close().map_err(|(_, e)| StoreError::Sqlite(e))?;

    info!(dest = %dest.display(), shards = merged, "Merged shards");
    Ok(merged)
}

fn append_shard(conn: &Connection, shard: &Path) -> Result<(), rusqlite::Error> {
    conn.execute("ATTACH DATABASE ?1 AS shard", [shard.to_string_lossy().into_owned()])?;
    let result = copy_tables(conn);
    let detached = conn.execute_batch("DETACH DATABASE shard");
    result?;
    detached
}

fn copy_tables(conn: &Connection) -> Result<(), rusqlite::Error> {
    let tx = conn.unchecked_transaction()?;
    let mut response_offset = 0;

    for &(table, key, parent) in KEY_COLUMNS {
        if !shard_has_table(&tx, table)? {
            continue;
        }
        let offset = if collides(&tx, table, key)? {
            tx.query_row(&format!("SELECT COALESCE(MAX({key}), 0) FROM main.{table}"), [], |r| {
                r.get::<_, i64>(0)
            })?
        } else {
            0
        };
        if table == "responses" {
            response_offset = offset;
        }

        let columns = table_columns(&tx, table)?;
        let select: Vec<String> = columns
            .iter()
            .map(|column| {
                if column == key {
                    format!("{column} + {offset}")
                } else if Some(column.as_str()) == parent {
                    format!("{column} + {response_offset}")
                } else {
                    column.clone()
                }
            })
            .collect();

        let copied = tx.execute(
            &format!(
                "INSERT INTO main.{table} ({}) SELECT {} FROM shard.{table}",
                columns.join(", "),
                select.join(", ")
            ),
            [],
        )?;
        debug!(table, rows = copied, offset, "Copied shard rows");
    }

    tx.commit()
}

fn shard_has_table(conn: &Connection, table: &str) -> Result<bool, rusqlite::Error> {
    conn.query_row(
        "SELECT name FROM shard.sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |r| r.get::<_, String>(0),
    )
    .optional()
    .map(|name| name.is_some())
}

fn collides(conn: &Connection, table: &str, key: &str) -> Result<bool, rusqlite::Error> {
    conn.query_row(
        &format!(
            "SELECT EXISTS(SELECT 1 FROM shard.{table} s JOIN main.{table} m ON s.{key} = m.{key})"
        ),
        [],
        |r| r.get(0),
    )
}

fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>, rusqlite::Error> {
    let mut stmt = conn.prepare(&format!("PRAGMA shard.table_info({table})"))?;
    let columns = stmt
        .query_map([], |r| r.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(columns)
}

/// Delete shard files, logging failures instead of aborting.
pub fn remove_shards(shards: &[PathBuf]) {
    for shard in shards {
        match fs::remove_file(shard) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %shard.display(), "Shard already removed");
            }
            Err(e) => warn!(path = %shard.display(), error = %e, "Failed to remove shard"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CrawlRecord;
    use crate::storage::keys::Keys;
    use crate::storage::shard::ShardWriter;
    use tempfile::TempDir;

    fn write_shard(path: &Path, keys: &Keys, urls: &[&str]) {
        let mut writer = ShardWriter::create(path).unwrap();
        for url in urls {
            let mut record = CrawlRecord::placeholder(*url);
            record.links.insert(format!("{url}/child"));
            writer.write(&record, keys).unwrap();
        }
        writer.finish().unwrap();
    }

    fn ids(conn: &Connection, sql: &str) -> Vec<i64> {
        let mut stmt = conn.prepare(sql).unwrap();
        stmt.query_map([], |r| r.get(0))
            .unwrap()
            .collect::<Result<Vec<i64>, _>>()
            .unwrap()
    }

    #[test]
    fn test_independent_counters_do_not_collide() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("crawl.db");
        let a = dir.path().join("crawl.db_0");
        let b = dir.path().join("crawl.db_1");
        write_shard(&a, &Keys::new(), &["https://a.test/1", "https://a.test/2"]);
        write_shard(&b, &Keys::new(), &["https://a.test/3", "https://a.test/4"]);

        assert_eq!(merge_shards(&dest, &[a.clone(), b.clone()]).unwrap(), 2);

        let conn = Connection::open(&dest).unwrap();
        assert_eq!(
            ids(&conn, "SELECT response_id FROM responses ORDER BY response_id"),
            vec![1, 2, 3, 4]
        );
        let url_of_link: String = conn
            .query_row(
                "SELECT r.url FROM links l JOIN responses r ON r.response_id = l.response_id
                 WHERE l.link = 'https://a.test/4/child'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(url_of_link, "https://a.test/4");
    }

    #[test]
    fn test_shared_keys_copy_unchanged() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("shared.db");
        let keys = Keys::new();
        let a = dir.path().join("shared.db_0");
        let b = dir.path().join("shared.db_1");
        write_shard(&a, &keys, &["https://a.test/1"]);
        write_shard(&b, &keys, &["https://a.test/2", "https://a.test/3"]);

        merge_shards(&dest, &[a, b]).unwrap();
        let conn = Connection::open(&dest).unwrap();
        assert_eq!(
            ids(&conn, "SELECT response_id FROM responses ORDER BY response_id"),
            vec![1, 2, 3]
        );
        assert_eq!(
            ids(&conn, "SELECT link_id FROM links ORDER BY link_id"),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn test_empty_shard_list_is_noop() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("none.db");
        assert_eq!(merge_shards(&dest, &[]).unwrap(), 0);
        assert!(!dest.exists());

        let missing = dir.path().join("none.db_0");
        assert_eq!(merge_shards(&dest, &[missing]).unwrap(), 0);
    }

    #[test]
    fn test_remove_shards() {
        let dir = TempDir::new().unwrap();
        let shard = dir.path().join("gone.db_0");
        fs::write(&shard, b"x").unwrap();
        remove_shards(&[shard.clone(), dir.path().join("never")]);
        assert!(!shard.exists());
    }
}
