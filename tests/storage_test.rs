//! Sharded persistence through the public store API

use rusqlite::Connection;
use scopecrawl::models::{CrawlRecord, InputField};
use scopecrawl::storage::{merge_shards, shard_path, ShardWriter, ShardedStore};
use scopecrawl::workers::WorkQueue;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

fn page_record(n: usize) -> CrawlRecord {
    let url = format!("https://a.test/page/{n}?id={n}");
    let mut headers = BTreeMap::new();
    headers.insert("x-page".to_string(), n.to_string());
    CrawlRecord {
        query_params: vec![("id".to_string(), n.to_string())],
        visited: true,
        status: Some(200),
        body: Some(format!("<p>{n}</p>").into_bytes()),
        headers,
        links: [format!("https://a.test/page/{}", n + 1)].into_iter().collect(),
        inputs: vec![InputField {
            tag: "<input name=\"q\">".to_string(),
            name: "q".to_string(),
            value: n.to_string(),
        }],
        is_redirect: false,
        url,
    }
}

/// Every child row must point at the response it was written with
fn assert_children_follow_parents(conn: &Connection) {
    let mismatched: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM headers h JOIN responses r ON h.response_id = r.response_id
             WHERE r.url NOT LIKE '%/page/' || h.header_value || '?%'",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(mismatched, 0);

    let orphans: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM inputs WHERE response_id NOT IN (SELECT response_id FROM responses)",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(orphans, 0);
}

#[test]
fn test_store_keeps_children_linked_across_shards() {
    let dir = tempfile::tempdir().unwrap();
    let name = dir.path().join("crawl.db");
    let queue = Arc::new(WorkQueue::new());

    let store = ShardedStore::new(&name, 4, Arc::clone(&queue))
        .unwrap()
        .with_poll_timeout(Duration::from_millis(10));
    for n in 0..200 {
        queue.put(page_record(n));
    }
    store.start().unwrap();
    store.join_when_drained().unwrap();

    assert_eq!(store.written(), 200);
    for i in 0..4 {
        assert!(!shard_path(&name, i).exists());
    }

    let conn = Connection::open(&name).unwrap();
    for table in ["responses", "headers", "links", "query_params", "inputs"] {
        let count: i64 = conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 200, "{table}");
    }
    assert_children_follow_parents(&conn);
}

#[test]
fn test_merge_independent_shards_renumbers() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("merged.db");
    let mut shards = Vec::new();

    for shard in 0..2 {
        let path = dir.path().join(format!("part_{shard}"));
        let keys = scopecrawl::storage::Keys::new();
        let mut writer = ShardWriter::create(&path).unwrap();
        for n in 0..2 {
            writer.write(&page_record(shard * 10 + n), &keys).unwrap();
        }
        writer.finish().unwrap();
        shards.push(path);
    }

    assert_eq!(merge_shards(&dest, &shards).unwrap(), 2);

    let conn = Connection::open(&dest).unwrap();
    let ids: Vec<i64> = conn
        .prepare("SELECT response_id FROM responses ORDER BY response_id")
        .unwrap()
        .query_map([], |r| r.get(0))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(ids, vec![1, 2, 3, 4]);
    assert_children_follow_parents(&conn);
}

#[test]
fn test_stop_mid_crawl_keeps_written_records() {
    let dir = tempfile::tempdir().unwrap();
    let name = dir.path().join("partial.db");
    let queue = Arc::new(WorkQueue::new());

    let store = ShardedStore::new(&name, 2, Arc::clone(&queue))
        .unwrap()
        .with_poll_timeout(Duration::from_millis(10));
    store.start().unwrap();
    for n in 0..10 {
        queue.put(page_record(n));
    }
    queue.wait_drained();
    store.stop().unwrap();

    let conn = Connection::open(&name).unwrap();
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM responses", [], |r| r.get(0))
        .unwrap();
    assert_eq!(count, 10);
    assert!(store.is_stopped());
}
