//! Sharded persistence manager
//!
//! N worker threads drain the shared results queue, each into its own
//! shard. Keys come from one shared [`Keys`] set so the merge at shutdown
//! copies rows without renumbering.

use super::keys::Keys;
use super::merge::{merge_shards, remove_shards};
use super::shard::ShardWriter;
use crate::metrics;
use crate::models::CrawlRecord;
use crate::utils::error::StoreError;
use crate::workers::{StageRates, WorkQueue, DEFAULT_POLL_TIMEOUT};
use parking_lot::Mutex;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info};

/// EWMA smoothing factor for persistence rates
pub const STORE_RATE_ALPHA: f64 = 0.1;

/// Path of shard `index` for the store at `name`: `{name}_{index}`
pub fn shard_path(name: &Path, index: usize) -> PathBuf {
    let mut raw = OsString::from(name.as_os_str());
    raw.push(format!("_{index}"));
    PathBuf::from(raw)
}

struct Shared {
    input: Arc<WorkQueue<CrawlRecord>>,
    keys: Keys,
    stop: AtomicBool,
    rates: Mutex<StageRates>,
    written: AtomicU64,
    failure: Mutex<Option<StoreError>>,
}

impl Shared {
    fn record_failure(&self, err: StoreError) {
        let mut failure = self.failure.lock();
        if failure.is_none() {
            *failure = Some(err);
        }
    }
}

pub struct ShardedStore {
    name: PathBuf,
    shard_paths: Vec<PathBuf>,
    shared: Arc<Shared>,
    writers: Mutex<Vec<ShardWriter>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    finished: AtomicBool,
    poll_timeout: Duration,
}

impl ShardedStore {
    /// Create `threads` shard files next to `name`, each with the full schema.
    pub fn new(
        name: impl Into<PathBuf>,
        threads: usize,
        input: Arc<WorkQueue<CrawlRecord>>,
    ) -> Result<Self, StoreError> {
        let name = name.into();
        let threads = threads.max(1);
        let shard_paths: Vec<PathBuf> = (0..threads).map(|i| shard_path(&name, i)).collect();
        let writers = shard_paths
            .iter()
            .map(|path| ShardWriter::create(path))
            .collect::<Result<Vec<_>, _>>()?;

        debug!(store = %name.display(), shards = threads, "Shards initialized");
        Ok(Self {
            name,
            shard_paths,
            shared: Arc::new(Shared {
                input,
                keys: Keys::new(),
                stop: AtomicBool::new(false),
                rates: Mutex::new(StageRates::new(STORE_RATE_ALPHA)),
                written: AtomicU64::new(0),
                failure: Mutex::new(None),
            }),
            writers: Mutex::new(writers),
            handles: Mutex::new(Vec::new()),
            finished: AtomicBool::new(false),
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        })
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn name(&self) -> &Path {
        &self.name
    }

    pub fn shard_paths(&self) -> &[PathBuf] {
        &self.shard_paths
    }

    /// Spawn one worker per shard.
    pub fn start(&self) -> Result<(), StoreError> {
        let writers: Vec<ShardWriter> = self.writers.lock().drain(..).collect();
        let mut handles = self.handles.lock();
        for (index, writer) in writers.into_iter().enumerate() {
            let shared = Arc::clone(&self.shared);
            let poll_timeout = self.poll_timeout;
            let handle = thread::Builder::new()
                .name(format!("db-{index}"))
                .spawn(move || shard_worker(index, writer, &shared, poll_timeout))?;
            handles.push(handle);
        }
        debug!(store = %self.name.display(), workers = handles.len(), "Persistence started");
        Ok(())
    }

    /// Stop the workers, merge the shards into the store and delete them.
    ///
    /// Items still queued are left unwritten. Only the first call does any
    /// work; later calls return `Ok`.
    pub fn stop(&self) -> Result<(), StoreError> {
        if self.finished.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.shared.stop.store(true, Ordering::SeqCst);

        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        for (index, handle) in handles.into_iter().enumerate() {
            if handle.join().is_err() {
                error!(shard = index, "Shard worker panicked");
                self.shared.record_failure(StoreError::WorkerPanicked(index));
            }
        }
        // Shards of a store that was never started still hold open writers.
        for writer in self.writers.lock().drain(..) {
            writer.finish()?;
        }

        let merged = merge_shards(&self.name, &self.shard_paths);
        remove_shards(&self.shard_paths);
        merged?;

        info!(
            store = %self.name.display(),
            records = self.written(),
            "Persistence finished"
        );
        match self.shared.failure.lock().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Wait for the results queue to drain, then [`stop`](Self::stop).
    pub fn join_when_drained(&self) -> Result<(), StoreError> {
        self.shared.input.wait_drained();
        self.stop()
    }

    /// True once any shard write has failed
    pub fn has_failed(&self) -> bool {
        self.shared.failure.lock().is_some()
    }

    pub fn is_stopped(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Records written across all shards
    pub fn written(&self) -> u64 {
        self.shared.written.load(Ordering::SeqCst)
    }

    /// `(input, output)` rates in records per second
    pub fn rates(&self) -> (f64, f64) {
        self.shared.rates.lock().snapshot()
    }
}

impl Drop for ShardedStore {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
    }
}

fn shard_worker(index: usize, mut writer: ShardWriter, shared: &Shared, poll_timeout: Duration) {
    while !shared.stop.load(Ordering::SeqCst) {
        let Some(record) = shared.input.get_timeout(poll_timeout) else {
            continue;
        };
        let _done = shared.input.task_guard();
        shared.rates.lock().input.tick();

        match writer.write(&record, &shared.keys) {
            Ok(_) => {
                shared.written.fetch_add(1, Ordering::SeqCst);
                shared.rates.lock().output.tick();
                metrics::record_written(index, 1);
            }
            Err(e) => {
                error!(shard = index, url = %record.url, error = %e, "Failed to write record");
                shared.record_failure(e);
            }
        }
    }

    let path = writer.path().to_path_buf();
    match writer.finish() {
        Ok(written) => debug!(shard = index, written, "Shard worker exiting"),
        Err(e) => {
            error!(shard = index, path = %path.display(), error = %e, "Final shard commit failed");
            shared.record_failure(e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;
    use tempfile::TempDir;

    #[test]
    fn test_shard_path() {
        assert_eq!(
            shard_path(Path::new("/tmp/crawl.db"), 2),
            PathBuf::from("/tmp/crawl.db_2")
        );
    }

    #[test]
    fn test_drain_merge_and_cleanup() {
        let dir = TempDir::new().unwrap();
        let name = dir.path().join("crawl.db");
        let queue = Arc::new(WorkQueue::new());

        let store = ShardedStore::new(&name, 3, Arc::clone(&queue))
            .unwrap()
            .with_poll_timeout(Duration::from_millis(10));
        assert!(store.shard_paths().iter().all(|p| p.exists()));

        for i in 0..50 {
            queue.put(CrawlRecord::placeholder(format!("https://a.test/{i}")));
        }
        store.start().unwrap();
        store.join_when_drained().unwrap();

        assert_eq!(store.written(), 50);
        assert!(store.shard_paths().iter().all(|p| !p.exists()));

        let conn = Connection::open(&name).unwrap();
        let (count, distinct): (i64, i64) = conn
            .query_row(
                "SELECT COUNT(*), COUNT(DISTINCT response_id) FROM responses",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(count, 50);
        assert_eq!(distinct, 50);

        // Second stop is a no-op.
        store.stop().unwrap();
    }

    #[test]
    fn test_stop_without_start_produces_empty_store() {
        let dir = TempDir::new().unwrap();
        let name = dir.path().join("idle.db");
        let store = ShardedStore::new(&name, 2, Arc::new(WorkQueue::new())).unwrap();
        store.stop().unwrap();

        let conn = Connection::open(&name).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM responses", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
        assert!(store.is_stopped());
    }
}
