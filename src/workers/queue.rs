//! Unbounded multi-producer multi-consumer queue with unfinished-task accounting.
//!
//! Every `put` raises the unfinished count and every consumer must call
//! [`WorkQueue::task_done`] once per item it pulled, whether or not the item
//! produced output. The count reaching zero means nothing is queued and
//! nothing is in flight.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

struct QueueState<T> {
    items: VecDeque<T>,
    unfinished: usize,
}

pub struct WorkQueue<T> {
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
    all_done: Condvar,
    total_put: AtomicU64,
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                unfinished: 0,
            }),
            not_empty: Condvar::new(),
            all_done: Condvar::new(),
            total_put: AtomicU64::new(0),
        }
    }

    /// Enqueue an item and wake one waiting consumer.
    pub fn put(&self, item: T) {
        let mut state = self.state.lock();
        state.items.push_back(item);
        state.unfinished += 1;
        self.total_put.fetch_add(1, Ordering::SeqCst);
        drop(state);
        self.not_empty.notify_one();
    }

    /// Pull the next item, waiting at most `timeout`.
    pub fn get_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if self.not_empty.wait_until(&mut state, deadline).timed_out() {
                return state.items.pop_front();
            }
        }
    }

    /// Pull an item without waiting.
    pub fn try_get(&self) -> Option<T> {
        self.state.lock().items.pop_front()
    }

    /// Mark one previously pulled item as fully processed.
    pub fn task_done(&self) {
        let mut state = self.state.lock();
        if state.unfinished == 0 {
            tracing::warn!("task_done called more times than items were put");
            return;
        }
        state.unfinished -= 1;
        if state.unfinished == 0 {
            self.all_done.notify_all();
        }
    }

    /// Items queued or pulled but not yet marked done.
    pub fn unfinished(&self) -> usize {
        self.state.lock().unfinished
    }

    /// Items currently waiting in the queue.
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Monotonic count of every item ever put.
    pub fn total_put(&self) -> u64 {
        self.total_put.load(Ordering::SeqCst)
    }

    /// Block until the unfinished count reaches zero or `timeout` elapses.
    /// Returns true when drained.
    pub fn wait_drained_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.unfinished > 0 {
            if self.all_done.wait_until(&mut state, deadline).timed_out() {
                return state.unfinished == 0;
            }
        }
        true
    }

    /// Block until the unfinished count reaches zero.
    pub fn wait_drained(&self) {
        let mut state = self.state.lock();
        while state.unfinished > 0 {
            self.all_done.wait(&mut state);
        }
    }

    /// Guard that marks one pulled item done when dropped, so a panicking
    /// consumer still leaves the accounting consistent.
    pub fn task_guard(&self) -> TaskGuard<'_, T> {
        TaskGuard(self)
    }
}

pub struct TaskGuard<'a, T>(&'a WorkQueue<T>);

impl<T> Drop for TaskGuard<'_, T> {
    fn drop(&mut self) {
        self.0.task_done();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_and_accounting() {
        let queue = WorkQueue::new();
        queue.put(1);
        queue.put(2);
        assert_eq!(queue.unfinished(), 2);
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.get_timeout(Duration::from_millis(10)), Some(1));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.unfinished(), 2);

        queue.task_done();
        assert_eq!(queue.unfinished(), 1);
        assert_eq!(queue.total_put(), 2);
    }

    #[test]
    fn test_get_timeout_on_empty() {
        let queue: WorkQueue<u8> = WorkQueue::new();
        let start = Instant::now();
        assert!(queue.get_timeout(Duration::from_millis(30)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_extra_task_done_is_ignored() {
        let queue: WorkQueue<u8> = WorkQueue::new();
        queue.task_done();
        assert_eq!(queue.unfinished(), 0);
    }

    #[test]
    fn test_wakes_waiting_consumer() {
        let queue = Arc::new(WorkQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.get_timeout(Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(20));
        queue.put("item");
        assert_eq!(consumer.join().unwrap(), Some("item"));
    }

    #[test]
    fn test_wait_drained() {
        let queue = Arc::new(WorkQueue::new());
        for i in 0..10 {
            queue.put(i);
        }
        assert!(!queue.wait_drained_timeout(Duration::from_millis(10)));

        let worker = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                while let Some(_item) = queue.get_timeout(Duration::from_millis(50)) {
                    queue.task_done();
                }
            })
        };
        assert!(queue.wait_drained_timeout(Duration::from_secs(5)));
        worker.join().unwrap();
        assert_eq!(queue.unfinished(), 0);
    }

    proptest! {
        #[test]
        fn prop_unfinished_tracks_puts_minus_done(puts in 0usize..64, dones in 0usize..64) {
            let queue = WorkQueue::new();
            for i in 0..puts {
                queue.put(i);
            }
            let pulled = dones.min(puts);
            for _ in 0..pulled {
                prop_assert!(queue.try_get().is_some());
                queue.task_done();
            }
            prop_assert_eq!(queue.unfinished(), puts - pulled);
            prop_assert_eq!(queue.total_put(), puts as u64);
        }
    }
}
