//! Generic staged worker pool.
//!
//! A [`WorkerPool`] runs N named OS threads that pull from an input
//! [`WorkQueue`], apply a transform and push `Some` results onto an output
//! queue. `None` is a filtering outcome, not an error.

use super::queue::WorkQueue;
use super::rate::StageRates;
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error};

/// Default wait on an empty input queue before re-checking the stop flag
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Default EWMA smoothing factor for stage rates
pub const DEFAULT_RATE_ALPHA: f64 = 0.01;

/// Stage function shared by every worker of a pool
pub type Transform<I, O> = Arc<dyn Fn(I) -> Option<O> + Send + Sync>;

pub struct WorkerPool<I, O> {
    name: String,
    threads: usize,
    transform: Transform<I, O>,
    input: Arc<WorkQueue<I>>,
    output: Arc<WorkQueue<O>>,
    stop: Arc<AtomicBool>,
    rates: Arc<Mutex<StageRates>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    poll_timeout: Duration,
}

impl<I, O> WorkerPool<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    pub fn new(
        name: impl Into<String>,
        threads: usize,
        transform: Transform<I, O>,
        input: Arc<WorkQueue<I>>,
        output: Arc<WorkQueue<O>>,
    ) -> Self {
        Self {
            name: name.into(),
            threads: threads.max(1),
            transform,
            input,
            output,
            stop: Arc::new(AtomicBool::new(false)),
            rates: Arc::new(Mutex::new(StageRates::new(DEFAULT_RATE_ALPHA))),
            handles: Mutex::new(Vec::new()),
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        }
    }

    /// Override the EWMA smoothing factor. Call before `start`.
    pub fn with_rate_alpha(mut self, alpha: f64) -> Self {
        self.rates = Arc::new(Mutex::new(StageRates::new(alpha)));
        self
    }

    /// Override how long an idle worker waits before re-checking stop.
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Spawn the worker threads.
    pub fn start(&self) -> io::Result<()> {
        let mut handles = self.handles.lock();
        for index in 0..self.threads {
            let transform = Arc::clone(&self.transform);
            let input = Arc::clone(&self.input);
            let output = Arc::clone(&self.output);
            let stop = Arc::clone(&self.stop);
            let rates = Arc::clone(&self.rates);
            let poll_timeout = self.poll_timeout;

            let handle = thread::Builder::new()
                .name(format!("{}-{index}", self.name))
                .spawn(move || {
                    worker_loop(&transform, &input, &output, &stop, &rates, poll_timeout)
                })?;
            handles.push(handle);
        }
        debug!(stage = %self.name, threads = self.threads, "Stage started");
        Ok(())
    }

    /// Signal every worker to exit after its current item and join them.
    /// Calling it again is a no-op.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        if handles.is_empty() {
            return;
        }
        for handle in handles {
            let thread_name = handle.thread().name().unwrap_or("worker").to_string();
            if handle.join().is_err() {
                error!(stage = %self.name, thread = %thread_name, "Stage worker panicked");
            }
        }
        debug!(stage = %self.name, "Stage stopped");
    }

    /// Block until the input queue has no unfinished items, then stop.
    pub fn join_when_drained(&self) {
        self.input.wait_drained();
        self.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// `(input, output)` rates in items per second.
    pub fn rates(&self) -> (f64, f64) {
        self.rates.lock().snapshot()
    }
}

impl<I, O> Drop for WorkerPool<I, O> {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

fn worker_loop<I, O>(
    transform: &Transform<I, O>,
    input: &WorkQueue<I>,
    output: &WorkQueue<O>,
    stop: &AtomicBool,
    rates: &Mutex<StageRates>,
    poll_timeout: Duration,
) {
    while !stop.load(Ordering::SeqCst) {
        let Some(item) = input.get_timeout(poll_timeout) else {
            continue;
        };
        let _done = input.task_guard();
        rates.lock().input.tick();

        if let Some(result) = transform(item) {
            output.put(result);
            rates.lock().output.tick();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn queues<I, O>() -> (Arc<WorkQueue<I>>, Arc<WorkQueue<O>>) {
        (Arc::new(WorkQueue::new()), Arc::new(WorkQueue::new()))
    }

    #[test]
    fn test_transform_and_filter() {
        let (input, output) = queues::<u32, u32>();
        let pool = WorkerPool::new(
            "evens",
            3,
            Arc::new(|n: u32| (n % 2 == 0).then_some(n * 10)),
            Arc::clone(&input),
            Arc::clone(&output),
        )
        .with_poll_timeout(Duration::from_millis(10));

        for n in 0..20 {
            input.put(n);
        }
        pool.start().unwrap();
        pool.join_when_drained();

        assert_eq!(input.unfinished(), 0);
        let mut results = Vec::new();
        while let Some(n) = output.try_get() {
            results.push(n);
        }
        results.sort_unstable();
        assert_eq!(results, (0..20).filter(|n| n % 2 == 0).map(|n| n * 10).collect::<Vec<_>>());
        assert_eq!(output.unfinished(), 10);
    }

    #[test]
    fn test_task_done_once_per_item() {
        let (input, output) = queues::<u32, ()>();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let pool = WorkerPool::new(
            "drop-all",
            2,
            Arc::new(move |_n: u32| {
                counter.fetch_add(1, Ordering::SeqCst);
                None
            }),
            Arc::clone(&input),
            Arc::clone(&output),
        )
        .with_poll_timeout(Duration::from_millis(10));

        pool.start().unwrap();
        for n in 0..50 {
            input.put(n);
        }
        assert!(input.wait_drained_timeout(Duration::from_secs(5)));
        pool.stop();

        assert_eq!(calls.load(Ordering::SeqCst), 50);
        assert_eq!(output.unfinished(), 0);
    }

    #[test]
    fn test_stop_is_idempotent_and_prompt() {
        let (input, output) = queues::<u32, u32>();
        let pool = WorkerPool::new("idle", 4, Arc::new(|n: u32| Some(n)), input, output)
            .with_poll_timeout(Duration::from_millis(20));
        pool.start().unwrap();

        let start = std::time::Instant::now();
        pool.stop();
        pool.stop();
        assert!(pool.is_stopped());
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_stop_leaves_remaining_items() {
        let (input, output) = queues::<u32, u32>();
        let pool = WorkerPool::new("never-started", 1, Arc::new(|n: u32| Some(n)), Arc::clone(&input), output);
        input.put(1);
        pool.stop();
        assert_eq!(input.unfinished(), 1);
    }

    #[test]
    fn test_rates_are_tracked() {
        let (input, output) = queues::<u32, u32>();
        let pool = WorkerPool::new(
            "rated",
            1,
            Arc::new(|n| {
                thread::sleep(Duration::from_millis(2));
                Some(n)
            }),
            Arc::clone(&input),
            output,
        )
        .with_rate_alpha(0.5)
        .with_poll_timeout(Duration::from_millis(10));
        for n in 0..5 {
            input.put(n);
        }
        pool.start().unwrap();
        pool.join_when_drained();
        let (rate_in, rate_out) = pool.rates();
        assert!(rate_in > 0.0);
        assert!(rate_out > 0.0);
    }
}
