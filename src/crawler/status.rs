//! Periodic status reporting for a running crawl
//!
//! Replaces an interactive live view with a structured log line and the
//! Prometheus gauges in [`crate::metrics`].

use crate::metrics;
use std::fmt;
use std::time::{Duration, Instant};

/// Pipeline queues in flow order
pub const QUEUE_NAMES: [&str; 4] = ["frontier", "requests", "responses", "results"];

/// Unfinished items and lifetime totals of one queue
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct QueueStatus {
    pub unfinished: usize,
    pub total_put: u64,
    /// Items put per second since the previous snapshot
    pub put_rate: f64,
}

/// EWMA rates of one stage, items per second
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StageStatus {
    pub input: f64,
    pub output: f64,
}

/// Point-in-time view of a crawl
#[derive(Debug, Clone, Default)]
pub struct StatusSnapshot {
    pub elapsed: Duration,
    pub queues: [QueueStatus; 4],
    /// `build`, `fetch`, `parse`, `store`
    pub stages: [StageStatus; 4],
    pub visited: usize,
    pub seen: usize,
    pub written: u64,
    pub canary_blocked: bool,
    pub recommended_interval: f64,
}

impl StatusSnapshot {
    /// Publish queue depths, stage rates and canary state as metrics
    pub fn publish(&self) {
        for (name, queue) in QUEUE_NAMES.iter().zip(&self.queues) {
            metrics::set_queue_depth(name, queue.unfinished);
        }
        for (name, stage) in STAGE_NAMES.iter().zip(&self.stages) {
            metrics::set_stage_rates(name, stage.input, stage.output);
        }
        metrics::update_canary_state(self.canary_blocked, self.recommended_interval);
    }

    pub fn log(&self) {
        let [frontier, requests, responses, results] = self.queues;
        let [build, fetch, parse, store] = self.stages;
        tracing::info!(
            elapsed_secs = self.elapsed.as_secs(),
            frontier = frontier.unfinished,
            requests = requests.unfinished,
            responses = responses.unfinished,
            results = results.unfinished,
            build_rate = format!("{:.2}", build.output),
            fetch_rate = format!("{:.2}", fetch.output),
            parse_rate = format!("{:.2}", parse.output),
            store_rate = format!("{:.2}", store.output),
            visited = self.visited,
            written = self.written,
            blocked = self.canary_blocked,
            "Crawl status"
        );
    }
}

const STAGE_NAMES: [&str; 4] = ["build", "fetch", "parse", "store"];

impl fmt::Display for StatusSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}s]", self.elapsed.as_secs())?;
        for (name, queue) in QUEUE_NAMES.iter().zip(&self.queues) {
            write!(f, " {name}={} ({:.1}/s)", queue.unfinished, queue.put_rate)?;
        }
        write!(f, " visited={} written={}", self.visited, self.written)?;
        if self.canary_blocked {
            write!(f, " BLOCKED")?;
        }
        Ok(())
    }
}

/// Turns lifetime queue totals into per-second put rates between calls
#[derive(Debug)]
pub struct QueueRateTracker {
    last: Option<(Instant, [u64; 4])>,
}

impl QueueRateTracker {
    pub fn new() -> Self {
        Self { last: None }
    }

    /// Rates since the previous call; zero on the first call
    pub fn update(&mut self, now: Instant, totals: [u64; 4]) -> [f64; 4] {
        let mut rates = [0.0; 4];
        if let Some((then, previous)) = self.last {
            let dt = now.saturating_duration_since(then).as_secs_f64();
            if dt > 0.0 {
                for (rate, (current, before)) in rates.iter_mut().zip(totals.iter().zip(previous)) {
                    *rate = current.saturating_sub(before) as f64 / dt;
                }
            }
        }
        self.last = Some((now, totals));
        rates
    }
}

impl Default for QueueRateTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_rates() {
        let mut tracker = QueueRateTracker::new();
        let start = Instant::now();
        assert_eq!(tracker.update(start, [0, 0, 0, 0]), [0.0; 4]);

        let rates = tracker.update(start + Duration::from_secs(2), [10, 4, 0, 2]);
        assert_eq!(rates, [5.0, 2.0, 0.0, 1.0]);
    }

    #[test]
    fn test_display() {
        let snapshot = StatusSnapshot {
            visited: 3,
            canary_blocked: true,
            ..Default::default()
        };
        let line = snapshot.to_string();
        assert!(line.contains("frontier=0"));
        assert!(line.contains("visited=3"));
        assert!(line.ends_with("BLOCKED"));
    }
}
