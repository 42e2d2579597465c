//! Prometheus metrics for the crawl pipeline
//!
//! This module provides metrics tracking for:
//! - Stages: queue depth, EWMA throughput, fetch outcomes and latency
//! - Discovery: link classification decisions
//! - Pacing: canary block state and recommended request interval
//! - Persistence: records written per shard
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec,
    CounterVec, Encoder, Gauge, GaugeVec, HistogramVec, TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for all crawl metrics
struct CrawlMetrics {
    queue_depth: GaugeVec,
    stage_rate: GaugeVec,
    fetch_results: CounterVec,
    fetch_duration: HistogramVec,
    links: CounterVec,
    records_written: CounterVec,
    canary_blocked: Gauge,
    recommended_interval: Gauge,
}

/// Global storage for crawl metrics
static CRAWL_METRICS: OnceLock<CrawlMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// Safe to call more than once; only the first call registers anything.
/// If registration fails the error is returned and every recording helper
/// in this module stays a no-op.
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let metrics = CrawlMetrics {
        queue_depth: register_gauge_vec!(
            "scopecrawl_queue_depth",
            "Unfinished items per pipeline queue",
            &["queue"]
        )?,
        stage_rate: register_gauge_vec!(
            "scopecrawl_stage_rate",
            "Smoothed items per second by stage and direction",
            &["stage", "direction"]
        )?,
        fetch_results: register_counter_vec!(
            "scopecrawl_fetch_results_total",
            "Fetch outcomes by status class",
            &["class"]
        )?,
        fetch_duration: register_histogram_vec!(
            "scopecrawl_fetch_duration_seconds",
            "Time spent on a single fetch including retries",
            &["kind"],
            vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
        )?,
        links: register_counter_vec!(
            "scopecrawl_links_total",
            "Discovered links by classification",
            &["decision"]
        )?,
        records_written: register_counter_vec!(
            "scopecrawl_records_written_total",
            "Crawl records persisted per shard",
            &["shard"]
        )?,
        canary_blocked: register_gauge!(
            "scopecrawl_canary_blocked",
            "1 while the canary reports the origin as blocking"
        )?,
        recommended_interval: register_gauge!(
            "scopecrawl_recommended_interval_seconds",
            "Request interval recommended by adaptive backoff"
        )?,
    };

    CRAWL_METRICS.set(metrics).ok();
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    CRAWL_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Record the unfinished count of a named queue
pub fn set_queue_depth(queue: &str, depth: usize) {
    if let Some(m) = CRAWL_METRICS.get() {
        m.queue_depth.with_label_values(&[queue]).set(depth as f64);
    }
}

/// Record a stage's smoothed input and output rates
pub fn set_stage_rates(stage: &str, input: f64, output: f64) {
    let Some(m) = CRAWL_METRICS.get() else {
        return;
    };
    m.stage_rate.with_label_values(&[stage, "in"]).set(input);
    m.stage_rate.with_label_values(&[stage, "out"]).set(output);
}

/// Record a fetch outcome; `None` means the fetch failed outright
pub fn record_fetch(status: Option<u16>, duration_secs: f64, rendered: bool) {
    let Some(m) = CRAWL_METRICS.get() else {
        return;
    };
    let class = match status {
        Some(s) if (200..300).contains(&s) => "2xx",
        Some(s) if (300..400).contains(&s) => "3xx",
        Some(s) if (400..500).contains(&s) => "4xx",
        Some(_) => "5xx",
        None => "error",
    };
    m.fetch_results.with_label_values(&[class]).inc();
    let kind = if rendered { "rendered" } else { "http" };
    m.fetch_duration
        .with_label_values(&[kind])
        .observe(duration_secs);
}

/// Record a link classification decision
pub fn record_link(decision: &str) {
    if let Some(m) = CRAWL_METRICS.get() {
        m.links.with_label_values(&[decision]).inc();
    }
}

/// Record records persisted by a shard
pub fn record_written(shard: usize, count: u64) {
    if let Some(m) = CRAWL_METRICS.get() {
        m.records_written
            .with_label_values(&[&shard.to_string()])
            .inc_by(count as f64);
    }
}

/// Update the canary's block state and recommended interval
pub fn update_canary_state(blocked: bool, recommended_secs: f64) {
    let Some(m) = CRAWL_METRICS.get() else {
        return;
    };
    m.canary_blocked.set(if blocked { 1.0 } else { 0.0 });
    m.recommended_interval.set(recommended_secs);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ensure_metrics_initialized() {
        let _ = init_metrics();
    }

    #[test]
    fn test_init_metrics_idempotent() {
        ensure_metrics_initialized();
        assert!(init_metrics().is_ok());
        assert!(metrics_initialized());
    }

    #[test]
    fn test_encode_metrics() {
        ensure_metrics_initialized();
        set_queue_depth("frontier", 3);
        let text = encode_metrics().unwrap();
        assert!(text.contains("scopecrawl_queue_depth"));
    }

    #[test]
    fn test_recording_helpers() {
        ensure_metrics_initialized();
        set_stage_rates("fetcher", 1.5, 1.2);
        record_fetch(Some(200), 0.12, false);
        record_fetch(Some(302), 0.05, false);
        record_fetch(None, 1.0, false);
        record_fetch(Some(200), 2.0, true);
        record_link("enqueued");
        record_written(0, 10);
        update_canary_state(true, 1.15);
    }
}
