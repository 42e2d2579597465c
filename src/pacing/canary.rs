//! WAF canary: detects when the target starts blocking the crawler.
//!
//! The canary first records a baseline of the canary URL's status code,
//! final URL and stable response headers, then re-probes on an interval and
//! flags the crawl as blocked whenever a probe fails or disagrees with the
//! baseline. With [`BackoffStrategy::Adaptive`] a run of blocked checks
//! raises the recommended request interval and stretches the check interval.

use crate::crawler::fetcher::SessionConfig;
use crate::crawler::CancelToken;
use crate::utils::error::{CanaryError, FetchError};
use crate::utils::secs_f64;
use parking_lot::{Condvar, Mutex};
use reqwest::blocking::Client;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Probes issued while establishing the baseline
pub const BASELINE_ATTEMPTS: usize = 6;

/// Successful probes needed for a usable baseline
pub const BASELINE_REQUIRED: usize = 3;

/// Consecutive blocked checks that start a drought
pub const DROUGHT_THRESHOLD: u32 = 5;

/// Recommended interval used when blocking starts with no pacing configured
const SEED_REQUEST_INTERVAL: f64 = 1.15;

/// Longest stretch between cancel-token checks while pausing
const CANCEL_POLL: Duration = Duration::from_millis(50);

/// What one canary probe observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResponse {
    pub status: u16,
    pub final_url: String,
    /// Lowercased header names, last value wins
    pub headers: BTreeMap<String, String>,
}

/// Issues a single request against the canary URL.
pub trait Probe: Send + Sync {
    fn probe(&self) -> Result<ProbeResponse, FetchError>;
}

/// Probe backed by a blocking reqwest client that follows redirects.
///
/// The client shares the crawl session's headers, proxy, timeout and TLS
/// settings, so a target the crawl can reach is also reachable here.
pub struct HttpProbe {
    client: Client,
    url: String,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>, session: &SessionConfig) -> Result<Self, CanaryError> {
        let client = session.client_builder()?.build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl Probe for HttpProbe {
    fn probe(&self) -> Result<ProbeResponse, FetchError> {
        let response = self.client.get(&self.url).send()?;
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_ascii_lowercase(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        Ok(ProbeResponse {
            status: response.status().as_u16(),
            final_url: response.url().to_string(),
            headers,
        })
    }
}

/// Fields every baseline probe agreed on. `None` means "not checked".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Baseline {
    pub status: Option<u16>,
    pub final_url: Option<String>,
    pub headers: BTreeMap<String, String>,
}

impl Baseline {
    /// Keep only what is identical across all responses.
    pub fn from_responses(responses: &[ProbeResponse]) -> Self {
        let Some((first, rest)) = responses.split_first() else {
            return Self::default();
        };

        let status = rest
            .iter()
            .all(|r| r.status == first.status)
            .then_some(first.status);
        let final_url = rest
            .iter()
            .all(|r| r.final_url == first.final_url)
            .then(|| first.final_url.clone());
        let headers = first
            .headers
            .iter()
            .filter(|(name, value)| rest.iter().all(|r| r.headers.get(*name) == Some(*value)))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        Self {
            status,
            final_url,
            headers,
        }
    }

    /// A probe is blocked when any checked field differs.
    pub fn is_blocked_by(&self, response: &ProbeResponse) -> bool {
        if self.status.is_some_and(|s| s != response.status) {
            return true;
        }
        if self
            .final_url
            .as_ref()
            .is_some_and(|u| *u != response.final_url)
        {
            return true;
        }
        self.headers
            .iter()
            .any(|(name, value)| response.headers.get(name) != Some(value))
    }
}

/// How the canary reacts to sustained blocking
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackoffStrategy {
    /// Report blocking only
    Fixed,
    /// Escalate the check interval and recommend slower requests
    Adaptive { max_interval: Duration },
}

#[derive(Debug, Clone)]
pub struct CanaryConfig {
    pub check_interval: Duration,
    pub strategy: BackoffStrategy,
    pub baseline_spacing: Duration,
    /// Starting point for the recommended request interval, in seconds
    pub initial_request_interval: f64,
}

impl Default for CanaryConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(60),
            strategy: BackoffStrategy::Fixed,
            baseline_spacing: Duration::from_secs(30),
            initial_request_interval: 0.0,
        }
    }
}

#[derive(Debug)]
struct MonitorState {
    blocked: bool,
    consecutive_blocks: u32,
    drought: bool,
    check_interval: Duration,
    recommended_interval: f64,
    stopped: bool,
}

pub struct Canary {
    probe: Box<dyn Probe>,
    config: CanaryConfig,
    baseline: Mutex<Option<Baseline>>,
    state: Mutex<MonitorState>,
    /// Signalled when the canary unblocks or stops
    changed: Condvar,
    handle: Mutex<Option<JoinHandle<()>>>,
    cancel: Option<CancelToken>,
}

impl Canary {
    pub fn new(probe: Box<dyn Probe>, config: CanaryConfig) -> Self {
        let state = MonitorState {
            blocked: false,
            consecutive_blocks: 0,
            drought: false,
            check_interval: config.check_interval,
            recommended_interval: config.initial_request_interval.max(0.0),
            stopped: false,
        };
        Self {
            probe,
            config,
            baseline: Mutex::new(None),
            state: Mutex::new(state),
            changed: Condvar::new(),
            handle: Mutex::new(None),
            cancel: None,
        }
    }

    /// Abort baseline establishment once `cancel` fires.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn is_aborted(&self, state: &MonitorState) -> bool {
        state.stopped || self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }

    /// Sleep for `duration` unless stopped or cancelled first.
    /// Returns false when the pause was cut short.
    fn pause(&self, duration: Duration) -> bool {
        let deadline = Instant::now().checked_add(duration);
        let mut state = self.state.lock();
        loop {
            if self.is_aborted(&state) {
                return false;
            }
            let now = Instant::now();
            let remaining = match deadline {
                Some(deadline) if now >= deadline => return true,
                Some(deadline) => (deadline - now).min(CANCEL_POLL),
                None => CANCEL_POLL,
            };
            self.changed.wait_for(&mut state, remaining);
        }
    }

    /// Probe the canary URL for a baseline.
    ///
    /// Fails unless at least [`BASELINE_REQUIRED`] of [`BASELINE_ATTEMPTS`]
    /// probes succeed. Returns [`CanaryError::Cancelled`] as soon as the
    /// canary is stopped or its cancel token fires.
    pub fn establish_baseline(&self) -> Result<Baseline, CanaryError> {
        let mut responses = Vec::with_capacity(BASELINE_ATTEMPTS);
        for attempt in 0..BASELINE_ATTEMPTS {
            let proceed = if attempt > 0 && !self.config.baseline_spacing.is_zero() {
                self.pause(self.config.baseline_spacing)
            } else {
                !self.is_aborted(&self.state.lock())
            };
            if !proceed {
                debug!(attempt, "Baseline interrupted");
                return Err(CanaryError::Cancelled);
            }
            match self.probe.probe() {
                Ok(response) => responses.push(response),
                Err(e) => debug!(attempt, error = %e, "Baseline probe failed"),
            }
        }

        if responses.len() < BASELINE_REQUIRED {
            return Err(CanaryError::BaselineFailed {
                successes: responses.len(),
                attempts: BASELINE_ATTEMPTS,
                required: BASELINE_REQUIRED,
            });
        }

        let baseline = Baseline::from_responses(&responses);
        info!(
            status = ?baseline.status,
            final_url = ?baseline.final_url,
            headers = baseline.headers.len(),
            "Canary baseline established"
        );
        *self.baseline.lock() = Some(baseline.clone());
        Ok(baseline)
    }

    /// Establish the baseline and spawn the monitor thread.
    pub fn start(self: &Arc<Self>) -> Result<(), CanaryError> {
        self.establish_baseline()?;
        let canary = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("canary".to_string())
            .spawn(move || canary.run())
            .map_err(CanaryError::Spawn)?;
        *self.handle.lock() = Some(handle);
        Ok(())
    }

    /// Stop the monitor thread and release any fetchers waiting on the gate.
    pub fn stop(&self) {
        {
            let mut state = self.state.lock();
            state.stopped = true;
            state.blocked = false;
        }
        self.changed.notify_all();
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                warn!("Canary thread panicked");
            }
        }
    }

    fn run(&self) {
        loop {
            self.check_once();
            let mut state = self.state.lock();
            if state.stopped {
                return;
            }
            let deadline = Instant::now().checked_add(state.check_interval);
            while !state.stopped {
                match deadline {
                    Some(deadline) => {
                        if self.changed.wait_until(&mut state, deadline).timed_out() {
                            break;
                        }
                    }
                    None => self.changed.wait(&mut state),
                }
            }
            if state.stopped {
                return;
            }
        }
    }

    /// Issue one probe, update the block flag and apply backoff.
    /// Returns whether the probe was classified as blocked.
    pub fn check_once(&self) -> bool {
        let blocked = match self.probe.probe() {
            Ok(response) => self
                .baseline
                .lock()
                .as_ref()
                .is_some_and(|b| b.is_blocked_by(&response)),
            Err(e) => {
                debug!(error = %e, "Canary probe failed");
                true
            }
        };

        let mut state = self.state.lock();
        if state.stopped {
            return blocked;
        }
        state.blocked = blocked;
        self.apply_backoff(&mut state, blocked);
        crate::metrics::update_canary_state(blocked, state.recommended_interval);
        drop(state);

        if !blocked {
            self.changed.notify_all();
        }
        blocked
    }

    fn apply_backoff(&self, state: &mut MonitorState, blocked: bool) {
        if !blocked {
            if state.drought {
                info!("Blocking stopped, resuming");
            }
            state.drought = false;
            state.consecutive_blocks = 0;
            state.check_interval = self.config.check_interval;
            return;
        }

        state.consecutive_blocks += 1;
        let BackoffStrategy::Adaptive { max_interval } = self.config.strategy else {
            return;
        };
        if state.consecutive_blocks < DROUGHT_THRESHOLD {
            return;
        }

        if !state.drought {
            state.drought = true;
            state.recommended_interval = if state.recommended_interval == 0.0 {
                SEED_REQUEST_INTERVAL
            } else {
                state.recommended_interval * 1.5
            };
            warn!(
                recommended_secs = state.recommended_interval,
                "Blocking detected, increasing time between requests"
            );
        }
        state.check_interval = escalate_interval(state.check_interval, max_interval);
        debug!(
            check_interval_secs = state.check_interval.as_secs_f64(),
            "Canary check interval escalated"
        );
    }

    pub fn is_blocked(&self) -> bool {
        self.state.lock().blocked
    }

    /// Block the caller while the canary reports blocking.
    pub fn wait_until_unblocked(&self) {
        let mut state = self.state.lock();
        while state.blocked && !state.stopped {
            self.changed.wait(&mut state);
        }
    }

    pub fn baseline(&self) -> Option<Baseline> {
        self.baseline.lock().clone()
    }

    /// Request interval suggested by adaptive backoff, in seconds
    pub fn recommended_request_interval(&self) -> f64 {
        self.state.lock().recommended_interval
    }

    pub fn check_interval(&self) -> Duration {
        self.state.lock().check_interval
    }

    pub fn is_adaptive(&self) -> bool {
        matches!(self.config.strategy, BackoffStrategy::Adaptive { .. })
    }
}

impl Drop for Canary {
    fn drop(&mut self) {
        self.state.lock().stopped = true;
        self.changed.notify_all();
    }
}

/// Staged schedule for the check interval during a drought.
pub fn escalate_interval(current: Duration, max: Duration) -> Duration {
    let secs = current.as_secs_f64();
    let next = if secs <= 60.0 {
        secs * 2.0
    } else if secs <= 900.0 {
        secs + 300.0
    } else if secs <= 1800.0 {
        secs + 900.0
    } else if secs <= 10_800.0 {
        secs + 1860.0
    } else {
        secs * 2.0
    };
    secs_f64(next.min(max.as_secs_f64()))
}
