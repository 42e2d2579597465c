//! Exponentially weighted throughput tracking.

use std::time::Instant;

/// EWMA of the reciprocal of inter-event time, in events per second.
#[derive(Debug, Clone)]
pub struct RateTracker {
    alpha: f64,
    rate: f64,
    last: Option<Instant>,
}

impl RateTracker {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            rate: 0.0,
            last: None,
        }
    }

    /// Record an event now.
    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    /// Record an event at `now`. The first event only sets the reference point.
    pub fn tick_at(&mut self, now: Instant) {
        if let Some(last) = self.last {
            let dt = now.saturating_duration_since(last).as_secs_f64();
            if dt > 0.0 {
                self.rate = self.alpha * (1.0 / dt) + (1.0 - self.alpha) * self.rate;
            }
        }
        self.last = Some(now);
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }
}

/// Intake and output rates for one stage.
#[derive(Debug, Clone)]
pub struct StageRates {
    pub input: RateTracker,
    pub output: RateTracker,
}

impl StageRates {
    pub fn new(alpha: f64) -> Self {
        Self {
            input: RateTracker::new(alpha),
            output: RateTracker::new(alpha),
        }
    }

    /// `(input, output)` in items per second.
    pub fn snapshot(&self) -> (f64, f64) {
        (self.input.rate(), self.output.rate())
    }
}
