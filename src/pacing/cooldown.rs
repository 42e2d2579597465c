//! Mutual exclusion with an enforced idle gap between release and the next
//! acquisition.
//!
//! A released [`CooldownLock`] can only be re-acquired once
//! `cooldown + uniform(0, max_jitter)` has elapsed since the release. The
//! jitter is sampled once per acquisition call. This enforces a minimum gap
//! between requests, not a target rate.

use crate::utils::secs_f64;
use parking_lot::{Condvar, Mutex};
use rand::Rng;
use std::time::{Duration, Instant};

struct CooldownState {
    held: bool,
    last_release: Option<Instant>,
    cooldown: Duration,
}

pub struct CooldownLock {
    state: Mutex<CooldownState>,
    released: Condvar,
    max_jitter: Duration,
}

/// Releases the lock and stamps the release time when dropped.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct CooldownGuard<'a> {
    lock: &'a CooldownLock,
}

impl Drop for CooldownGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

impl CooldownLock {
    pub fn new(cooldown: Duration, max_jitter: Duration) -> Self {
        Self {
            state: Mutex::new(CooldownState {
                held: false,
                last_release: None,
                cooldown,
            }),
            released: Condvar::new(),
            max_jitter,
        }
    }

    /// Build from fractional seconds, clamping negatives to zero.
    pub fn from_secs(cooldown: f64, max_jitter: f64) -> Self {
        Self::new(secs_f64(cooldown), secs_f64(max_jitter))
    }

    pub fn cooldown(&self) -> Duration {
        self.state.lock().cooldown
    }

    pub fn max_jitter(&self) -> Duration {
        self.max_jitter
    }

    /// Change the cooldown period for subsequent acquisitions.
    pub fn set_cooldown(&self, cooldown: Duration) {
        let mut state = self.state.lock();
        if state.cooldown != cooldown {
            tracing::debug!(
                old_secs = state.cooldown.as_secs_f64(),
                new_secs = cooldown.as_secs_f64(),
                "Cooldown period changed"
            );
            state.cooldown = cooldown;
        }
        drop(state);
        self.released.notify_all();
    }

    /// Block until the lock is free and the cooldown has elapsed.
    pub fn acquire(&self) -> CooldownGuard<'_> {
        let jitter = self.sample_jitter();
        let mut state = self.state.lock();
        loop {
            match Self::ready_at(&state, jitter) {
                Some(at) if at <= Instant::now() => return self.grant(&mut state),
                Some(at) => {
                    self.released.wait_until(&mut state, at);
                }
                None => self.released.wait(&mut state),
            }
        }
    }

    /// Acquire only if the lock is free and cooled down right now.
    pub fn try_acquire(&self) -> Option<CooldownGuard<'_>> {
        let jitter = self.sample_jitter();
        let mut state = self.state.lock();
        match Self::ready_at(&state, jitter) {
            Some(at) if at <= Instant::now() => Some(self.grant(&mut state)),
            _ => None,
        }
    }

    /// Like [`acquire`](Self::acquire) but gives up after `timeout`.
    pub fn acquire_timeout(&self, timeout: Duration) -> Option<CooldownGuard<'_>> {
        let deadline = Instant::now() + timeout;
        let jitter = self.sample_jitter();
        let mut state = self.state.lock();
        loop {
            let now = Instant::now();
            let wake = match Self::ready_at(&state, jitter) {
                Some(at) if at <= now => return Some(self.grant(&mut state)),
                Some(at) => at.min(deadline),
                None => deadline,
            };
            if now >= deadline {
                return None;
            }
            self.released.wait_until(&mut state, wake);
        }
    }

    /// When the lock becomes available, or `None` while it is held or the
    /// period is too long to represent.
    fn ready_at(state: &CooldownState, jitter: Duration) -> Option<Instant> {
        if state.held {
            return None;
        }
        match state.last_release {
            // An unrepresentable instant never arrives; wait for a new period
            Some(released) => released.checked_add(state.cooldown.saturating_add(jitter)),
            None => Some(Instant::now()),
        }
    }

    fn grant(&self, state: &mut CooldownState) -> CooldownGuard<'_> {
        state.held = true;
        CooldownGuard { lock: self }
    }

    fn release(&self) {
        let mut state = self.state.lock();
        state.held = false;
        state.last_release = Some(Instant::now());
        drop(state);
        self.released.notify_all();
    }

    fn sample_jitter(&self) -> Duration {
        if self.max_jitter.is_zero() {
            return Duration::ZERO;
        }
        let secs = rand::thread_rng().gen_range(0.0..=self.max_jitter.as_secs_f64());
        secs_f64(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_huge_cooldown_does_not_overflow() {
        let lock = CooldownLock::new(Duration::MAX, Duration::ZERO);
        drop(lock.acquire());
        assert!(lock.try_acquire().is_none());
        assert!(lock.acquire_timeout(Duration::from_millis(20)).is_none());

        lock.set_cooldown(Duration::ZERO);
        assert!(lock.try_acquire().is_some());
    }

    #[test]
    fn test_first_acquire_is_immediate() {
        let lock = CooldownLock::from_secs(5.0, 0.0);
        let start = Instant::now();
        let _guard = lock.acquire();
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_consecutive_acquisitions_respect_cooldown() {
        let lock = CooldownLock::new(Duration::from_millis(80), Duration::from_millis(20));
        let guard = lock.acquire();
        let before_release = Instant::now();
        drop(guard);
        let _guard = lock.acquire();
        assert!(before_release.elapsed() >= Duration::from_millis(80));
    }

    #[test]
    fn test_try_acquire_fails_fast_during_cooldown() {
        let lock = CooldownLock::new(Duration::from_secs(10), Duration::ZERO);
        drop(lock.acquire());
        let start = Instant::now();
        assert!(lock.try_acquire().is_none());
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_try_acquire_fails_while_held() {
        let lock = CooldownLock::new(Duration::ZERO, Duration::ZERO);
        let _guard = lock.acquire();
        assert!(lock.try_acquire().is_none());
    }

    #[test]
    fn test_acquire_timeout_expires() {
        let lock = CooldownLock::new(Duration::from_secs(10), Duration::ZERO);
        drop(lock.acquire());
        let start = Instant::now();
        assert!(lock.acquire_timeout(Duration::from_millis(50)).is_none());
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(50));
        assert!(waited < Duration::from_secs(5));
    }

    #[test]
    fn test_acquire_timeout_succeeds_after_cooldown() {
        let lock = CooldownLock::new(Duration::from_millis(30), Duration::ZERO);
        drop(lock.acquire());
        assert!(lock.acquire_timeout(Duration::from_secs(2)).is_some());
    }

    #[test]
    fn test_set_cooldown_shortens_wait() {
        let lock = Arc::new(CooldownLock::new(Duration::from_secs(60), Duration::ZERO));
        drop(lock.acquire());
        lock.set_cooldown(Duration::ZERO);
        assert!(lock.try_acquire().is_some());
    }

    #[test]
    fn test_serializes_threads_with_gap() {
        let lock = Arc::new(CooldownLock::new(Duration::from_millis(20), Duration::ZERO));
        let stamps = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let lock = Arc::clone(&lock);
                let stamps = Arc::clone(&stamps);
                thread::spawn(move || {
                    let _guard = lock.acquire();
                    let entered = Instant::now();
                    thread::sleep(Duration::from_millis(5));
                    stamps.lock().push((entered, Instant::now()));
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut spans = stamps.lock().clone();
        spans.sort();
        for pair in spans.windows(2) {
            let (_, prev_exit) = pair[0];
            let (next_enter, _) = pair[1];
            assert!(next_enter.duration_since(prev_exit) >= Duration::from_millis(20));
        }
    }
}
