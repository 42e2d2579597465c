//! Request pacing: the cooldown lock that spaces outbound fetches and the
//! canary that detects blocking.

pub mod canary;
pub mod cooldown;

pub use canary::{
    BackoffStrategy, Baseline, Canary, CanaryConfig, HttpProbe, Probe, ProbeResponse,
};
pub use cooldown::{CooldownGuard, CooldownLock};
