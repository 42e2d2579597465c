//! Pipeline building blocks: task-counting queues, EWMA rates and worker pools.

pub mod pool;
pub mod queue;
pub mod rate;

pub use pool::{Transform, WorkerPool, DEFAULT_POLL_TIMEOUT, DEFAULT_RATE_ALPHA};
pub use queue::{TaskGuard, WorkQueue};
pub use rate::{RateTracker, StageRates};
