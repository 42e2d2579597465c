//! Primary-key allocation shared by every shard.

use std::sync::atomic::{AtomicI64, Ordering};

/// Monotonic, thread-safe key source. The first key handed out is 1.
#[derive(Debug, Default)]
pub struct KeyAllocator {
    last: AtomicI64,
}

impl KeyAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocator whose first key is `last + 1`
    pub fn starting_after(last: i64) -> Self {
        Self {
            last: AtomicI64::new(last),
        }
    }

    /// Allocate the next key.
    pub fn next(&self) -> i64 {
        self.last.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Last key handed out, 0 if none. Does not allocate.
    pub fn last(&self) -> i64 {
        self.last.load(Ordering::SeqCst)
    }
}

/// One allocator per table of the shard schema
#[derive(Debug, Default)]
pub struct Keys {
    pub responses: KeyAllocator,
    pub headers: KeyAllocator,
    pub links: KeyAllocator,
    pub query_params: KeyAllocator,
    pub inputs: KeyAllocator,
}

impl Keys {
    pub fn new() -> Self {
        Self::default()
    }
}
