//! Sharded SQLite persistence
//!
//! Every crawl result becomes one `responses` row plus child rows in
//! `headers`, `links`, `query_params` and `inputs`. Each persistence worker
//! writes its own shard; at shutdown the shards are merged into the
//! destination store and removed.

pub mod keys;
pub mod manager;
pub mod merge;
pub mod shard;

pub use keys::{KeyAllocator, Keys};
pub use manager::{shard_path, ShardedStore, STORE_RATE_ALPHA};
pub use merge::{merge_shards, remove_shards};
pub use shard::{ShardWriter, COMMIT_EVERY, SCHEMA};
