//! scopecrawl - scope-aware staged web crawler
//!
//! Crawls a single target under an explicit scope policy, pacing requests
//! with a cooldown lock and a WAF canary, and persists every response with
//! its headers, links, query parameters and form inputs to SQLite.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Crawl configuration (defaults, environment, TOML)
//! - [`crawler`] - Orchestrator, stage transforms, HTTP session and URL helpers
//! - [`workers`] - Task-counting queues, worker pools and EWMA rates
//! - [`pacing`] - Cooldown lock and canary monitor
//! - [`scope`] - Scope policy and robots.txt rules
//! - [`parser`] - Link and input extraction
//! - [`render`] - Optional browser rendering through a driver pool
//! - [`storage`] - Sharded SQLite persistence and merge
//! - [`models`] - Records flowing between stages
//! - [`metrics`] - Prometheus metrics
//!
//! # Example
//!
//! ```no_run
//! use scopecrawl::config::CrawlConfig;
//! use scopecrawl::crawler::Crawler;
//!
//! fn main() -> scopecrawl::error::Result<()> {
//!     let config = CrawlConfig {
//!         seed_url: "https://example.com/".to_string(),
//!         max_depth: 1,
//!         ..Default::default()
//!     };
//!     let summary = Crawler::new(config)?.run()?;
//!     println!("visited {} pages", summary.visited);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod crawler;
pub mod error;
pub mod metrics;
pub mod models;
pub mod pacing;
pub mod parser;
pub mod render;
pub mod scope;
pub mod storage;
pub mod utils;
pub mod workers;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{CanaryMode, CrawlConfig};
    pub use crate::crawler::{CancelToken, CrawlSummary, Crawler};
    pub use crate::error::{Error, ErrorCategory, ErrorExt, Result};
    pub use crate::models::{CrawlRecord, FetchedPage, FrontierItem, InputField};
    pub use crate::scope::Scope;
    pub use crate::storage::{merge_shards, ShardedStore};
}

pub use models::{CrawlRecord, FrontierItem};
