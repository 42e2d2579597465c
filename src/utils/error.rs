//! Error types for the scopecrawl crawler
//!
//! This module defines the domain error enums used by each subsystem.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during HTTP fetching operations
#[derive(Error, Debug)]
pub enum FetchError {
    /// HTTP request error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Request timeout
    #[error("Request timeout")]
    Timeout,

    /// Body exceeded the configured cap; the transfer was aborted
    #[error("Response body exceeds maximum size of {limit} bytes")]
    BodyTooLarge { limit: u64 },

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Reading the response body failed
    #[error("Failed to read response body: {0}")]
    Io(#[from] std::io::Error),
}

impl FetchError {
    /// Transport failures are retried; oversize bodies and bad URLs are not.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Timeout | Self::Io(_))
    }
}

/// Errors raised while building crawl scope rules
#[derive(Error, Debug)]
pub enum ScopeError {
    /// A rule did not compile to a valid pattern
    #[error("Invalid scope pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// A rules file could not be read
    #[error("Failed to read rules file {}: {source}", path.display())]
    RulesFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The seed URL has no usable host
    #[error("Seed URL has no host: {0}")]
    NoHost(String),
}

/// Errors raised by the WAF canary
#[derive(Error, Debug)]
pub enum CanaryError {
    /// Too few baseline probes succeeded
    #[error("Unable to establish a canary baseline: {successes} of {attempts} probes succeeded, {required} required")]
    BaselineFailed {
        successes: usize,
        attempts: usize,
        required: usize,
    },

    /// The canary HTTP client could not be built
    #[error("Failed to build canary client: {0}")]
    Client(#[from] reqwest::Error),

    /// The monitor thread could not be spawned
    #[error("Failed to spawn canary thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// Stopped or cancelled before the baseline was complete
    #[error("Canary baseline interrupted")]
    Cancelled,
}

/// Errors raised by the sharded persistence layer
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// File system error while copying or removing shards
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A shard worker thread panicked
    #[error("Shard worker {0} panicked")]
    WorkerPanicked(usize),

    /// A shard could not be processed
    #[error("Shard {} failed: {message}", path.display())]
    Shard { path: PathBuf, message: String },
}

/// Errors raised while rendering a page through a browser driver
#[derive(Error, Debug)]
pub enum RenderError {
    /// The driver process could not be started
    #[error("Failed to start renderer: {0}")]
    Spawn(#[from] std::io::Error),

    /// The driver exited unsuccessfully
    #[error("Renderer exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    /// The driver produced no markup
    #[error("Renderer produced no output")]
    EmptyOutput,
}
