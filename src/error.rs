//! Unified error handling for the scopecrawl crate
//!
//! Domain-specific errors live in [`crate::utils::error`]; this module folds
//! them into a single [`Error`] enum so they can cross module boundaries.
//!
//! # Architecture
//!
//! - [`ErrorExt`] - Common interface implemented by the unified error
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Unified error enum wrapping all domain-specific errors
//!
//! # Usage
//!
//! ```rust,ignore
//! use scopecrawl::error::{Error, ErrorExt};
//!
//! fn handle_error(err: Error) {
//!     if err.is_recoverable() {
//!         tracing::warn!(error = %err, "transient failure");
//!     } else {
//!         tracing::error!(category = ?err.category(), error = %err, "fatal");
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

pub use crate::utils::error::{CanaryError, FetchError, RenderError, ScopeError, StoreError};

/// Common trait for scopecrawl error types
pub trait ErrorExt: std::error::Error {
    /// Check if this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Network-related errors (HTTP, timeout, oversize body)
    Network,
    /// Content extraction errors
    Parsing,
    /// Storage and I/O errors
    Storage,
    /// Scope rule compilation errors
    Scope,
    /// Canary setup errors
    Canary,
    /// Configuration and validation errors
    Config,
    /// Other/unknown errors
    Other,
}

/// Unified error type for the scopecrawl crate
#[derive(Error, Debug)]
pub enum Error {
    /// Fetch-specific errors
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Scope rule errors
    #[error("Scope error: {0}")]
    Scope(#[from] ScopeError),

    /// Canary errors
    #[error("Canary error: {0}")]
    Canary(#[from] CanaryError),

    /// Persistence errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Page rendering errors
    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl ErrorExt for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Fetch(e) => e.is_transport(),
            Self::Io(_) | Self::Render(_) => true,
            Self::Scope(_) | Self::Canary(_) | Self::Store(_) | Self::Config(_) => false,
            Self::Other { .. } => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Fetch(_) => ErrorCategory::Network,
            Self::Scope(ScopeError::RulesFile { .. }) => ErrorCategory::Config,
            Self::Scope(_) => ErrorCategory::Scope,
            Self::Canary(_) => ErrorCategory::Canary,
            Self::Render(_) => ErrorCategory::Parsing,
            Self::Store(_) | Self::Io(_) => ErrorCategory::Storage,
            Self::Config(_) => ErrorCategory::Config,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }
}

// Conversion from rusqlite::Error
impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(StoreError::Sqlite(err))
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category() {
        let fetch_err = Error::Fetch(FetchError::Timeout);
        assert_eq!(fetch_err.category(), ErrorCategory::Network);

        let canary_err = Error::Canary(CanaryError::BaselineFailed {
            successes: 2,
            attempts: 6,
            required: 3,
        });
        assert_eq!(canary_err.category(), ErrorCategory::Canary);
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::Fetch(FetchError::Timeout).is_recoverable());
        assert!(!Error::Fetch(FetchError::BodyTooLarge { limit: 10 }).is_recoverable());
        assert!(!Error::Store(StoreError::WorkerPanicked(0)).is_recoverable());
    }

    #[test]
    fn test_error_conversion() {
        let unified: Error = StoreError::WorkerPanicked(1).into();
        assert!(matches!(unified, Error::Store(_)));
        assert_eq!(unified.category(), ErrorCategory::Storage);
    }

    #[test]
    fn test_config_error() {
        let err = Error::config("num_fetchers must be greater than 0");
        assert_eq!(err.category(), ErrorCategory::Config);
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_baseline_message() {
        let err = CanaryError::BaselineFailed {
            successes: 1,
            attempts: 6,
            required: 3,
        };
        assert!(err.to_string().contains("1 of 6"));
    }
}
