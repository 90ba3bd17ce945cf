//! # Offline Common
//!
//! Error types and logging configuration shared by the offline caching worker.
//!
//! ## Features
//!
//! - Unified error type with a backtrace on internal failures
//! - Logging configuration and setup

use std::time::Duration;
use thiserror::Error;

pub mod logging;

pub use logging::{init_logging, try_init_logging, LogConfig, LogFormat};

/// Unified error type for the worker.
#[derive(Error, Debug)]
pub enum OfflineError {
    /// Network-related errors.
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Cache store errors.
    #[error("Cache error: {message}")]
    Cache {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration errors.
    #[error("Config error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Timeout errors.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Internal error (unexpected).
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        backtrace: Option<backtrace::Backtrace>,
    },
}

impl OfflineError {
    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            source: None,
        }
    }

    /// Create a network error with source.
    pub fn network_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Network {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a cache error.
    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache {
            message: message.into(),
            source: None,
        }
    }

    /// Create a cache error with source.
    pub fn cache_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Cache {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Create a config error with source.
    pub fn config_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an internal error with backtrace.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            backtrace: Some(backtrace::Backtrace::new()),
        }
    }

    /// Whether the failure came from the network collaborator.
    pub fn is_network(&self) -> bool {
        matches!(self, OfflineError::Network { .. } | OfflineError::Timeout(_))
    }

    /// Get the error category for log fields.
    pub fn category(&self) -> &'static str {
        match self {
            OfflineError::Network { .. } => "network",
            OfflineError::Cache { .. } => "cache",
            OfflineError::Config { .. } => "config",
            OfflineError::Timeout(_) => "timeout",
            OfflineError::InvalidArgument(_) => "invalid_argument",
            OfflineError::Internal { .. } => "internal",
        }
    }
}

/// Result type alias for worker operations.
pub type Result<T> = std::result::Result<T, OfflineError>;
