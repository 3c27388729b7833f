//! # QuizCache Common
//!
//! Shared plumbing for the QuizCache offline layer.
//!
//! ## Features
//!
//! - Umbrella error type that every crate converts into at its edges
//! - Logging configuration and subscriber setup
//! - Retry with exponential backoff for flaky fetches
//! - `Option` extension for not-found errors

use thiserror::Error;

pub mod logging;
pub mod retry;

pub use logging::{init_logging, LogConfig, LogFormat};
pub use retry::{retry_if, retry_with_backoff, RetryConfig};

/// Umbrella error type for QuizCache.
#[derive(Error, Debug)]
pub enum QuizCacheError {
    /// Network-level failures (DNS, connection reset, offline).
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Cache store failures (quota, unavailable store, corrupt snapshot).
    #[error("Cache error: {message}")]
    Cache {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A worker version failed to install.
    #[error("Install failed for {version}: {message}")]
    Install {
        version: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Lifecycle ordering violations (activate with nothing waiting, etc.).
    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    /// Configuration errors.
    #[error("Config error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// I/O errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Resource not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Internal error (unexpected).
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        backtrace: Option<backtrace::Backtrace>,
    },
}

impl QuizCacheError {
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

    /// Create an install error with source.
    pub fn install_with_source<E: std::error::Error + Send + Sync + 'static>(
        version: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Install {
            version: version.into(),
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a lifecycle error.
    pub fn lifecycle(message: impl Into<String>) -> Self {
        Self::Lifecycle(message.into())
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

    /// Short category name, used as a structured log field.
    pub fn category(&self) -> &'static str {
        match self {
            QuizCacheError::Network { .. } => "network",
            QuizCacheError::Cache { .. } => "cache",
            QuizCacheError::Install { .. } => "install",
            QuizCacheError::Lifecycle(_) => "lifecycle",
            QuizCacheError::Config { .. } => "config",
            QuizCacheError::Io(_) => "io",
            QuizCacheError::NotFound(_) => "not_found",
            QuizCacheError::Internal { .. } => "internal",
        }
    }
}

/// Result type alias for QuizCache operations.
pub type Result<T> = std::result::Result<T, QuizCacheError>;

/// Extension trait for Option.
pub trait OptionExt<T> {
    /// Convert None to a NotFound error.
    fn ok_or_not_found(self, resource: impl Into<String>) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self, resource: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| QuizCacheError::NotFound(resource.into()))
    }
}

/// Milliseconds since the Unix epoch, saturating to zero on a skewed clock.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
