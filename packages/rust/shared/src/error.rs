//! Error types for the hearings workspace.
//!
//! Library crates use [`HarvestError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all harvester operations.
#[derive(Debug, thiserror::Error)]
pub enum HarvestError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// The session catalog could not be read at all (first page failed).
    #[error("catalog unavailable: {0}")]
    CatalogUnavailable(String),

    /// HTTP client construction or other non-request network setup error.
    #[error("network error: {0}")]
    Network(String),

    /// Timeout, connection reset, 5xx or 429. Worth retrying.
    #[error("transient fetch failure: {0}")]
    TransientFetch(String),

    /// 4xx (other than not-found) or an undecodable response envelope.
    #[error("permanent fetch failure: {0}")]
    PermanentFetch(String),

    /// Document payload was not valid base64 or not valid UTF-8 once decoded.
    #[error("malformed encoding: {0}")]
    MalformedEncoding(String),

    /// Ledger database error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (schema mismatch, invalid format, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Topic-model bridge error (spawn, protocol, or modeller-reported).
    #[error("topic model error: {0}")]
    Topics(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, HarvestError>;

impl HarvestError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the failure may succeed if the same request is repeated.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientFetch(_))
    }

    /// Whether this error must abort a harvest run instead of being recorded
    /// against a single session.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::CatalogUnavailable(_) | Self::Storage(_) | Self::Io { .. }
        )
    }
}
