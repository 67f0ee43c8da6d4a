//! Error types for place-harvest
//!
//! Two layers of errors live here:
//! - [`Error`] for the crate as a whole (configuration, persistence, I/O). These are
//!   what pipeline construction and store access return.
//! - [`ExtractError`] for one extraction attempt. These never escape the batch
//!   runner; they are folded into a `failed` update on the task instead.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for place-harvest operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for place-harvest
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "scrape.batch_size")
        key: Option<String>,
    },

    /// Task store operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Shorthand for a configuration error tied to a specific key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}

/// Task store errors (the persistence failures of the pipeline)
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Record not found
    #[error("record not found: {0}")]
    NotFound(String),
}

/// Coarse classification of a failed extraction attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Connection failure or timeout
    Transport,
    /// The target answered with a non-success status
    Response,
    /// Required fields absent, blocked content, or the payload could not be stored
    Extraction,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::Transport => "transport",
            FailureKind::Response => "response",
            FailureKind::Extraction => "extraction",
        };
        f.write_str(s)
    }
}

/// Failure of a single extraction attempt
///
/// Every way an attempt can go wrong ends up as one of these; extractors never
/// panic or bubble a crate-level [`Error`] for per-task problems.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtractError {
    /// Connection, proxy, or timeout failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Non-success HTTP status
    #[error("unexpected response status {status} from {url}")]
    Response {
        /// HTTP status code returned by the target
        status: u16,
        /// The URL that was requested
        url: String,
    },

    /// A required field was missing or empty
    #[error("required field `{field}` missing")]
    MissingField {
        /// Name of the missing field (e.g. "address")
        field: &'static str,
    },

    /// The page carried a known challenge/interstitial marker instead of content
    #[error("blocked content served (title {title:?})")]
    BlockedContent {
        /// The sentinel value that was matched
        title: String,
    },

    /// Extracted bytes could not be written to the output location
    #[error("failed to write {path}: {reason}")]
    Output {
        /// Destination path
        path: PathBuf,
        /// Underlying reason
        reason: String,
    },
}

impl ExtractError {
    /// Fold the attempt error into one of the three failure classes
    pub fn kind(&self) -> FailureKind {
        match self {
            ExtractError::Transport(_) => FailureKind::Transport,
            ExtractError::Response { .. } => FailureKind::Response,
            ExtractError::MissingField { .. }
            | ExtractError::BlockedContent { .. }
            | ExtractError::Output { .. } => FailureKind::Extraction,
        }
    }

    /// Classify a reqwest failure raised while sending a request or reading its body
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return ExtractError::Response {
                status: status.as_u16(),
                url: err.url().map(|u| u.to_string()).unwrap_or_default(),
            };
        }
        let what = if err.is_timeout() {
            "timed out"
        } else if err.is_connect() {
            "connection failed"
        } else if err.is_body() || err.is_decode() {
            "failed reading body"
        } else {
            "request failed"
        };
        ExtractError::Transport(format!("{what}: {err}"))
    }
}
