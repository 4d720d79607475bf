//! Error types for citeweave.
//!
//! Library crates use [`CiteweaveError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all citeweave operations.
#[derive(Debug, thiserror::Error)]
pub enum CiteweaveError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Malformed response payload or fragment.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// The fragment source answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// Network failure while reading from the fragment source.
    #[error("network error: {0}")]
    Network(String),

    /// No fragment arrived within the configured wait.
    #[error("timed out after {secs}s waiting for the next fragment")]
    Timeout { secs: u64 },

    /// The fragment source closed before the stream finished.
    #[error("stream closed: {0}")]
    StreamClosed(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, CiteweaveError>;

impl CiteweaveError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
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

    /// Whether this error ends a stream outright.
    ///
    /// Transport failures are terminal; parse failures only cost the
    /// fragment they came from.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::HttpStatus { .. } | Self::Network(_) | Self::Timeout { .. } | Self::StreamClosed(_)
        )
    }
}
