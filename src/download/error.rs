//! Error types for the download module.
//!
//! Every variant carries the URL (or path) it relates to so log lines and
//! final summaries stay actionable without extra context.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that can end a single transfer attempt.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// No new bytes arrived within the stall timeout.
    #[error("transfer stalled for {timeout:?} downloading {url}")]
    Stalled {
        /// The URL whose transfer stopped progressing.
        url: String,
        /// The stall timeout that elapsed.
        timeout: Duration,
    },

    /// Connection, DNS, TLS or mid-stream transport failure.
    #[error("transport error downloading {url}: {message}")]
    Transport {
        /// The URL that failed to download.
        url: String,
        /// Description of the underlying failure.
        message: String,
    },

    /// Non-2xx HTTP response.
    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// File system error while writing the temp file.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The provided URL is malformed or invalid.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// The run was cancelled while the transfer was in flight.
    #[error("cancelled downloading {url}")]
    Cancelled {
        /// The URL whose transfer was abandoned.
        url: String,
    },
}

impl DownloadError {
    /// Creates a stall error.
    pub fn stalled(url: impl Into<String>, timeout: Duration) -> Self {
        Self::Stalled {
            url: url.into(),
            timeout,
        }
    }

    /// Creates a transport error from any displayable cause.
    pub fn transport(url: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Transport {
            url: url.into(),
            message: message.to_string(),
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates a cancellation error.
    pub fn cancelled(url: impl Into<String>) -> Self {
        Self::Cancelled { url: url.into() }
    }

    /// Short machine-friendly label for logs and summaries.
    #[must_use]
    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::Stalled { .. } => "stalled",
            Self::Transport { .. } => "transport",
            Self::HttpStatus { .. } => "http_status",
            Self::Io { .. } => "io",
            Self::InvalidUrl { .. } => "invalid_url",
            Self::Cancelled { .. } => "cancelled",
        }
    }
}

// No From<reqwest::Error> / From<std::io::Error>: the variants need the url or
// path that the source errors do not carry.
