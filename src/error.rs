//! Run-level errors.
//!
//! Per-task failures never surface here; they are counted by the scheduler.
//! These are the setup problems that stop a run before it starts.

use std::path::PathBuf;

use thiserror::Error;

use crate::download::ClientBuildError;
use crate::scheduler::{MAX_CONCURRENCY, MIN_CONCURRENCY};

/// Errors that abort a run at startup.
#[derive(Debug, Error)]
pub enum HarvestError {
    /// The destination directory could not be created or read.
    #[error("destination directory {path} is unavailable: {source}")]
    DestinationUnavailable {
        /// The directory.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A configuration value is out of range.
    #[error("invalid config value for `{field}`: {value}. Expected {expected}")]
    InvalidConfig {
        /// Field name as written in the config file.
        field: &'static str,
        /// The rejected value.
        value: String,
        /// What would have been accepted.
        expected: String,
    },

    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },

    /// The config file could not be read or parsed.
    #[error("failed to load config {path}: {message}")]
    Config {
        /// Config file path.
        path: PathBuf,
        /// Read or parse error, rendered.
        message: String,
    },

    /// The HTTP client could not be built from the configuration.
    #[error(transparent)]
    Client(#[from] ClientBuildError),
}

impl HarvestError {
    /// Creates an [`HarvestError::InvalidConfig`].
    pub fn invalid_config(
        field: &'static str,
        value: impl std::fmt::Display,
        expected: impl Into<String>,
    ) -> Self {
        Self::InvalidConfig {
            field,
            value: value.to_string(),
            expected: expected.into(),
        }
    }

    /// Creates a [`HarvestError::DestinationUnavailable`].
    pub fn destination(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::DestinationUnavailable {
            path: path.into(),
            source,
        }
    }
}
