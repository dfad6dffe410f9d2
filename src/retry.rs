//! Retry decisions for failed attempts.
//!
//! This module provides the [`RetryPolicy`] and [`FailureType`] types for
//! classifying attempt errors and deciding whether a task goes back to the
//! queue. It performs no I/O: the scheduler applies the decision by waiting
//! the returned delay and re-enqueuing the task at the tail.
//!
//! # Overview
//!
//! When an attempt fails, the error is classified into a [`FailureType`]:
//! - [`FailureType::Transient`] - stalls, transport errors, 5xx and friends
//! - [`FailureType::ClientError`] - 4xx such as 403/404
//! - [`FailureType::Permanent`] - local problems a retry cannot fix
//! - [`FailureType::Cancelled`] - the run is being aborted
//!
//! # Example
//!
//! ```
//! use harvest_core::download::DownloadError;
//! use harvest_core::retry::{classify_error, RetryDecision, RetryPolicy};
//! use harvest_core::scheduler::AttemptError;
//!
//! let policy = RetryPolicy::default();
//! let error =
//!     AttemptError::Download(DownloadError::http_status("https://example.com/a.jpg", 503));
//!
//! match policy.decide(classify_error(&error), 3) {
//!     RetryDecision::Retry { delay, attempts_remaining } => {
//!         println!("retrying in {delay:?}, {attempts_remaining} retries left");
//!     }
//!     RetryDecision::GiveUp { reason } => println!("giving up: {reason}"),
//! }
//! ```

use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::download::DownloadError;
use crate::scheduler::AttemptError;

/// Default number of retries after the first attempt.
pub const DEFAULT_DOWNLOAD_RETRIES: u32 = 3;

/// Default fixed delay between a failure and the task re-entering the queue.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Classification of attempt failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Temporary failure that may succeed on retry.
    ///
    /// Examples: stall, connection reset, 5xx, 429.
    Transient,

    /// The server rejected the request itself (403, 404, 410...).
    ///
    /// Retried only when the policy allows it, and always logged apart from
    /// transient failures.
    ClientError,

    /// Failure that won't succeed regardless of retries.
    ///
    /// Examples: invalid URL, local filesystem error.
    Permanent,

    /// The run is being cancelled.
    Cancelled,
}

/// Decision on whether to retry a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-enqueue the task after the specified delay.
    Retry {
        /// How long to wait before the task re-enters the queue.
        delay: Duration,
        /// Retries left after this one is consumed.
        attempts_remaining: u32,
    },

    /// Move the task to `PermanentlyFailed`.
    GiveUp {
        /// Human-readable reason.
        reason: String,
    },
}

/// Fixed-delay retry policy.
///
/// # Default Values
///
/// - `retries`: 3 (so at most 4 attempts per task)
/// - `delay`: 2 seconds
/// - `retry_client_errors`: true
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    retries: u32,
    delay: Duration,
    retry_client_errors: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: DEFAULT_DOWNLOAD_RETRIES,
            delay: DEFAULT_RETRY_DELAY,
            retry_client_errors: true,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with custom settings.
    #[must_use]
    pub fn new(retries: u32, delay: Duration, retry_client_errors: bool) -> Self {
        Self {
            retries,
            delay,
            retry_client_errors,
        }
    }

    /// Retries granted to a freshly submitted task.
    #[must_use]
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Delay before a failed task re-enters the queue.
    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Decides what happens to a task whose attempt just failed.
    ///
    /// `attempts_remaining` is the task's counter before this failure is
    /// charged.
    #[instrument(level = "debug", skip(self), fields(retries = self.retries))]
    pub fn decide(&self, failure_type: FailureType, attempts_remaining: u32) -> RetryDecision {
        match failure_type {
            FailureType::Cancelled => {
                return RetryDecision::GiveUp {
                    reason: "run cancelled".to_string(),
                };
            }
            FailureType::Permanent => {
                return RetryDecision::GiveUp {
                    reason: "permanent failure - retry would not help".to_string(),
                };
            }
            FailureType::ClientError if !self.retry_client_errors => {
                return RetryDecision::GiveUp {
                    reason: "client error and client-error retries are disabled".to_string(),
                };
            }
            FailureType::ClientError | FailureType::Transient => {}
        }

        if attempts_remaining == 0 {
            debug!(retries = self.retries, "retries exhausted");
            return RetryDecision::GiveUp {
                reason: format!("retries ({}) exhausted", self.retries),
            };
        }

        RetryDecision::Retry {
            delay: self.delay,
            attempts_remaining: attempts_remaining - 1,
        }
    }
}

/// Classifies an attempt error for retry decisions.
///
/// # HTTP Status Code Classification
///
/// | Status | Type |
/// |--------|------|
/// | 408, 425, 429 | Transient |
/// | other 4xx | ClientError |
/// | 5xx | Transient |
/// | anything else | Transient |
///
/// # Non-HTTP Errors
///
/// | Error | Type |
/// |-------|------|
/// | Stalled, Transport | Transient |
/// | Io, InvalidUrl | Permanent |
/// | Cancelled | Cancelled |
/// | post-process (file not preserved) | Permanent |
/// | worker panic | Transient |
#[must_use]
pub fn classify_error(error: &AttemptError) -> FailureType {
    match error {
        AttemptError::Download(download) => classify_download_error(download),
        AttemptError::PostProcess(_) => FailureType::Permanent,
        AttemptError::Worker(_) => FailureType::Transient,
    }
}

fn classify_download_error(error: &DownloadError) -> FailureType {
    match error {
        DownloadError::Stalled { .. } | DownloadError::Transport { .. } => FailureType::Transient,
        DownloadError::HttpStatus { status, .. } => classify_http_status(*status),
        DownloadError::Io { .. } | DownloadError::InvalidUrl { .. } => FailureType::Permanent,
        DownloadError::Cancelled { .. } => FailureType::Cancelled,
    }
}

#[allow(clippy::match_same_arms)]
fn classify_http_status(status: u16) -> FailureType {
    match status {
        408 => FailureType::Transient, // Request Timeout
        425 => FailureType::Transient, // Too Early
        429 => FailureType::Transient, // Too Many Requests
        status if (400..500).contains(&status) => FailureType::ClientError,
        status if (500..600).contains(&status) => FailureType::Transient,
        _ => FailureType::Transient,
    }
}

/// Logs a failed attempt at the level its classification deserves.
pub(crate) fn log_failure(
    task_id: &str,
    attempt: u32,
    failure_type: FailureType,
    error: &AttemptError,
) {
    match failure_type {
        FailureType::ClientError => {
            warn!(task_id, attempt, error = %error, "permanent client error");
        }
        FailureType::Cancelled => debug!(task_id, attempt, "attempt cancelled"),
        FailureType::Transient | FailureType::Permanent => {
            warn!(task_id, attempt, error = %error, "attempt failed");
        }
    }
}
