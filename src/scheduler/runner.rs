//! Seams between the scheduler and the code that performs attempts.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use super::AttemptContext;
use crate::download::DownloadError;
use crate::postprocess::PostProcessError;
use crate::task::Task;

/// Why an attempt failed.
#[derive(Debug, Error)]
pub enum AttemptError {
    /// The transfer failed.
    #[error(transparent)]
    Download(#[from] DownloadError),

    /// The transfer succeeded but the artifact could not be preserved.
    #[error(transparent)]
    PostProcess(#[from] PostProcessError),

    /// The worker itself failed (e.g. panicked).
    #[error("worker failed: {0}")]
    Worker(String),
}

/// Result of one attempt, reported back to the scheduler.
#[derive(Debug)]
pub enum AttemptOutcome {
    /// The artifact is at its final path.
    Completed {
        /// Final artifact path.
        path: PathBuf,
        /// Bytes transferred.
        bytes: u64,
        /// Non-fatal post-processing problems.
        warnings: Vec<String>,
    },
    /// The attempt failed; the retry policy decides what happens next.
    Failed(AttemptError),
}

/// Performs single attempts on behalf of the scheduler.
///
/// An implementation must not retry internally and must honor
/// [`AttemptContext::cancellation`].
#[async_trait]
pub trait AttemptRunner: Send + Sync + 'static {
    /// Runs one attempt for `task`.
    async fn run_attempt(&self, task: &Task, ctx: &AttemptContext) -> AttemptOutcome;

    /// Removes anything a failed task may have left behind.
    ///
    /// Called once when a task becomes permanently failed or cancelled.
    fn discard_partial(&self, _task: &Task) {}
}

/// Why a submitted task was not queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// An artifact with the same base name is already in the destination.
    AlreadyPresent,
    /// A task with the same id was already submitted this run.
    DuplicateId,
    /// Another unfinished task targets the same base name.
    NameInFlight,
}

impl SkipReason {
    /// Returns the stable string label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AlreadyPresent => "already_present",
            Self::DuplicateId => "duplicate_id",
            Self::NameInFlight => "name_in_flight",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a task left the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalOutcome {
    /// Artifact finalized.
    Completed {
        /// Final artifact path.
        path: PathBuf,
        /// Non-fatal post-processing problems.
        warnings: Vec<String>,
    },
    /// Never queued.
    Skipped {
        /// Why.
        reason: SkipReason,
    },
    /// Retries exhausted or a non-retryable error.
    PermanentlyFailed {
        /// Last error, rendered.
        error: String,
    },
    /// The run was cancelled before the task finished.
    Cancelled,
}

/// Receives task lifecycle notifications.
///
/// Called outside the scheduler's critical section. Implementations must be
/// cheap and must not block.
pub trait TaskObserver: Send + Sync {
    /// A task reached a terminal state.
    fn on_terminal(&self, _task: &Task, _outcome: &TerminalOutcome) {}

    /// A failed task was scheduled to re-enter the queue after `delay`.
    fn on_retry(&self, _task: &Task, _delay: Duration) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl TaskObserver for NoopObserver {}
