//! Run lifecycle: setup, submission, completion, and statistics.
//!
//! A [`HarvestCoordinator`] is created once per run. Producers submit tasks
//! through it, observe its [`BackpressureSignal`], and call
//! [`HarvestCoordinator::discovery_complete`] when they run dry. The run is
//! finished only when discovery is complete **and** the scheduler is idle.
//!
//! # Example
//!
//! ```no_run
//! use harvest_core::{HarvestConfig, HarvestCoordinator, Task};
//!
//! # async fn example() -> Result<(), harvest_core::HarvestError> {
//! let config = HarvestConfig { destination_dir: "./media".into(), ..HarvestConfig::default() };
//! let coordinator = HarvestCoordinator::start(&config)?;
//!
//! coordinator.submit(Task::new("https://cdn.example.com/p/1.jpg", "p1"));
//! coordinator.discovery_complete();
//!
//! let summary = coordinator.wait_finished().await;
//! println!("{summary}");
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::config::HarvestConfig;
use crate::dedup::{DedupFilter, sweep_stale_temp_files};
use crate::download::{DownloadExecutor, HttpClient};
use crate::error::HarvestError;
use crate::pipeline::HarvestWorker;
use crate::postprocess::PostProcessor;
use crate::scheduler::{
    AttemptRunner, BackpressureSignal, QueueState, Scheduler, SubmitOutcome, TaskObserver,
    TerminalOutcome,
};
use crate::task::Task;

/// Run-level counters, updated from scheduler notifications.
///
/// Uses atomic counters so workers can report without coordination.
#[derive(Debug, Default)]
pub struct RunStats {
    found: AtomicUsize,
    downloaded: AtomicUsize,
    skipped: AtomicUsize,
    errors: AtomicUsize,
    retried: AtomicUsize,
    cancelled: AtomicUsize,
}

impl RunStats {
    /// Creates a stats tracker with zero counts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of tasks submitted.
    #[must_use]
    pub fn found(&self) -> usize {
        self.found.load(Ordering::SeqCst)
    }

    /// Returns the number of artifacts finalized.
    #[must_use]
    pub fn downloaded(&self) -> usize {
        self.downloaded.load(Ordering::SeqCst)
    }

    /// Returns the number of tasks skipped at submission.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.skipped.load(Ordering::SeqCst)
    }

    /// Returns the number of permanently failed tasks.
    #[must_use]
    pub fn errors(&self) -> usize {
        self.errors.load(Ordering::SeqCst)
    }

    /// Returns the number of retries scheduled.
    #[must_use]
    pub fn retried(&self) -> usize {
        self.retried.load(Ordering::SeqCst)
    }

    /// Returns the number of tasks ended by cancellation.
    #[must_use]
    pub fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn increment_found(&self) {
        self.found.fetch_add(1, Ordering::SeqCst);
    }
}

impl TaskObserver for RunStats {
    fn on_terminal(&self, task: &Task, outcome: &TerminalOutcome) {
        let counter = match outcome {
            TerminalOutcome::Completed { warnings, .. } => {
                if !warnings.is_empty() {
                    debug!(
                        task_id = %task.id,
                        warnings = warnings.len(),
                        "completed with warnings"
                    );
                }
                &self.downloaded
            }
            TerminalOutcome::Skipped { .. } => &self.skipped,
            TerminalOutcome::PermanentlyFailed { .. } => &self.errors,
            TerminalOutcome::Cancelled => &self.cancelled,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    fn on_retry(&self, _task: &Task, _delay: Duration) {
        self.retried.fetch_add(1, Ordering::SeqCst);
    }
}

/// Final (or running) summary of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunSummary {
    /// Tasks submitted by producers.
    pub found: usize,
    /// Artifacts finalized.
    pub downloaded: usize,
    /// Tasks skipped as already present or duplicate.
    pub skipped: usize,
    /// Tasks permanently failed.
    pub errors: usize,
    /// Retries scheduled (never counted as errors).
    pub retried: usize,
    /// Tasks ended by cancellation.
    pub cancelled: usize,
    /// Wall-clock time since the run started.
    pub elapsed: Duration,
}

impl RunSummary {
    /// True when nothing failed and nothing was cancelled.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors == 0 && self.cancelled == 0
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "found {} | downloaded {} | skipped {} | errors {}",
            self.found, self.downloaded, self.skipped, self.errors
        )
    }
}

/// Top-level state machine for one run. Cheap to clone; clones share state.
#[derive(Debug, Clone)]
pub struct HarvestCoordinator {
    scheduler: Scheduler,
    stats: Arc<RunStats>,
    discovery: Arc<watch::Sender<bool>>,
    started: Instant,
}

impl HarvestCoordinator {
    /// Prepares the destination and starts a run with the standard
    /// download + post-process worker.
    ///
    /// # Errors
    ///
    /// [`HarvestError::DestinationUnavailable`] if the destination cannot be
    /// created or listed, or a configuration/client error.
    #[instrument(skip(config), fields(destination = %config.destination_dir.display()))]
    pub fn start(config: &HarvestConfig) -> Result<Self, HarvestError> {
        config.validate()?;
        let client = HttpClient::with_options(&config.client_options())?;
        let executor = DownloadExecutor::new(client, &config.destination_dir)
            .with_stall_timeout(config.stall_timeout());
        let postprocessor = PostProcessor::new(config.embed_metadata, config.tool_timeout());
        let worker = HarvestWorker::new(executor, postprocessor);
        Self::with_runner(config, Arc::new(worker))
    }

    /// Prepares the destination and starts a run with a custom runner.
    ///
    /// # Errors
    ///
    /// Same as [`HarvestCoordinator::start`].
    pub fn with_runner(
        config: &HarvestConfig,
        runner: Arc<dyn AttemptRunner>,
    ) -> Result<Self, HarvestError> {
        let destination = &config.destination_dir;
        std::fs::create_dir_all(destination)
            .map_err(|e| HarvestError::destination(destination, e))?;
        sweep_stale_temp_files(destination)
            .map_err(|e| HarvestError::destination(destination, e))?;
        let dedup = DedupFilter::snapshot(destination)
            .map_err(|e| HarvestError::destination(destination, e))?;

        let stats = Arc::new(RunStats::new());
        let scheduler = Scheduler::new(
            config.scheduler_limits(),
            config.retry_policy(),
            dedup,
            runner,
            Arc::clone(&stats) as Arc<dyn TaskObserver>,
        )?;

        info!(
            concurrency = config.concurrency_limit,
            retries = config.download_retries,
            stall_timeout_secs = config.stall_timeout_secs,
            "run started"
        );

        Ok(Self {
            scheduler,
            stats,
            discovery: Arc::new(watch::Sender::new(false)),
            started: Instant::now(),
        })
    }

    /// Hands a task to the scheduler.
    pub fn submit(&self, task: Task) -> SubmitOutcome {
        if *self.discovery.borrow() {
            warn!(task_id = %task.id, "task submitted after discovery completed");
        }
        self.stats.increment_found();
        self.scheduler.submit(task)
    }

    /// Signal producers must observe before discovering more work.
    #[must_use]
    pub fn backpressure(&self) -> BackpressureSignal {
        self.scheduler.backpressure()
    }

    /// Declares that no more tasks will be submitted. Idempotent.
    pub fn discovery_complete(&self) {
        let changed = self.discovery.send_if_modified(|done| !std::mem::replace(done, true));
        if changed {
            info!(found = self.stats.found(), "discovery complete");
        }
    }

    /// True once [`HarvestCoordinator::discovery_complete`] was called.
    #[must_use]
    pub fn is_discovery_complete(&self) -> bool {
        *self.discovery.borrow()
    }

    /// Cancels the run; unfinished tasks end as cancelled.
    pub fn cancel(&self) {
        self.scheduler.cancel();
    }

    /// True once the run has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.scheduler.is_cancelled()
    }

    /// Latest scheduler counters.
    #[must_use]
    pub fn queue_state(&self) -> QueueState {
        self.scheduler.queue_state()
    }

    /// The underlying scheduler.
    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> RunSummary {
        RunSummary {
            found: self.stats.found(),
            downloaded: self.stats.downloaded(),
            skipped: self.stats.skipped(),
            errors: self.stats.errors(),
            retried: self.stats.retried(),
            cancelled: self.stats.cancelled(),
            elapsed: self.started.elapsed(),
        }
    }

    /// True when discovery is complete and nothing is pending or active.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.is_discovery_complete() && self.scheduler.queue_state().is_idle()
    }

    /// Waits until the run is finished and returns the final summary.
    ///
    /// Finished means discovery is complete (or the run was cancelled) and
    /// the scheduler has no pending or active tasks.
    pub async fn wait_finished(&self) -> RunSummary {
        let mut discovery = self.discovery.subscribe();
        tokio::select! {
            _ = discovery.wait_for(|done| *done) => {}
            () = self.scheduler.cancelled() => {}
        }
        self.scheduler.drain().await;
        self.scheduler.wait_workers().await;

        let summary = self.stats();
        info!(
            found = summary.found,
            downloaded = summary.downloaded,
            skipped = summary.skipped,
            errors = summary.errors,
            retried = summary.retried,
            cancelled = summary.cancelled,
            elapsed_ms = summary.elapsed.as_millis(),
            "run finished"
        );
        summary
    }
}
