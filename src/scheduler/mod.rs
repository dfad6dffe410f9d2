//! Bounded-concurrency FIFO scheduler with retries and backpressure.
//!
//! The [`Scheduler`] owns every submitted [`Task`] until it reaches a
//! terminal state. All transitions happen inside one critical section (a
//! `std::sync::Mutex` never held across an `.await`), so the pending queue,
//! the active set, and the dedup set always change together.
//!
//! # Overview
//!
//! - [`Scheduler::submit`] admits a task, or skips it (dedup).
//! - A free worker slot takes the oldest pending task. Each attempt runs in
//!   its own Tokio task via the configured [`AttemptRunner`].
//! - [`Scheduler::notify_done`] applies the attempt's outcome. Failed tasks
//!   wait out the retry delay and re-enter the queue at the tail.
//! - After every change a [`QueueState`] snapshot is published and the
//!   [`BackpressureSignal`] is updated with watermark hysteresis.
//!
//! The scheduler never decides that a run is finished; see
//! [`crate::coordinator`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use harvest_core::dedup::DedupFilter;
//! use harvest_core::retry::RetryPolicy;
//! use harvest_core::scheduler::{
//!     AttemptContext, AttemptOutcome, AttemptRunner, NoopObserver, Scheduler, SchedulerLimits,
//! };
//! use harvest_core::Task;
//!
//! struct Instant;
//!
//! #[async_trait]
//! impl AttemptRunner for Instant {
//!     async fn run_attempt(&self, _task: &Task, _ctx: &AttemptContext) -> AttemptOutcome {
//!         AttemptOutcome::Completed { path: "x".into(), bytes: 0, warnings: Vec::new() }
//!     }
//! }
//!
//! # async fn example() -> Result<(), harvest_core::HarvestError> {
//! let scheduler = Scheduler::new(
//!     SchedulerLimits::default(),
//!     RetryPolicy::default(),
//!     DedupFilter::new(),
//!     Arc::new(Instant),
//!     Arc::new(NoopObserver),
//! )?;
//! scheduler.submit(Task::new("https://cdn.example.com/a.jpg", "a"));
//! scheduler.drain().await;
//! # Ok(())
//! # }
//! ```

mod backpressure;
mod runner;
mod state;

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

pub use backpressure::BackpressureSignal;
pub use runner::{
    AttemptError, AttemptOutcome, AttemptRunner, NoopObserver, SkipReason, TaskObserver,
    TerminalOutcome,
};
pub use state::QueueState;

use backpressure::Hysteresis;
use state::SchedulerState;

use crate::dedup::DedupFilter;
use crate::error::HarvestError;
use crate::retry::{FailureType, RetryDecision, RetryPolicy, classify_error, log_failure};
use crate::task::{Task, TaskId, TaskStatus};

/// Minimum allowed concurrency value.
pub const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
pub const MAX_CONCURRENCY: usize = 100;

/// Default concurrency if not specified.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Default load above which discovery pauses.
pub const DEFAULT_HIGH_WATERMARK: usize = 32;

/// Default load below which discovery resumes.
pub const DEFAULT_LOW_WATERMARK: usize = 8;

/// Concurrency and watermark settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerLimits {
    /// Maximum simultaneous attempts.
    pub concurrency_limit: usize,
    /// Load above which discovery must pause.
    pub high_watermark: usize,
    /// Load below which discovery may resume.
    pub low_watermark: usize,
}

impl Default for SchedulerLimits {
    fn default() -> Self {
        Self {
            concurrency_limit: DEFAULT_CONCURRENCY,
            high_watermark: DEFAULT_HIGH_WATERMARK,
            low_watermark: DEFAULT_LOW_WATERMARK,
        }
    }
}

impl SchedulerLimits {
    /// Checks ranges and watermark ordering.
    ///
    /// # Errors
    ///
    /// [`HarvestError::InvalidConcurrency`] for a limit outside 1..=100,
    /// [`HarvestError::InvalidConfig`] unless `1 <= low < high`.
    pub fn validate(&self) -> Result<(), HarvestError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&self.concurrency_limit) {
            return Err(HarvestError::InvalidConcurrency {
                value: self.concurrency_limit,
            });
        }
        if self.low_watermark == 0 {
            return Err(HarvestError::invalid_config(
                "low_watermark",
                self.low_watermark,
                "at least 1",
            ));
        }
        if self.low_watermark >= self.high_watermark {
            return Err(HarvestError::invalid_config(
                "low_watermark",
                self.low_watermark,
                format!("below high_watermark ({})", self.high_watermark),
            ));
        }
        Ok(())
    }
}

/// Handle passed to every attempt.
#[derive(Debug)]
pub struct AttemptContext {
    task_id: TaskId,
    attempt: u32,
    cancel: CancellationToken,
    scheduler: Scheduler,
}

impl AttemptContext {
    /// Token cancelled when the run is cancelled.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// 1-based attempt number.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Records that the transfer finished and post-processing started.
    pub fn enter_finalizing(&self) {
        self.scheduler.mark_finalizing(&self.task_id);
    }
}

/// What [`Scheduler::submit`] did with a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Admitted: dispatched now or queued.
    Queued,
    /// Not admitted.
    Skipped(SkipReason),
    /// The run is cancelled; the task was marked cancelled.
    Rejected,
}

/// The task scheduler. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

struct Shared {
    state: Mutex<SchedulerState>,
    limits: SchedulerLimits,
    policy: RetryPolicy,
    runner: Arc<dyn AttemptRunner>,
    observer: Arc<dyn TaskObserver>,
    backpressure: watch::Sender<bool>,
    queue_state: watch::Sender<QueueState>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

/// Notifications collected under the lock and delivered after it.
enum Notice {
    Terminal(Task, TerminalOutcome),
    Retry(Task, Duration),
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("limits", &self.shared.limits)
            .field("policy", &self.shared.policy)
            .field("queue_state", &*self.shared.queue_state.borrow())
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Creates a scheduler.
    ///
    /// # Errors
    ///
    /// Returns the [`SchedulerLimits::validate`] error for bad limits.
    #[instrument(level = "debug", skip(policy, dedup, runner, observer))]
    pub fn new(
        limits: SchedulerLimits,
        policy: RetryPolicy,
        dedup: DedupFilter,
        runner: Arc<dyn AttemptRunner>,
        observer: Arc<dyn TaskObserver>,
    ) -> Result<Self, HarvestError> {
        limits.validate()?;

        debug!(
            concurrency = limits.concurrency_limit,
            high = limits.high_watermark,
            low = limits.low_watermark,
            retries = policy.retries(),
            known_artifacts = dedup.len(),
            "creating scheduler"
        );

        let hysteresis = Hysteresis::new(limits.high_watermark, limits.low_watermark);
        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SchedulerState::new(dedup, hysteresis)),
                limits,
                policy,
                runner,
                observer,
                backpressure: watch::Sender::new(false),
                queue_state: watch::Sender::new(QueueState::default()),
                cancel: CancellationToken::new(),
                tracker: TaskTracker::new(),
            }),
        })
    }

    /// Returns the configured limits.
    #[must_use]
    pub fn limits(&self) -> SchedulerLimits {
        self.shared.limits
    }

    /// Latest published counters.
    #[must_use]
    pub fn queue_state(&self) -> QueueState {
        *self.shared.queue_state.borrow()
    }

    /// Subscribes to counter snapshots.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<QueueState> {
        self.shared.queue_state.subscribe()
    }

    /// Read side of the backpressure signal.
    #[must_use]
    pub fn backpressure(&self) -> BackpressureSignal {
        BackpressureSignal::new(self.shared.backpressure.subscribe())
    }

    /// Current status of a non-terminal task.
    #[must_use]
    pub fn task_status(&self, id: &TaskId) -> Option<TaskStatus> {
        let state = self.lock();
        state
            .active
            .get(id)
            .or_else(|| state.retry_wait.get(id))
            .or_else(|| state.pending.iter().find(|t| &t.id == id))
            .map(|t| t.status)
    }

    /// True once [`Scheduler::cancel`] has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Completes once the run is cancelled.
    pub async fn cancelled(&self) {
        self.shared.cancel.cancelled().await;
    }

    /// Admits a task: dispatches it if a slot is free, otherwise appends it
    /// to the pending queue.
    ///
    /// Must be called from within a Tokio runtime.
    #[instrument(skip(self, task), fields(task_id = %task.id))]
    pub fn submit(&self, mut task: Task) -> SubmitOutcome {
        let outcome;
        let mut notices = Vec::new();
        {
            let mut state = self.lock();
            if state.cancelled {
                task.status = TaskStatus::PermanentlyFailed;
                state.counts.cancelled_count += 1;
                notices.push(Notice::Terminal(task, TerminalOutcome::Cancelled));
                outcome = SubmitOutcome::Rejected;
            } else if let Some(reason) = state.skip_reason(&task) {
                info!(base_name = %task.destination_base_name, %reason, "skipped");
                task.status = TaskStatus::Skipped;
                state.counts.skipped_count += 1;
                notices.push(Notice::Terminal(task, TerminalOutcome::Skipped { reason }));
                outcome = SubmitOutcome::Skipped(reason);
            } else {
                state.admit(&task);
                task.status = TaskStatus::Pending;
                task.attempts_remaining = self.shared.policy.retries();
                state.pending.push_back(task);
                self.pump(&mut state);
                outcome = SubmitOutcome::Queued;
            }
            self.publish(&mut state);
        }
        self.deliver(notices);
        outcome
    }

    /// Applies the outcome of an attempt.
    ///
    /// Outcomes for ids not currently active (late or duplicate reports)
    /// are ignored.
    #[instrument(skip(self, outcome), fields(task_id = %id))]
    pub fn notify_done(&self, id: &TaskId, outcome: AttemptOutcome) {
        let mut notices = Vec::new();
        let mut discard = None;
        {
            let mut state = self.lock();
            let Some(mut task) = state.active.remove(id) else {
                debug!("ignoring outcome for a task that is not active");
                return;
            };

            match outcome {
                AttemptOutcome::Completed {
                    path,
                    bytes,
                    warnings,
                } => {
                    info!(
                        path = %path.display(),
                        bytes,
                        attempts = task.attempts_made,
                        "completed"
                    );
                    task.status = TaskStatus::Completed;
                    state.counts.completed_count += 1;
                    let final_name = path.file_name().and_then(|n| n.to_str());
                    state.record_completed(&task, final_name);
                    notices.push(Notice::Terminal(
                        task,
                        TerminalOutcome::Completed { path, warnings },
                    ));
                }
                AttemptOutcome::Failed(error) => {
                    task.status = TaskStatus::Failed;
                    let failure_type = classify_error(&error);
                    if state.cancelled || failure_type == FailureType::Cancelled {
                        debug!("attempt ended by cancellation");
                        task.status = TaskStatus::PermanentlyFailed;
                        state.counts.cancelled_count += 1;
                        state.release(&task);
                        discard = Some(task.clone());
                        notices.push(Notice::Terminal(task, TerminalOutcome::Cancelled));
                    } else {
                        log_failure(task.id.as_str(), task.attempts_made, failure_type, &error);
                        match self.shared.policy.decide(failure_type, task.attempts_remaining) {
                            RetryDecision::Retry {
                                delay,
                                attempts_remaining,
                            } => {
                                info!(
                                    attempt = task.attempts_made,
                                    attempts_remaining,
                                    delay_ms = delay.as_millis(),
                                    "retry scheduled"
                                );
                                task.attempts_remaining = attempts_remaining;
                                task.status = TaskStatus::Pending;
                                state.counts.retried_count += 1;
                                state.retry_wait.insert(task.id.clone(), task.clone());
                                self.spawn_requeue(task.id.clone(), delay);
                                notices.push(Notice::Retry(task, delay));
                            }
                            RetryDecision::GiveUp { reason } => {
                                error!(
                                    attempts = task.attempts_made,
                                    error = %error,
                                    %reason,
                                    "permanently failed"
                                );
                                task.status = TaskStatus::PermanentlyFailed;
                                state.counts.error_count += 1;
                                state.release(&task);
                                discard = Some(task.clone());
                                notices.push(Notice::Terminal(
                                    task,
                                    TerminalOutcome::PermanentlyFailed {
                                        error: error.to_string(),
                                    },
                                ));
                            }
                        }
                    }
                }
            }

            self.pump(&mut state);
            self.publish(&mut state);
        }

        if let Some(task) = discard {
            self.shared.runner.discard_partial(&task);
        }
        self.deliver(notices);
    }

    /// Cancels the run.
    ///
    /// In-flight attempts see their cancellation token fire; queued and
    /// retry-waiting tasks end as cancelled immediately; later submissions
    /// are rejected.
    #[instrument(skip(self))]
    pub fn cancel(&self) {
        let mut notices = Vec::new();
        {
            let mut guard = self.lock();
            let state = &mut *guard;
            if state.cancelled {
                return;
            }
            state.cancelled = true;
            self.shared.cancel.cancel();

            let waiting: Vec<Task> = state
                .pending
                .drain(..)
                .chain(state.retry_wait.drain().map(|(_, task)| task))
                .collect();
            warn!(
                queued = waiting.len(),
                active = state.active.len(),
                "run cancelled"
            );
            for mut task in waiting {
                task.status = TaskStatus::PermanentlyFailed;
                state.counts.cancelled_count += 1;
                state.release(&task);
                notices.push(Notice::Terminal(task, TerminalOutcome::Cancelled));
            }
            self.publish(state);
        }
        self.deliver(notices);
    }

    /// Waits until nothing is pending, waiting, or active.
    ///
    /// Returns immediately if that is already the case. More work may be
    /// submitted afterwards.
    pub async fn drain(&self) {
        let mut rx = self.shared.queue_state.subscribe();
        // The sender lives in `self`, so this cannot observe a closed channel.
        let _ = rx.wait_for(QueueState::is_idle).await;
    }

    /// Waits for every spawned worker and retry timer to exit.
    pub async fn wait_workers(&self) {
        self.shared.tracker.close();
        self.shared.tracker.wait().await;
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn mark_finalizing(&self, id: &TaskId) {
        if let Some(task) = self.lock().active.get_mut(id) {
            task.status = TaskStatus::Finalizing;
        }
    }

    /// Dispatches from the head of the queue while slots are free.
    fn pump(&self, state: &mut SchedulerState) {
        while !state.cancelled && state.active.len() < self.shared.limits.concurrency_limit {
            let Some(mut task) = state.pending.pop_front() else {
                break;
            };
            task.status = TaskStatus::Downloading;
            task.attempts_made += 1;
            debug!(task_id = %task.id, attempt = task.attempts_made, "dispatching");
            state.active.insert(task.id.clone(), task.clone());
            self.spawn_attempt(task);
        }
    }

    fn spawn_attempt(&self, task: Task) {
        let ctx = AttemptContext {
            task_id: task.id.clone(),
            attempt: task.attempts_made,
            cancel: self.shared.cancel.child_token(),
            scheduler: self.clone(),
        };
        let scheduler = self.clone();
        self.shared.tracker.spawn(async move {
            let runner = Arc::clone(&scheduler.shared.runner);
            let outcome = AssertUnwindSafe(runner.run_attempt(&task, &ctx))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    AttemptOutcome::Failed(AttemptError::Worker(panic_message(panic.as_ref())))
                });
            scheduler.notify_done(&task.id, outcome);
        });
    }

    fn spawn_requeue(&self, id: TaskId, delay: Duration) {
        let scheduler = self.clone();
        let cancel = self.shared.cancel.clone();
        self.shared.tracker.spawn(async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(delay) => scheduler.requeue(&id),
            }
        });
    }

    /// Moves a retry-waiting task to the tail of the queue.
    fn requeue(&self, id: &TaskId) {
        let mut state = self.lock();
        let Some(task) = state.retry_wait.remove(id) else {
            return;
        };
        debug!(task_id = %id, "re-entering queue");
        state.pending.push_back(task);
        self.pump(&mut state);
        self.publish(&mut state);
    }

    fn publish(&self, state: &mut SchedulerState) {
        let snapshot = state.snapshot();
        if let Some(paused) = state.hysteresis.update(snapshot.load()) {
            if paused {
                info!(
                    load = snapshot.load(),
                    high = self.shared.limits.high_watermark,
                    "backpressure: pausing discovery"
                );
            } else {
                info!(
                    load = snapshot.load(),
                    low = self.shared.limits.low_watermark,
                    "backpressure: resuming discovery"
                );
            }
            self.shared.backpressure.send_replace(paused);
        }
        self.shared.queue_state.send_replace(snapshot);
    }

    fn deliver(&self, notices: Vec<Notice>) {
        for notice in notices {
            match notice {
                Notice::Terminal(task, outcome) => {
                    self.shared.observer.on_terminal(&task, &outcome);
                }
                Notice::Retry(task, delay) => self.shared.observer.on_retry(&task, delay),
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic".to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::download::DownloadError;
    use async_trait::async_trait;

    struct Succeeds;

    #[async_trait]
    impl AttemptRunner for Succeeds {
        async fn run_attempt(&self, task: &Task, _ctx: &AttemptContext) -> AttemptOutcome {
            AttemptOutcome::Completed {
                path: format!("/d/{}.jpg", task.destination_base_name).into(),
                bytes: 1,
                warnings: Vec::new(),
            }
        }
    }

    struct Panics;

    #[async_trait]
    impl AttemptRunner for Panics {
        async fn run_attempt(&self, _task: &Task, _ctx: &AttemptContext) -> AttemptOutcome {
            panic!("boom");
        }
    }

    struct AlwaysNotFound;

    #[async_trait]
    impl AttemptRunner for AlwaysNotFound {
        async fn run_attempt(&self, task: &Task, _ctx: &AttemptContext) -> AttemptOutcome {
            AttemptOutcome::Failed(DownloadError::http_status(&task.source_url, 404).into())
        }
    }

    fn scheduler(runner: Arc<dyn AttemptRunner>, policy: RetryPolicy) -> Scheduler {
        Scheduler::new(
            SchedulerLimits {
                concurrency_limit: 2,
                high_watermark: 4,
                low_watermark: 2,
            },
            policy,
            DedupFilter::new(),
            runner,
            Arc::new(NoopObserver),
        )
        .unwrap()
    }

    #[test]
    fn test_limits_validation() {
        assert!(SchedulerLimits::default().validate().is_ok());
        let zero = SchedulerLimits {
            concurrency_limit: 0,
            ..SchedulerLimits::default()
        };
        assert!(matches!(
            zero.validate(),
            Err(HarvestError::InvalidConcurrency { value: 0 })
        ));
        let inverted = SchedulerLimits {
            high_watermark: 4,
            low_watermark: 4,
            ..SchedulerLimits::default()
        };
        assert!(matches!(
            inverted.validate(),
            Err(HarvestError::InvalidConfig { .. })
        ));
    }

    #[tokio::test]
    async fn test_submit_then_drain_completes() {
        let scheduler = scheduler(Arc::new(Succeeds), RetryPolicy::default());
        assert_eq!(
            scheduler.submit(Task::new("https://x/a", "a")),
            SubmitOutcome::Queued
        );
        scheduler.drain().await;
        let state = scheduler.queue_state();
        assert_eq!(state.completed_count, 1);
        assert!(state.is_idle());
    }

    #[tokio::test]
    async fn test_completed_name_is_skipped_afterwards() {
        let scheduler = scheduler(Arc::new(Succeeds), RetryPolicy::default());
        scheduler.submit(Task::new("https://x/a", "a"));
        scheduler.drain().await;

        let again = scheduler.submit(Task::new("https://mirror/a", "a"));
        assert_eq!(again, SubmitOutcome::Skipped(SkipReason::AlreadyPresent));
        assert_eq!(scheduler.queue_state().skipped_count, 1);
    }

    #[tokio::test]
    async fn test_duplicate_id_is_skipped() {
        let scheduler = scheduler(Arc::new(Succeeds), RetryPolicy::default());
        scheduler.submit(Task::new("https://x/a", "a"));
        let dup = scheduler.submit(Task::new("https://x/a", "other"));
        assert_eq!(dup, SubmitOutcome::Skipped(SkipReason::DuplicateId));
        scheduler.drain().await;
    }

    #[tokio::test]
    async fn test_worker_panic_becomes_failure() {
        let scheduler = scheduler(Arc::new(Panics), RetryPolicy::new(1, Duration::ZERO, true));
        scheduler.submit(Task::new("https://x/a", "a"));
        scheduler.drain().await;
        let state = scheduler.queue_state();
        assert_eq!(state.error_count, 1);
        assert_eq!(state.retried_count, 1);
    }

    #[tokio::test]
    async fn test_client_error_without_retries_fails_once() {
        let scheduler = scheduler(
            Arc::new(AlwaysNotFound),
            RetryPolicy::new(3, Duration::ZERO, false),
        );
        scheduler.submit(Task::new("https://x/a", "a"));
        scheduler.drain().await;
        let state = scheduler.queue_state();
        assert_eq!(state.error_count, 1);
        assert_eq!(state.retried_count, 0);
    }

    #[tokio::test]
    async fn test_late_outcome_is_ignored() {
        let scheduler = scheduler(Arc::new(Succeeds), RetryPolicy::default());
        scheduler.notify_done(
            &TaskId::new("never-submitted"),
            AttemptOutcome::Failed(AttemptError::Worker("late".to_string())),
        );
        assert_eq!(scheduler.queue_state(), QueueState::default());
    }

    #[tokio::test]
    async fn test_submit_after_cancel_is_rejected() {
        let scheduler = scheduler(Arc::new(Succeeds), RetryPolicy::default());
        scheduler.cancel();
        assert_eq!(
            scheduler.submit(Task::new("https://x/a", "a")),
            SubmitOutcome::Rejected
        );
        assert_eq!(scheduler.queue_state().cancelled_count, 1);
    }

    #[test]
    fn test_panic_message_extracts_strings() {
        let boxed: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(boxed.as_ref()), "static");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
    }
}
