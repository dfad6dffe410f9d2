//! Scheduler-owned state and the counters published from it.

use std::collections::{HashMap, HashSet, VecDeque};

use super::SkipReason;
use super::backpressure::Hysteresis;
use crate::dedup::{DedupFilter, normalize};
use crate::task::{Task, TaskId};

/// Snapshot of the scheduler's counters.
///
/// Published after every state change. `pending_count` includes tasks
/// waiting out a retry delay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueState {
    /// Tasks queued or waiting to re-enter the queue.
    pub pending_count: usize,
    /// Tasks held by a worker.
    pub active_count: usize,
    /// Tasks finalized.
    pub completed_count: usize,
    /// Tasks skipped at submission.
    pub skipped_count: usize,
    /// Tasks permanently failed (cancellation excluded).
    pub error_count: usize,
    /// Tasks ended by run cancellation.
    pub cancelled_count: usize,
    /// Retries scheduled so far.
    pub retried_count: usize,
}

impl QueueState {
    /// `pending + active`, the value compared against the watermarks.
    #[must_use]
    pub fn load(&self) -> usize {
        self.pending_count + self.active_count
    }

    /// True when nothing is queued, waiting, or running.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.load() == 0
    }
}

/// Everything mutated inside the scheduler's critical section.
#[derive(Debug)]
pub(crate) struct SchedulerState {
    pub(crate) pending: VecDeque<Task>,
    pub(crate) active: HashMap<TaskId, Task>,
    pub(crate) retry_wait: HashMap<TaskId, Task>,
    seen_ids: HashSet<TaskId>,
    claimed_names: HashSet<String>,
    dedup: DedupFilter,
    pub(crate) counts: QueueState,
    pub(crate) hysteresis: Hysteresis,
    pub(crate) cancelled: bool,
}

impl SchedulerState {
    pub(crate) fn new(dedup: DedupFilter, hysteresis: Hysteresis) -> Self {
        Self {
            pending: VecDeque::new(),
            active: HashMap::new(),
            retry_wait: HashMap::new(),
            seen_ids: HashSet::new(),
            claimed_names: HashSet::new(),
            dedup,
            counts: QueueState::default(),
            hysteresis,
            cancelled: false,
        }
    }

    /// Why `task` must not be queued, if it must not.
    pub(crate) fn skip_reason(&self, task: &Task) -> Option<SkipReason> {
        if self.seen_ids.contains(&task.id) {
            return Some(SkipReason::DuplicateId);
        }
        if self.dedup.should_skip(&task.destination_base_name) {
            return Some(SkipReason::AlreadyPresent);
        }
        if self
            .claimed_names
            .contains(&normalize(&task.destination_base_name))
        {
            return Some(SkipReason::NameInFlight);
        }
        None
    }

    /// Marks `task` as admitted: its id is seen and its name is claimed.
    pub(crate) fn admit(&mut self, task: &Task) {
        self.seen_ids.insert(task.id.clone());
        self.claimed_names
            .insert(normalize(&task.destination_base_name));
    }

    /// Releases the name claim of a task that reached a terminal state.
    pub(crate) fn release(&mut self, task: &Task) {
        self.claimed_names
            .remove(&normalize(&task.destination_base_name));
    }

    /// Records a finalized artifact in the dedup set.
    pub(crate) fn record_completed(&mut self, task: &Task, final_name: Option<&str>) {
        self.dedup.record(&task.destination_base_name);
        if let Some(name) = final_name {
            self.dedup.record(name);
        }
        self.release(task);
    }

    /// Counters with the live collection sizes filled in.
    pub(crate) fn snapshot(&self) -> QueueState {
        QueueState {
            pending_count: self.pending.len() + self.retry_wait.len(),
            active_count: self.active.len(),
            ..self.counts
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with(existing: &[&str]) -> SchedulerState {
        let mut dedup = DedupFilter::new();
        for name in existing {
            dedup.record(name);
        }
        SchedulerState::new(dedup, Hysteresis::new(10, 5))
    }

    #[test]
    fn test_skip_reason_prefers_duplicate_id() {
        let mut state = state_with(&["a.jpg"]);
        let task = Task::new("https://x/a", "b");
        state.admit(&task);
        assert_eq!(state.skip_reason(&task), Some(SkipReason::DuplicateId));
    }

    #[test]
    fn test_skip_reason_existing_artifact() {
        let state = state_with(&["a.jpg"]);
        let task = Task::new("https://x/a", "a");
        assert_eq!(state.skip_reason(&task), Some(SkipReason::AlreadyPresent));
    }

    #[test]
    fn test_skip_reason_name_in_flight_until_released() {
        let mut state = state_with(&[]);
        let first = Task::new("https://x/1", "shared");
        let second = Task::new("https://x/2", "shared.jpg");
        state.admit(&first);
        assert_eq!(state.skip_reason(&second), Some(SkipReason::NameInFlight));

        state.release(&first);
        assert_eq!(state.skip_reason(&second), None);
    }

    #[test]
    fn test_snapshot_counts_retry_wait_as_pending() {
        let mut state = state_with(&[]);
        let task = Task::new("https://x/1", "one");
        state.retry_wait.insert(task.id.clone(), task);
        let snapshot = state.snapshot();
        assert_eq!(snapshot.pending_count, 1);
        assert_eq!(snapshot.load(), 1);
        assert!(!snapshot.is_idle());
    }
}
