//! Backpressure signal with high/low watermark hysteresis.

use tokio::sync::watch;

/// Tracks the paused flag for a load value.
///
/// Pauses when load rises above `high`, resumes only once it falls below
/// `low`. Anything in between keeps the current state.
#[derive(Debug, Clone)]
pub(crate) struct Hysteresis {
    high: usize,
    low: usize,
    paused: bool,
}

impl Hysteresis {
    pub(crate) fn new(high: usize, low: usize) -> Self {
        Self {
            high,
            low,
            paused: false,
        }
    }

    /// Applies a new load value. Returns the new flag on an edge.
    pub(crate) fn update(&mut self, load: usize) -> Option<bool> {
        if !self.paused && load > self.high {
            self.paused = true;
            return Some(true);
        }
        if self.paused && load < self.low {
            self.paused = false;
            return Some(false);
        }
        None
    }
}

/// Read side of the backpressure signal, handed to producers.
///
/// Cheap to clone. Only the scheduler writes the underlying value.
#[derive(Debug, Clone)]
pub struct BackpressureSignal {
    rx: watch::Receiver<bool>,
}

impl BackpressureSignal {
    pub(crate) fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }

    /// True while discovery should hold off.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        *self.rx.borrow()
    }

    /// Returns immediately if not paused, otherwise waits for the resume
    /// edge.
    ///
    /// Also returns if the scheduler has been dropped.
    pub async fn wait_until_resumed(&self) {
        let mut rx = self.rx.clone();
        // Err means the sender is gone; nothing will ever pause us again.
        let _ = rx.wait_for(|paused| !*paused).await;
    }

    /// Waits for the next pause/resume edge and returns the new value.
    ///
    /// Returns `None` once the scheduler has been dropped.
    pub async fn changed(&mut self) -> Option<bool> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_hysteresis_pauses_above_high_only() {
        let mut h = Hysteresis::new(4, 2);
        assert_eq!(h.update(4), None);
        assert_eq!(h.update(5), Some(true));
        assert_eq!(h.update(6), None);
        assert_eq!(h.update(1), Some(false));
    }

    #[test]
    fn test_hysteresis_holds_between_watermarks() {
        let mut h = Hysteresis::new(4, 2);
        h.update(5);
        assert_eq!(h.update(3), None);
        assert_eq!(h.update(2), None);
        assert_eq!(h.update(5), None);
        assert_eq!(h.update(1), Some(false));
        assert_eq!(h.update(3), None);
        assert_eq!(h.update(5), Some(true));
    }

    #[tokio::test]
    async fn test_wait_until_resumed_returns_on_edge() {
        let (tx, rx) = watch::channel(true);
        let signal = BackpressureSignal::new(rx);
        assert!(signal.is_paused());

        let waiter = tokio::spawn({
            let signal = signal.clone();
            async move { signal.wait_until_resumed().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        tx.send_replace(false);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(!signal.is_paused());
    }

    #[tokio::test]
    async fn test_wait_until_resumed_returns_when_sender_dropped() {
        let (tx, rx) = watch::channel(true);
        let signal = BackpressureSignal::new(rx);
        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), signal.wait_until_resumed())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_changed_reports_edges() {
        let (tx, rx) = watch::channel(false);
        let mut signal = BackpressureSignal::new(rx);
        tx.send_replace(true);
        assert_eq!(signal.changed().await, Some(true));
        drop(tx);
        assert_eq!(signal.changed().await, None);
    }
}
