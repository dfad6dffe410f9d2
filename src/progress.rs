//! Progress UI for harvest runs: a spinner on a terminal, log lines otherwise.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use harvest_core::HarvestCoordinator;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

const SPINNER_REFRESH: Duration = Duration::from_millis(120);
const LOG_INTERVAL: Duration = Duration::from_secs(10);

/// Spawns the progress reporter.
/// Returns (handle, stop) so the caller can signal stop and await the handle.
/// When `enabled` is false, returns (None, stop) with stop already true.
pub(crate) fn spawn_progress_ui(
    enabled: bool,
    use_spinner: bool,
    coordinator: HarvestCoordinator,
) -> (Option<tokio::task::JoinHandle<()>>, Arc<AtomicBool>) {
    if !enabled {
        return (None, Arc::new(AtomicBool::new(true)));
    }
    let stop = Arc::new(AtomicBool::new(false));
    let handle = if use_spinner {
        spawn_spinner(coordinator, Arc::clone(&stop))
    } else {
        spawn_log_lines(coordinator, Arc::clone(&stop))
    };
    (Some(handle), stop)
}

fn spawn_spinner(
    coordinator: HarvestCoordinator,
    stop: Arc<AtomicBool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.enable_steady_tick(Duration::from_millis(100));

        while !stop.load(Ordering::SeqCst) {
            let summary = coordinator.stats();
            let state = coordinator.queue_state();
            let paused = if coordinator.backpressure().is_paused() {
                " (discovery paused)"
            } else {
                ""
            };
            spinner.set_message(format!(
                "[{summary}] active {} pending {}{paused}",
                state.active_count, state.pending_count
            ));
            tokio::time::sleep(SPINNER_REFRESH).await;
        }

        spinner.finish_and_clear();
    })
}

fn spawn_log_lines(
    coordinator: HarvestCoordinator,
    stop: Arc<AtomicBool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut since_last = Duration::ZERO;
        while !stop.load(Ordering::SeqCst) {
            tokio::time::sleep(SPINNER_REFRESH).await;
            since_last += SPINNER_REFRESH;
            if since_last >= LOG_INTERVAL {
                since_last = Duration::ZERO;
                let summary = coordinator.stats();
                let state = coordinator.queue_state();
                info!(
                    found = summary.found,
                    downloaded = summary.downloaded,
                    skipped = summary.skipped,
                    errors = summary.errors,
                    active = state.active_count,
                    pending = state.pending_count,
                    "progress"
                );
            }
        }
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::spawn_progress_ui;
    use harvest_core::{HarvestConfig, HarvestCoordinator};
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    fn coordinator(dir: &TempDir) -> HarvestCoordinator {
        let config = HarvestConfig {
            destination_dir: dir.path().to_path_buf(),
            embed_metadata: false,
            ..HarvestConfig::default()
        };
        HarvestCoordinator::start(&config).unwrap()
    }

    #[tokio::test]
    async fn test_progress_ui_disabled_returns_none_handle_and_stop_already_true() {
        let dir = TempDir::new().unwrap();
        let (handle, stop) = spawn_progress_ui(false, true, coordinator(&dir));

        assert!(handle.is_none());
        assert!(stop.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_progress_ui_spinner_stops_on_signal() {
        let dir = TempDir::new().unwrap();
        let (handle, stop) = spawn_progress_ui(true, true, coordinator(&dir));
        assert!(!stop.load(Ordering::SeqCst));

        stop.store(true, Ordering::SeqCst);
        handle.unwrap().await.unwrap();
    }

    #[tokio::test]
    async fn test_progress_ui_log_lines_stop_on_signal() {
        let dir = TempDir::new().unwrap();
        let (handle, stop) = spawn_progress_ui(true, false, coordinator(&dir));

        stop.store(true, Ordering::SeqCst);
        handle.unwrap().await.unwrap();
    }
}
