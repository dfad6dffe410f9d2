//! Built-in producer that turns manifest text into tasks.
//!
//! A manifest is line-oriented. Each line is one of:
//!
//! - blank, or a `#` comment: ignored
//! - a JSON object `{"url": ..., "name": ..., "id": ..., "kind": ..., "metadata": {...}}`
//!   as written by an API-pagination dump
//! - free text containing one or more `http(s)://` URLs, one task per URL
//!
//! The producer waits on the backpressure signal before every submission and
//! declares discovery complete when its input is exhausted.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::coordinator::HarvestCoordinator;
use crate::download::filename::{base_name_from_url, kind_from_url};
use crate::task::{Task, TaskId, TaskKind, TaskMetadata};

/// Finds http(s) URLs in free text.
#[allow(clippy::expect_used)]
static URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"https?://[^\s<>"'\]]+"#).expect("URL regex is valid") // Static pattern, safe to panic
});

/// One JSON manifest record.
#[derive(Debug, Deserialize)]
struct ManifestRecord {
    url: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    kind: Option<TaskKind>,
    #[serde(default)]
    metadata: TaskMetadata,
}

/// What a single manifest line turned into.
#[derive(Debug)]
pub enum ManifestLine {
    /// Zero or more tasks (a text line may hold several URLs).
    Tasks(Vec<Task>),
    /// Blank line or comment.
    Ignored,
    /// Could not be understood.
    Invalid(String),
}

/// Parses one manifest line.
#[must_use]
pub fn parse_line(line: &str) -> ManifestLine {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return ManifestLine::Ignored;
    }

    if line.starts_with('{') {
        return match serde_json::from_str::<ManifestRecord>(line) {
            Ok(record) => match task_from_record(record) {
                Ok(task) => ManifestLine::Tasks(vec![task]),
                Err(reason) => ManifestLine::Invalid(reason),
            },
            Err(e) => ManifestLine::Invalid(format!("malformed JSON record: {e}")),
        };
    }

    let tasks: Vec<Task> = URL_PATTERN
        .find_iter(line)
        .filter_map(|m| {
            let raw = m.as_str().trim_end_matches(['.', ',', ';', ')']);
            Url::parse(raw).ok().map(|url| task_from_url(&url, None))
        })
        .collect();

    if tasks.is_empty() {
        ManifestLine::Invalid("no URL found".to_string())
    } else {
        ManifestLine::Tasks(tasks)
    }
}

fn task_from_url(url: &Url, kind: Option<TaskKind>) -> Task {
    let kind = kind.unwrap_or_else(|| kind_from_url(url.as_str()));
    Task::new(url.as_str(), base_name_from_url(url)).with_kind(kind)
}

fn task_from_record(record: ManifestRecord) -> Result<Task, String> {
    let url = Url::parse(record.url.trim())
        .map_err(|e| format!("invalid url '{}': {e}", record.url))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("unsupported scheme '{}'", url.scheme()));
    }

    let mut task = task_from_url(&url, record.kind);
    if let Some(name) = record.name.filter(|n| !n.trim().is_empty()) {
        task.destination_base_name = name;
    }
    if let Some(id) = record.id.filter(|id| !id.trim().is_empty()) {
        task = task.with_id(TaskId::new(id));
    }
    Ok(task.with_metadata(record.metadata))
}

/// Counts of what a producer run did with its input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProducerReport {
    /// Tasks handed to the coordinator.
    pub submitted: usize,
    /// Lines that could not be understood.
    pub invalid: usize,
    /// Blank and comment lines.
    pub ignored: usize,
    /// True if the run was cancelled before the input was exhausted.
    pub interrupted: bool,
}

/// Feeds manifest lines into a coordinator.
#[derive(Debug, Clone)]
pub struct ManifestProducer {
    coordinator: HarvestCoordinator,
}

impl ManifestProducer {
    /// Creates a producer for `coordinator`.
    #[must_use]
    pub fn new(coordinator: HarvestCoordinator) -> Self {
        Self { coordinator }
    }

    /// Submits every task found in `lines`, then declares discovery complete.
    #[instrument(skip(self, lines))]
    pub async fn run<I, S>(&self, lines: I) -> ProducerReport
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut report = ProducerReport::default();
        for (index, line) in lines.into_iter().enumerate() {
            if !self.handle_line(index + 1, line.as_ref(), &mut report).await {
                break;
            }
        }
        self.finish(report)
    }

    /// Like [`ManifestProducer::run`], reading lines from `reader`.
    ///
    /// # Errors
    ///
    /// Returns the IO error if reading fails. Discovery is still declared
    /// complete so the run can finish with what was submitted.
    pub async fn run_reader<R>(&self, reader: R) -> std::io::Result<ProducerReport>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut report = ProducerReport::default();
        let mut lines = reader.lines();
        let mut number = 0;
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    self.finish(report);
                    return Err(e);
                }
            };
            number += 1;
            if !self.handle_line(number, &line, &mut report).await {
                break;
            }
        }
        Ok(self.finish(report))
    }

    /// Like [`ManifestProducer::run`], taking lines from a channel until every
    /// sender is dropped.
    ///
    /// Used for input read on a thread outside the runtime, such as stdin.
    pub async fn run_receiver(&self, mut lines: mpsc::Receiver<String>) -> ProducerReport {
        let mut report = ProducerReport::default();
        let mut number = 0;
        while let Some(line) = lines.recv().await {
            number += 1;
            if !self.handle_line(number, &line, &mut report).await {
                break;
            }
        }
        self.finish(report)
    }

    /// Returns false when the run was cancelled and input should stop.
    async fn handle_line(&self, number: usize, line: &str, report: &mut ProducerReport) -> bool {
        match parse_line(line) {
            ManifestLine::Ignored => report.ignored += 1,
            ManifestLine::Invalid(reason) => {
                warn!(line = number, %reason, "skipping manifest line");
                report.invalid += 1;
            }
            ManifestLine::Tasks(tasks) => {
                for task in tasks {
                    if !self.wait_for_capacity().await {
                        report.interrupted = true;
                        return false;
                    }
                    debug!(line = number, task_id = %task.id, "submitting");
                    self.coordinator.submit(task);
                    report.submitted += 1;
                }
            }
        }
        true
    }

    /// Waits out backpressure. Returns false if the run is cancelled.
    async fn wait_for_capacity(&self) -> bool {
        if self.coordinator.is_cancelled() {
            return false;
        }
        let signal = self.coordinator.backpressure();
        if signal.is_paused() {
            debug!("discovery paused by backpressure");
        }
        tokio::select! {
            biased;
            () = self.coordinator.scheduler().cancelled() => false,
            () = signal.wait_until_resumed() => true,
        }
    }

    fn finish(&self, report: ProducerReport) -> ProducerReport {
        info!(
            submitted = report.submitted,
            invalid = report.invalid,
            ignored = report.ignored,
            interrupted = report.interrupted,
            "manifest consumed"
        );
        self.coordinator.discovery_complete();
        report
    }
}
