//! Task types and status definitions.
//!
//! A [`Task`] is one artifact to be fetched and finalized. It is created by a
//! producer, then owned exclusively by the scheduler until it reaches a
//! terminal [`TaskStatus`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable identity of a task within a run.
///
/// Derived from the source URL unless the producer supplies its own content
/// id. Used for dedup and for matching late-arriving events to in-flight work.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Creates an id from a producer-assigned value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Derives an id from a source URL.
    #[must_use]
    pub fn from_url(url: &str) -> Self {
        Self(url.trim().to_string())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of artifact, selecting post-processing behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Still image; metadata is embedded in place.
    Image,
    /// Video container; metadata is embedded into a rewritten copy.
    Video,
    /// Anything else; no metadata embedding.
    #[default]
    Generic,
}

impl TaskKind {
    /// Returns the stable string label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Generic => "generic",
        }
    }

    /// Extension used when neither the name, the response nor the URL
    /// tell us one.
    #[must_use]
    pub fn default_extension(self) -> &'static str {
        match self {
            Self::Image => ".jpg",
            Self::Video => ".mp4",
            Self::Generic => ".bin",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "image" => Ok(Self::Image),
            "video" => Ok(Self::Video),
            "generic" => Ok(Self::Generic),
            _ => Err(format!("invalid task kind: {s}")),
        }
    }
}

/// Optional descriptive fields used only by the post-processor.
///
/// None of these are required for a successful download.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskMetadata {
    /// Logical creation time of the content (capture/post time).
    pub created_at: Option<DateTime<Utc>>,
    /// Free-form descriptive text (caption, title).
    pub description: Option<String>,
    /// Link to the page the artifact was discovered on.
    pub origin_url: Option<String>,
}

impl TaskMetadata {
    /// Returns true when there is nothing worth embedding.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.created_at.is_none() && self.description.is_none() && self.origin_url.is_none()
    }
}

/// Lifecycle state of a task.
///
/// ```text
/// Pending -> Downloading -> Finalizing -> Completed
///                \-> Failed -> Pending (retry, tail of queue)
///                          \-> PermanentlyFailed
/// Skipped (dedup, pre-empts Pending)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting in the queue (or waiting out a retry delay).
    Pending,
    /// Claimed by a worker, transfer in flight.
    Downloading,
    /// Transfer succeeded, post-processing in flight.
    Finalizing,
    /// Artifact present at its final path.
    Completed,
    /// Last attempt failed; a retry decision is pending.
    Failed,
    /// Retries exhausted or the run was cancelled.
    PermanentlyFailed,
    /// Artifact already existed; never queued.
    Skipped,
}

impl TaskStatus {
    /// Returns the stable string label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Finalizing => "finalizing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::PermanentlyFailed => "permanently_failed",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single unit of work: one artifact to fetch and finalize.
#[derive(Debug, Clone)]
pub struct Task {
    /// Stable identity, unique within a run.
    pub id: TaskId,
    /// Origin to fetch from.
    pub source_url: String,
    /// Logical artifact name; may or may not carry an extension.
    pub destination_base_name: String,
    /// Selects post-processing behavior.
    pub kind: TaskKind,
    /// Post-processing inputs.
    pub metadata: TaskMetadata,
    /// Remaining retries; decremented on each failure.
    pub attempts_remaining: u32,
    /// Current lifecycle state.
    pub status: TaskStatus,
    /// Number of attempts started so far.
    pub attempts_made: u32,
}

impl Task {
    /// Creates a pending task whose id is derived from its URL.
    #[must_use]
    pub fn new(source_url: impl Into<String>, destination_base_name: impl Into<String>) -> Self {
        let source_url = source_url.into();
        Self {
            id: TaskId::from_url(&source_url),
            source_url,
            destination_base_name: destination_base_name.into(),
            kind: TaskKind::default(),
            metadata: TaskMetadata::default(),
            attempts_remaining: 0,
            status: TaskStatus::Pending,
            attempts_made: 0,
        }
    }

    /// Overrides the derived id with a producer-assigned content id.
    #[must_use]
    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = id;
        self
    }

    /// Sets the artifact kind.
    #[must_use]
    pub fn with_kind(mut self, kind: TaskKind) -> Self {
        self.kind = kind;
        self
    }

    /// Attaches post-processing metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: TaskMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}
