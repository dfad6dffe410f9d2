//! Error types for post-processing.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while annotating or finalizing an artifact.
///
/// Only [`PostProcessError::Finalize`] can fail an attempt, and only when the
/// raw file could not be preserved either. Everything else degrades to a
/// warning on a completed task.
#[derive(Debug, Error)]
pub enum PostProcessError {
    /// The metadata tool executable is not installed.
    #[error("metadata tool '{tool}' not found on PATH")]
    ToolMissing {
        /// Tool name (e.g. `exiftool`).
        tool: &'static str,
    },

    /// The metadata tool ran but did not succeed.
    #[error("metadata tool '{tool}' failed on {path}: {detail}")]
    ToolFailed {
        /// Tool name.
        tool: &'static str,
        /// File the tool was run against.
        path: PathBuf,
        /// Exit status or stderr excerpt.
        detail: String,
    },

    /// Moving the artifact to its final path failed.
    #[error("failed to move {from} to {to}: {source}")]
    Finalize {
        /// Temp file being finalized.
        from: PathBuf,
        /// Intended final path.
        to: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Setting the artifact timestamp failed.
    #[error("failed to set timestamp on {path}: {source}")]
    Timestamp {
        /// Final artifact path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl PostProcessError {
    /// Name of the tool when it is simply absent.
    #[must_use]
    pub fn missing_tool(&self) -> Option<&'static str> {
        match self {
            Self::ToolMissing { tool } => Some(*tool),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_missing_display_names_tool() {
        let error = PostProcessError::ToolMissing { tool: "exiftool" };
        assert!(error.to_string().contains("exiftool"));
        assert_eq!(error.missing_tool(), Some("exiftool"));
    }

    #[test]
    fn test_finalize_display_names_both_paths() {
        let error = PostProcessError::Finalize {
            from: PathBuf::from("/d/.a.part"),
            to: PathBuf::from("/d/a.jpg"),
            source: std::io::Error::other("boom"),
        };
        let msg = error.to_string();
        assert!(msg.contains("/d/.a.part") && msg.contains("/d/a.jpg"));
        assert_eq!(error.missing_tool(), None);
    }
}
