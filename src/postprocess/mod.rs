//! Post-processing: metadata embedding and atomic finalize.
//!
//! [`PostProcessor::finalize`] takes a completed temp file and:
//!
//! 1. embeds the task's metadata with an external tool (best effort),
//! 2. renames the temp file to its final path in the same directory,
//! 3. sets the artifact's modification time to the content's creation time.
//!
//! Only a failure to preserve the file at all is an error. Tool problems and
//! timestamp failures come back as warnings on a successful [`Finalized`].

mod error;
mod tool;

use std::collections::HashSet;
use std::ffi::OsString;
use std::fs::{FileTimes, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

pub use error::PostProcessError;
pub use tool::{DEFAULT_TOOL_TIMEOUT, ExifTool, Ffmpeg, MetadataTool, exiftool_args, ffmpeg_args};

use crate::download::DownloadedFile;
use crate::download::filename::{resolve_unique_path_with_suffix_start, split_known_extension};
use crate::task::{Task, TaskKind};

/// Where a finalized artifact ended up, plus any degradations on the way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finalized {
    /// Final artifact path.
    pub path: PathBuf,
    /// Non-fatal problems (tool missing/failed, timestamp not set).
    pub warnings: Vec<String>,
}

/// Finalizes downloaded artifacts.
pub struct PostProcessor {
    embed_metadata: bool,
    image_tool: Arc<dyn MetadataTool>,
    video_tool: Arc<dyn MetadataTool>,
    warned_missing: Mutex<HashSet<&'static str>>,
}

impl std::fmt::Debug for PostProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostProcessor")
            .field("embed_metadata", &self.embed_metadata)
            .field("image_tool", &self.image_tool.name())
            .field("video_tool", &self.video_tool.name())
            .finish_non_exhaustive()
    }
}

impl PostProcessor {
    /// Creates a post-processor using `exiftool` and `ffmpeg` from `PATH`,
    /// each invocation bounded by `tool_timeout`.
    #[must_use]
    pub fn new(embed_metadata: bool, tool_timeout: Duration) -> Self {
        Self::with_tools(
            embed_metadata,
            Arc::new(ExifTool::discover().with_timeout(tool_timeout)),
            Arc::new(Ffmpeg::discover().with_timeout(tool_timeout)),
        )
    }

    /// Creates a post-processor with explicit tools.
    #[must_use]
    pub fn with_tools(
        embed_metadata: bool,
        image_tool: Arc<dyn MetadataTool>,
        video_tool: Arc<dyn MetadataTool>,
    ) -> Self {
        Self {
            embed_metadata,
            image_tool,
            video_tool,
            warned_missing: Mutex::new(HashSet::new()),
        }
    }

    /// Embeds metadata, moves `file` to its final path under `destination`,
    /// and stamps it with the task's creation time.
    ///
    /// # Errors
    ///
    /// Returns [`PostProcessError::Finalize`] only when the file could not
    /// be moved to any final path.
    #[instrument(skip(self, file, task), fields(task_id = %task.id, file_name = %file.file_name))]
    pub async fn finalize(
        &self,
        file: &DownloadedFile,
        task: &Task,
        destination: &Path,
    ) -> Result<Finalized, PostProcessError> {
        let mut warnings = Vec::new();

        if self.embed_metadata
            && !task.metadata.is_empty()
            && let Err(e) = self.embed(file, task).await
        {
            self.note_embed_failure(&e);
            warnings.push(e.to_string());
        }

        let path = move_into_place(&file.temp_path, destination, &file.file_name).await?;

        if let Some(created) = task.metadata.created_at
            && let Err(e) = set_artifact_time(&path, created).await
        {
            warn!(path = %path.display(), error = %e, "post-process degraded: timestamp not set");
            warnings.push(e.to_string());
        }

        info!(path = %path.display(), warnings = warnings.len(), "artifact finalized");
        Ok(Finalized { path, warnings })
    }

    async fn embed(&self, file: &DownloadedFile, task: &Task) -> Result<(), PostProcessError> {
        match task.kind {
            TaskKind::Image => {
                self.image_tool
                    .embed(&file.temp_path, None, &task.metadata)
                    .await
            }
            TaskKind::Video => {
                let secondary = secondary_temp_path(&file.temp_path, &file.file_name);
                let result = self
                    .video_tool
                    .embed(&file.temp_path, Some(&secondary), &task.metadata)
                    .await;
                if let Err(e) = result {
                    discard(&secondary).await;
                    return Err(e);
                }
                if let Err(e) = tokio::fs::rename(&secondary, &file.temp_path).await {
                    // Primary temp is still the raw download.
                    discard(&secondary).await;
                    return Err(PostProcessError::ToolFailed {
                        tool: self.video_tool.name(),
                        path: secondary,
                        detail: format!("could not replace original: {e}"),
                    });
                }
                Ok(())
            }
            TaskKind::Generic => Ok(()),
        }
    }

    fn note_embed_failure(&self, error: &PostProcessError) {
        let Some(tool) = error.missing_tool() else {
            warn!(error = %error, "post-process degraded: metadata not embedded");
            return;
        };
        let first = self
            .warned_missing
            .lock()
            .map(|mut seen| seen.insert(tool))
            .unwrap_or(true);
        if first {
            warn!(tool, "metadata tool missing, embedding skipped");
        } else {
            debug!(tool, "metadata tool missing, embedding skipped");
        }
    }
}

/// Renames `temp` to a free final name, re-resolving once on failure.
async fn move_into_place(
    temp: &Path,
    destination: &Path,
    file_name: &str,
) -> Result<PathBuf, PostProcessError> {
    let target = resolve_unique_path_with_suffix_start(destination, file_name, 2);
    match tokio::fs::rename(temp, &target).await {
        Ok(()) => Ok(target),
        Err(first) => {
            warn!(
                from = %temp.display(),
                to = %target.display(),
                error = %first,
                "rename failed, retrying with a fresh name"
            );
            let retry = resolve_unique_path_with_suffix_start(destination, file_name, 2);
            tokio::fs::rename(temp, &retry)
                .await
                .map(|()| retry.clone())
                .map_err(|source| PostProcessError::Finalize {
                    from: temp.to_path_buf(),
                    to: retry,
                    source,
                })
        }
    }
}

/// Sets mtime and atime of `path` to `created`.
async fn set_artifact_time(path: &Path, created: DateTime<Utc>) -> Result<(), PostProcessError> {
    let time = SystemTime::from(created);
    let owned = path.to_path_buf();
    let result = tokio::task::spawn_blocking(move || {
        let file = OpenOptions::new().write(true).open(&owned)?;
        file.set_times(FileTimes::new().set_modified(time).set_accessed(time))
    })
    .await
    .unwrap_or_else(|join| Err(std::io::Error::other(join.to_string())));

    result.map_err(|source| PostProcessError::Timestamp {
        path: path.to_path_buf(),
        source,
    })
}

/// `<temp>.meta<ext>`, keeping the real extension last so tools can infer
/// the container format.
fn secondary_temp_path(temp: &Path, file_name: &str) -> PathBuf {
    let ext = split_known_extension(file_name).1.unwrap_or(".mp4");
    let mut name: OsString = temp.as_os_str().to_owned();
    name.push(".meta");
    name.push(ext);
    PathBuf::from(name)
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        debug!(path = %path.display(), error = %e, "failed to remove secondary temp");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::task::TaskMetadata;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Appends a marker to the file it is pointed at.
    struct MarkingTool {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MetadataTool for MarkingTool {
        fn name(&self) -> &'static str {
            "marker"
        }

        async fn embed(
            &self,
            input: &Path,
            output: Option<&Path>,
            _metadata: &TaskMetadata,
        ) -> Result<(), PostProcessError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut bytes = std::fs::read(input).unwrap();
            bytes.extend_from_slice(b"+meta");
            std::fs::write(output.unwrap_or(input), bytes).unwrap();
            Ok(())
        }
    }

    fn marking() -> Arc<MarkingTool> {
        Arc::new(MarkingTool {
            calls: AtomicUsize::new(0),
        })
    }

    fn absent() -> Arc<dyn MetadataTool> {
        Arc::new(ExifTool::at(None))
    }

    fn staged(dir: &Path, name: &str, body: &[u8]) -> DownloadedFile {
        let temp_path = dir.join(format!(".{name}.abcd1234.part"));
        std::fs::write(&temp_path, body).unwrap();
        DownloadedFile {
            temp_path,
            file_name: name.to_string(),
            bytes: body.len() as u64,
        }
    }

    fn dated_metadata() -> TaskMetadata {
        TaskMetadata {
            created_at: Some(Utc.with_ymd_and_hms(2020, 1, 2, 3, 4, 5).unwrap()),
            description: Some("caption".to_string()),
            ..TaskMetadata::default()
        }
    }

    #[tokio::test]
    async fn test_finalize_image_embeds_in_place_and_renames() {
        let dir = TempDir::new().unwrap();
        let file = staged(dir.path(), "a.jpg", b"jpeg");
        let tool = marking();
        let processor = PostProcessor::with_tools(true, tool.clone(), absent());
        let task = Task::new("https://x/a.jpg", "a")
            .with_kind(TaskKind::Image)
            .with_metadata(dated_metadata());

        let done = processor.finalize(&file, &task, dir.path()).await.unwrap();

        assert_eq!(done.path, dir.path().join("a.jpg"));
        assert!(done.warnings.is_empty());
        assert_eq!(std::fs::read(&done.path).unwrap(), b"jpeg+meta");
        assert!(!file.temp_path.exists());
        assert_eq!(tool.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_finalize_video_writes_secondary_then_replaces() {
        let dir = TempDir::new().unwrap();
        let file = staged(dir.path(), "v.mp4", b"mp4");
        let processor = PostProcessor::with_tools(true, absent(), marking());
        let task = Task::new("https://x/v.mp4", "v")
            .with_kind(TaskKind::Video)
            .with_metadata(dated_metadata());

        let done = processor.finalize(&file, &task, dir.path()).await.unwrap();

        assert_eq!(std::fs::read(&done.path).unwrap(), b"mp4+meta");
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers.len(), 1, "unexpected files: {leftovers:?}");
    }

    #[tokio::test]
    async fn test_finalize_missing_tool_still_completes_with_warning() {
        let dir = TempDir::new().unwrap();
        let file = staged(dir.path(), "b.png", b"png");
        let processor = PostProcessor::with_tools(true, absent(), absent());
        let task = Task::new("https://x/b.png", "b")
            .with_kind(TaskKind::Image)
            .with_metadata(dated_metadata());

        let done = processor.finalize(&file, &task, dir.path()).await.unwrap();

        assert_eq!(std::fs::read(&done.path).unwrap(), b"png");
        assert_eq!(done.warnings.len(), 1);
        assert!(done.warnings[0].contains("not found"));
    }

    #[tokio::test]
    async fn test_finalize_sets_mtime_from_created_at() {
        let dir = TempDir::new().unwrap();
        let file = staged(dir.path(), "c.bin", b"data");
        let processor = PostProcessor::with_tools(false, absent(), absent());
        let task = Task::new("https://x/c", "c").with_metadata(dated_metadata());

        let done = processor.finalize(&file, &task, dir.path()).await.unwrap();

        let modified = std::fs::metadata(&done.path).unwrap().modified().unwrap();
        let expected = SystemTime::from(Utc.with_ymd_and_hms(2020, 1, 2, 3, 4, 5).unwrap());
        assert_eq!(modified, expected);
    }

    #[tokio::test]
    async fn test_finalize_existing_final_name_gets_suffix() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("d.jpg"), b"old").unwrap();
        let file = staged(dir.path(), "d.jpg", b"new");
        let processor = PostProcessor::with_tools(false, absent(), absent());
        let task = Task::new("https://x/d.jpg", "d");

        let done = processor.finalize(&file, &task, dir.path()).await.unwrap();

        assert_eq!(done.path, dir.path().join("d_2.jpg"));
        assert_eq!(std::fs::read(dir.path().join("d.jpg")).unwrap(), b"old");
    }

    #[tokio::test]
    async fn test_finalize_missing_temp_is_finalize_error() {
        let dir = TempDir::new().unwrap();
        let file = DownloadedFile {
            temp_path: dir.path().join(".gone.part"),
            file_name: "gone.jpg".to_string(),
            bytes: 0,
        };
        let processor = PostProcessor::with_tools(false, absent(), absent());
        let task = Task::new("https://x/gone.jpg", "gone");

        let result = processor.finalize(&file, &task, dir.path()).await;
        assert!(matches!(result, Err(PostProcessError::Finalize { .. })));
    }

    #[test]
    fn test_secondary_temp_keeps_container_extension_last() {
        let secondary = secondary_temp_path(Path::new("/d/.v.abcd.part"), "v.webm");
        assert_eq!(secondary, PathBuf::from("/d/.v.abcd.part.meta.webm"));
    }
}
