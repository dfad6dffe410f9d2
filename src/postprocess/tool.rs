//! External metadata tools (`exiftool`, `ffmpeg`).
//!
//! Each tool is discovered on `PATH` with the `which` crate. A tool that is
//! not installed reports [`PostProcessError::ToolMissing`], which callers
//! treat as "skip embedding", never as a task failure.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use chrono::SecondsFormat;
use tokio::process::Command;
use tracing::{debug, instrument};

use super::error::PostProcessError;
use crate::task::TaskMetadata;

/// Default upper bound on a single tool invocation.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(120);

/// Bytes of stderr kept in [`PostProcessError::ToolFailed`].
const STDERR_EXCERPT_CHARS: usize = 400;

/// An executable that writes descriptive metadata into a media file.
#[async_trait]
pub trait MetadataTool: Send + Sync {
    /// Short tool name for logs.
    fn name(&self) -> &'static str;

    /// Embeds `metadata` into the file at `input`.
    ///
    /// With `output == None` the file is edited in place; otherwise an
    /// annotated copy is written to `output` and `input` is left untouched.
    ///
    /// # Errors
    ///
    /// [`PostProcessError::ToolMissing`] when the executable is absent,
    /// [`PostProcessError::ToolFailed`] on a non-zero exit or timeout.
    async fn embed(
        &self,
        input: &Path,
        output: Option<&Path>,
        metadata: &TaskMetadata,
    ) -> Result<(), PostProcessError>;
}

/// `exiftool`, used for images. Operates in place.
#[derive(Debug, Clone)]
pub struct ExifTool {
    binary: Option<PathBuf>,
    timeout: Duration,
}

impl ExifTool {
    /// Looks up `exiftool` on `PATH`.
    #[must_use]
    pub fn discover() -> Self {
        Self {
            binary: which::which("exiftool").ok(),
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    /// Uses an explicit binary path (or none, to model absence).
    #[must_use]
    pub fn at(binary: Option<PathBuf>) -> Self {
        Self {
            binary,
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    /// Overrides the invocation timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl MetadataTool for ExifTool {
    fn name(&self) -> &'static str {
        "exiftool"
    }

    #[instrument(level = "debug", skip(self, metadata), fields(input = %input.display()))]
    async fn embed(
        &self,
        input: &Path,
        output: Option<&Path>,
        metadata: &TaskMetadata,
    ) -> Result<(), PostProcessError> {
        let binary = self
            .binary
            .as_deref()
            .ok_or(PostProcessError::ToolMissing { tool: self.name() })?;

        let mut args = exiftool_args(metadata);
        match output {
            Some(out) => {
                args.push("-o".to_string());
                args.push(out.display().to_string());
            }
            None => args.push("-overwrite_original".to_string()),
        }
        args.push(input.display().to_string());

        run_tool(self.name(), binary, &args, input, self.timeout).await
    }
}

/// `ffmpeg`, used for videos. Container rewrites need a separate output.
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    binary: Option<PathBuf>,
    timeout: Duration,
}

impl Ffmpeg {
    /// Looks up `ffmpeg` on `PATH`.
    #[must_use]
    pub fn discover() -> Self {
        Self {
            binary: which::which("ffmpeg").ok(),
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    /// Uses an explicit binary path (or none, to model absence).
    #[must_use]
    pub fn at(binary: Option<PathBuf>) -> Self {
        Self {
            binary,
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    /// Overrides the invocation timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl MetadataTool for Ffmpeg {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    #[instrument(level = "debug", skip(self, metadata), fields(input = %input.display()))]
    async fn embed(
        &self,
        input: &Path,
        output: Option<&Path>,
        metadata: &TaskMetadata,
    ) -> Result<(), PostProcessError> {
        let binary = self
            .binary
            .as_deref()
            .ok_or(PostProcessError::ToolMissing { tool: self.name() })?;
        let Some(output) = output else {
            return Err(PostProcessError::ToolFailed {
                tool: self.name(),
                path: input.to_path_buf(),
                detail: "in-place container rewrite is not supported".to_string(),
            });
        };

        let args = ffmpeg_args(input, output, metadata);
        run_tool(self.name(), binary, &args, input, self.timeout).await
    }
}

/// Arguments for exiftool, without the target path and write mode.
#[must_use]
pub fn exiftool_args(metadata: &TaskMetadata) -> Vec<String> {
    let mut args = vec!["-q".to_string(), "-m".to_string()];
    if let Some(created) = metadata.created_at {
        let stamp = created.format("%Y:%m:%d %H:%M:%S").to_string();
        args.push(format!("-DateTimeOriginal={stamp}"));
        args.push(format!("-CreateDate={stamp}"));
    }
    if let Some(description) = metadata.description.as_deref() {
        args.push(format!("-ImageDescription={description}"));
        args.push(format!("-UserComment={description}"));
    }
    if let Some(origin) = metadata.origin_url.as_deref() {
        args.push(format!("-XMP-dc:Source={origin}"));
    }
    args
}

/// Arguments for an ffmpeg stream-copy with metadata.
#[must_use]
pub fn ffmpeg_args(input: &Path, output: &Path, metadata: &TaskMetadata) -> Vec<String> {
    let mut args = vec![
        "-y".to_string(),
        "-v".to_string(),
        "error".to_string(),
        "-i".to_string(),
        input.display().to_string(),
        "-map".to_string(),
        "0".to_string(),
        "-c".to_string(),
        "copy".to_string(),
    ];
    if let Some(created) = metadata.created_at {
        args.push("-metadata".to_string());
        args.push(format!(
            "creation_time={}",
            created.to_rfc3339_opts(SecondsFormat::Secs, true)
        ));
    }
    if let Some(description) = metadata.description.as_deref() {
        args.push("-metadata".to_string());
        args.push(format!("description={description}"));
    }
    if let Some(origin) = metadata.origin_url.as_deref() {
        args.push("-metadata".to_string());
        args.push(format!("comment={origin}"));
    }
    args.push(output.display().to_string());
    args
}

async fn run_tool(
    tool: &'static str,
    binary: &Path,
    args: &[String],
    target: &Path,
    timeout: Duration,
) -> Result<(), PostProcessError> {
    debug!(tool, args = args.len(), "running metadata tool");

    let child = Command::new(binary)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(timeout, child).await {
        Err(_elapsed) => {
            return Err(PostProcessError::ToolFailed {
                tool,
                path: target.to_path_buf(),
                detail: format!("timed out after {timeout:?}"),
            });
        }
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(PostProcessError::ToolMissing { tool });
        }
        Ok(Err(e)) => {
            return Err(PostProcessError::ToolFailed {
                tool,
                path: target.to_path_buf(),
                detail: format!("failed to spawn: {e}"),
            });
        }
        Ok(Ok(output)) => output,
    };

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let excerpt: String = stderr.trim().chars().take(STDERR_EXCERPT_CHARS).collect();
    Err(PostProcessError::ToolFailed {
        tool,
        path: target.to_path_buf(),
        detail: format!("{}: {excerpt}", output.status),
    })
}
