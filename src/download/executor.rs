//! Single-transfer download executor with a stall timer.
//!
//! [`DownloadExecutor::execute`] performs exactly one attempt for a task: it
//! requests the resource and streams the body into a temp file in the
//! destination directory. It never retries; the scheduler decides that.
//!
//! # Liveness
//!
//! A stall timer is armed when the request is sent and re-armed every time a
//! non-empty chunk arrives. If it expires the transfer is dropped and the
//! attempt fails with [`DownloadError::Stalled`]. There is no total-time
//! limit.
//!
//! # Temp files
//!
//! The body is written to `.<stem>.<hash>.part` next to the final artifact,
//! where `<hash>` is derived from the task id. Concurrent workers therefore
//! never collide, and a crash never leaves a partial file at a final name.
//! On any failure the temp file is removed before returning.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::client::{HttpClient, describe_reqwest_error};
use super::constants::{DEFAULT_STALL_TIMEOUT, WRITE_BUFFER_BYTES};
use super::error::DownloadError;
use super::filename::{TEMP_MARKER, dedup_key, resolve_file_name, sanitize_filename};
use crate::task::{Task, TaskId};

/// A completed transfer sitting in its temp file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedFile {
    /// Temp file holding the complete body.
    pub temp_path: PathBuf,
    /// Final file name (base name plus resolved extension).
    pub file_name: String,
    /// Bytes written to the temp file.
    pub bytes: u64,
}

/// Outcome of one [`DownloadExecutor::execute`] call.
#[derive(Debug)]
pub enum DownloadResult {
    /// The whole body is on disk in a temp file.
    Success(DownloadedFile),
    /// The attempt failed; no temp file remains.
    Failure {
        /// Why the attempt failed.
        error: DownloadError,
        /// Whether any bytes had been written before the failure.
        partial_written: bool,
    },
}

impl DownloadResult {
    fn failure(error: DownloadError, partial_written: bool) -> Self {
        Self::Failure {
            error,
            partial_written,
        }
    }
}

/// Executes single transfers into a destination directory.
#[derive(Debug, Clone)]
pub struct DownloadExecutor {
    client: HttpClient,
    destination: PathBuf,
    stall_timeout: Duration,
}

impl DownloadExecutor {
    /// Creates an executor writing temp files into `destination`.
    #[must_use]
    pub fn new(client: HttpClient, destination: impl Into<PathBuf>) -> Self {
        Self {
            client,
            destination: destination.into(),
            stall_timeout: DEFAULT_STALL_TIMEOUT,
        }
    }

    /// Overrides the stall timeout.
    #[must_use]
    pub fn with_stall_timeout(mut self, stall_timeout: Duration) -> Self {
        self.stall_timeout = stall_timeout;
        self
    }

    /// Returns the configured stall timeout.
    #[must_use]
    pub fn stall_timeout(&self) -> Duration {
        self.stall_timeout
    }

    /// Returns the destination directory.
    #[must_use]
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Temp file path used for `task`.
    #[must_use]
    pub fn temp_path_for(&self, task: &Task) -> PathBuf {
        temp_path_in(&self.destination, &task.id, &task.destination_base_name)
    }

    /// Performs one transfer for `task`.
    ///
    /// Cancelling `cancel` aborts the in-flight request and yields
    /// [`DownloadError::Cancelled`].
    #[instrument(skip(self, task, cancel), fields(task_id = %task.id, url = %task.source_url))]
    pub async fn execute(&self, task: &Task, cancel: &CancellationToken) -> DownloadResult {
        let url = task.source_url.as_str();
        if Url::parse(url).is_err() {
            return DownloadResult::failure(DownloadError::invalid_url(url), false);
        }

        debug!(stall_timeout_ms = self.stall_timeout.as_millis(), "starting transfer");

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return DownloadResult::failure(DownloadError::cancelled(url), false);
            }
            sent = tokio::time::timeout(self.stall_timeout, self.client.get(url)) => match sent {
                Err(_elapsed) => {
                    warn!(
                        stall_timeout_ms = self.stall_timeout.as_millis(),
                        "no response headers before stall timeout"
                    );
                    return DownloadResult::failure(
                        DownloadError::stalled(url, self.stall_timeout),
                        false,
                    );
                }
                Ok(Err(error)) => return DownloadResult::failure(error, false),
                Ok(Ok(response)) => response,
            },
        };

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let expected_len = response.content_length();
        let file_name = resolve_file_name(
            &task.destination_base_name,
            content_type.as_deref(),
            url,
            task.kind,
        );

        let temp_path = self.temp_path_for(task);
        let file = match File::create(&temp_path).await {
            Ok(file) => file,
            Err(e) => return DownloadResult::failure(DownloadError::io(&temp_path, e), false),
        };

        match self
            .stream_to_file(file, response, url, &temp_path, cancel)
            .await
        {
            Ok(bytes) => {
                if let Some(expected) = expected_len
                    && expected != bytes
                {
                    remove_temp(&temp_path).await;
                    return DownloadResult::failure(
                        DownloadError::transport(
                            url,
                            format!("body ended after {bytes} of {expected} bytes"),
                        ),
                        bytes > 0,
                    );
                }

                info!(
                    temp = %temp_path.display(),
                    file_name = %file_name,
                    bytes,
                    "transfer complete"
                );
                DownloadResult::Success(DownloadedFile {
                    temp_path,
                    file_name,
                    bytes,
                })
            }
            Err((error, written)) => {
                debug!(
                    path = %temp_path.display(),
                    written,
                    error = %error,
                    "removing partial temp file"
                );
                remove_temp(&temp_path).await;
                DownloadResult::failure(error, written > 0)
            }
        }
    }

    /// Streams the body, re-arming the stall timer on every non-empty chunk.
    ///
    /// Returns bytes written, or the error plus bytes written so far.
    async fn stream_to_file(
        &self,
        file: File,
        response: reqwest::Response,
        url: &str,
        temp_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64, (DownloadError, u64)> {
        let mut writer = BufWriter::with_capacity(WRITE_BUFFER_BYTES, file);
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;
        let mut deadline = Instant::now() + self.stall_timeout;

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return Err((DownloadError::cancelled(url), written));
                }
                next = tokio::time::timeout_at(deadline, stream.next()) => next,
            };

            let chunk = match next {
                Err(_elapsed) => {
                    warn!(
                        written,
                        stall_timeout_ms = self.stall_timeout.as_millis(),
                        "transfer stalled"
                    );
                    return Err((DownloadError::stalled(url, self.stall_timeout), written));
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    return Err((
                        DownloadError::transport(url, describe_reqwest_error(&e)),
                        written,
                    ));
                }
                Ok(Some(Ok(chunk))) => chunk,
            };

            if chunk.is_empty() {
                continue;
            }
            deadline = Instant::now() + self.stall_timeout;

            writer
                .write_all(&chunk)
                .await
                .map_err(|e| (DownloadError::io(temp_path, e), written))?;
            written += chunk.len() as u64;
        }

        writer
            .flush()
            .await
            .map_err(|e| (DownloadError::io(temp_path, e), written))?;
        writer
            .into_inner()
            .sync_all()
            .await
            .map_err(|e| (DownloadError::io(temp_path, e), written))?;

        Ok(written)
    }
}

/// Temp path for a task: `.<stem>.<8 hex of sha256(id)>.part`.
#[must_use]
pub fn temp_path_in(destination: &Path, id: &TaskId, base_name: &str) -> PathBuf {
    let digest = Sha256::digest(id.as_str().as_bytes());
    let short: String = digest.iter().take(4).map(|b| format!("{b:02x}")).collect();
    let stem = sanitize_filename(&dedup_key(base_name));
    destination.join(format!(".{stem}.{short}{TEMP_MARKER}"))
}

async fn remove_temp(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "failed to remove temp file");
    }
}
