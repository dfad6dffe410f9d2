//! The attempt runner used for real runs: download, then finalize.

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use crate::download::{DownloadError, DownloadExecutor, DownloadResult};
use crate::postprocess::PostProcessor;
use crate::scheduler::{AttemptContext, AttemptOutcome, AttemptRunner};
use crate::task::Task;

/// Runs one attempt as a download followed by post-processing.
#[derive(Debug)]
pub struct HarvestWorker {
    executor: DownloadExecutor,
    postprocessor: PostProcessor,
}

impl HarvestWorker {
    /// Creates a worker writing into the executor's destination.
    #[must_use]
    pub fn new(executor: DownloadExecutor, postprocessor: PostProcessor) -> Self {
        Self {
            executor,
            postprocessor,
        }
    }

    /// Returns the download executor.
    #[must_use]
    pub fn executor(&self) -> &DownloadExecutor {
        &self.executor
    }
}

#[async_trait]
impl AttemptRunner for HarvestWorker {
    #[instrument(skip(self, task, ctx), fields(task_id = %task.id, attempt = ctx.attempt()))]
    async fn run_attempt(&self, task: &Task, ctx: &AttemptContext) -> AttemptOutcome {
        let file = match self.executor.execute(task, ctx.cancellation()).await {
            DownloadResult::Success(file) => file,
            DownloadResult::Failure {
                error,
                partial_written,
            } => {
                debug!(kind = error.kind_label(), partial_written, "transfer failed");
                return AttemptOutcome::Failed(error.into());
            }
        };

        if ctx.cancellation().is_cancelled() {
            remove_quietly(&file.temp_path);
            return AttemptOutcome::Failed(DownloadError::cancelled(&task.source_url).into());
        }

        ctx.enter_finalizing();
        match self
            .postprocessor
            .finalize(&file, task, self.executor.destination())
            .await
        {
            Ok(done) => AttemptOutcome::Completed {
                path: done.path,
                bytes: file.bytes,
                warnings: done.warnings,
            },
            Err(e) => AttemptOutcome::Failed(e.into()),
        }
    }

    fn discard_partial(&self, task: &Task) {
        remove_quietly(&self.executor.temp_path_for(task));
    }
}

fn remove_quietly(path: &std::path::Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed orphaned temp file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove temp file"),
    }
}
