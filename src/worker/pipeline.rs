//! Per-task pipeline: download, transform, upload, clean up.

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

use crate::models::task::{result_key, transform_output_name, ImageName, InvalidTaskKey, Task};
use crate::services::scratch::ScratchDir;
use crate::services::storage::{BlobStore, StorageError};
use crate::services::transform::{ImageTransform, TransformError, TransformSet};
use crate::telemetry;

/// Anything the dispatcher can hand a task to.
#[async_trait]
pub trait TaskProcessor: Send + Sync {
    async fn process(&self, task: &Task) -> Result<TaskReport, PipelineError>;
}

/// Outcome of a task that was not aborted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskReport {
    /// Keys of the results uploaded, in transform order.
    pub uploaded: Vec<String>,
    /// Transforms whose result could not be uploaded.
    pub failed_uploads: Vec<String>,
}

/// Downloads one source image, applies every configured transform to it and
/// uploads each result.
///
/// The source and every transform output live in scratch files that are
/// removed before `process` returns, whichever stage failed.
pub struct TaskPipeline {
    storage: Arc<dyn BlobStore>,
    transforms: TransformSet,
    scratch: ScratchDir,
}

impl TaskPipeline {
    pub fn new(storage: Arc<dyn BlobStore>, transforms: TransformSet, scratch: ScratchDir) -> Self {
        Self {
            storage,
            transforms,
            scratch,
        }
    }

    async fn run(&self, task: &Task) -> Result<TaskReport, PipelineError> {
        let name = task.image_name()?;
        let working_name = name.working_name();
        let mut source = self.scratch.acquire(&working_name);

        tracing::debug!(
            key = %task.key,
            path = %source.path().display(),
            "Downloading source image"
        );
        if let Err(e) = self.storage.download(&task.key, source.path()).await {
            tracing::error!(key = %task.key, error = %e, "Failed to download source image");
            return Err(PipelineError::Download {
                key: task.key.clone(),
                source: e,
            });
        }

        let bytes: Arc<[u8]> = tokio::fs::read(source.path())
            .await
            .map_err(PipelineError::Scratch)?
            .into();

        let mut report = TaskReport::default();
        for transform in self.transforms.iter() {
            self.transform_and_upload(task, &name, &working_name, transform, &bytes, &mut report)
                .await?;
        }

        source.release();
        Ok(report)
    }

    async fn transform_and_upload(
        &self,
        task: &Task,
        name: &ImageName,
        working_name: &str,
        transform: &Arc<dyn ImageTransform>,
        source: &Arc<[u8]>,
        report: &mut TaskReport,
    ) -> Result<(), PipelineError> {
        let mut output = self
            .scratch
            .acquire(&transform_output_name(working_name, transform.name()));

        let worker_transform = Arc::clone(transform);
        let input = Arc::clone(source);
        let transformed = tokio::task::spawn_blocking(move || worker_transform.apply(&input))
            .await
            .map_err(|e| TransformError::Aborted(e.to_string()))
            .and_then(|result| result);

        let encoded = match transformed {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::error!(
                    key = %task.key,
                    transform = transform.name(),
                    error = %e,
                    "Transform failed"
                );
                return Err(PipelineError::Transform {
                    key: task.key.clone(),
                    transform: transform.name().to_string(),
                    source: e,
                });
            }
        };

        tokio::fs::write(output.path(), &encoded)
            .await
            .map_err(PipelineError::Scratch)?;

        let destination = result_key(
            transform.destination_folder(),
            &name.base,
            transform.name(),
            Utc::now().timestamp_millis(),
        );

        // Best effort: a failed upload must not stop sibling transforms
        match self.storage.upload(output.path(), &destination).await {
            Ok(()) => {
                tracing::info!(
                    key = %task.key,
                    transform = transform.name(),
                    destination = %destination,
                    "Uploaded transform result"
                );
                report.uploaded.push(destination);
            }
            Err(e) => {
                tracing::error!(
                    key = %task.key,
                    transform = transform.name(),
                    destination = %destination,
                    error = %e,
                    "Failed to upload transform result"
                );
                metrics::counter!(telemetry::UPLOADS_FAILED).increment(1);
                report.failed_uploads.push(transform.name().to_string());
            }
        }

        output.release();
        Ok(())
    }
}

#[async_trait]
impl TaskProcessor for TaskPipeline {
    async fn process(&self, task: &Task) -> Result<TaskReport, PipelineError> {
        self.run(task).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    InvalidKey(#[from] InvalidTaskKey),

    #[error("Failed to download {key}: {source}")]
    Download {
        key: String,
        #[source]
        source: StorageError,
    },

    #[error("Transform {transform} failed for {key}: {source}")]
    Transform {
        key: String,
        transform: String,
        #[source]
        source: TransformError,
    },

    #[error("Scratch file error: {0}")]
    Scratch(#[source] std::io::Error),
}
