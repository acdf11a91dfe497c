use std::sync::Arc;

use crate::config::{AppConfig, ConfigError};
use crate::services::{
    queue::{QueueError, RedisTaskQueue, TaskQueue},
    scratch::ScratchDir,
    storage::{BlobStore, S3BlobStore, StorageError},
    transform::{transforms_from_config, TransformError, TransformSet},
};

/// Clients and resources built once per process and shared by every invocation.
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn BlobStore>,
    pub queue: Arc<dyn TaskQueue>,
    pub transforms: TransformSet,
    pub scratch: ScratchDir,
}

impl AppState {
    pub fn new(
        storage: Arc<dyn BlobStore>,
        queue: Arc<dyn TaskQueue>,
        transforms: TransformSet,
        scratch: ScratchDir,
    ) -> Self {
        Self {
            storage,
            queue,
            transforms,
            scratch,
        }
    }

    /// Connect the S3 and Redis clients described by `config`.
    pub fn from_config(config: &AppConfig) -> Result<Self, StartupError> {
        tracing::info!(bucket = %config.bucket_name, "Initializing object storage client");
        let storage = S3BlobStore::from_config(config)?;

        tracing::info!(queue = %config.queue_key, "Initializing Redis task queue");
        let queue = RedisTaskQueue::new(&config.redis_url, &config.queue_key)?;

        let transforms = transforms_from_config(config)?;

        let scratch = ScratchDir::new(&config.scratch_dir);
        scratch.ensure().map_err(StartupError::Scratch)?;

        Ok(Self::new(
            Arc::new(storage),
            Arc::new(queue),
            transforms,
            scratch,
        ))
    }
}

/// Anything that prevents the worker from starting. Always fatal.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error("Failed to prepare scratch directory: {0}")]
    Scratch(#[source] std::io::Error),
}
