//! In-memory doubles for the queue and object store
#![allow(dead_code)]

use async_trait::async_trait;
use image_task_worker::{
    models::task::Task,
    services::{
        queue::{QueueError, TaskQueue},
        scratch::ScratchDir,
        storage::{BlobStore, StorageError},
    },
    worker::pipeline::{PipelineError, TaskProcessor, TaskReport},
};
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Object store backed by a sorted map.
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    failing_uploads: Mutex<Vec<String>>,
    list_fails: AtomicBool,
    pub uploads_attempted: AtomicUsize,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object(self, key: &str, data: &[u8]) -> Self {
        self.put(key, data);
        self
    }

    pub fn put(&self, key: &str, data: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), data.to_vec());
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    /// Uploads whose key contains `pattern` fail.
    pub fn fail_uploads_matching(&self, pattern: &str) {
        self.failing_uploads
            .lock()
            .unwrap()
            .push(pattern.to_string());
    }

    pub fn fail_listing(&self) {
        self.list_fails.store(true, Ordering::SeqCst);
    }

    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.objects
            .lock()
            .unwrap()
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn download(&self, key: &str, local_path: &Path) -> Result<(), StorageError> {
        let data = self
            .get(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        tokio::fs::write(local_path, data).await?;
        Ok(())
    }

    async fn upload(&self, local_path: &Path, key: &str) -> Result<(), StorageError> {
        self.uploads_attempted.fetch_add(1, Ordering::SeqCst);
        let rejected = self
            .failing_uploads
            .lock()
            .unwrap()
            .iter()
            .any(|pattern| key.contains(pattern.as_str()));
        if rejected {
            return Err(StorageError::Status {
                key: key.to_string(),
                status: 503,
            });
        }
        let data = tokio::fs::read(local_path).await?;
        self.put(key, &data);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        if self.list_fails.load(Ordering::SeqCst) {
            return Err(StorageError::Status {
                key: prefix.to_string(),
                status: 403,
            });
        }
        Ok(self.keys_with_prefix(prefix))
    }
}

/// Wraps a `MemoryBlobStore` and records how many scratch files exist each
/// time an upload starts.
pub struct ScratchWatchingStore {
    inner: MemoryBlobStore,
    scratch: ScratchDir,
    pub live_at_upload: Mutex<Vec<usize>>,
}

impl ScratchWatchingStore {
    pub fn new(inner: MemoryBlobStore, scratch: ScratchDir) -> Self {
        Self {
            inner,
            scratch,
            live_at_upload: Mutex::new(Vec::new()),
        }
    }

    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.inner.keys_with_prefix(prefix)
    }
}

#[async_trait]
impl BlobStore for ScratchWatchingStore {
    async fn download(&self, key: &str, local_path: &Path) -> Result<(), StorageError> {
        self.inner.download(key, local_path).await
    }

    async fn upload(&self, local_path: &Path, key: &str) -> Result<(), StorageError> {
        let live = self.scratch.entries()?.len();
        self.live_at_upload.lock().unwrap().push(live);
        self.inner.upload(local_path, key).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.inner.list(prefix).await
    }
}

/// FIFO queue with acknowledge-on-read semantics.
#[derive(Default)]
pub struct MemoryQueue {
    messages: Mutex<VecDeque<String>>,
    failing_receives: AtomicUsize,
    pub receive_calls: AtomicUsize,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_messages<I, S>(messages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let queue = Self::default();
        queue
            .messages
            .lock()
            .unwrap()
            .extend(messages.into_iter().map(Into::into));
        queue
    }

    /// The next `count` receives fail.
    pub fn fail_next_receives(&self, count: usize) {
        self.failing_receives.store(count, Ordering::SeqCst);
    }

    pub fn pending(&self) -> Vec<String> {
        self.messages.lock().unwrap().iter().cloned().collect()
    }
}

#[async_trait]
impl TaskQueue for MemoryQueue {
    async fn receive(&self, max_messages: usize) -> Result<Vec<String>, QueueError> {
        self.receive_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failing_receives
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(QueueError::Unavailable("connection refused".to_string()));
        }

        let mut messages = self.messages.lock().unwrap();
        let take = max_messages.min(messages.len());
        Ok(messages.drain(..take).collect())
    }

    async fn send(&self, body: &str) -> Result<(), QueueError> {
        self.messages.lock().unwrap().push_back(body.to_string());
        Ok(())
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        Ok(self.messages.lock().unwrap().len() as u64)
    }
}

/// Processor that succeeds immediately and remembers what it saw.
#[derive(Default)]
pub struct NoopProcessor {
    pub seen: Mutex<Vec<String>>,
}

#[async_trait]
impl TaskProcessor for NoopProcessor {
    async fn process(&self, task: &Task) -> Result<TaskReport, PipelineError> {
        self.seen.lock().unwrap().push(task.key.clone());
        Ok(TaskReport::default())
    }
}
