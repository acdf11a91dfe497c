//! Fan a batch out over concurrent workers and join on completion.

use futures::FutureExt;
use serde::Serialize;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::task::JoinSet;

use crate::models::task::{Batch, Task};
use crate::telemetry;

use super::pipeline::TaskProcessor;

/// Counts for one dispatched batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchSummary {
    pub succeeded: usize,
    pub failed: usize,
}

impl DispatchSummary {
    fn merge(&mut self, other: DispatchSummary) {
        self.succeeded += other.succeeded;
        self.failed += other.failed;
    }

    fn record(&mut self, ok: bool) {
        if ok {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
    }
}

/// Runs every task of a batch through the processor exactly once.
///
/// Workers pull tasks from a shared queue until it is empty, so coverage does
/// not depend on how the batch size divides by the worker count.
pub struct Dispatcher {
    processor: Arc<dyn TaskProcessor>,
    max_workers: Option<usize>,
}

impl Dispatcher {
    /// `max_workers` of `None` spawns one worker per task.
    pub fn new(processor: Arc<dyn TaskProcessor>, max_workers: Option<usize>) -> Self {
        Self {
            processor,
            max_workers,
        }
    }

    /// Workers spawned for a batch of `batch_len` tasks.
    pub fn worker_count(&self, batch_len: usize) -> usize {
        let upper = batch_len.max(1);
        self.max_workers.unwrap_or(upper).clamp(1, upper)
    }

    /// Process the whole batch and return once every task has been attempted.
    pub async fn dispatch(&self, batch: Batch) -> DispatchSummary {
        match batch.len() {
            0 => DispatchSummary::default(),
            1 => {
                let mut summary = DispatchSummary::default();
                summary.record(process_guarded(self.processor.as_ref(), &batch[0]).await);
                summary
            }
            _ => self.dispatch_concurrent(batch).await,
        }
    }

    async fn dispatch_concurrent(&self, batch: Batch) -> DispatchSummary {
        let batch_len = batch.len();
        let workers = self.worker_count(batch_len);
        let pending = Arc::new(Mutex::new(VecDeque::from(batch)));

        tracing::debug!(tasks = batch_len, workers, "Dispatching batch");

        let mut set = JoinSet::new();
        for worker_id in 0..workers {
            let pending = Arc::clone(&pending);
            let processor = Arc::clone(&self.processor);
            set.spawn(async move { drain(worker_id, &pending, processor.as_ref()).await });
        }

        let mut summary = DispatchSummary::default();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(worker_summary) => summary.merge(worker_summary),
                Err(e) => {
                    // The task the worker held is lost; count it as failed
                    tracing::error!(error = %e, "Dispatcher worker aborted");
                    summary.failed += 1;
                }
            }
        }

        // Tasks left behind when every worker died
        while let Some(task) = next_task(&pending) {
            summary.record(process_guarded(self.processor.as_ref(), &task).await);
        }

        tracing::info!(
            tasks = batch_len,
            workers,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "Batch complete"
        );
        summary
    }
}

fn next_task(pending: &Mutex<VecDeque<Task>>) -> Option<Task> {
    pending
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .pop_front()
}

async fn drain(
    worker_id: usize,
    pending: &Mutex<VecDeque<Task>>,
    processor: &dyn TaskProcessor,
) -> DispatchSummary {
    let mut summary = DispatchSummary::default();
    while let Some(task) = next_task(pending) {
        tracing::trace!(worker_id, key = %task.key, "Worker picked task");
        summary.record(process_guarded(processor, &task).await);
    }
    summary
}

/// Like `process_one`, but a panicking processor counts as a failed task.
async fn process_guarded(processor: &dyn TaskProcessor, task: &Task) -> bool {
    match AssertUnwindSafe(process_one(processor, task)).catch_unwind().await {
        Ok(succeeded) => succeeded,
        Err(_) => {
            tracing::error!(key = %task.key, "Task panicked");
            metrics::counter!(telemetry::TASKS_FAILED).increment(1);
            false
        }
    }
}

/// Run one task, logging its outcome. Returns whether it succeeded.
async fn process_one(processor: &dyn TaskProcessor, task: &Task) -> bool {
    let start = Instant::now();
    let result = processor.process(task).await;
    let elapsed = start.elapsed();
    metrics::histogram!(telemetry::TASK_PROCESSING_SECONDS).record(elapsed.as_secs_f64());

    match result {
        Ok(report) => {
            tracing::info!(
                key = %task.key,
                uploaded = report.uploaded.len(),
                failed_uploads = report.failed_uploads.len(),
                duration_ms = elapsed.as_millis() as u64,
                "Task complete"
            );
            metrics::counter!(telemetry::TASKS_SUCCEEDED).increment(1);
            true
        }
        Err(e) => {
            tracing::error!(key = %task.key, error = %e, "Task failed");
            metrics::counter!(telemetry::TASKS_FAILED).increment(1);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::storage::StorageError;
    use crate::worker::pipeline::{PipelineError, TaskReport};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread::ThreadId;
    use std::time::Duration;

    /// Records every key it sees; fails keys containing "bad".
    #[derive(Default)]
    struct RecordingProcessor {
        seen: Mutex<Vec<String>>,
        threads: Mutex<Vec<ThreadId>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        delay: Option<Duration>,
    }

    impl RecordingProcessor {
        fn with_delay(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Self::default()
            }
        }

        fn counts(&self) -> HashMap<String, usize> {
            let mut counts = HashMap::new();
            for key in self.seen.lock().unwrap().iter() {
                *counts.entry(key.clone()).or_insert(0) += 1;
            }
            counts
        }
    }

    #[async_trait]
    impl TaskProcessor for RecordingProcessor {
        async fn process(&self, task: &Task) -> Result<TaskReport, PipelineError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.threads.lock().unwrap().push(std::thread::current().id());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.seen.lock().unwrap().push(task.key.clone());
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if task.key.contains("bad") {
                return Err(PipelineError::Download {
                    key: task.key.clone(),
                    source: StorageError::NotFound(task.key.clone()),
                });
            }
            Ok(TaskReport::default())
        }
    }

    /// Panics on keys containing "panic", succeeds otherwise.
    #[derive(Default)]
    struct PanickingProcessor {
        completed: AtomicUsize,
    }

    #[async_trait]
    impl TaskProcessor for PanickingProcessor {
        async fn process(&self, task: &Task) -> Result<TaskReport, PipelineError> {
            if task.key.contains("panic") {
                panic!("processor blew up on {}", task.key);
            }
            self.completed.fetch_add(1, Ordering::SeqCst);
            Ok(TaskReport::default())
        }
    }

    fn batch(keys: usize) -> Batch {
        (0..keys)
            .map(|i| Task::new(format!("images/{}.png", i)))
            .collect()
    }

    #[test]
    fn test_worker_count_defaults_to_batch_size() {
        let dispatcher = Dispatcher::new(Arc::new(RecordingProcessor::default()), None);
        assert_eq!(dispatcher.worker_count(7), 7);
        assert_eq!(dispatcher.worker_count(1), 1);
    }

    #[test]
    fn test_worker_count_never_exceeds_batch() {
        let dispatcher = Dispatcher::new(Arc::new(RecordingProcessor::default()), Some(4));
        assert_eq!(dispatcher.worker_count(10), 4);
        assert_eq!(dispatcher.worker_count(3), 3);
    }

    #[tokio::test]
    async fn test_empty_batch_is_noop() {
        let processor = Arc::new(RecordingProcessor::default());
        let dispatcher = Dispatcher::new(processor.clone(), None);
        let summary = dispatcher.dispatch(Vec::new()).await;
        assert_eq!(summary, DispatchSummary::default());
        assert!(processor.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_every_task_processed_exactly_once() {
        // Prime batch sizes against worker counts that do not divide them
        for batch_len in [2usize, 3, 5, 7, 10, 11, 13] {
            for workers in [None, Some(1), Some(2), Some(3), Some(4)] {
                let processor = Arc::new(RecordingProcessor::default());
                let dispatcher = Dispatcher::new(processor.clone(), workers);
                let summary = dispatcher.dispatch(batch(batch_len)).await;

                assert_eq!(summary.succeeded, batch_len, "{} / {:?}", batch_len, workers);
                let counts = processor.counts();
                assert_eq!(counts.len(), batch_len);
                assert!(counts.values().all(|&n| n == 1));
            }
        }
    }

    #[tokio::test]
    async fn test_failing_task_does_not_stop_siblings() {
        let processor = Arc::new(RecordingProcessor::default());
        let dispatcher = Dispatcher::new(processor.clone(), Some(1));
        let tasks = vec![
            Task::new("images/a.png"),
            Task::new("images/bad.png"),
            Task::new("images/c.png"),
        ];

        let summary = dispatcher.dispatch(tasks).await;

        assert_eq!(summary, DispatchSummary { succeeded: 2, failed: 1 });
        let seen = processor.seen.lock().unwrap().clone();
        assert_eq!(seen, vec!["images/a.png", "images/bad.png", "images/c.png"]);
    }

    #[tokio::test]
    async fn test_workers_run_concurrently() {
        let processor = Arc::new(RecordingProcessor::with_delay(Duration::from_millis(20)));
        let dispatcher = Dispatcher::new(processor.clone(), Some(3));
        let summary = dispatcher.dispatch(batch(6)).await;
        assert_eq!(summary.succeeded, 6);
        assert_eq!(processor.max_in_flight.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_panicking_task_counted_as_failed() {
        let processor = Arc::new(PanickingProcessor::default());
        let dispatcher = Dispatcher::new(processor.clone(), None);

        let single = dispatcher.dispatch(vec![Task::new("images/panic.png")]).await;
        assert_eq!(single, DispatchSummary { succeeded: 0, failed: 1 });

        for workers in [None, Some(1), Some(2)] {
            let dispatcher = Dispatcher::new(processor.clone(), workers);
            let tasks = vec![
                Task::new("images/a.png"),
                Task::new("images/panic-1.png"),
                Task::new("images/b.png"),
                Task::new("images/panic-2.png"),
                Task::new("images/c.png"),
            ];
            let summary = dispatcher.dispatch(tasks).await;
            assert_eq!(summary, DispatchSummary { succeeded: 3, failed: 2 }, "{:?}", workers);
        }
        assert_eq!(processor.completed.load(Ordering::SeqCst), 9);
    }

    #[tokio::test]
    async fn test_panic_does_not_escape_spawned_dispatch() {
        let dispatcher = Dispatcher::new(Arc::new(PanickingProcessor::default()), None);

        let joined = tokio::spawn(async move {
            dispatcher.dispatch(vec![Task::new("images/panic.png")]).await
        })
        .await;

        assert_eq!(joined.unwrap(), DispatchSummary { succeeded: 0, failed: 1 });
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_single_task_runs_inline() {
        let processor = Arc::new(RecordingProcessor::default());
        let dispatcher = Dispatcher::new(processor.clone(), None);
        let caller = std::thread::current().id();

        let summary = dispatcher.dispatch(batch(1)).await;

        assert_eq!(summary.succeeded, 1);
        assert_eq!(processor.threads.lock().unwrap().as_slice(), &[caller]);
    }
}
