//! Logging and metrics setup shared by the binaries.

use tracing_subscriber::EnvFilter;

pub const TASKS_SUCCEEDED: &str = "image_tasks_succeeded_total";
pub const TASKS_FAILED: &str = "image_tasks_failed_total";
pub const UPLOADS_FAILED: &str = "image_uploads_failed_total";
pub const POLL_BATCHES: &str = "image_poll_batches_total";
pub const TASKS_PUBLISHED: &str = "image_tasks_published_total";
pub const TASK_PROCESSING_SECONDS: &str = "image_task_processing_seconds";

/// Install the JSON tracing subscriber. Defaults to `info` when `RUST_LOG` is unset.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();
}

/// Register descriptions for every metric the worker emits.
pub fn describe_metrics() {
    metrics::describe_counter!(TASKS_SUCCEEDED, "Tasks whose pipeline completed");
    metrics::describe_counter!(TASKS_FAILED, "Tasks aborted by a download or transform error");
    metrics::describe_counter!(
        UPLOADS_FAILED,
        "Transform results that could not be uploaded"
    );
    metrics::describe_counter!(POLL_BATCHES, "Non-empty batches pulled from the queue");
    metrics::describe_counter!(TASKS_PUBLISHED, "Synthetic tasks sent to the queue");
    metrics::describe_histogram!(
        TASK_PROCESSING_SECONDS,
        "Time to run the pipeline for one task"
    );
}
