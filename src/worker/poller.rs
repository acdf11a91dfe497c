//! Time-boxed polling loop.
//!
//! A consumer track pulls batches off the queue and dispatches them; an
//! optional publisher track feeds the queue on a fixed interval. Both stop at
//! the next iteration boundary once the shared cancellation token fires, which
//! happens when the deadline elapses (or when the last round of an
//! iteration-bounded run finishes). Work already in flight always completes.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use crate::models::task::{Batch, Task};
use crate::services::queue::TaskQueue;
use crate::telemetry;

use super::dispatcher::Dispatcher;
use super::publisher::TaskPublisher;

/// When the loop stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Stop once this much wall-clock time has passed.
    Deadline(Duration),
    /// Stop after this many extract-and-process rounds.
    Rounds(u32),
}

#[derive(Debug, Clone)]
pub struct PollerSettings {
    pub batch_size: usize,
    pub idle_backoff: Duration,
    pub publish_interval: Duration,
    pub termination: Termination,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub rounds: u64,
    pub batches: u64,
    pub empty_polls: u64,
    pub extraction_errors: u64,
    pub tasks_succeeded: u64,
    pub tasks_failed: u64,
    pub tasks_published: u64,
    pub elapsed_ms: u64,
}

pub struct BoundedPoller {
    queue: Arc<dyn TaskQueue>,
    dispatcher: Arc<Dispatcher>,
    publisher: Option<Arc<TaskPublisher>>,
    settings: PollerSettings,
}

impl BoundedPoller {
    pub fn new(queue: Arc<dyn TaskQueue>, dispatcher: Arc<Dispatcher>, settings: PollerSettings) -> Self {
        Self {
            queue,
            dispatcher,
            publisher: None,
            settings,
        }
    }

    /// Run the publisher track alongside the consumer.
    pub fn with_publisher(mut self, publisher: Arc<TaskPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub async fn run(&self) -> RunSummary {
        self.run_with_token(CancellationToken::new()).await
    }

    /// Run until the termination policy trips or `token` is cancelled externally.
    pub async fn run_with_token(&self, token: CancellationToken) -> RunSummary {
        let started = Instant::now();

        let timer = match self.settings.termination {
            Termination::Deadline(deadline) => {
                let token = token.clone();
                Some(tokio::spawn(async move {
                    tokio::select! {
                        _ = sleep(deadline) => {
                            tracing::info!(deadline_secs = deadline.as_secs(), "Invocation deadline reached");
                            token.cancel();
                        }
                        _ = token.cancelled() => {}
                    }
                }))
            }
            Termination::Rounds(_) => None,
        };

        let publisher = self.publisher.clone().map(|publisher| {
            tokio::spawn(publish_track(
                publisher,
                self.settings.publish_interval,
                token.clone(),
            ))
        });

        let mut summary = self.consume(&token).await;

        // Rounds exhausted: stop the remaining tracks
        token.cancel();

        if let Some(handle) = publisher {
            match handle.await {
                Ok(published) => summary.tasks_published = published as u64,
                Err(e) => tracing::error!(error = %e, "Publisher track aborted"),
            }
        }
        if let Some(handle) = timer {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Deadline timer aborted");
            }
        }

        summary.elapsed_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            rounds = summary.rounds,
            batches = summary.batches,
            succeeded = summary.tasks_succeeded,
            failed = summary.tasks_failed,
            published = summary.tasks_published,
            elapsed_ms = summary.elapsed_ms,
            "Polling loop finished"
        );
        summary
    }

    async fn consume(&self, token: &CancellationToken) -> RunSummary {
        let mut summary = RunSummary::default();

        loop {
            if token.is_cancelled() {
                break;
            }
            if let Termination::Rounds(limit) = self.settings.termination {
                if summary.rounds >= u64::from(limit) {
                    break;
                }
            }
            summary.rounds += 1;

            match self.queue.receive(self.settings.batch_size).await {
                Ok(bodies) if bodies.is_empty() => {
                    tracing::debug!("No messages in queue, retrying later");
                    summary.empty_polls += 1;
                    self.back_off(token, summary.rounds).await;
                }
                Ok(bodies) => {
                    let batch: Batch = bodies.into_iter().map(Task::new).collect();
                    tracing::info!(tasks = batch.len(), "Extracted tasks from queue");
                    metrics::counter!(telemetry::POLL_BATCHES).increment(1);

                    let dispatched = self.dispatcher.dispatch(batch).await;
                    summary.batches += 1;
                    summary.tasks_succeeded += dispatched.succeeded as u64;
                    summary.tasks_failed += dispatched.failed as u64;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to extract tasks from queue");
                    summary.extraction_errors += 1;
                    self.back_off(token, summary.rounds).await;
                }
            }
        }

        summary
    }

    /// Wait before the next poll, unless there is no next poll.
    async fn back_off(&self, token: &CancellationToken, rounds_done: u64) {
        if let Termination::Rounds(limit) = self.settings.termination {
            if rounds_done >= u64::from(limit) {
                return;
            }
        }
        tokio::select! {
            _ = token.cancelled() => {}
            _ = sleep(self.settings.idle_backoff) => {}
        }
    }
}

async fn publish_track(
    publisher: Arc<TaskPublisher>,
    interval: Duration,
    token: CancellationToken,
) -> usize {
    let mut published = 0;
    loop {
        if token.is_cancelled() {
            break;
        }
        published += publisher.publish_round().await;
        tokio::select! {
            _ = token.cancelled() => break,
            _ = sleep(interval) => {}
        }
    }
    published
}
