use rand::Rng;
use std::sync::Arc;

use crate::services::queue::TaskQueue;
use crate::services::storage::BlobStore;
use crate::telemetry;

/// Enqueues synthetic tasks by sampling existing source images.
pub struct TaskPublisher {
    storage: Arc<dyn BlobStore>,
    queue: Arc<dyn TaskQueue>,
    input_prefix: String,
    tasks_per_round: usize,
}

impl TaskPublisher {
    pub fn new(
        storage: Arc<dyn BlobStore>,
        queue: Arc<dyn TaskQueue>,
        input_prefix: impl Into<String>,
        tasks_per_round: usize,
    ) -> Self {
        Self {
            storage,
            queue,
            input_prefix: input_prefix.into(),
            tasks_per_round,
        }
    }

    /// Source images under the input prefix. Listing failures yield nothing.
    async fn list_images(&self) -> Vec<String> {
        match self.storage.list(&self.input_prefix).await {
            Ok(keys) => keys
                .into_iter()
                .filter(|key| key != &self.input_prefix && !key.ends_with('/'))
                .collect(),
            Err(e) => {
                tracing::warn!(
                    prefix = %self.input_prefix,
                    error = %e,
                    "Failed to list source images"
                );
                Vec::new()
            }
        }
    }

    /// Send `tasks_per_round` keys drawn at random, with replacement.
    /// Returns how many messages were accepted by the queue.
    pub async fn publish_round(&self) -> usize {
        let images = self.list_images().await;
        if images.is_empty() {
            tracing::info!(prefix = %self.input_prefix, "No source images to publish");
            return 0;
        }

        let picks: Vec<String> = {
            let mut rng = rand::rng();
            (0..self.tasks_per_round)
                .map(|_| images[rng.random_range(0..images.len())].clone())
                .collect()
        };

        let mut sent = 0;
        for key in &picks {
            match self.queue.send(key).await {
                Ok(()) => sent += 1,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Failed to send task to queue");
                }
            }
        }

        metrics::counter!(telemetry::TASKS_PUBLISHED).increment(sent as u64);
        tracing::info!(sent, available = images.len(), "Published tasks");
        sent
    }

    /// Run `rounds` publish rounds back to back.
    pub async fn publish_rounds(&self, rounds: u32) -> usize {
        let mut total = 0;
        for round in 0..rounds {
            total += self.publish_round().await;
            tracing::debug!(round = round + 1, total, "Publish round complete");
        }
        total
    }
}
