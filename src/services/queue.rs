use async_trait::async_trait;
use redis::AsyncCommands;
use std::num::NonZeroUsize;

/// Message queue carrying task bodies (blob keys).
///
/// Delivery is acknowledge-on-read: a received message is gone from the queue.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Receive up to `max_messages` bodies. An empty queue yields an empty vec.
    async fn receive(&self, max_messages: usize) -> Result<Vec<String>, QueueError>;

    /// Enqueue one message body.
    async fn send(&self, body: &str) -> Result<(), QueueError>;

    /// Number of messages waiting.
    async fn depth(&self) -> Result<u64, QueueError>;
}

/// Redis list used as a FIFO queue: `LPUSH` to send, `RPOP` to receive.
pub struct RedisTaskQueue {
    client: redis::Client,
    key: String,
}

impl RedisTaskQueue {
    pub fn new(redis_url: &str, key: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self {
            client,
            key: key.to_string(),
        })
    }

    /// Check Redis connectivity.
    pub async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let reply: String = redis::cmd("PING").query_async(&mut conn).await?;
        check_ping_reply(&reply)
    }
}

#[async_trait]
impl TaskQueue for RedisTaskQueue {
    async fn receive(&self, max_messages: usize) -> Result<Vec<String>, QueueError> {
        let Some(count) = NonZeroUsize::new(max_messages) else {
            return Ok(Vec::new());
        };
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        // Nil reply when the list is empty or missing
        let bodies: Option<Vec<String>> = conn.rpop(&self.key, Some(count)).await?;
        Ok(bodies.unwrap_or_default())
    }

    async fn send(&self, body: &str) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.lpush::<_, _, ()>(&self.key, body).await?;
        Ok(())
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let depth: u64 = conn.llen(&self.key).await?;
        Ok(depth)
    }
}

fn check_ping_reply(reply: &str) -> Result<(), QueueError> {
    if reply == "PONG" {
        Ok(())
    } else {
        Err(QueueError::Unavailable(format!("unexpected PING reply: {}", reply)))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Queue unavailable: {0}")]
    Unavailable(String),
}
