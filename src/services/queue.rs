use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

const QUEUE_KEY: &str = "task_status_gate:tasks";

/// Task payload handed to the processing backend through Redis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskMessage {
    pub task_id: String,
    pub prompt: String,
    pub lora_name: String,
    pub cover_size: String,
    /// Caller's Authorization header, forwarded so the backend can call back
    /// on the user's behalf.
    pub authorization: Option<String>,
}

/// Destination for newly created tasks.
#[async_trait]
pub trait TaskPublisher: Send + Sync {
    async fn publish(&self, message: &TaskMessage) -> Result<(), QueueError>;

    /// Check the backing transport is reachable (for health checks).
    async fn health_check(&self) -> Result<(), QueueError>;
}

/// Redis list producer feeding the task workers.
pub struct TaskQueue {
    client: redis::Client,
}

impl TaskQueue {
    pub fn new(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    async fn connection(&self) -> Result<MultiplexedConnection, QueueError> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }
}

#[async_trait]
impl TaskPublisher for TaskQueue {
    async fn publish(&self, message: &TaskMessage) -> Result<(), QueueError> {
        let payload = serde_json::to_string(message)?;
        let mut conn = self.connection().await?;
        conn.lpush::<_, _, ()>(QUEUE_KEY, &payload).await?;
        tracing::debug!(task_id = %message.task_id, "Task enqueued");
        Ok(())
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
