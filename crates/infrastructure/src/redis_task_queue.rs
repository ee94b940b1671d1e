//! Redis list-backed task queue.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use drover_application::{QueueName, SUBSCRIPTION_BUFFER, Task, TaskQueue, TaskSubscription};
use drover_core::{AppError, AppResult};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

const POLL_TIMEOUT_SECONDS: f64 = 1.0;
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Wire form of one task stored in a Redis list.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskEnvelope {
    id: String,
    payload: String,
    metadata: String,
}

impl TaskEnvelope {
    fn encode(task: &Task) -> AppResult<String> {
        serde_json::to_string(&Self {
            id: task.id.clone(),
            payload: STANDARD.encode(&task.payload),
            metadata: STANDARD.encode(&task.metadata),
        })
        .map_err(|error| AppError::Internal(format!("failed to encode task envelope: {error}")))
    }

    fn decode(body: &str) -> AppResult<Task> {
        let envelope: Self = serde_json::from_str(body)
            .map_err(|error| AppError::Decode(format!("invalid task envelope: {error}")))?;
        let payload = STANDARD
            .decode(envelope.payload.as_bytes())
            .map_err(|error| AppError::Decode(format!("invalid task payload encoding: {error}")))?;
        let metadata = STANDARD
            .decode(envelope.metadata.as_bytes())
            .map_err(|error| AppError::Decode(format!("invalid task metadata encoding: {error}")))?;

        Ok(Task {
            id: envelope.id,
            payload,
            metadata,
        })
    }
}

/// Task queue storing each topic as a Redis list.
///
/// Publishers push to the head and every subscription pops from the tail, so
/// subscribers of one topic compete for tasks across processes. A subscription
/// holds at most [`SUBSCRIPTION_BUFFER`] popped tasks; the rest stay in Redis.
pub struct RedisTaskQueue {
    client: redis::Client,
    key_prefix: String,
    subscriptions: Mutex<HashMap<String, CancellationToken>>,
}

impl RedisTaskQueue {
    /// Creates one queue adapter.
    #[must_use]
    pub fn new(client: redis::Client, key_prefix: impl Into<String>) -> Self {
        Self {
            client,
            key_prefix: key_prefix.into(),
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    fn key_for(&self, queue: &QueueName) -> String {
        format!("{}:{}", self.key_prefix, queue.topic())
    }

    async fn connection(&self) -> AppResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|error| AppError::Upstream(format!("failed to connect to redis: {error}")))
    }
}

#[async_trait]
impl TaskQueue for RedisTaskQueue {
    async fn add_task(&self, queue: &QueueName, task: Task) -> AppResult<()> {
        let body = TaskEnvelope::encode(&task)?;
        let mut connection = self.connection().await?;

        connection
            .lpush::<_, _, ()>(self.key_for(queue), body)
            .await
            .map_err(|error| {
                AppError::Upstream(format!("failed to publish task to '{queue}': {error}"))
            })
    }

    async fn subscribe(&self, queue: &QueueName) -> AppResult<TaskSubscription> {
        let connection = self.connection().await?;
        let key = self.key_for(queue);
        let id = Uuid::new_v4().to_string();
        let cancellation = CancellationToken::new();
        let (sender, receiver) = mpsc::channel(SUBSCRIPTION_BUFFER);

        self.subscriptions
            .lock()
            .await
            .insert(id.clone(), cancellation.clone());

        tokio::spawn(pull_tasks(id.clone(), connection, key, sender, cancellation));

        Ok(TaskSubscription { id, receiver })
    }

    async fn unsubscribe(&self, subscription_id: &str) -> AppResult<()> {
        if let Some(cancellation) = self.subscriptions.lock().await.remove(subscription_id) {
            cancellation.cancel();
        }
        Ok(())
    }
}

/// Pops tasks for one subscription while it has buffer room.
///
/// A pop is only issued once a slot is reserved, so every task taken from
/// Redis is either delivered or pushed back to the tail it was popped from.
async fn pull_tasks(
    subscription_id: String,
    mut connection: redis::aio::MultiplexedConnection,
    key: String,
    sender: mpsc::Sender<Task>,
    cancellation: CancellationToken,
) {
    while !cancellation.is_cancelled() {
        let permit = tokio::select! {
            () = cancellation.cancelled() => break,
            permit = sender.reserve() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let popped = connection
            .brpop::<_, Option<(String, String)>>(&key, POLL_TIMEOUT_SECONDS)
            .await;

        match popped {
            Ok(Some((_, body))) if sender.is_closed() => {
                drop(permit);
                if let Err(error) = connection.rpush::<_, _, ()>(&key, body).await {
                    warn!(key = %key, error = %error, "failed to return task to redis");
                }
                break;
            }
            Ok(Some((_, body))) => match TaskEnvelope::decode(body.as_str()) {
                Ok(task) => permit.send(task),
                Err(error) => warn!(key = %key, error = %error, "dropping malformed task"),
            },
            Ok(None) => {}
            Err(error) => {
                warn!(key = %key, error = %error, "redis task poll failed");
                tokio::select! {
                    () = cancellation.cancelled() => break,
                    () = tokio::time::sleep(RETRY_DELAY) => {}
                }
            }
        }
    }

    debug!(subscription_id = %subscription_id, key = %key, "redis subscription ended");
}

#[cfg(test)]
mod tests;
