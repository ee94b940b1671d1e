use std::fmt::{Display, Formatter};

use async_trait::async_trait;
use drover_core::AppResult;
use tokio::sync::mpsc;

/// Message envelope carried by the task queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    /// Task kind, used for dispatch and logging.
    pub id: String,
    /// JSON payload.
    pub payload: Vec<u8>,
    /// JSON metadata.
    pub metadata: Vec<u8>,
}

/// Named queue on the task bus.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueueName {
    /// Ingested events.
    EventProcessing,
    /// Workflow run and group key processing.
    WorkflowProcessing,
    /// Job run and step run processing.
    JobProcessing,
    /// Dedicated queue of one ticker.
    Ticker(String),
}

impl QueueName {
    /// Returns the stable topic name.
    #[must_use]
    pub fn topic(&self) -> String {
        match self {
            Self::EventProcessing => "event-processing".to_owned(),
            Self::WorkflowProcessing => "workflow-processing".to_owned(),
            Self::JobProcessing => "job-processing".to_owned(),
            Self::Ticker(ticker_id) => format!("ticker-{ticker_id}"),
        }
    }
}

impl Display for QueueName {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.topic().as_str())
    }
}

/// Tasks a subscription buffers before its queue stops pulling more.
pub const SUBSCRIPTION_BUFFER: usize = 16;

/// Live subscription handed out by a task queue.
#[derive(Debug)]
pub struct TaskSubscription {
    /// Subscription identifier used to unsubscribe.
    pub id: String,
    /// Stream of delivered tasks; closes once the subscription ends.
    ///
    /// Tasks already buffered here have left the queue, so consumers drain
    /// the stream until it closes.
    pub receiver: mpsc::Receiver<Task>,
}

/// At-least-once, topic-addressed task bus.
///
/// Subscribers of the same queue compete: each task is delivered to one of them.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Publishes one task.
    async fn add_task(&self, queue: &QueueName, task: Task) -> AppResult<()>;

    /// Subscribes to one queue.
    async fn subscribe(&self, queue: &QueueName) -> AppResult<TaskSubscription>;

    /// Stops pulling tasks for a subscription; its stream closes once drained.
    async fn unsubscribe(&self, subscription_id: &str) -> AppResult<()>;
}
