use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use drover_application::{QueueName, SUBSCRIPTION_BUFFER, Task, TaskQueue, TaskSubscription};
use drover_core::AppResult;
use tokio::sync::{Mutex, Notify, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// Tasks kept per topic before the oldest ones are dropped.
const MAX_PENDING_TASKS: usize = 10_000;

#[derive(Default)]
struct Topic {
    pending: VecDeque<Task>,
    available: Arc<Notify>,
}

#[derive(Default)]
struct QueueState {
    topics: HashMap<String, Topic>,
    subscriptions: HashMap<String, CancellationToken>,
}

/// Process-local task queue with competing subscribers per topic.
///
/// Each topic is one FIFO list. Subscriptions pull from it only while their
/// stream has room, so tasks published without a subscriber wait for the
/// first one to arrive, up to a fixed number per topic.
#[derive(Default)]
pub struct InMemoryTaskQueue {
    state: Arc<Mutex<QueueState>>,
}

impl InMemoryTaskQueue {
    /// Creates an empty in-memory task queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of tasks no subscription has pulled yet.
    pub async fn backlog_len(&self, queue: &QueueName) -> usize {
        self.state
            .lock()
            .await
            .topics
            .get(queue.topic().as_str())
            .map_or(0, |topic| topic.pending.len())
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn add_task(&self, queue: &QueueName, task: Task) -> AppResult<()> {
        let mut state = self.state.lock().await;
        let topic = state.topics.entry(queue.topic()).or_default();

        if topic.pending.len() >= MAX_PENDING_TASKS
            && let Some(dropped) = topic.pending.pop_front()
        {
            warn!(queue = %queue, task_id = %dropped.id, "queue full, dropping oldest task");
        }
        topic.pending.push_back(task);
        topic.available.notify_one();

        Ok(())
    }

    async fn subscribe(&self, queue: &QueueName) -> AppResult<TaskSubscription> {
        let (sender, receiver) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let id = Uuid::new_v4().to_string();
        let cancellation = CancellationToken::new();

        self.state
            .lock()
            .await
            .subscriptions
            .insert(id.clone(), cancellation.clone());

        tokio::spawn(pull_tasks(
            Arc::clone(&self.state),
            queue.topic(),
            sender,
            cancellation,
        ));

        Ok(TaskSubscription { id, receiver })
    }

    async fn unsubscribe(&self, subscription_id: &str) -> AppResult<()> {
        if let Some(cancellation) = self
            .state
            .lock()
            .await
            .subscriptions
            .remove(subscription_id)
        {
            cancellation.cancel();
        }

        Ok(())
    }
}

/// Moves tasks from a topic into one subscription stream while it has room.
async fn pull_tasks(
    state: Arc<Mutex<QueueState>>,
    topic_name: String,
    sender: mpsc::Sender<Task>,
    cancellation: CancellationToken,
) {
    'pull: loop {
        let permit = tokio::select! {
            () = cancellation.cancelled() => break,
            permit = sender.reserve() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        loop {
            let available = {
                let mut state = state.lock().await;
                if sender.is_closed() {
                    break 'pull;
                }

                let topic = state.topics.entry(topic_name.clone()).or_default();
                if let Some(task) = topic.pending.pop_front() {
                    if !topic.pending.is_empty() {
                        topic.available.notify_one();
                    }
                    permit.send(task);
                    continue 'pull;
                }
                Arc::clone(&topic.available)
            };

            tokio::select! {
                () = cancellation.cancelled() => break 'pull,
                () = sender.closed() => break 'pull,
                () = available.notified() => {}
            }
        }
    }

    debug!(topic = %topic_name, "in-memory subscription ended");
}
