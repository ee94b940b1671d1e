use std::sync::Arc;

use async_trait::async_trait;
use drover_core::{AppError, AppResult};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn};

use crate::task_ports::{QueueName, Task, TaskQueue, TaskSubscription};

/// Handler invoked once per delivered task.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Handles one task; errors are logged by the consumer loop.
    async fn handle_task(&self, task: Task) -> AppResult<()>;
}

/// Running subscription loop that handles every task on its own tracked unit.
pub struct TaskConsumer {
    component: &'static str,
    subscription_id: String,
    task_queue: Arc<dyn TaskQueue>,
    cancellation: CancellationToken,
    tracker: TaskTracker,
    receive_loop: JoinHandle<()>,
}

impl TaskConsumer {
    /// Subscribes to a queue and starts dispatching its tasks.
    pub async fn start(
        component: &'static str,
        task_queue: Arc<dyn TaskQueue>,
        queue: &QueueName,
        handler: Arc<dyn TaskHandler>,
        cancellation: CancellationToken,
        tracker: TaskTracker,
    ) -> AppResult<Self> {
        let TaskSubscription { id, receiver } = task_queue.subscribe(queue).await?;

        let receive_loop = tokio::spawn(receive_tasks(
            component,
            receiver,
            handler,
            tracker.clone(),
        ));

        Ok(Self {
            component,
            subscription_id: id,
            task_queue,
            cancellation,
            tracker,
            receive_loop,
        })
    }

    /// Stops the subscription, handles every task already delivered and waits
    /// for all tracked units to finish.
    ///
    /// Units run to completion; the cancellation token only stops the
    /// background work sharing the tracker once the stream is drained.
    pub async fn shutdown(self) -> AppResult<()> {
        let unsubscribe = self
            .task_queue
            .unsubscribe(self.subscription_id.as_str())
            .await;
        if let Err(error) = &unsubscribe {
            warn!(
                component = self.component,
                subscription_id = %self.subscription_id,
                error = %error,
                "failed to release task subscription"
            );
            self.receive_loop.abort();
        }

        match self.receive_loop.await {
            Err(error) if !error.is_cancelled() => {
                warn!(
                    component = self.component,
                    error = %error,
                    "task receive loop ended abnormally"
                );
            }
            _ => {}
        }

        self.cancellation.cancel();
        self.tracker.close();
        self.tracker.wait().await;

        unsubscribe
    }
}

async fn receive_tasks(
    component: &'static str,
    mut receiver: mpsc::Receiver<Task>,
    handler: Arc<dyn TaskHandler>,
    tracker: TaskTracker,
) {
    while let Some(task) = receiver.recv().await {
        let handler = Arc::clone(&handler);
        tracker.spawn(async move {
            let task_id = task.id.clone();
            if let Err(error) = handler.handle_task(task).await {
                log_task_error(component, task_id.as_str(), &error);
            }
        });
    }

    debug!(component, "task subscription drained");
}

/// Logs a per-task failure at a level matching its kind.
pub(crate) fn log_task_error(component: &'static str, task_id: &str, error: &AppError) {
    match error {
        AppError::NotPending(_) => {
            debug!(component, task_id = %task_id, error = %error, "task lost a conditional update");
        }
        AppError::Decode(_) | AppError::UnknownTask(_) | AppError::NotFound(_) => {
            warn!(component, task_id = %task_id, error = %error, "dropping task");
        }
        _ => {
            error!(component, task_id = %task_id, error = %error, "could not handle task");
        }
    }
}
