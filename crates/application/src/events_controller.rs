use std::sync::Arc;

use async_trait::async_trait;
use drover_core::{AppError, AppResult, TenantId};
use drover_domain::WorkflowRun;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::run_ports::{
    CreateWorkflowRunInput, EventRepository, WorkflowRepository, WorkflowRunRepository,
};
use crate::task_consumer::{TaskConsumer, TaskHandler};
use crate::task_ports::{
    EventTaskPayload, QueueName, Task, TaskKind, TaskQueue, TenantMetadata,
    WorkflowRunQueuedPayload, decode_task,
};

/// Default bound on concurrent workflow run creations per event.
pub const DEFAULT_MAX_CONCURRENT_RUNS: usize = 16;

/// Collaborators and settings of the event processor.
#[derive(Clone)]
pub struct EventsControllerConfig {
    /// Task queue used for subscribing and publishing.
    pub task_queue: Option<Arc<dyn TaskQueue>>,
    /// Event lookups.
    pub event_repository: Option<Arc<dyn EventRepository>>,
    /// Workflow definition lookups.
    pub workflow_repository: Option<Arc<dyn WorkflowRepository>>,
    /// Workflow run creation.
    pub workflow_run_repository: Option<Arc<dyn WorkflowRunRepository>>,
    /// Bound on concurrent workflow run creations per event.
    pub max_concurrent_runs: usize,
}

impl Default for EventsControllerConfig {
    fn default() -> Self {
        Self {
            task_queue: None,
            event_repository: None,
            workflow_repository: None,
            workflow_run_repository: None,
            max_concurrent_runs: DEFAULT_MAX_CONCURRENT_RUNS,
        }
    }
}

/// Event processor that fans ingested events out into workflow runs.
#[derive(Clone)]
pub struct EventsController {
    task_queue: Arc<dyn TaskQueue>,
    event_repository: Arc<dyn EventRepository>,
    workflow_repository: Arc<dyn WorkflowRepository>,
    workflow_run_repository: Arc<dyn WorkflowRunRepository>,
    max_concurrent_runs: usize,
}

impl EventsController {
    /// Creates an event processor, rejecting configs with missing collaborators.
    pub fn new(config: EventsControllerConfig) -> AppResult<Self> {
        let EventsControllerConfig {
            task_queue,
            event_repository,
            workflow_repository,
            workflow_run_repository,
            max_concurrent_runs,
        } = config;

        let mut missing = Vec::new();
        if task_queue.is_none() {
            missing.push("task_queue");
        }
        if event_repository.is_none() {
            missing.push("event_repository");
        }
        if workflow_repository.is_none() {
            missing.push("workflow_repository");
        }
        if workflow_run_repository.is_none() {
            missing.push("workflow_run_repository");
        }

        if max_concurrent_runs == 0 {
            return Err(AppError::Configuration(
                "max_concurrent_runs must be greater than zero".to_owned(),
            ));
        }

        match (
            task_queue,
            event_repository,
            workflow_repository,
            workflow_run_repository,
        ) {
            (
                Some(task_queue),
                Some(event_repository),
                Some(workflow_repository),
                Some(workflow_run_repository),
            ) => Ok(Self {
                task_queue,
                event_repository,
                workflow_repository,
                workflow_run_repository,
                max_concurrent_runs,
            }),
            _ => Err(AppError::Configuration(format!(
                "events controller requires {}",
                missing.join(", ")
            ))),
        }
    }

    /// Subscribes to `event-processing` and handles every delivered task.
    pub async fn start(&self) -> AppResult<TaskConsumer> {
        let consumer = TaskConsumer::start(
            "events-controller",
            Arc::clone(&self.task_queue),
            &QueueName::EventProcessing,
            Arc::new(self.clone()),
            CancellationToken::new(),
            TaskTracker::new(),
        )
        .await?;

        info!("events controller started");
        Ok(consumer)
    }

    /// Creates and queues one workflow run per workflow matching the event key.
    ///
    /// Branches run concurrently and are not rolled back; when any branch
    /// fails the first error is returned after every branch finished.
    pub async fn process_event(
        &self,
        tenant_id: TenantId,
        event_id: &str,
    ) -> AppResult<Vec<WorkflowRun>> {
        let event = self
            .event_repository
            .find_event(tenant_id, event_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("event '{event_id}' does not exist")))?;

        let workflow_versions = self
            .workflow_repository
            .list_workflows_for_event(tenant_id, event.key())
            .await?;

        debug!(
            event_id = %event_id,
            event_key = %event.key(),
            matched = workflow_versions.len(),
            "resolved workflows for event"
        );

        let permits = Arc::new(Semaphore::new(self.max_concurrent_runs));
        let mut branches = JoinSet::new();

        for workflow_version in &workflow_versions {
            let input = CreateWorkflowRunInput::from_event(&event, workflow_version);
            let permits = Arc::clone(&permits);
            let workflow_run_repository = Arc::clone(&self.workflow_run_repository);
            let task_queue = Arc::clone(&self.task_queue);

            branches.spawn(async move {
                let _permit = permits.acquire_owned().await.map_err(|error| {
                    AppError::Internal(format!("fan-out semaphore closed: {error}"))
                })?;

                let workflow_run = workflow_run_repository
                    .create_workflow_run(tenant_id, input)
                    .await?;

                let task = workflow_run_queued_task(tenant_id, workflow_run.id.as_str())?;
                task_queue
                    .add_task(&QueueName::WorkflowProcessing, task)
                    .await?;

                Ok::<WorkflowRun, AppError>(workflow_run)
            });
        }

        let mut workflow_runs = Vec::with_capacity(workflow_versions.len());
        let mut first_error = None;

        while let Some(joined) = branches.join_next().await {
            let outcome = joined.map_err(|error| {
                AppError::Internal(format!("workflow run creation task failed: {error}"))
            });

            match outcome.and_then(|result| result) {
                Ok(workflow_run) => workflow_runs.push(workflow_run),
                Err(error) => {
                    first_error.get_or_insert(error);
                }
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(workflow_runs),
        }
    }
}

#[async_trait]
impl TaskHandler for EventsController {
    async fn handle_task(&self, task: Task) -> AppResult<()> {
        match TaskKind::parse(task.id.as_str())? {
            TaskKind::EventCreated => {
                let (payload, metadata) = decode_task::<EventTaskPayload, TenantMetadata>(&task)?;
                let tenant_id = metadata.tenant_id()?;
                let workflow_runs = self
                    .process_event(tenant_id, payload.event_id.as_str())
                    .await?;

                info!(
                    tenant_id = %tenant_id,
                    event_id = %payload.event_id,
                    workflow_runs = workflow_runs.len(),
                    "processed event"
                );
                Ok(())
            }
            other => Err(AppError::UnknownTask(format!(
                "events controller does not handle '{}'",
                other.as_str()
            ))),
        }
    }
}

/// Builds the task announcing a queued workflow run.
pub fn workflow_run_queued_task(tenant_id: TenantId, workflow_run_id: &str) -> AppResult<Task> {
    Task::encode(
        TaskKind::WorkflowRunQueued,
        &WorkflowRunQueuedPayload {
            workflow_run_id: workflow_run_id.to_owned(),
        },
        &TenantMetadata::new(tenant_id),
    )
}
