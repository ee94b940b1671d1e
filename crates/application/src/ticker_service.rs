use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use drover_core::{AppError, AppResult};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::run_ports::{
    StepRunRepository, TenantRepository, TickerRepository, WorkflowRepository,
    WorkflowRunRepository,
};
use crate::task_consumer::TaskConsumer;
use crate::task_ports::{
    EmptyMetadata, GroupKeyActionRequeuePayload, QueueName, Task, TaskKind, TaskQueue,
    TenantMetadata, TickerRemovedPayload,
};

mod handlers;
mod periodic;
mod timers;

use handlers::{TickerWorker, TimerActions};
use periodic::spawn_periodic;
use timers::TimerRegistry;

/// Default heartbeat period.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Default period of the group key requeue scan.
pub const DEFAULT_REQUEUE_INTERVAL: Duration = Duration::from_secs(5);

/// Collaborators and settings of one ticker instance.
#[derive(Clone)]
pub struct TickerConfig {
    /// Task queue used for the ticker's own topic and emitted tasks.
    pub task_queue: Option<Arc<dyn TaskQueue>>,
    /// Ticker registration.
    pub ticker_repository: Option<Arc<dyn TickerRepository>>,
    /// Tenant listing for the requeue scan.
    pub tenant_repository: Option<Arc<dyn TenantRepository>>,
    /// Step run lookups when step timeouts fire.
    pub step_run_repository: Option<Arc<dyn StepRunRepository>>,
    /// Job, workflow and group key run access when timers fire.
    pub workflow_run_repository: Option<Arc<dyn WorkflowRunRepository>>,
    /// Workflow version and scheduled trigger lookups.
    pub workflow_repository: Option<Arc<dyn WorkflowRepository>>,
    /// Fixed ticker id; a random one is assigned when absent.
    pub ticker_id: Option<String>,
    /// Heartbeat period.
    pub heartbeat_interval: Duration,
    /// Group key requeue scan period.
    pub requeue_interval: Duration,
}

impl Default for TickerConfig {
    fn default() -> Self {
        Self {
            task_queue: None,
            ticker_repository: None,
            tenant_repository: None,
            step_run_repository: None,
            workflow_run_repository: None,
            workflow_repository: None,
            ticker_id: None,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            requeue_interval: DEFAULT_REQUEUE_INTERVAL,
        }
    }
}

/// Distributed ticker that owns time-based scheduling for its instance.
pub struct TickerService {
    ticker_id: String,
    task_queue: Arc<dyn TaskQueue>,
    ticker_repository: Arc<dyn TickerRepository>,
    tenant_repository: Arc<dyn TenantRepository>,
    actions: Arc<TimerActions>,
    heartbeat_interval: Duration,
    requeue_interval: Duration,
}

impl TickerService {
    /// Creates a ticker, rejecting configs with missing collaborators.
    pub fn new(config: TickerConfig) -> AppResult<Self> {
        let mut missing = Vec::new();
        if config.task_queue.is_none() {
            missing.push("task_queue");
        }
        if config.ticker_repository.is_none() {
            missing.push("ticker_repository");
        }
        if config.tenant_repository.is_none() {
            missing.push("tenant_repository");
        }
        if config.step_run_repository.is_none() {
            missing.push("step_run_repository");
        }
        if config.workflow_run_repository.is_none() {
            missing.push("workflow_run_repository");
        }
        if config.workflow_repository.is_none() {
            missing.push("workflow_repository");
        }

        let (
            Some(task_queue),
            Some(ticker_repository),
            Some(tenant_repository),
            Some(step_run_repository),
            Some(workflow_run_repository),
            Some(workflow_repository),
        ) = (
            config.task_queue,
            config.ticker_repository,
            config.tenant_repository,
            config.step_run_repository,
            config.workflow_run_repository,
            config.workflow_repository,
        )
        else {
            return Err(AppError::Configuration(format!(
                "ticker requires {}",
                missing.join(", ")
            )));
        };

        if config.heartbeat_interval.is_zero() || config.requeue_interval.is_zero() {
            return Err(AppError::Configuration(
                "ticker intervals must be greater than zero".to_owned(),
            ));
        }

        let ticker_id = match config.ticker_id {
            Some(ticker_id) => {
                Uuid::parse_str(ticker_id.as_str()).map_err(|error| {
                    AppError::Configuration(format!(
                        "ticker id '{ticker_id}' must be a UUID: {error}"
                    ))
                })?;
                ticker_id
            }
            None => Uuid::new_v4().to_string(),
        };

        Ok(Self {
            actions: Arc::new(TimerActions {
                ticker_id: ticker_id.clone(),
                task_queue: Arc::clone(&task_queue),
                step_run_repository,
                workflow_run_repository,
                workflow_repository,
            }),
            ticker_id,
            task_queue,
            ticker_repository,
            tenant_repository,
            heartbeat_interval: config.heartbeat_interval,
            requeue_interval: config.requeue_interval,
        })
    }

    /// Returns the ticker id.
    #[must_use]
    pub fn ticker_id(&self) -> &str {
        self.ticker_id.as_str()
    }

    /// Registers the ticker, subscribes to its queue and starts the periodic actions.
    pub async fn start(&self) -> AppResult<TickerHandle> {
        self.ticker_repository
            .create_ticker(self.ticker_id.as_str())
            .await?;

        let cancellation = CancellationToken::new();
        let tracker = TaskTracker::new();
        let timers = TimerRegistry::new(cancellation.clone(), tracker.clone());
        let worker = Arc::new(TickerWorker {
            actions: Arc::clone(&self.actions),
            timers: Arc::clone(&timers),
        });

        let consumer = match TaskConsumer::start(
            "ticker",
            Arc::clone(&self.task_queue),
            &QueueName::Ticker(self.ticker_id.clone()),
            worker,
            cancellation.clone(),
            tracker.clone(),
        )
        .await
        {
            Ok(consumer) => consumer,
            Err(error) => {
                if let Err(delete_error) = self
                    .ticker_repository
                    .delete_ticker(self.ticker_id.as_str())
                    .await
                {
                    warn!(
                        ticker_id = %self.ticker_id,
                        error = %delete_error,
                        "failed to deregister ticker after subscribe failure"
                    );
                }
                return Err(error);
            }
        };

        let ticker_repository = Arc::clone(&self.ticker_repository);
        let ticker_id = self.ticker_id.clone();
        spawn_periodic(
            "heartbeat",
            self.heartbeat_interval,
            cancellation.clone(),
            &tracker,
            move || {
                let ticker_repository = Arc::clone(&ticker_repository);
                let ticker_id = ticker_id.clone();
                async move {
                    ticker_repository
                        .update_ticker_heartbeat(ticker_id.as_str(), Utc::now())
                        .await
                        .map(|_| ())
                }
            },
        );

        let tenant_repository = Arc::clone(&self.tenant_repository);
        let task_queue = Arc::clone(&self.task_queue);
        spawn_periodic(
            "requeue-group-key-runs",
            self.requeue_interval,
            cancellation,
            &tracker,
            move || {
                let tenant_repository = Arc::clone(&tenant_repository);
                let task_queue = Arc::clone(&task_queue);
                async move { request_group_key_requeue(tenant_repository, task_queue).await }
            },
        );

        info!(ticker_id = %self.ticker_id, "ticker started");

        Ok(TickerHandle {
            ticker_id: self.ticker_id.clone(),
            task_queue: Arc::clone(&self.task_queue),
            ticker_repository: Arc::clone(&self.ticker_repository),
            running: Mutex::new(Some(RunningTicker { consumer, timers })),
        })
    }
}

struct RunningTicker {
    consumer: TaskConsumer,
    timers: Arc<TimerRegistry>,
}

/// Handle of a started ticker.
pub struct TickerHandle {
    ticker_id: String,
    task_queue: Arc<dyn TaskQueue>,
    ticker_repository: Arc<dyn TickerRepository>,
    running: Mutex<Option<RunningTicker>>,
}

impl TickerHandle {
    /// Returns the ticker id.
    #[must_use]
    pub fn ticker_id(&self) -> &str {
        self.ticker_id.as_str()
    }

    /// Stops the ticker and deregisters it.
    ///
    /// Releases the subscription, lets every delivered task finish, stops the
    /// timers and periodic actions, deletes the ticker record and emits
    /// `ticker-removed`.
    /// Every step runs even when an earlier one fails; the first error is
    /// returned. Calling it again is a no-op.
    pub async fn shutdown(&self) -> AppResult<()> {
        let Some(running) = self.running.lock().await.take() else {
            return Ok(());
        };

        let mut first_error = None;

        if let Err(error) = running.consumer.shutdown().await {
            first_error.get_or_insert(error);
        }

        let armed_timers = running.timers.len();
        running.timers.clear();

        if let Err(error) = self
            .ticker_repository
            .delete_ticker(self.ticker_id.as_str())
            .await
        {
            error!(ticker_id = %self.ticker_id, error = %error, "failed to delete ticker");
            first_error.get_or_insert(error);
        }

        let removed = ticker_removed_task(self.ticker_id.as_str());
        let published = match removed {
            Ok(task) => self.task_queue.add_task(&QueueName::JobProcessing, task).await,
            Err(error) => Err(error),
        };
        if let Err(error) = published {
            error!(
                ticker_id = %self.ticker_id,
                error = %error,
                "failed to announce ticker removal"
            );
            first_error.get_or_insert(error);
        }

        info!(ticker_id = %self.ticker_id, armed_timers, "ticker stopped");

        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

async fn request_group_key_requeue(
    tenant_repository: Arc<dyn TenantRepository>,
    task_queue: Arc<dyn TaskQueue>,
) -> AppResult<()> {
    let tenants = tenant_repository.list_tenants().await?;

    for tenant in tenants {
        let published = match Task::encode(
            TaskKind::GroupKeyActionRequeueTicker,
            &GroupKeyActionRequeuePayload {
                tenant_id: tenant.id.to_string(),
            },
            &TenantMetadata::new(tenant.id),
        ) {
            Ok(task) => {
                task_queue
                    .add_task(&QueueName::WorkflowProcessing, task)
                    .await
            }
            Err(error) => Err(error),
        };

        if let Err(error) = published {
            warn!(
                tenant_id = %tenant.id,
                error = %error,
                "failed to request group key requeue"
            );
        }
    }

    Ok(())
}

fn ticker_removed_task(ticker_id: &str) -> AppResult<Task> {
    Task::encode(
        TaskKind::TickerRemoved,
        &TickerRemovedPayload {
            ticker_id: ticker_id.to_owned(),
        },
        &EmptyMetadata::default(),
    )
}
