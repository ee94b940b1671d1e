//! Drover controller runtime: event fan-out plus one ticker instance.

#![forbid(unsafe_code)]

mod config;

use std::env;
use std::sync::Arc;

use drover_application::{
    EventRepository, EventsController, EventsControllerConfig, StepRunRepository, TaskQueue,
    TenantRepository, TickerConfig, TickerRepository, TickerService, WorkflowRepository,
    WorkflowRunRepository,
};
use drover_core::{AppError, AppResult};
use drover_infrastructure::{InMemoryRunStore, InMemoryTaskQueue, PostgresRunStore, RedisTaskQueue};
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{ControllerConfig, RunStoreBackend, TaskQueueBackend};

/// Port handles backed by one run store.
struct RunStorePorts {
    events: Arc<dyn EventRepository>,
    workflows: Arc<dyn WorkflowRepository>,
    workflow_runs: Arc<dyn WorkflowRunRepository>,
    step_runs: Arc<dyn StepRunRepository>,
    tickers: Arc<dyn TickerRepository>,
    tenants: Arc<dyn TenantRepository>,
}

impl RunStorePorts {
    fn from_store<S>(store: Arc<S>) -> Self
    where
        S: EventRepository
            + WorkflowRepository
            + WorkflowRunRepository
            + StepRunRepository
            + TickerRepository
            + TenantRepository
            + 'static,
    {
        Self {
            events: store.clone(),
            workflows: store.clone(),
            workflow_runs: store.clone(),
            step_runs: store.clone(),
            tickers: store.clone(),
            tenants: store,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let migrate_only = env::args().nth(1).as_deref() == Some("migrate");
    let config = ControllerConfig::load()?;

    let ports = build_run_store(&config.run_store, migrate_only).await?;
    let Some(ports) = ports else {
        info!("database migrations applied successfully");
        return Ok(());
    };
    let task_queue = build_task_queue(&config.task_queue)?;

    let events_controller = EventsController::new(EventsControllerConfig {
        task_queue: Some(task_queue.clone()),
        event_repository: Some(ports.events.clone()),
        workflow_repository: Some(ports.workflows.clone()),
        workflow_run_repository: Some(ports.workflow_runs.clone()),
        max_concurrent_runs: config.max_concurrent_runs,
    })?;

    let ticker = TickerService::new(TickerConfig {
        task_queue: Some(task_queue),
        ticker_repository: Some(ports.tickers),
        tenant_repository: Some(ports.tenants),
        step_run_repository: Some(ports.step_runs),
        workflow_run_repository: Some(ports.workflow_runs),
        workflow_repository: Some(ports.workflows),
        ticker_id: config.ticker_id.clone(),
        heartbeat_interval: config.heartbeat_interval,
        requeue_interval: config.requeue_interval,
    })?;

    let events_consumer = events_controller.start().await?;
    let ticker_handle = match ticker.start().await {
        Ok(handle) => handle,
        Err(error) => {
            if let Err(shutdown_error) = events_consumer.shutdown().await {
                warn!(error = %shutdown_error, "failed to stop events controller");
            }
            return Err(error);
        }
    };

    info!(
        ticker_id = %ticker_handle.ticker_id(),
        max_concurrent_runs = config.max_concurrent_runs,
        heartbeat_interval_ms = config.heartbeat_interval.as_millis(),
        requeue_interval_ms = config.requeue_interval.as_millis(),
        "drover-controller started"
    );

    shutdown_signal().await?;

    let ticker_result = ticker_handle.shutdown().await;
    let events_result = events_consumer.shutdown().await;
    ticker_result?;
    events_result?;

    info!("drover-controller stopped");
    Ok(())
}

/// Builds the run store; returns `None` after migrating when only migrations were requested.
async fn build_run_store(
    backend: &RunStoreBackend,
    migrate_only: bool,
) -> AppResult<Option<RunStorePorts>> {
    match backend {
        RunStoreBackend::Postgres { database_url } => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(database_url)
                .await
                .map_err(|error| {
                    AppError::Upstream(format!("failed to connect to database: {error}"))
                })?;

            sqlx::migrate!("../../crates/infrastructure/migrations")
                .run(&pool)
                .await
                .map_err(|error| AppError::Internal(format!("failed to run migrations: {error}")))?;

            if migrate_only {
                return Ok(None);
            }

            Ok(Some(RunStorePorts::from_store(Arc::new(
                PostgresRunStore::new(pool),
            ))))
        }
        RunStoreBackend::Memory => {
            if migrate_only {
                return Err(AppError::Configuration(
                    "migrations require RUN_STORE=postgres".to_owned(),
                ));
            }

            warn!("using in-memory run store; state is lost on restart");
            Ok(Some(RunStorePorts::from_store(Arc::new(
                InMemoryRunStore::new(),
            ))))
        }
    }
}

fn build_task_queue(backend: &TaskQueueBackend) -> AppResult<Arc<dyn TaskQueue>> {
    match backend {
        TaskQueueBackend::Redis {
            redis_url,
            key_prefix,
        } => {
            let client = redis::Client::open(redis_url.as_str())
                .map_err(|error| AppError::Validation(format!("invalid REDIS_URL: {error}")))?;
            Ok(Arc::new(RedisTaskQueue::new(client, key_prefix.clone())))
        }
        TaskQueueBackend::Memory => {
            warn!("using in-memory task queue; only this process can consume tasks");
            Ok(Arc::new(InMemoryTaskQueue::new()))
        }
    }
}

/// Waits for Ctrl-C or, on unix, SIGTERM.
async fn shutdown_signal() -> AppResult<()> {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.map_err(|error| {
            AppError::Internal(format!("failed to listen for ctrl-c: {error}"))
        })
    };

    #[cfg(unix)]
    let terminate = async {
        let mut signal =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).map_err(
                |error| AppError::Internal(format!("failed to listen for SIGTERM: {error}")),
            )?;
        signal.recv().await;
        Ok::<(), AppError>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<AppResult<()>>();

    tokio::select! {
        result = ctrl_c => {
            result?;
            info!("received ctrl-c, shutting down");
        }
        result = terminate => {
            result?;
            info!("received SIGTERM, shutting down");
        }
    }

    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}
