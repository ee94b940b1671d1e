//! Application services and ports.

#![forbid(unsafe_code)]

mod events_controller;
mod run_ports;
mod task_consumer;
mod task_ports;
mod ticker_service;

#[cfg(test)]
mod test_support;

pub use events_controller::{
    DEFAULT_MAX_CONCURRENT_RUNS, EventsController, EventsControllerConfig,
    workflow_run_queued_task,
};
pub use run_ports::{
    AllStepRunsQuery, CreateWorkflowRunInput, EventRepository, StepRunListQuery,
    StepRunRepository, StepRunUpdateInfo, TenantRepository, TickerRepository,
    UpdateGetGroupKeyRunInput, UpdateStepRunInput, UpdateStepRunOverridesDataInput,
    WorkflowRepository, WorkflowRunRepository,
};
pub use task_consumer::{TaskConsumer, TaskHandler};
pub use task_ports::{
    CronPayload, EmptyMetadata, EventTaskPayload, GetGroupKeyRunIdPayload,
    GetGroupKeyRunTimedOutPayload, GetGroupKeyRunTimeoutPayload, GroupKeyActionRequeuePayload,
    JobRunIdPayload, JobRunTimedOutPayload, JobRunTimeoutPayload, QueueName, SUBSCRIPTION_BUFFER,
    ScheduledWorkflowPayload, StepRunIdPayload, StepRunTimedOutPayload, StepRunTimeoutPayload,
    Task, TaskKind, TaskPayload, TaskQueue, TaskSubscription, TenantMetadata,
    TickerRemovedPayload, WorkflowRunQueuedPayload, decode_task,
};
pub use ticker_service::{
    DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_REQUEUE_INTERVAL, TickerConfig, TickerHandle,
    TickerService,
};
