use chrono::{DateTime, Utc};
use drover_core::{AppError, AppResult, TenantId};
use drover_domain::parse_cron;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::queue::Task;

/// Kind of a task, carried in the envelope id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// An event was ingested.
    EventCreated,
    /// Arm a step run timeout.
    ScheduleStepRunTimeout,
    /// Disarm a step run timeout.
    CancelStepRunTimeout,
    /// Arm a get-group-key run timeout.
    ScheduleGetGroupKeyRunTimeout,
    /// Disarm a get-group-key run timeout.
    CancelGetGroupKeyRunTimeout,
    /// Arm a job run timeout.
    ScheduleJobRunTimeout,
    /// Disarm a job run timeout.
    CancelJobRunTimeout,
    /// Register a recurring cron trigger.
    ScheduleCron,
    /// Remove a recurring cron trigger.
    CancelCron,
    /// Register a one-off scheduled workflow.
    ScheduleWorkflow,
    /// Remove a one-off scheduled workflow.
    CancelWorkflow,
    /// A workflow run was created and awaits processing.
    WorkflowRunQueued,
    /// Requeue pending get-group-key runs of a tenant.
    GroupKeyActionRequeueTicker,
    /// A ticker deregistered and its timers need a new owner.
    TickerRemoved,
    /// A step run exceeded its deadline.
    StepRunTimedOut,
    /// A job run exceeded its deadline.
    JobRunTimedOut,
    /// A get-group-key run exceeded its deadline.
    GetGroupKeyRunTimedOut,
}

impl TaskKind {
    /// Returns stable task id value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EventCreated => "event-created",
            Self::ScheduleStepRunTimeout => "schedule-step-run-timeout",
            Self::CancelStepRunTimeout => "cancel-step-run-timeout",
            Self::ScheduleGetGroupKeyRunTimeout => "schedule-get-group-key-run-timeout",
            Self::CancelGetGroupKeyRunTimeout => "cancel-get-group-key-run-timeout",
            Self::ScheduleJobRunTimeout => "schedule-job-run-timeout",
            Self::CancelJobRunTimeout => "cancel-job-run-timeout",
            Self::ScheduleCron => "schedule-cron",
            Self::CancelCron => "cancel-cron",
            Self::ScheduleWorkflow => "schedule-workflow",
            Self::CancelWorkflow => "cancel-workflow",
            Self::WorkflowRunQueued => "workflow-run-queued",
            Self::GroupKeyActionRequeueTicker => "group-key-action-requeue-ticker",
            Self::TickerRemoved => "ticker-removed",
            Self::StepRunTimedOut => "step-run-timed-out",
            Self::JobRunTimedOut => "job-run-timed-out",
            Self::GetGroupKeyRunTimedOut => "get-group-key-run-timed-out",
        }
    }

    /// Parses a task id value.
    pub fn parse(value: &str) -> AppResult<Self> {
        const KINDS: [TaskKind; 17] = [
            TaskKind::EventCreated,
            TaskKind::ScheduleStepRunTimeout,
            TaskKind::CancelStepRunTimeout,
            TaskKind::ScheduleGetGroupKeyRunTimeout,
            TaskKind::CancelGetGroupKeyRunTimeout,
            TaskKind::ScheduleJobRunTimeout,
            TaskKind::CancelJobRunTimeout,
            TaskKind::ScheduleCron,
            TaskKind::CancelCron,
            TaskKind::ScheduleWorkflow,
            TaskKind::CancelWorkflow,
            TaskKind::WorkflowRunQueued,
            TaskKind::GroupKeyActionRequeueTicker,
            TaskKind::TickerRemoved,
            TaskKind::StepRunTimedOut,
            TaskKind::JobRunTimedOut,
            TaskKind::GetGroupKeyRunTimedOut,
        ];

        KINDS
            .into_iter()
            .find(|kind| kind.as_str() == value)
            .ok_or_else(|| AppError::UnknownTask(format!("unknown task id '{value}'")))
    }
}

/// Schema-checked task payload or metadata document.
pub trait TaskPayload: Serialize + DeserializeOwned {
    /// Validates fields beyond what deserialization already enforces.
    fn validate(&self) -> AppResult<()> {
        Ok(())
    }
}

impl Task {
    /// Encodes a payload and metadata pair into a task envelope.
    pub fn encode<P: TaskPayload, M: TaskPayload>(
        kind: TaskKind,
        payload: &P,
        metadata: &M,
    ) -> AppResult<Self> {
        let payload = serde_json::to_vec(payload).map_err(|error| {
            AppError::Internal(format!("failed to encode {} payload: {error}", kind.as_str()))
        })?;
        let metadata = serde_json::to_vec(metadata).map_err(|error| {
            AppError::Internal(format!("failed to encode {} metadata: {error}", kind.as_str()))
        })?;

        Ok(Self {
            id: kind.as_str().to_owned(),
            payload,
            metadata,
        })
    }
}

/// Decodes and validates the payload and metadata of a task independently.
pub fn decode_task<P: TaskPayload, M: TaskPayload>(task: &Task) -> AppResult<(P, M)> {
    let payload = decode_document::<P>(task, "payload", task.payload.as_slice())?;
    let metadata = decode_document::<M>(task, "metadata", task.metadata.as_slice())?;
    Ok((payload, metadata))
}

fn decode_document<T: TaskPayload>(task: &Task, part: &str, bytes: &[u8]) -> AppResult<T> {
    let document = serde_json::from_slice::<T>(bytes).map_err(|error| {
        AppError::Decode(format!("invalid {part} for task '{}': {error}", task.id))
    })?;

    document.validate().map_err(|error| match error {
        AppError::Decode(message) => {
            AppError::Decode(format!("invalid {part} for task '{}': {message}", task.id))
        }
        other => other,
    })?;

    Ok(document)
}

fn require_uuid(field: &str, value: &str) -> AppResult<()> {
    Uuid::parse_str(value)
        .map(|_| ())
        .map_err(|error| AppError::Decode(format!("{field} must be a UUID: {error}")))
}

/// Metadata carried by tenant-scoped tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantMetadata {
    /// Tenant identifier.
    pub tenant_id: String,
}

impl TenantMetadata {
    /// Creates metadata for a tenant.
    #[must_use]
    pub fn new(tenant_id: TenantId) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
        }
    }

    /// Returns the parsed tenant identifier.
    pub fn tenant_id(&self) -> AppResult<TenantId> {
        TenantId::parse(self.tenant_id.as_str())
            .map_err(|error| AppError::Decode(error.to_string()))
    }
}

impl TaskPayload for TenantMetadata {
    fn validate(&self) -> AppResult<()> {
        require_uuid("tenantId", self.tenant_id.as_str())
    }
}

/// Metadata of tasks that are not tenant-scoped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyMetadata {}

impl TaskPayload for EmptyMetadata {}

/// Payload of an ingested event task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventTaskPayload {
    /// Event identifier.
    pub event_id: String,
}

impl TaskPayload for EventTaskPayload {
    fn validate(&self) -> AppResult<()> {
        require_uuid("eventId", self.event_id.as_str())
    }
}

/// Payload arming a step run timeout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRunTimeoutPayload {
    /// Step run identifier.
    pub step_run_id: String,
    /// Owning job run identifier.
    pub job_run_id: String,
    /// Deadline.
    pub timeout_at: DateTime<Utc>,
}

impl TaskPayload for StepRunTimeoutPayload {
    fn validate(&self) -> AppResult<()> {
        require_uuid("stepRunId", self.step_run_id.as_str())?;
        require_uuid("jobRunId", self.job_run_id.as_str())
    }
}

/// Payload naming one step run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRunIdPayload {
    /// Step run identifier.
    pub step_run_id: String,
}

impl TaskPayload for StepRunIdPayload {
    fn validate(&self) -> AppResult<()> {
        require_uuid("stepRunId", self.step_run_id.as_str())
    }
}

/// Payload arming a get-group-key run timeout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetGroupKeyRunTimeoutPayload {
    /// Get-group-key run identifier.
    pub get_group_key_run_id: String,
    /// Owning workflow run identifier.
    pub workflow_run_id: String,
    /// Deadline.
    pub timeout_at: DateTime<Utc>,
}

impl TaskPayload for GetGroupKeyRunTimeoutPayload {
    fn validate(&self) -> AppResult<()> {
        require_uuid("getGroupKeyRunId", self.get_group_key_run_id.as_str())?;
        require_uuid("workflowRunId", self.workflow_run_id.as_str())
    }
}

/// Payload naming one get-group-key run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetGroupKeyRunIdPayload {
    /// Get-group-key run identifier.
    pub get_group_key_run_id: String,
}

impl TaskPayload for GetGroupKeyRunIdPayload {
    fn validate(&self) -> AppResult<()> {
        require_uuid("getGroupKeyRunId", self.get_group_key_run_id.as_str())
    }
}

/// Payload arming a job run timeout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRunTimeoutPayload {
    /// Job run identifier.
    pub job_run_id: String,
    /// Deadline.
    pub timeout_at: DateTime<Utc>,
}

impl TaskPayload for JobRunTimeoutPayload {
    fn validate(&self) -> AppResult<()> {
        require_uuid("jobRunId", self.job_run_id.as_str())
    }
}

/// Payload naming one job run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRunIdPayload {
    /// Job run identifier.
    pub job_run_id: String,
}

impl TaskPayload for JobRunIdPayload {
    fn validate(&self) -> AppResult<()> {
        require_uuid("jobRunId", self.job_run_id.as_str())
    }
}

/// Payload registering or removing a cron trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronPayload {
    /// Workflow version started by the cron.
    pub workflow_version_id: String,
    /// Five-field cron expression.
    pub cron: String,
    /// Cron parent identifier recorded on created runs.
    pub cron_parent_id: String,
}

impl CronPayload {
    /// Returns the timer key of this cron trigger.
    #[must_use]
    pub fn timer_id(&self) -> String {
        format!("{}:{}", self.workflow_version_id, self.cron)
    }
}

impl TaskPayload for CronPayload {
    fn validate(&self) -> AppResult<()> {
        require_uuid("workflowVersionId", self.workflow_version_id.as_str())?;
        require_uuid("cronParentId", self.cron_parent_id.as_str())?;
        parse_cron(self.cron.as_str())
            .map(|_| ())
            .map_err(|error| AppError::Decode(error.to_string()))
    }
}

/// Payload registering or removing a one-off scheduled workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledWorkflowPayload {
    /// Scheduled trigger identifier.
    pub scheduled_workflow_id: String,
    /// Workflow version started by the trigger.
    pub workflow_version_id: String,
    /// Fire time.
    pub trigger_at: DateTime<Utc>,
}

impl TaskPayload for ScheduledWorkflowPayload {
    fn validate(&self) -> AppResult<()> {
        require_uuid("scheduledWorkflowId", self.scheduled_workflow_id.as_str())?;
        require_uuid("workflowVersionId", self.workflow_version_id.as_str())
    }
}

/// Payload announcing a queued workflow run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRunQueuedPayload {
    /// Workflow run identifier.
    pub workflow_run_id: String,
}

impl TaskPayload for WorkflowRunQueuedPayload {
    fn validate(&self) -> AppResult<()> {
        require_uuid("workflowRunId", self.workflow_run_id.as_str())
    }
}

/// Payload asking the workflow controller to requeue group key runs of a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupKeyActionRequeuePayload {
    /// Tenant identifier.
    pub tenant_id: String,
}

impl TaskPayload for GroupKeyActionRequeuePayload {
    fn validate(&self) -> AppResult<()> {
        require_uuid("tenantId", self.tenant_id.as_str())
    }
}

/// Payload announcing a deregistered ticker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickerRemovedPayload {
    /// Ticker identifier.
    pub ticker_id: String,
}

impl TaskPayload for TickerRemovedPayload {
    fn validate(&self) -> AppResult<()> {
        require_uuid("tickerId", self.ticker_id.as_str())
    }
}

/// Payload announcing a step run timeout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRunTimedOutPayload {
    /// Step run identifier.
    pub step_run_id: String,
    /// Owning job run identifier.
    pub job_run_id: String,
}

impl TaskPayload for StepRunTimedOutPayload {
    fn validate(&self) -> AppResult<()> {
        require_uuid("stepRunId", self.step_run_id.as_str())?;
        require_uuid("jobRunId", self.job_run_id.as_str())
    }
}

/// Payload announcing a job run timeout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRunTimedOutPayload {
    /// Job run identifier.
    pub job_run_id: String,
}

impl TaskPayload for JobRunTimedOutPayload {
    fn validate(&self) -> AppResult<()> {
        require_uuid("jobRunId", self.job_run_id.as_str())
    }
}

/// Payload announcing a get-group-key run timeout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetGroupKeyRunTimedOutPayload {
    /// Get-group-key run identifier.
    pub get_group_key_run_id: String,
    /// Owning workflow run identifier.
    pub workflow_run_id: String,
}

impl TaskPayload for GetGroupKeyRunTimedOutPayload {
    fn validate(&self) -> AppResult<()> {
        require_uuid("getGroupKeyRunId", self.get_group_key_run_id.as_str())?;
        require_uuid("workflowRunId", self.workflow_run_id.as_str())
    }
}
