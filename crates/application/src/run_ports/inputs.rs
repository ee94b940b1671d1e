use chrono::{DateTime, Utc};
use drover_domain::{
    Event, RunStatus, ScheduledWorkflowTrigger, StepRunStatus, WorkflowRunTrigger,
    WorkflowVersion,
};
use serde_json::{Value, json};

/// Parameters for creating one workflow run and its job and step tree.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateWorkflowRunInput {
    /// Workflow version the run executes.
    pub workflow_version: WorkflowVersion,
    /// Run input copied into every step run.
    pub input: Value,
    /// Source that created the run.
    pub trigger: WorkflowRunTrigger,
}

impl CreateWorkflowRunInput {
    /// Derives creation parameters from an ingested event.
    #[must_use]
    pub fn from_event(event: &Event, workflow_version: &WorkflowVersion) -> Self {
        Self {
            workflow_version: workflow_version.clone(),
            input: event.data().clone(),
            trigger: WorkflowRunTrigger::Event {
                event_id: event.id().to_owned(),
            },
        }
    }

    /// Derives creation parameters from a cron tick.
    #[must_use]
    pub fn from_cron(workflow_version: &WorkflowVersion, cron_parent_id: &str, cron: &str) -> Self {
        Self {
            workflow_version: workflow_version.clone(),
            input: json!({}),
            trigger: WorkflowRunTrigger::Cron {
                cron_parent_id: cron_parent_id.to_owned(),
                cron: cron.to_owned(),
            },
        }
    }

    /// Derives creation parameters from a one-off scheduled trigger.
    #[must_use]
    pub fn from_schedule(
        workflow_version: &WorkflowVersion,
        trigger: &ScheduledWorkflowTrigger,
    ) -> Self {
        Self {
            workflow_version: workflow_version.clone(),
            input: trigger.input.clone(),
            trigger: WorkflowRunTrigger::Scheduled {
                scheduled_workflow_id: trigger.id.clone(),
            },
        }
    }
}

/// Field updates applied to one step run.
///
/// `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateStepRunInput {
    /// Target status, validated against the transition table.
    pub status: Option<StepRunStatus>,
    /// Marks the update as a rerun of a started or finished step run.
    pub is_rerun: bool,
    /// Replacement input.
    pub input: Option<Value>,
    /// Step output.
    pub output: Option<Value>,
    /// Failure details.
    pub error: Option<String>,
    /// Start timestamp.
    pub started_at: Option<DateTime<Utc>>,
    /// Success timestamp.
    pub finished_at: Option<DateTime<Utc>>,
    /// Failure timestamp.
    pub failed_at: Option<DateTime<Utc>>,
    /// Cancellation timestamp.
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Cancellation reason.
    pub cancelled_reason: Option<String>,
    /// Retry counter.
    pub retry_count: Option<i32>,
    /// Requeue threshold.
    pub requeue_after: Option<DateTime<Utc>>,
    /// Scheduling deadline.
    pub schedule_timeout_at: Option<DateTime<Utc>>,
    /// Execution deadline.
    pub timeout_at: Option<DateTime<Utc>>,
    /// Ticker owning the timeout.
    pub ticker_id: Option<String>,
}

impl UpdateStepRunInput {
    /// Creates an update that only changes the status.
    #[must_use]
    pub fn status(status: StepRunStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

/// Field updates applied to one get-group-key run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateGetGroupKeyRunInput {
    /// Target status.
    pub status: Option<StepRunStatus>,
    /// Resolved group key.
    pub output: Option<String>,
    /// Failure details.
    pub error: Option<String>,
    /// Requeue threshold.
    pub requeue_after: Option<DateTime<Utc>>,
    /// Scheduling deadline.
    pub schedule_timeout_at: Option<DateTime<Utc>>,
    /// Execution deadline.
    pub timeout_at: Option<DateTime<Utc>>,
    /// Ticker owning the timeout.
    pub ticker_id: Option<String>,
    /// Start timestamp.
    pub started_at: Option<DateTime<Utc>>,
    /// Success timestamp.
    pub finished_at: Option<DateTime<Utc>>,
}

/// Outcome of an unconditional step run update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRunUpdateInfo {
    /// Whether the owning job run reached a final state with this update.
    pub job_run_final_state: bool,
    /// Whether the owning workflow run reached a final state with this update.
    pub workflow_run_final_state: bool,
    /// Owning workflow run id.
    pub workflow_run_id: String,
    /// Workflow run status after the update.
    pub workflow_run_status: RunStatus,
}

/// Override merged into a step run input under `overrides.<key>`.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateStepRunOverridesDataInput {
    /// Override key.
    pub override_key: String,
    /// Override value.
    pub data: Value,
    /// Source file that declared the override.
    pub caller_file: Option<String>,
}

/// Tenant-scoped step run filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepRunListQuery {
    /// Optional status filter.
    pub status: Option<StepRunStatus>,
    /// Optional job run filter.
    pub job_run_id: Option<String>,
    /// Optional workflow run filter.
    pub workflow_run_id: Option<String>,
}

/// Cross-tenant step run filter used for ticker ownership scans.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllStepRunsQuery {
    /// Optional owning ticker filter.
    pub ticker_id: Option<String>,
    /// Optional status filter.
    pub status: Option<StepRunStatus>,
}
