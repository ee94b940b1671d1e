use chrono::{DateTime, Utc};
use drover_core::{AppError, AppResult, TenantId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Status shared by workflow runs and job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// Created and waiting for its first step to be assigned.
    Pending,
    /// At least one step has been assigned or started.
    Running,
    /// Every constituent run succeeded.
    Succeeded,
    /// At least one constituent run failed.
    Failed,
    /// Cancelled before completion.
    Cancelled,
}

impl RunStatus {
    /// Returns stable storage value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Parses storage value.
    pub fn parse(value: &str) -> AppResult<Self> {
        match value {
            "PENDING" => Ok(Self::Pending),
            "RUNNING" => Ok(Self::Running),
            "SUCCEEDED" => Ok(Self::Succeeded),
            "FAILED" => Ok(Self::Failed),
            "CANCELLED" => Ok(Self::Cancelled),
            _ => Err(AppError::Validation(format!("unknown run status '{value}'"))),
        }
    }

    /// Returns true for terminal states, which are immutable.
    #[must_use]
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// Returns whether a run may move from this status to `next`.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        match self {
            Self::Pending => true,
            Self::Running => next != Self::Pending,
            Self::Succeeded | Self::Failed | Self::Cancelled => false,
        }
    }

    /// Aggregates child outcomes into a final status once every child is final.
    ///
    /// Any failure wins over cancellation, which wins over success. Returns
    /// `None` while a child is still outstanding or when there are no children.
    #[must_use]
    pub fn aggregate(children: impl IntoIterator<Item = Option<RunStatus>>) -> Option<RunStatus> {
        let mut seen_any = false;
        let mut failed = false;
        let mut cancelled = false;

        for child in children {
            seen_any = true;
            match child {
                None => return None,
                Some(Self::Failed) => failed = true,
                Some(Self::Cancelled) => cancelled = true,
                Some(Self::Succeeded) => {}
                Some(Self::Pending | Self::Running) => return None,
            }
        }

        if !seen_any {
            return None;
        }

        Some(if failed {
            Self::Failed
        } else if cancelled {
            Self::Cancelled
        } else {
            Self::Succeeded
        })
    }
}

/// Status of step runs and get-group-key runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepRunStatus {
    /// Waiting to be assigned to a worker.
    Pending,
    /// Assigned to a worker that has not reported start.
    Assigned,
    /// Worker reported start.
    Running,
    /// Finished successfully.
    Succeeded,
    /// Finished with an error or timed out.
    Failed,
    /// Cancelled before completion.
    Cancelled,
}

impl StepRunStatus {
    /// Returns stable storage value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Assigned => "ASSIGNED",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Parses storage value.
    pub fn parse(value: &str) -> AppResult<Self> {
        match value {
            "PENDING" => Ok(Self::Pending),
            "ASSIGNED" => Ok(Self::Assigned),
            "RUNNING" => Ok(Self::Running),
            "SUCCEEDED" => Ok(Self::Succeeded),
            "FAILED" => Ok(Self::Failed),
            "CANCELLED" => Ok(Self::Cancelled),
            _ => Err(AppError::Validation(format!(
                "unknown step run status '{value}'"
            ))),
        }
    }

    /// Returns true for terminal states.
    #[must_use]
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// Returns true while a timeout on this run is still meaningful.
    #[must_use]
    pub fn is_outstanding(&self) -> bool {
        matches!(self, Self::Pending | Self::Assigned | Self::Running)
    }

    /// Returns the terminal outcome in job/workflow terms, if final.
    #[must_use]
    pub fn final_outcome(&self) -> Option<RunStatus> {
        match self {
            Self::Succeeded => Some(RunStatus::Succeeded),
            Self::Failed => Some(RunStatus::Failed),
            Self::Cancelled => Some(RunStatus::Cancelled),
            Self::Pending | Self::Assigned | Self::Running => None,
        }
    }

    /// Returns whether a step run may move from this status to `next`.
    ///
    /// Moving back to pending from running or a terminal state is only legal
    /// for reruns; assigned runs may always be requeued.
    #[must_use]
    pub fn can_transition_to(&self, next: Self, is_rerun: bool) -> bool {
        if next == Self::Pending && is_rerun {
            return true;
        }

        match self {
            Self::Pending => matches!(
                next,
                Self::Pending | Self::Assigned | Self::Failed | Self::Cancelled
            ),
            Self::Assigned => matches!(
                next,
                Self::Pending | Self::Assigned | Self::Running | Self::Failed | Self::Cancelled
            ),
            Self::Running => matches!(
                next,
                Self::Running | Self::Succeeded | Self::Failed | Self::Cancelled
            ),
            Self::Succeeded | Self::Failed | Self::Cancelled => false,
        }
    }
}

/// Source that created a workflow run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowRunTrigger {
    /// Created by an ingested event.
    Event {
        /// Triggering event id.
        event_id: String,
    },
    /// Created by a cron tick.
    Cron {
        /// Cron parent identifier supplied by the scheduler.
        cron_parent_id: String,
        /// Cron expression that fired.
        cron: String,
    },
    /// Created by a one-off scheduled trigger.
    Scheduled {
        /// Scheduled trigger id.
        scheduled_workflow_id: String,
    },
}

impl WorkflowRunTrigger {
    /// Returns stable trigger type value.
    #[must_use]
    pub fn trigger_type(&self) -> &'static str {
        match self {
            Self::Event { .. } => "event",
            Self::Cron { .. } => "cron",
            Self::Scheduled { .. } => "scheduled",
        }
    }
}

/// Persisted workflow run record.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowRun {
    /// Stable run identifier.
    pub id: String,
    /// Tenant scope.
    pub tenant_id: TenantId,
    /// Workflow version executed by this run.
    pub workflow_version_id: String,
    /// Current status.
    pub status: RunStatus,
    /// Run input captured at creation.
    pub input: Value,
    /// Source that created the run.
    pub trigger: WorkflowRunTrigger,
    /// Failure details when applicable.
    pub error: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the first step assignment.
    pub started_at: Option<DateTime<Utc>>,
    /// Timestamp of the terminal transition.
    pub finished_at: Option<DateTime<Utc>>,
}

/// Persisted job run record.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRun {
    /// Stable job run identifier.
    pub id: String,
    /// Tenant scope.
    pub tenant_id: TenantId,
    /// Owning workflow run.
    pub workflow_run_id: String,
    /// Job name from the workflow version.
    pub job_name: String,
    /// Current status.
    pub status: RunStatus,
    /// Optional job deadline.
    pub timeout_at: Option<DateTime<Utc>>,
    /// Ticker currently owning the job timeout.
    pub ticker_id: Option<String>,
    /// Timestamp of the first step assignment.
    pub started_at: Option<DateTime<Utc>>,
    /// Timestamp of the terminal transition.
    pub finished_at: Option<DateTime<Utc>>,
    /// Cancellation timestamp.
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Cancellation reason.
    pub cancelled_reason: Option<String>,
}

/// Persisted step run record.
#[derive(Debug, Clone, PartialEq)]
pub struct StepRun {
    /// Stable step run identifier.
    pub id: String,
    /// Tenant scope.
    pub tenant_id: TenantId,
    /// Owning job run.
    pub job_run_id: String,
    /// Owning workflow run.
    pub workflow_run_id: String,
    /// Step readable id from the job definition.
    pub step_readable_id: String,
    /// Action dispatched to workers.
    pub action: String,
    /// Step run ids that must succeed before this one may start.
    pub parents: Vec<String>,
    /// Current status.
    pub status: StepRunStatus,
    /// Step input.
    pub input: Value,
    /// Step output.
    pub output: Option<Value>,
    /// Input schema reported by workers.
    pub input_schema: Value,
    /// Source file per override key reported by workers.
    pub caller_files: Value,
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
    /// Number of retries already consumed.
    pub retry_count: i32,
    /// Deadline for the pending-to-assigned transition.
    pub schedule_timeout_at: Option<DateTime<Utc>>,
    /// Execution deadline.
    pub timeout_at: Option<DateTime<Utc>>,
    /// Time after which a pending or assigned run may be requeued.
    pub requeue_after: Option<DateTime<Utc>>,
    /// Ticker currently owning the step timeout.
    pub ticker_id: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last write timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Persisted get-group-key run record.
#[derive(Debug, Clone, PartialEq)]
pub struct GetGroupKeyRun {
    /// Stable run identifier.
    pub id: String,
    /// Tenant scope.
    pub tenant_id: TenantId,
    /// Workflow run waiting for the group key.
    pub workflow_run_id: String,
    /// Current status.
    pub status: StepRunStatus,
    /// Resolved group key.
    pub output: Option<String>,
    /// Failure details.
    pub error: Option<String>,
    /// Time after which a pending or assigned run may be requeued.
    pub requeue_after: Option<DateTime<Utc>>,
    /// Deadline for the pending-to-assigned transition.
    pub schedule_timeout_at: Option<DateTime<Utc>>,
    /// Execution deadline.
    pub timeout_at: Option<DateTime<Utc>>,
    /// Ticker currently owning the timeout.
    pub ticker_id: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Start timestamp.
    pub started_at: Option<DateTime<Utc>>,
    /// Success timestamp.
    pub finished_at: Option<DateTime<Utc>>,
}

/// Archived copy of a step run result kept across reruns.
#[derive(Debug, Clone, PartialEq)]
pub struct StepRunResultArchive {
    /// Archive identifier.
    pub id: String,
    /// Step run the archive belongs to.
    pub step_run_id: String,
    /// Archive creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Monotonic insertion order, breaks creation-time ties.
    pub order: i64,
    /// Archived input.
    pub input: Value,
    /// Archived output.
    pub output: Option<Value>,
    /// Archived error.
    pub error: Option<String>,
    /// Archived start timestamp.
    pub started_at: Option<DateTime<Utc>>,
    /// Archived success timestamp.
    pub finished_at: Option<DateTime<Utc>>,
    /// Archived failure timestamp.
    pub failed_at: Option<DateTime<Utc>>,
    /// Archived cancellation timestamp.
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Archived cancellation reason.
    pub cancelled_reason: Option<String>,
    /// Archived execution deadline.
    pub timeout_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::{RunStatus, StepRunStatus};

    const STEP_STATUSES: [StepRunStatus; 6] = [
        StepRunStatus::Pending,
        StepRunStatus::Assigned,
        StepRunStatus::Running,
        StepRunStatus::Succeeded,
        StepRunStatus::Failed,
        StepRunStatus::Cancelled,
    ];

    fn step_status() -> impl Strategy<Value = StepRunStatus> {
        (0..STEP_STATUSES.len()).prop_map(|index| STEP_STATUSES[index])
    }

    #[test]
    fn step_status_round_trips_storage_value() {
        for status in STEP_STATUSES {
            assert!(matches!(StepRunStatus::parse(status.as_str()), Ok(parsed) if parsed == status));
        }
        assert!(StepRunStatus::parse("QUEUED").is_err());
    }

    #[test]
    fn assigned_runs_may_be_requeued_without_rerun() {
        assert!(StepRunStatus::Assigned.can_transition_to(StepRunStatus::Pending, false));
        assert!(!StepRunStatus::Running.can_transition_to(StepRunStatus::Pending, false));
        assert!(StepRunStatus::Running.can_transition_to(StepRunStatus::Pending, true));
    }

    #[test]
    fn pending_runs_cannot_skip_assignment() {
        assert!(!StepRunStatus::Pending.can_transition_to(StepRunStatus::Running, false));
        assert!(!StepRunStatus::Pending.can_transition_to(StepRunStatus::Succeeded, false));
    }

    #[test]
    fn aggregate_waits_for_every_child() {
        let outstanding = RunStatus::aggregate([Some(RunStatus::Succeeded), None]);
        assert_eq!(outstanding, None);

        let failed = RunStatus::aggregate([
            Some(RunStatus::Succeeded),
            Some(RunStatus::Cancelled),
            Some(RunStatus::Failed),
        ]);
        assert_eq!(failed, Some(RunStatus::Failed));

        let cancelled =
            RunStatus::aggregate([Some(RunStatus::Succeeded), Some(RunStatus::Cancelled)]);
        assert_eq!(cancelled, Some(RunStatus::Cancelled));

        assert_eq!(RunStatus::aggregate(Vec::new()), None);
    }

    #[test]
    fn final_runs_are_immutable() {
        for status in [RunStatus::Succeeded, RunStatus::Failed, RunStatus::Cancelled] {
            assert!(!status.can_transition_to(RunStatus::Running));
            assert!(!status.can_transition_to(RunStatus::Pending));
        }
        assert!(!RunStatus::Running.can_transition_to(RunStatus::Pending));
    }

    proptest! {
        #[test]
        fn terminal_step_runs_only_leave_through_rerun(
            from in step_status(),
            to in step_status(),
            is_rerun in any::<bool>(),
        ) {
            let allowed = from.can_transition_to(to, is_rerun);
            if from.is_final() {
                prop_assert_eq!(allowed, is_rerun && to == StepRunStatus::Pending);
            }
        }

        #[test]
        fn outstanding_and_final_partition_step_statuses(status in step_status()) {
            prop_assert_ne!(status.is_outstanding(), status.is_final());
            prop_assert_eq!(status.final_outcome().is_some(), status.is_final());
        }
    }
}
