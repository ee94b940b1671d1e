use async_trait::async_trait;
use chrono::{DateTime, Utc};
use drover_core::{AppResult, TenantId};
use drover_domain::{
    Event, GetGroupKeyRun, JobRun, ScheduledWorkflowTrigger, StepRun, StepRunResultArchive,
    Tenant, Ticker, WorkflowRun, WorkflowVersion,
};
use serde_json::Value;

use super::inputs::{
    AllStepRunsQuery, CreateWorkflowRunInput, StepRunListQuery, StepRunUpdateInfo,
    UpdateGetGroupKeyRunInput, UpdateStepRunInput, UpdateStepRunOverridesDataInput,
};

/// Repository port for ingested events.
#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Returns one event by id.
    async fn find_event(&self, tenant_id: TenantId, event_id: &str) -> AppResult<Option<Event>>;
}

/// Repository port for workflow definitions and triggers.
#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    /// Lists the latest version of every workflow triggered by an event key.
    async fn list_workflows_for_event(
        &self,
        tenant_id: TenantId,
        event_key: &str,
    ) -> AppResult<Vec<WorkflowVersion>>;

    /// Returns one workflow version by id.
    async fn find_workflow_version(
        &self,
        tenant_id: TenantId,
        workflow_version_id: &str,
    ) -> AppResult<Option<WorkflowVersion>>;

    /// Returns one scheduled trigger by id.
    async fn find_scheduled_trigger(
        &self,
        tenant_id: TenantId,
        scheduled_workflow_id: &str,
    ) -> AppResult<Option<ScheduledWorkflowTrigger>>;
}

/// Repository port for workflow runs, job runs and get-group-key runs.
#[async_trait]
pub trait WorkflowRunRepository: Send + Sync {
    /// Creates a pending workflow run together with its job, step and group key runs.
    async fn create_workflow_run(
        &self,
        tenant_id: TenantId,
        input: CreateWorkflowRunInput,
    ) -> AppResult<WorkflowRun>;

    /// Returns one workflow run by id.
    async fn find_workflow_run(
        &self,
        tenant_id: TenantId,
        workflow_run_id: &str,
    ) -> AppResult<Option<WorkflowRun>>;

    /// Lists workflow runs created for a tenant, oldest first.
    async fn list_workflow_runs(&self, tenant_id: TenantId) -> AppResult<Vec<WorkflowRun>>;

    /// Returns one job run by id.
    async fn find_job_run(&self, tenant_id: TenantId, job_run_id: &str)
    -> AppResult<Option<JobRun>>;

    /// Lists the job runs of one workflow run in definition order.
    async fn list_job_runs(
        &self,
        tenant_id: TenantId,
        workflow_run_id: &str,
    ) -> AppResult<Vec<JobRun>>;

    /// Returns one get-group-key run by id.
    async fn find_get_group_key_run(
        &self,
        tenant_id: TenantId,
        get_group_key_run_id: &str,
    ) -> AppResult<Option<GetGroupKeyRun>>;

    /// Applies updates only while the get-group-key run is pending.
    ///
    /// Returns [`drover_core::AppError::NotPending`] when the run already left pending.
    async fn queue_get_group_key_run_if_pending(
        &self,
        tenant_id: TenantId,
        get_group_key_run_id: &str,
        input: UpdateGetGroupKeyRunInput,
    ) -> AppResult<GetGroupKeyRun>;
}

/// Repository port implementing the step run state machine contract.
#[async_trait]
pub trait StepRunRepository: Send + Sync {
    /// Lists step runs across tenants, filtered by ticker ownership and status.
    async fn list_all_step_runs(&self, query: AllStepRunsQuery) -> AppResult<Vec<StepRun>>;

    /// Lists tenant step runs matching a filter.
    async fn list_step_runs(
        &self,
        tenant_id: TenantId,
        query: StepRunListQuery,
    ) -> AppResult<Vec<StepRun>>;

    /// Lists pending step runs whose requeue threshold has elapsed.
    async fn list_step_runs_to_requeue(&self, tenant_id: TenantId) -> AppResult<Vec<StepRun>>;

    /// Lists assigned step runs whose requeue threshold has elapsed.
    async fn list_step_runs_to_reassign(&self, tenant_id: TenantId) -> AppResult<Vec<StepRun>>;

    /// Lists pending children of a step run whose parents all succeeded.
    async fn list_startable_step_runs(
        &self,
        tenant_id: TenantId,
        job_run_id: &str,
        parent_step_run_id: &str,
    ) -> AppResult<Vec<StepRun>>;

    /// Returns one step run by id.
    async fn find_step_run(
        &self,
        tenant_id: TenantId,
        step_run_id: &str,
    ) -> AppResult<Option<StepRun>>;

    /// Applies updates only while the step run is pending.
    ///
    /// Exactly one of many concurrent callers succeeds; the others receive
    /// [`drover_core::AppError::NotPending`].
    async fn queue_step_run_if_pending(
        &self,
        tenant_id: TenantId,
        step_run_id: &str,
        input: UpdateStepRunInput,
    ) -> AppResult<StepRun>;

    /// Applies a validated transition and cascades final states to job and workflow runs.
    async fn update_step_run(
        &self,
        tenant_id: TenantId,
        step_run_id: &str,
        input: UpdateStepRunInput,
    ) -> AppResult<(StepRun, StepRunUpdateInfo)>;

    /// Merges one override into the step run input and returns the merged input.
    async fn update_step_run_overrides_data(
        &self,
        tenant_id: TenantId,
        step_run_id: &str,
        input: UpdateStepRunOverridesDataInput,
    ) -> AppResult<Value>;

    /// Shallow-merges a schema object into the stored input schema and returns it.
    async fn update_step_run_input_schema(
        &self,
        tenant_id: TenantId,
        step_run_id: &str,
        schema: Value,
    ) -> AppResult<Value>;

    /// Cancels every pending step run of a job run and returns how many changed.
    async fn cancel_pending_step_runs(
        &self,
        tenant_id: TenantId,
        job_run_id: &str,
        reason: &str,
    ) -> AppResult<u64>;

    /// Archives the current result of a step run.
    async fn archive_step_run_result(
        &self,
        tenant_id: TenantId,
        step_run_id: &str,
    ) -> AppResult<StepRunResultArchive>;

    /// Lists archived results, most recent first.
    async fn list_archived_step_run_results(
        &self,
        tenant_id: TenantId,
        step_run_id: &str,
    ) -> AppResult<Vec<StepRunResultArchive>>;

    /// Returns the most recent archived result.
    async fn get_latest_archived_step_run_result(
        &self,
        tenant_id: TenantId,
        step_run_id: &str,
    ) -> AppResult<Option<StepRunResultArchive>>;
}

/// Repository port for ticker registration.
#[async_trait]
pub trait TickerRepository: Send + Sync {
    /// Registers an active ticker.
    async fn create_ticker(&self, ticker_id: &str) -> AppResult<Ticker>;

    /// Records a heartbeat; the stored timestamp never moves backwards.
    async fn update_ticker_heartbeat(
        &self,
        ticker_id: &str,
        heartbeat_at: DateTime<Utc>,
    ) -> AppResult<Ticker>;

    /// Deletes a ticker registration.
    async fn delete_ticker(&self, ticker_id: &str) -> AppResult<()>;

    /// Lists registered tickers.
    async fn list_tickers(&self) -> AppResult<Vec<Ticker>>;
}

/// Repository port for tenant listing.
#[async_trait]
pub trait TenantRepository: Send + Sync {
    /// Lists every tenant.
    async fn list_tenants(&self) -> AppResult<Vec<Tenant>>;
}
