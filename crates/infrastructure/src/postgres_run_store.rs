use async_trait::async_trait;
use chrono::{DateTime, Utc};
use drover_application::{
    AllStepRunsQuery, CreateWorkflowRunInput, EventRepository, StepRunListQuery,
    StepRunRepository, StepRunUpdateInfo, TenantRepository, TickerRepository,
    UpdateGetGroupKeyRunInput, UpdateStepRunInput, UpdateStepRunOverridesDataInput,
    WorkflowRepository, WorkflowRunRepository,
};
use drover_core::{AppError, AppResult, TenantId};
use drover_domain::{
    Event, GetGroupKeyRun, JobRun, RunStatus, ScheduledWorkflowTrigger, StepRun,
    StepRunResultArchive, StepRunStatus, Tenant, Ticker, WorkflowRun, WorkflowRunTrigger,
    WorkflowVersion, WorkflowVersionInput,
};
use serde_json::Value;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::run_records::{
    apply_get_group_key_run_update, apply_step_run_update, archive_of, build_run_tree,
    merge_override, merge_schema, starts_work,
};

mod step_runs;
mod workflow_runs;

/// PostgreSQL-backed run store.
#[derive(Clone)]
pub struct PostgresRunStore {
    pool: PgPool,
}

impl PostgresRunStore {
    /// Creates a run store with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Registers a tenant, ignoring duplicates.
    pub async fn insert_tenant(&self, tenant: &Tenant) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO tenants (id, name)
            VALUES ($1, $2)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(tenant.id.as_uuid())
        .bind(tenant.name.as_str())
        .execute(&self.pool)
        .await
        .map_err(|error| upstream("insert tenant", error))?;

        Ok(())
    }

    /// Stores an ingested event.
    pub async fn insert_event(&self, event: &Event) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO events (id, tenant_id, key, data, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(parse_id("event", event.id())?)
        .bind(event.tenant_id().as_uuid())
        .bind(event.key())
        .bind(event.data())
        .bind(event.created_at())
        .execute(&self.pool)
        .await
        .map_err(|error| upstream("insert event", error))?;

        Ok(())
    }

    /// Publishes a workflow version; later versions of a workflow supersede earlier ones.
    pub async fn insert_workflow_version(
        &self,
        tenant_id: TenantId,
        version: &WorkflowVersion,
    ) -> AppResult<()> {
        let definition = serde_json::to_value(version.to_input()).map_err(|error| {
            AppError::Internal(format!(
                "failed to serialize workflow version '{}': {error}",
                version.id()
            ))
        })?;

        sqlx::query(
            r#"
            INSERT INTO workflow_versions (id, tenant_id, workflow_id, definition)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(parse_id("workflow version", version.id())?)
        .bind(tenant_id.as_uuid())
        .bind(parse_id("workflow", version.workflow_id())?)
        .bind(definition)
        .execute(&self.pool)
        .await
        .map_err(|error| upstream("insert workflow version", error))?;

        Ok(())
    }

    /// Stores a one-off scheduled trigger.
    pub async fn insert_scheduled_trigger(
        &self,
        trigger: &ScheduledWorkflowTrigger,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO scheduled_workflow_triggers (
                id,
                tenant_id,
                workflow_version_id,
                trigger_at,
                input
            )
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(parse_id("scheduled workflow", trigger.id.as_str())?)
        .bind(trigger.tenant_id.as_uuid())
        .bind(parse_id(
            "workflow version",
            trigger.workflow_version_id.as_str(),
        )?)
        .bind(trigger.trigger_at)
        .bind(&trigger.input)
        .execute(&self.pool)
        .await
        .map_err(|error| upstream("insert scheduled trigger", error))?;

        Ok(())
    }

    async fn begin(&self) -> AppResult<Transaction<'static, Postgres>> {
        self.pool
            .begin()
            .await
            .map_err(|error| upstream("begin transaction", error))
    }
}

pub(crate) fn upstream(action: &str, error: sqlx::Error) -> AppError {
    AppError::Upstream(format!("failed to {action}: {error}"))
}

pub(crate) fn parse_id(kind: &str, value: &str) -> AppResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|error| AppError::Validation(format!("invalid {kind} id '{value}': {error}")))
}

async fn commit(transaction: Transaction<'static, Postgres>) -> AppResult<()> {
    transaction
        .commit()
        .await
        .map_err(|error| upstream("commit transaction", error))
}

#[derive(Debug, FromRow)]
struct EventRow {
    id: Uuid,
    tenant_id: Uuid,
    key: String,
    data: Value,
    created_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct DefinitionRow {
    definition: Value,
}

#[derive(Debug, FromRow)]
struct ScheduledTriggerRow {
    id: Uuid,
    tenant_id: Uuid,
    workflow_version_id: Uuid,
    trigger_at: DateTime<Utc>,
    input: Value,
}

#[derive(Debug, FromRow)]
struct WorkflowRunRow {
    id: Uuid,
    tenant_id: Uuid,
    workflow_version_id: Uuid,
    status: String,
    input: Value,
    trigger: Value,
    error: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, FromRow)]
struct JobRunRow {
    id: Uuid,
    tenant_id: Uuid,
    workflow_run_id: Uuid,
    job_name: String,
    status: String,
    timeout_at: Option<DateTime<Utc>>,
    ticker_id: Option<String>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    cancelled_reason: Option<String>,
}

#[derive(Debug, FromRow)]
struct StepRunRow {
    id: Uuid,
    tenant_id: Uuid,
    job_run_id: Uuid,
    workflow_run_id: Uuid,
    step_readable_id: String,
    action: String,
    parents: Vec<String>,
    status: String,
    input: Value,
    output: Option<Value>,
    input_schema: Value,
    caller_files: Value,
    error: Option<String>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    failed_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    cancelled_reason: Option<String>,
    retry_count: i32,
    schedule_timeout_at: Option<DateTime<Utc>>,
    timeout_at: Option<DateTime<Utc>>,
    requeue_after: Option<DateTime<Utc>>,
    ticker_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct GetGroupKeyRunRow {
    id: Uuid,
    tenant_id: Uuid,
    workflow_run_id: Uuid,
    status: String,
    output: Option<String>,
    error: Option<String>,
    requeue_after: Option<DateTime<Utc>>,
    schedule_timeout_at: Option<DateTime<Utc>>,
    timeout_at: Option<DateTime<Utc>>,
    ticker_id: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, FromRow)]
struct ArchiveRow {
    id: Uuid,
    step_run_id: Uuid,
    archive_order: i64,
    created_at: DateTime<Utc>,
    input: Value,
    output: Option<Value>,
    error: Option<String>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    failed_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    cancelled_reason: Option<String>,
    timeout_at: Option<DateTime<Utc>>,
}

#[derive(Debug, FromRow)]
struct TickerRow {
    id: String,
    created_at: DateTime<Utc>,
    last_heartbeat_at: DateTime<Utc>,
    is_active: bool,
}

#[derive(Debug, FromRow)]
struct TenantRow {
    id: Uuid,
    name: String,
}

const WORKFLOW_RUN_COLUMNS: &str = "id, tenant_id, workflow_version_id, status, input, trigger, \
     error, created_at, started_at, finished_at";

const JOB_RUN_COLUMNS: &str = "id, tenant_id, workflow_run_id, job_name, status, timeout_at, \
     ticker_id, started_at, finished_at, cancelled_at, cancelled_reason";

const STEP_RUN_COLUMNS: &str = "s.id, s.tenant_id, s.job_run_id, s.workflow_run_id, \
     s.step_readable_id, s.action, s.parents, s.status, s.input, s.output, s.input_schema, \
     s.caller_files, s.error, s.started_at, s.finished_at, s.failed_at, s.cancelled_at, \
     s.cancelled_reason, s.retry_count, s.schedule_timeout_at, s.timeout_at, s.requeue_after, \
     s.ticker_id, s.created_at, s.updated_at";

const GET_GROUP_KEY_RUN_COLUMNS: &str = "id, tenant_id, workflow_run_id, status, output, error, \
     requeue_after, schedule_timeout_at, timeout_at, ticker_id, created_at, started_at, \
     finished_at";

const ARCHIVE_COLUMNS: &str = "a.id, a.step_run_id, a.archive_order, a.created_at, a.input, \
     a.output, a.error, a.started_at, a.finished_at, a.failed_at, a.cancelled_at, \
     a.cancelled_reason, a.timeout_at";

impl EventRow {
    fn into_event(self) -> AppResult<Event> {
        Event::new(
            self.id.to_string(),
            TenantId::from_uuid(self.tenant_id),
            self.key,
            self.data,
            self.created_at,
        )
    }
}

impl DefinitionRow {
    fn into_workflow_version(self) -> AppResult<WorkflowVersion> {
        let input: WorkflowVersionInput =
            serde_json::from_value(self.definition).map_err(|error| {
                AppError::Internal(format!("stored workflow version is invalid: {error}"))
            })?;
        WorkflowVersion::new(input)
    }
}

impl ScheduledTriggerRow {
    fn into_trigger(self) -> ScheduledWorkflowTrigger {
        ScheduledWorkflowTrigger {
            id: self.id.to_string(),
            tenant_id: TenantId::from_uuid(self.tenant_id),
            workflow_version_id: self.workflow_version_id.to_string(),
            trigger_at: self.trigger_at,
            input: self.input,
        }
    }
}

impl WorkflowRunRow {
    fn into_workflow_run(self) -> AppResult<WorkflowRun> {
        let trigger: WorkflowRunTrigger = serde_json::from_value(self.trigger).map_err(|error| {
            AppError::Internal(format!(
                "stored trigger of workflow run '{}' is invalid: {error}",
                self.id
            ))
        })?;

        Ok(WorkflowRun {
            id: self.id.to_string(),
            tenant_id: TenantId::from_uuid(self.tenant_id),
            workflow_version_id: self.workflow_version_id.to_string(),
            status: RunStatus::parse(self.status.as_str())?,
            input: self.input,
            trigger,
            error: self.error,
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
        })
    }
}

impl JobRunRow {
    fn into_job_run(self) -> AppResult<JobRun> {
        Ok(JobRun {
            id: self.id.to_string(),
            tenant_id: TenantId::from_uuid(self.tenant_id),
            workflow_run_id: self.workflow_run_id.to_string(),
            job_name: self.job_name,
            status: RunStatus::parse(self.status.as_str())?,
            timeout_at: self.timeout_at,
            ticker_id: self.ticker_id,
            started_at: self.started_at,
            finished_at: self.finished_at,
            cancelled_at: self.cancelled_at,
            cancelled_reason: self.cancelled_reason,
        })
    }
}

impl StepRunRow {
    fn into_step_run(self) -> AppResult<StepRun> {
        Ok(StepRun {
            id: self.id.to_string(),
            tenant_id: TenantId::from_uuid(self.tenant_id),
            job_run_id: self.job_run_id.to_string(),
            workflow_run_id: self.workflow_run_id.to_string(),
            step_readable_id: self.step_readable_id,
            action: self.action,
            parents: self.parents,
            status: StepRunStatus::parse(self.status.as_str())?,
            input: self.input,
            output: self.output,
            input_schema: self.input_schema,
            caller_files: self.caller_files,
            error: self.error,
            started_at: self.started_at,
            finished_at: self.finished_at,
            failed_at: self.failed_at,
            cancelled_at: self.cancelled_at,
            cancelled_reason: self.cancelled_reason,
            retry_count: self.retry_count,
            schedule_timeout_at: self.schedule_timeout_at,
            timeout_at: self.timeout_at,
            requeue_after: self.requeue_after,
            ticker_id: self.ticker_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl GetGroupKeyRunRow {
    fn into_get_group_key_run(self) -> AppResult<GetGroupKeyRun> {
        Ok(GetGroupKeyRun {
            id: self.id.to_string(),
            tenant_id: TenantId::from_uuid(self.tenant_id),
            workflow_run_id: self.workflow_run_id.to_string(),
            status: StepRunStatus::parse(self.status.as_str())?,
            output: self.output,
            error: self.error,
            requeue_after: self.requeue_after,
            schedule_timeout_at: self.schedule_timeout_at,
            timeout_at: self.timeout_at,
            ticker_id: self.ticker_id,
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
        })
    }
}

impl From<ArchiveRow> for StepRunResultArchive {
    fn from(row: ArchiveRow) -> Self {
        Self {
            id: row.id.to_string(),
            step_run_id: row.step_run_id.to_string(),
            created_at: row.created_at,
            order: row.archive_order,
            input: row.input,
            output: row.output,
            error: row.error,
            started_at: row.started_at,
            finished_at: row.finished_at,
            failed_at: row.failed_at,
            cancelled_at: row.cancelled_at,
            cancelled_reason: row.cancelled_reason,
            timeout_at: row.timeout_at,
        }
    }
}

impl From<TickerRow> for Ticker {
    fn from(row: TickerRow) -> Self {
        Self {
            id: row.id,
            created_at: row.created_at,
            last_heartbeat_at: row.last_heartbeat_at,
            is_active: row.is_active,
        }
    }
}

#[async_trait]
impl EventRepository for PostgresRunStore {
    async fn find_event(&self, tenant_id: TenantId, event_id: &str) -> AppResult<Option<Event>> {
        let row = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT id, tenant_id, key, data, created_at
            FROM events
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(parse_id("event", event_id)?)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| upstream("find event", error))?;

        row.map(EventRow::into_event).transpose()
    }
}

#[async_trait]
impl WorkflowRepository for PostgresRunStore {
    async fn list_workflows_for_event(
        &self,
        tenant_id: TenantId,
        event_key: &str,
    ) -> AppResult<Vec<WorkflowVersion>> {
        let rows = sqlx::query_as::<_, DefinitionRow>(
            r#"
            SELECT latest.definition
            FROM (
                SELECT DISTINCT ON (workflow_id) workflow_id, definition
                FROM workflow_versions
                WHERE tenant_id = $1
                ORDER BY workflow_id, version_order DESC
            ) AS latest
            WHERE jsonb_exists(latest.definition -> 'event_triggers', $2)
            ORDER BY latest.workflow_id
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(event_key)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| upstream("list workflows for event", error))?;

        rows.into_iter()
            .map(DefinitionRow::into_workflow_version)
            .collect()
    }

    async fn find_workflow_version(
        &self,
        tenant_id: TenantId,
        workflow_version_id: &str,
    ) -> AppResult<Option<WorkflowVersion>> {
        let row = sqlx::query_as::<_, DefinitionRow>(
            r#"
            SELECT definition
            FROM workflow_versions
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(parse_id("workflow version", workflow_version_id)?)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| upstream("find workflow version", error))?;

        row.map(DefinitionRow::into_workflow_version).transpose()
    }

    async fn find_scheduled_trigger(
        &self,
        tenant_id: TenantId,
        scheduled_workflow_id: &str,
    ) -> AppResult<Option<ScheduledWorkflowTrigger>> {
        let row = sqlx::query_as::<_, ScheduledTriggerRow>(
            r#"
            SELECT id, tenant_id, workflow_version_id, trigger_at, input
            FROM scheduled_workflow_triggers
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(parse_id("scheduled workflow", scheduled_workflow_id)?)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| upstream("find scheduled trigger", error))?;

        Ok(row.map(ScheduledTriggerRow::into_trigger))
    }
}

#[async_trait]
impl TickerRepository for PostgresRunStore {
    async fn create_ticker(&self, ticker_id: &str) -> AppResult<Ticker> {
        let row = sqlx::query_as::<_, TickerRow>(
            r#"
            INSERT INTO tickers (id, created_at, last_heartbeat_at, is_active)
            VALUES ($1, now(), now(), TRUE)
            ON CONFLICT (id)
            DO UPDATE SET last_heartbeat_at = now(), is_active = TRUE
            RETURNING id, created_at, last_heartbeat_at, is_active
            "#,
        )
        .bind(ticker_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|error| upstream("create ticker", error))?;

        Ok(row.into())
    }

    async fn update_ticker_heartbeat(
        &self,
        ticker_id: &str,
        heartbeat_at: DateTime<Utc>,
    ) -> AppResult<Ticker> {
        let row = sqlx::query_as::<_, TickerRow>(
            r#"
            UPDATE tickers
            SET last_heartbeat_at = GREATEST(last_heartbeat_at, $2)
            WHERE id = $1
            RETURNING id, created_at, last_heartbeat_at, is_active
            "#,
        )
        .bind(ticker_id)
        .bind(heartbeat_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| upstream("update ticker heartbeat", error))?
        .ok_or_else(|| AppError::NotFound(format!("ticker '{ticker_id}' does not exist")))?;

        Ok(row.into())
    }

    async fn delete_ticker(&self, ticker_id: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM tickers WHERE id = $1")
            .bind(ticker_id)
            .execute(&self.pool)
            .await
            .map_err(|error| upstream("delete ticker", error))?;

        Ok(())
    }

    async fn list_tickers(&self) -> AppResult<Vec<Ticker>> {
        let rows = sqlx::query_as::<_, TickerRow>(
            r#"
            SELECT id, created_at, last_heartbeat_at, is_active
            FROM tickers
            ORDER BY created_at, id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|error| upstream("list tickers", error))?;

        Ok(rows.into_iter().map(Ticker::from).collect())
    }
}

#[async_trait]
impl TenantRepository for PostgresRunStore {
    async fn list_tenants(&self) -> AppResult<Vec<Tenant>> {
        let rows = sqlx::query_as::<_, TenantRow>(
            r#"
            SELECT id, name
            FROM tenants
            ORDER BY created_at, id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|error| upstream("list tenants", error))?;

        Ok(rows
            .into_iter()
            .map(|row| Tenant {
                id: TenantId::from_uuid(row.id),
                name: row.name,
            })
            .collect())
    }
}
