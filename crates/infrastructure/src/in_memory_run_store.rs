use std::collections::{BTreeMap, HashMap};

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
    StepRunResultArchive, StepRunStatus, Tenant, Ticker, WorkflowRun, WorkflowVersion,
};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::run_records::{
    apply_get_group_key_run_update, apply_step_run_update, archive_of, build_run_tree,
    mark_started, merge_override, merge_schema, starts_work,
};

mod step_runs;
mod workflow_runs;

#[derive(Debug, Default)]
struct RunStoreState {
    tenants: BTreeMap<TenantId, Tenant>,
    events: HashMap<(TenantId, String), Event>,
    workflow_versions: Vec<(TenantId, WorkflowVersion)>,
    scheduled_triggers: HashMap<(TenantId, String), ScheduledWorkflowTrigger>,
    workflow_runs: HashMap<String, WorkflowRun>,
    workflow_run_order: Vec<String>,
    job_runs: HashMap<String, JobRun>,
    workflow_job_runs: HashMap<String, Vec<String>>,
    step_runs: HashMap<String, StepRun>,
    job_step_runs: HashMap<String, Vec<String>>,
    get_group_key_runs: HashMap<String, GetGroupKeyRun>,
    archives: Vec<StepRunResultArchive>,
    next_archive_order: i64,
    tickers: HashMap<String, Ticker>,
}

/// In-memory run store implementation with the same transition semantics as the Postgres store.
#[derive(Debug, Default)]
pub struct InMemoryRunStore {
    state: RwLock<RunStoreState>,
}

impl InMemoryRunStore {
    /// Creates an empty in-memory run store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tenant.
    pub async fn insert_tenant(&self, tenant: Tenant) {
        self.state.write().await.tenants.insert(tenant.id, tenant);
    }

    /// Stores an ingested event.
    pub async fn insert_event(&self, event: Event) {
        self.state
            .write()
            .await
            .events
            .insert((event.tenant_id(), event.id().to_owned()), event);
    }

    /// Publishes a workflow version; later versions of a workflow supersede earlier ones.
    pub async fn insert_workflow_version(&self, tenant_id: TenantId, version: WorkflowVersion) {
        self.state
            .write()
            .await
            .workflow_versions
            .push((tenant_id, version));
    }

    /// Stores a one-off scheduled trigger.
    pub async fn insert_scheduled_trigger(&self, trigger: ScheduledWorkflowTrigger) {
        self.state
            .write()
            .await
            .scheduled_triggers
            .insert((trigger.tenant_id, trigger.id.clone()), trigger);
    }

    /// Removes a scheduled trigger.
    pub async fn delete_scheduled_trigger(&self, tenant_id: TenantId, scheduled_workflow_id: &str) {
        self.state
            .write()
            .await
            .scheduled_triggers
            .remove(&(tenant_id, scheduled_workflow_id.to_owned()));
    }
}

#[async_trait]
impl EventRepository for InMemoryRunStore {
    async fn find_event(&self, tenant_id: TenantId, event_id: &str) -> AppResult<Option<Event>> {
        Ok(self
            .state
            .read()
            .await
            .events
            .get(&(tenant_id, event_id.to_owned()))
            .cloned())
    }
}

#[async_trait]
impl WorkflowRepository for InMemoryRunStore {
    async fn list_workflows_for_event(
        &self,
        tenant_id: TenantId,
        event_key: &str,
    ) -> AppResult<Vec<WorkflowVersion>> {
        let state = self.state.read().await;

        let mut latest: Vec<&WorkflowVersion> = Vec::new();
        for (stored_tenant_id, version) in &state.workflow_versions {
            if *stored_tenant_id != tenant_id {
                continue;
            }

            match latest
                .iter_mut()
                .find(|existing| existing.workflow_id() == version.workflow_id())
            {
                Some(existing) => *existing = version,
                None => latest.push(version),
            }
        }

        Ok(latest
            .into_iter()
            .filter(|version| version.matches_event_key(event_key))
            .cloned()
            .collect())
    }

    async fn find_workflow_version(
        &self,
        tenant_id: TenantId,
        workflow_version_id: &str,
    ) -> AppResult<Option<WorkflowVersion>> {
        Ok(self
            .state
            .read()
            .await
            .workflow_versions
            .iter()
            .find(|(stored_tenant_id, version)| {
                *stored_tenant_id == tenant_id && version.id() == workflow_version_id
            })
            .map(|(_, version)| version.clone()))
    }

    async fn find_scheduled_trigger(
        &self,
        tenant_id: TenantId,
        scheduled_workflow_id: &str,
    ) -> AppResult<Option<ScheduledWorkflowTrigger>> {
        Ok(self
            .state
            .read()
            .await
            .scheduled_triggers
            .get(&(tenant_id, scheduled_workflow_id.to_owned()))
            .cloned())
    }
}

#[async_trait]
impl TickerRepository for InMemoryRunStore {
    async fn create_ticker(&self, ticker_id: &str) -> AppResult<Ticker> {
        let now = Utc::now();
        let ticker = Ticker {
            id: ticker_id.to_owned(),
            created_at: now,
            last_heartbeat_at: now,
            is_active: true,
        };

        self.state
            .write()
            .await
            .tickers
            .insert(ticker_id.to_owned(), ticker.clone());
        Ok(ticker)
    }

    async fn update_ticker_heartbeat(
        &self,
        ticker_id: &str,
        heartbeat_at: DateTime<Utc>,
    ) -> AppResult<Ticker> {
        let mut state = self.state.write().await;
        let ticker = state
            .tickers
            .get_mut(ticker_id)
            .ok_or_else(|| AppError::NotFound(format!("ticker '{ticker_id}' does not exist")))?;

        if heartbeat_at > ticker.last_heartbeat_at {
            ticker.last_heartbeat_at = heartbeat_at;
        }
        Ok(ticker.clone())
    }

    async fn delete_ticker(&self, ticker_id: &str) -> AppResult<()> {
        self.state.write().await.tickers.remove(ticker_id);
        Ok(())
    }

    async fn list_tickers(&self) -> AppResult<Vec<Ticker>> {
        let mut tickers: Vec<Ticker> = self.state.read().await.tickers.values().cloned().collect();
        tickers.sort_by(|left, right| left.created_at.cmp(&right.created_at));
        Ok(tickers)
    }
}

#[async_trait]
impl TenantRepository for InMemoryRunStore {
    async fn list_tenants(&self) -> AppResult<Vec<Tenant>> {
        Ok(self.state.read().await.tenants.values().cloned().collect())
    }
}

fn step_run_not_found(step_run_id: &str) -> AppError {
    AppError::NotFound(format!("step run '{step_run_id}' does not exist"))
}

#[cfg(test)]
mod tests;
