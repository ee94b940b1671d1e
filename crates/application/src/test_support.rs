use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use drover_core::{AppError, AppResult, TenantId};
use drover_domain::{
    Event, GetGroupKeyRun, JobDefinition, JobRun, RunStatus, ScheduledWorkflowTrigger,
    StepDefinition, StepRun, StepRunResultArchive, StepRunStatus, Tenant, Ticker, WorkflowRun,
    WorkflowVersion, WorkflowVersionInput,
};
use serde_json::{Value, json};
use tokio::sync::{Mutex, mpsc};
use uuid::Uuid;

use crate::run_ports::{
    AllStepRunsQuery, CreateWorkflowRunInput, EventRepository, StepRunListQuery,
    StepRunRepository, StepRunUpdateInfo, TenantRepository, TickerRepository,
    UpdateGetGroupKeyRunInput, UpdateStepRunInput, UpdateStepRunOverridesDataInput,
    WorkflowRepository, WorkflowRunRepository,
};
use crate::task_ports::{QueueName, SUBSCRIPTION_BUFFER, Task, TaskQueue, TaskSubscription};

#[derive(Default)]
pub(crate) struct FakeTaskQueue {
    subscribers: Mutex<HashMap<String, (String, mpsc::Sender<Task>)>>,
    published: Mutex<Vec<(String, Task)>>,
    unsubscribed: Mutex<Vec<String>>,
    publish_delays: Mutex<HashMap<String, Duration>>,
}

impl FakeTaskQueue {
    /// Makes every publish to `queue` take `delay` before it is recorded.
    pub(crate) async fn delay_publishing(&self, queue: &QueueName, delay: Duration) {
        self.publish_delays
            .lock()
            .await
            .insert(queue.topic(), delay);
    }

    pub(crate) async fn published(&self, queue: &QueueName) -> Vec<Task> {
        let topic = queue.topic();
        self.published
            .lock()
            .await
            .iter()
            .filter(|(published_topic, _)| *published_topic == topic)
            .map(|(_, task)| task.clone())
            .collect()
    }

    pub(crate) async fn published_ids(&self, queue: &QueueName) -> Vec<String> {
        self.published(queue)
            .await
            .into_iter()
            .map(|task| task.id)
            .collect()
    }

    pub(crate) async fn unsubscribed(&self) -> Vec<String> {
        self.unsubscribed.lock().await.clone()
    }
}

#[async_trait]
impl TaskQueue for FakeTaskQueue {
    async fn add_task(&self, queue: &QueueName, task: Task) -> AppResult<()> {
        let topic = queue.topic();
        let delay = self.publish_delays.lock().await.get(&topic).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.published
            .lock()
            .await
            .push((topic.clone(), task.clone()));

        let subscribers = self.subscribers.lock().await;
        if let Some((_, sender)) = subscribers
            .values()
            .find(|(subscribed_topic, _)| *subscribed_topic == topic)
        {
            let _ = sender.try_send(task);
        }
        Ok(())
    }

    async fn subscribe(&self, queue: &QueueName) -> AppResult<TaskSubscription> {
        let (sender, receiver) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let id = Uuid::new_v4().to_string();
        self.subscribers
            .lock()
            .await
            .insert(id.clone(), (queue.topic(), sender));
        Ok(TaskSubscription { id, receiver })
    }

    async fn unsubscribe(&self, subscription_id: &str) -> AppResult<()> {
        self.subscribers.lock().await.remove(subscription_id);
        self.unsubscribed
            .lock()
            .await
            .push(subscription_id.to_owned());
        Ok(())
    }
}

#[derive(Default)]
struct FakeState {
    events: HashMap<String, Event>,
    versions: Vec<(TenantId, WorkflowVersion)>,
    scheduled_triggers: HashMap<String, ScheduledWorkflowTrigger>,
    workflow_runs: Vec<WorkflowRun>,
    job_runs: HashMap<String, JobRun>,
    step_runs: HashMap<String, StepRun>,
    get_group_key_runs: HashMap<String, GetGroupKeyRun>,
    tickers: HashMap<String, Ticker>,
    tenants: Vec<Tenant>,
    failing_versions: HashSet<String>,
    fail_ticker_delete: bool,
    heartbeats: usize,
}

#[derive(Default)]
pub(crate) struct FakeRunStore {
    state: Mutex<FakeState>,
}

impl FakeRunStore {
    pub(crate) async fn insert_event(&self, event: Event) {
        self.state
            .lock()
            .await
            .events
            .insert(event.id().to_owned(), event);
    }

    pub(crate) async fn insert_version(&self, tenant_id: TenantId, version: WorkflowVersion) {
        self.state.lock().await.versions.push((tenant_id, version));
    }

    pub(crate) async fn insert_scheduled_trigger(&self, trigger: ScheduledWorkflowTrigger) {
        self.state
            .lock()
            .await
            .scheduled_triggers
            .insert(trigger.id.clone(), trigger);
    }

    pub(crate) async fn insert_step_run(&self, step_run: StepRun) {
        self.state
            .lock()
            .await
            .step_runs
            .insert(step_run.id.clone(), step_run);
    }

    pub(crate) async fn insert_job_run(&self, job_run: JobRun) {
        self.state
            .lock()
            .await
            .job_runs
            .insert(job_run.id.clone(), job_run);
    }

    pub(crate) async fn insert_tenant(&self, tenant: Tenant) {
        self.state.lock().await.tenants.push(tenant);
    }

    pub(crate) async fn fail_runs_for_version(&self, workflow_version_id: &str) {
        self.state
            .lock()
            .await
            .failing_versions
            .insert(workflow_version_id.to_owned());
    }

    pub(crate) async fn fail_ticker_delete(&self) {
        self.state.lock().await.fail_ticker_delete = true;
    }

    pub(crate) async fn workflow_runs(&self) -> Vec<WorkflowRun> {
        self.state.lock().await.workflow_runs.clone()
    }

    pub(crate) async fn ticker(&self, ticker_id: &str) -> Option<Ticker> {
        self.state.lock().await.tickers.get(ticker_id).cloned()
    }

    pub(crate) async fn heartbeats(&self) -> usize {
        self.state.lock().await.heartbeats
    }
}

fn unsupported<T>(operation: &str) -> AppResult<T> {
    Err(AppError::Internal(format!(
        "{operation} is not supported by the fake run store"
    )))
}

#[async_trait]
impl EventRepository for FakeRunStore {
    async fn find_event(&self, _tenant_id: TenantId, event_id: &str) -> AppResult<Option<Event>> {
        Ok(self.state.lock().await.events.get(event_id).cloned())
    }
}

#[async_trait]
impl WorkflowRepository for FakeRunStore {
    async fn list_workflows_for_event(
        &self,
        tenant_id: TenantId,
        event_key: &str,
    ) -> AppResult<Vec<WorkflowVersion>> {
        Ok(self
            .state
            .lock()
            .await
            .versions
            .iter()
            .filter(|(stored_tenant_id, version)| {
                *stored_tenant_id == tenant_id && version.matches_event_key(event_key)
            })
            .map(|(_, version)| version.clone())
            .collect())
    }

    async fn find_workflow_version(
        &self,
        tenant_id: TenantId,
        workflow_version_id: &str,
    ) -> AppResult<Option<WorkflowVersion>> {
        Ok(self
            .state
            .lock()
            .await
            .versions
            .iter()
            .find(|(stored_tenant_id, version)| {
                *stored_tenant_id == tenant_id && version.id() == workflow_version_id
            })
            .map(|(_, version)| version.clone()))
    }

    async fn find_scheduled_trigger(
        &self,
        _tenant_id: TenantId,
        scheduled_workflow_id: &str,
    ) -> AppResult<Option<ScheduledWorkflowTrigger>> {
        Ok(self
            .state
            .lock()
            .await
            .scheduled_triggers
            .get(scheduled_workflow_id)
            .cloned())
    }
}

#[async_trait]
impl WorkflowRunRepository for FakeRunStore {
    async fn create_workflow_run(
        &self,
        tenant_id: TenantId,
        input: CreateWorkflowRunInput,
    ) -> AppResult<WorkflowRun> {
        let mut state = self.state.lock().await;
        if state
            .failing_versions
            .contains(input.workflow_version.id())
        {
            return Err(AppError::Upstream(format!(
                "failed to create run for '{}'",
                input.workflow_version.id()
            )));
        }

        let workflow_run = WorkflowRun {
            id: Uuid::new_v4().to_string(),
            tenant_id,
            workflow_version_id: input.workflow_version.id().to_owned(),
            status: RunStatus::Pending,
            input: input.input,
            trigger: input.trigger,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        };
        state.workflow_runs.push(workflow_run.clone());
        Ok(workflow_run)
    }

    async fn find_workflow_run(
        &self,
        _tenant_id: TenantId,
        workflow_run_id: &str,
    ) -> AppResult<Option<WorkflowRun>> {
        Ok(self
            .state
            .lock()
            .await
            .workflow_runs
            .iter()
            .find(|run| run.id == workflow_run_id)
            .cloned())
    }

    async fn list_workflow_runs(&self, tenant_id: TenantId) -> AppResult<Vec<WorkflowRun>> {
        Ok(self
            .state
            .lock()
            .await
            .workflow_runs
            .iter()
            .filter(|run| run.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn find_job_run(
        &self,
        _tenant_id: TenantId,
        job_run_id: &str,
    ) -> AppResult<Option<JobRun>> {
        Ok(self.state.lock().await.job_runs.get(job_run_id).cloned())
    }

    async fn list_job_runs(
        &self,
        _tenant_id: TenantId,
        workflow_run_id: &str,
    ) -> AppResult<Vec<JobRun>> {
        Ok(self
            .state
            .lock()
            .await
            .job_runs
            .values()
            .filter(|job_run| job_run.workflow_run_id == workflow_run_id)
            .cloned()
            .collect())
    }

    async fn find_get_group_key_run(
        &self,
        _tenant_id: TenantId,
        get_group_key_run_id: &str,
    ) -> AppResult<Option<GetGroupKeyRun>> {
        Ok(self
            .state
            .lock()
            .await
            .get_group_key_runs
            .get(get_group_key_run_id)
            .cloned())
    }

    async fn queue_get_group_key_run_if_pending(
        &self,
        _tenant_id: TenantId,
        _get_group_key_run_id: &str,
        _input: UpdateGetGroupKeyRunInput,
    ) -> AppResult<GetGroupKeyRun> {
        unsupported("queue_get_group_key_run_if_pending")
    }
}

#[async_trait]
impl StepRunRepository for FakeRunStore {
    async fn list_all_step_runs(&self, _query: AllStepRunsQuery) -> AppResult<Vec<StepRun>> {
        unsupported("list_all_step_runs")
    }

    async fn list_step_runs(
        &self,
        _tenant_id: TenantId,
        _query: StepRunListQuery,
    ) -> AppResult<Vec<StepRun>> {
        unsupported("list_step_runs")
    }

    async fn list_step_runs_to_requeue(&self, _tenant_id: TenantId) -> AppResult<Vec<StepRun>> {
        unsupported("list_step_runs_to_requeue")
    }

    async fn list_step_runs_to_reassign(&self, _tenant_id: TenantId) -> AppResult<Vec<StepRun>> {
        unsupported("list_step_runs_to_reassign")
    }

    async fn list_startable_step_runs(
        &self,
        _tenant_id: TenantId,
        _job_run_id: &str,
        _parent_step_run_id: &str,
    ) -> AppResult<Vec<StepRun>> {
        unsupported("list_startable_step_runs")
    }

    async fn find_step_run(
        &self,
        _tenant_id: TenantId,
        step_run_id: &str,
    ) -> AppResult<Option<StepRun>> {
        Ok(self.state.lock().await.step_runs.get(step_run_id).cloned())
    }

    async fn queue_step_run_if_pending(
        &self,
        _tenant_id: TenantId,
        _step_run_id: &str,
        _input: UpdateStepRunInput,
    ) -> AppResult<StepRun> {
        unsupported("queue_step_run_if_pending")
    }

    async fn update_step_run(
        &self,
        _tenant_id: TenantId,
        _step_run_id: &str,
        _input: UpdateStepRunInput,
    ) -> AppResult<(StepRun, StepRunUpdateInfo)> {
        unsupported("update_step_run")
    }

    async fn update_step_run_overrides_data(
        &self,
        _tenant_id: TenantId,
        _step_run_id: &str,
        _input: UpdateStepRunOverridesDataInput,
    ) -> AppResult<Value> {
        unsupported("update_step_run_overrides_data")
    }

    async fn update_step_run_input_schema(
        &self,
        _tenant_id: TenantId,
        _step_run_id: &str,
        _schema: Value,
    ) -> AppResult<Value> {
        unsupported("update_step_run_input_schema")
    }

    async fn cancel_pending_step_runs(
        &self,
        _tenant_id: TenantId,
        _job_run_id: &str,
        _reason: &str,
    ) -> AppResult<u64> {
        unsupported("cancel_pending_step_runs")
    }

    async fn archive_step_run_result(
        &self,
        _tenant_id: TenantId,
        _step_run_id: &str,
    ) -> AppResult<StepRunResultArchive> {
        unsupported("archive_step_run_result")
    }

    async fn list_archived_step_run_results(
        &self,
        _tenant_id: TenantId,
        _step_run_id: &str,
    ) -> AppResult<Vec<StepRunResultArchive>> {
        unsupported("list_archived_step_run_results")
    }

    async fn get_latest_archived_step_run_result(
        &self,
        _tenant_id: TenantId,
        _step_run_id: &str,
    ) -> AppResult<Option<StepRunResultArchive>> {
        unsupported("get_latest_archived_step_run_result")
    }
}

#[async_trait]
impl TickerRepository for FakeRunStore {
    async fn create_ticker(&self, ticker_id: &str) -> AppResult<Ticker> {
        let now = Utc::now();
        let ticker = Ticker {
            id: ticker_id.to_owned(),
            created_at: now,
            last_heartbeat_at: now,
            is_active: true,
        };
        self.state
            .lock()
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
        let mut state = self.state.lock().await;
        state.heartbeats += 1;
        let ticker = state
            .tickers
            .get_mut(ticker_id)
            .ok_or_else(|| AppError::NotFound(format!("ticker '{ticker_id}' does not exist")))?;
        ticker.last_heartbeat_at = ticker.last_heartbeat_at.max(heartbeat_at);
        Ok(ticker.clone())
    }

    async fn delete_ticker(&self, ticker_id: &str) -> AppResult<()> {
        let mut state = self.state.lock().await;
        if state.fail_ticker_delete {
            return Err(AppError::Upstream("ticker delete failed".to_owned()));
        }
        state.tickers.remove(ticker_id);
        Ok(())
    }

    async fn list_tickers(&self) -> AppResult<Vec<Ticker>> {
        Ok(self.state.lock().await.tickers.values().cloned().collect())
    }
}

#[async_trait]
impl TenantRepository for FakeRunStore {
    async fn list_tenants(&self) -> AppResult<Vec<Tenant>> {
        Ok(self.state.lock().await.tenants.clone())
    }
}

pub(crate) fn workflow_version(
    workflow_name: &str,
    event_triggers: &[&str],
    cron_triggers: &[&str],
) -> WorkflowVersion {
    let version = WorkflowVersion::new(WorkflowVersionInput {
        id: Uuid::new_v4().to_string(),
        workflow_id: Uuid::new_v4().to_string(),
        workflow_name: workflow_name.to_owned(),
        version: "v1".to_owned(),
        event_triggers: event_triggers.iter().map(|key| (*key).to_owned()).collect(),
        cron_triggers: cron_triggers.iter().map(|cron| (*cron).to_owned()).collect(),
        schedule_timeout: None,
        concurrency: None,
        jobs: vec![JobDefinition {
            name: "main".to_owned(),
            timeout: None,
            steps: vec![StepDefinition {
                readable_id: "first".to_owned(),
                action: "default:first".to_owned(),
                timeout: Some("60s".to_owned()),
                retries: 0,
                parents: Vec::new(),
            }],
        }],
    });
    assert!(version.is_ok());
    version.unwrap_or_else(|_| unreachable!())
}

pub(crate) fn step_run(tenant_id: TenantId, status: StepRunStatus) -> StepRun {
    let now = Utc::now();
    StepRun {
        id: Uuid::new_v4().to_string(),
        tenant_id,
        job_run_id: Uuid::new_v4().to_string(),
        workflow_run_id: Uuid::new_v4().to_string(),
        step_readable_id: "first".to_owned(),
        action: "default:first".to_owned(),
        parents: Vec::new(),
        status,
        input: json!({}),
        output: None,
        input_schema: json!({}),
        caller_files: json!({}),
        error: None,
        started_at: None,
        finished_at: None,
        failed_at: None,
        cancelled_at: None,
        cancelled_reason: None,
        retry_count: 0,
        schedule_timeout_at: None,
        timeout_at: None,
        requeue_after: None,
        ticker_id: None,
        created_at: now,
        updated_at: now,
    }
}

pub(crate) fn job_run(tenant_id: TenantId, status: RunStatus) -> JobRun {
    JobRun {
        id: Uuid::new_v4().to_string(),
        tenant_id,
        workflow_run_id: Uuid::new_v4().to_string(),
        job_name: "main".to_owned(),
        status,
        timeout_at: None,
        ticker_id: None,
        started_at: None,
        finished_at: None,
        cancelled_at: None,
        cancelled_reason: None,
    }
}
