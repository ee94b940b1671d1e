use std::sync::Arc;

use async_trait::async_trait;
use drover_core::{AppError, AppResult, TenantId};
use drover_domain::{RunStatus, parse_cron};
use tracing::{debug, error, info};

use crate::events_controller::workflow_run_queued_task;
use crate::run_ports::{
    CreateWorkflowRunInput, StepRunRepository, WorkflowRepository, WorkflowRunRepository,
};
use crate::task_consumer::TaskHandler;
use crate::task_ports::{
    CronPayload, GetGroupKeyRunIdPayload, GetGroupKeyRunTimedOutPayload,
    GetGroupKeyRunTimeoutPayload, JobRunIdPayload, JobRunTimedOutPayload, JobRunTimeoutPayload,
    QueueName, ScheduledWorkflowPayload, StepRunIdPayload, StepRunTimedOutPayload,
    StepRunTimeoutPayload, Task, TaskKind, TaskQueue, TenantMetadata, decode_task,
};

use super::timers::{TimerKey, TimerKind, TimerRegistry};

/// Run store and queue access used when timers fire.
pub(super) struct TimerActions {
    pub(super) ticker_id: String,
    pub(super) task_queue: Arc<dyn TaskQueue>,
    pub(super) step_run_repository: Arc<dyn StepRunRepository>,
    pub(super) workflow_run_repository: Arc<dyn WorkflowRunRepository>,
    pub(super) workflow_repository: Arc<dyn WorkflowRepository>,
}

impl TimerActions {
    async fn step_run_timed_out(&self, tenant_id: TenantId, step_run_id: &str) -> AppResult<()> {
        let Some(step_run) = self
            .step_run_repository
            .find_step_run(tenant_id, step_run_id)
            .await?
        else {
            debug!(step_run_id = %step_run_id, "timed out step run no longer exists");
            return Ok(());
        };

        if !step_run.status.is_outstanding() {
            debug!(
                step_run_id = %step_run_id,
                status = step_run.status.as_str(),
                "step run finished before its timeout"
            );
            return Ok(());
        }

        let task = Task::encode(
            TaskKind::StepRunTimedOut,
            &StepRunTimedOutPayload {
                step_run_id: step_run.id.clone(),
                job_run_id: step_run.job_run_id.clone(),
            },
            &TenantMetadata::new(tenant_id),
        )?;
        self.task_queue
            .add_task(&QueueName::JobProcessing, task)
            .await
    }

    async fn get_group_key_run_timed_out(
        &self,
        tenant_id: TenantId,
        get_group_key_run_id: &str,
    ) -> AppResult<()> {
        let Some(get_group_key_run) = self
            .workflow_run_repository
            .find_get_group_key_run(tenant_id, get_group_key_run_id)
            .await?
        else {
            debug!(
                get_group_key_run_id = %get_group_key_run_id,
                "timed out get group key run no longer exists"
            );
            return Ok(());
        };

        if !get_group_key_run.status.is_outstanding() {
            return Ok(());
        }

        let task = Task::encode(
            TaskKind::GetGroupKeyRunTimedOut,
            &GetGroupKeyRunTimedOutPayload {
                get_group_key_run_id: get_group_key_run.id.clone(),
                workflow_run_id: get_group_key_run.workflow_run_id.clone(),
            },
            &TenantMetadata::new(tenant_id),
        )?;
        self.task_queue
            .add_task(&QueueName::WorkflowProcessing, task)
            .await
    }

    async fn job_run_timed_out(&self, tenant_id: TenantId, job_run_id: &str) -> AppResult<()> {
        let Some(job_run) = self
            .workflow_run_repository
            .find_job_run(tenant_id, job_run_id)
            .await?
        else {
            debug!(job_run_id = %job_run_id, "timed out job run no longer exists");
            return Ok(());
        };

        if !matches!(job_run.status, RunStatus::Pending | RunStatus::Running) {
            return Ok(());
        }

        let task = Task::encode(
            TaskKind::JobRunTimedOut,
            &JobRunTimedOutPayload {
                job_run_id: job_run.id.clone(),
            },
            &TenantMetadata::new(tenant_id),
        )?;
        self.task_queue
            .add_task(&QueueName::JobProcessing, task)
            .await
    }

    async fn cron_ticked(&self, tenant_id: TenantId, payload: &CronPayload) -> AppResult<()> {
        let Some(workflow_version) = self
            .workflow_repository
            .find_workflow_version(tenant_id, payload.workflow_version_id.as_str())
            .await?
        else {
            debug!(
                workflow_version_id = %payload.workflow_version_id,
                "cron workflow version no longer exists"
            );
            return Ok(());
        };

        if !workflow_version.has_cron_trigger(payload.cron.as_str()) {
            debug!(
                workflow_version_id = %payload.workflow_version_id,
                cron = %payload.cron,
                "cron trigger was removed from workflow version"
            );
            return Ok(());
        }

        let input = CreateWorkflowRunInput::from_cron(
            &workflow_version,
            payload.cron_parent_id.as_str(),
            payload.cron.as_str(),
        );
        self.start_workflow_run(tenant_id, input).await
    }

    async fn scheduled_workflow_triggered(
        &self,
        tenant_id: TenantId,
        payload: &ScheduledWorkflowPayload,
    ) -> AppResult<()> {
        let Some(trigger) = self
            .workflow_repository
            .find_scheduled_trigger(tenant_id, payload.scheduled_workflow_id.as_str())
            .await?
        else {
            debug!(
                scheduled_workflow_id = %payload.scheduled_workflow_id,
                "scheduled trigger no longer exists"
            );
            return Ok(());
        };

        let workflow_version = self
            .workflow_repository
            .find_workflow_version(tenant_id, trigger.workflow_version_id.as_str())
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "workflow version '{}' does not exist",
                    trigger.workflow_version_id
                ))
            })?;

        let input = CreateWorkflowRunInput::from_schedule(&workflow_version, &trigger);
        self.start_workflow_run(tenant_id, input).await
    }

    async fn start_workflow_run(
        &self,
        tenant_id: TenantId,
        input: CreateWorkflowRunInput,
    ) -> AppResult<()> {
        let workflow_run = self
            .workflow_run_repository
            .create_workflow_run(tenant_id, input)
            .await?;

        let task = workflow_run_queued_task(tenant_id, workflow_run.id.as_str())?;
        self.task_queue
            .add_task(&QueueName::WorkflowProcessing, task)
            .await?;

        info!(
            ticker_id = %self.ticker_id,
            workflow_run_id = %workflow_run.id,
            trigger = workflow_run.trigger.trigger_type(),
            "timer started workflow run"
        );
        Ok(())
    }

    fn report(&self, kind: TimerKind, id: &str, result: AppResult<()>) {
        if let Err(error) = result {
            error!(
                ticker_id = %self.ticker_id,
                timer = ?kind,
                id = %id,
                error = %error,
                "timer action failed"
            );
        }
    }
}

/// Handler for the tasks delivered on a ticker's own queue.
pub(super) struct TickerWorker {
    pub(super) actions: Arc<TimerActions>,
    pub(super) timers: Arc<TimerRegistry>,
}

impl TickerWorker {
    fn schedule_step_run_timeout(&self, task: &Task) -> AppResult<()> {
        let (payload, metadata) = decode_task::<StepRunTimeoutPayload, TenantMetadata>(task)?;
        let tenant_id = metadata.tenant_id()?;
        let actions = Arc::clone(&self.actions);
        let step_run_id = payload.step_run_id;

        self.timers.schedule_once(
            TimerKey::new(TimerKind::StepRunTimeout, step_run_id.as_str()),
            payload.timeout_at,
            move || async move {
                let result = actions
                    .step_run_timed_out(tenant_id, step_run_id.as_str())
                    .await;
                actions.report(TimerKind::StepRunTimeout, step_run_id.as_str(), result);
            },
        );
        Ok(())
    }

    fn cancel_step_run_timeout(&self, task: &Task) -> AppResult<()> {
        let (payload, _) = decode_task::<StepRunIdPayload, TenantMetadata>(task)?;
        self.cancel(TimerKey::new(TimerKind::StepRunTimeout, payload.step_run_id));
        Ok(())
    }

    fn schedule_get_group_key_run_timeout(&self, task: &Task) -> AppResult<()> {
        let (payload, metadata) =
            decode_task::<GetGroupKeyRunTimeoutPayload, TenantMetadata>(task)?;
        let tenant_id = metadata.tenant_id()?;
        let actions = Arc::clone(&self.actions);
        let get_group_key_run_id = payload.get_group_key_run_id;

        self.timers.schedule_once(
            TimerKey::new(
                TimerKind::GetGroupKeyRunTimeout,
                get_group_key_run_id.as_str(),
            ),
            payload.timeout_at,
            move || async move {
                let result = actions
                    .get_group_key_run_timed_out(tenant_id, get_group_key_run_id.as_str())
                    .await;
                actions.report(
                    TimerKind::GetGroupKeyRunTimeout,
                    get_group_key_run_id.as_str(),
                    result,
                );
            },
        );
        Ok(())
    }

    fn cancel_get_group_key_run_timeout(&self, task: &Task) -> AppResult<()> {
        let (payload, _) = decode_task::<GetGroupKeyRunIdPayload, TenantMetadata>(task)?;
        self.cancel(TimerKey::new(
            TimerKind::GetGroupKeyRunTimeout,
            payload.get_group_key_run_id,
        ));
        Ok(())
    }

    fn schedule_job_run_timeout(&self, task: &Task) -> AppResult<()> {
        let (payload, metadata) = decode_task::<JobRunTimeoutPayload, TenantMetadata>(task)?;
        let tenant_id = metadata.tenant_id()?;
        let actions = Arc::clone(&self.actions);
        let job_run_id = payload.job_run_id;

        self.timers.schedule_once(
            TimerKey::new(TimerKind::JobRunTimeout, job_run_id.as_str()),
            payload.timeout_at,
            move || async move {
                let result = actions
                    .job_run_timed_out(tenant_id, job_run_id.as_str())
                    .await;
                actions.report(TimerKind::JobRunTimeout, job_run_id.as_str(), result);
            },
        );
        Ok(())
    }

    fn cancel_job_run_timeout(&self, task: &Task) -> AppResult<()> {
        let (payload, _) = decode_task::<JobRunIdPayload, TenantMetadata>(task)?;
        self.cancel(TimerKey::new(TimerKind::JobRunTimeout, payload.job_run_id));
        Ok(())
    }

    fn schedule_cron(&self, task: &Task) -> AppResult<()> {
        let (payload, metadata) = decode_task::<CronPayload, TenantMetadata>(task)?;
        let tenant_id = metadata.tenant_id()?;
        let schedule = parse_cron(payload.cron.as_str())?;
        let actions = Arc::clone(&self.actions);
        let payload = Arc::new(payload);

        self.timers.schedule_recurring(
            TimerKey::new(TimerKind::Cron, payload.timer_id()),
            schedule,
            move || {
                let actions = Arc::clone(&actions);
                let payload = Arc::clone(&payload);
                async move {
                    let result = actions.cron_ticked(tenant_id, &payload).await;
                    actions.report(TimerKind::Cron, payload.timer_id().as_str(), result);
                }
            },
        );
        Ok(())
    }

    fn cancel_cron(&self, task: &Task) -> AppResult<()> {
        let (payload, _) = decode_task::<CronPayload, TenantMetadata>(task)?;
        self.cancel(TimerKey::new(TimerKind::Cron, payload.timer_id()));
        Ok(())
    }

    fn schedule_workflow(&self, task: &Task) -> AppResult<()> {
        let (payload, metadata) = decode_task::<ScheduledWorkflowPayload, TenantMetadata>(task)?;
        let tenant_id = metadata.tenant_id()?;
        let actions = Arc::clone(&self.actions);
        let trigger_at = payload.trigger_at;
        let key = TimerKey::new(
            TimerKind::ScheduledWorkflow,
            payload.scheduled_workflow_id.as_str(),
        );

        self.timers.schedule_once(key, trigger_at, move || async move {
            let result = actions
                .scheduled_workflow_triggered(tenant_id, &payload)
                .await;
            actions.report(
                TimerKind::ScheduledWorkflow,
                payload.scheduled_workflow_id.as_str(),
                result,
            );
        });
        Ok(())
    }

    fn cancel_workflow(&self, task: &Task) -> AppResult<()> {
        let (payload, _) = decode_task::<ScheduledWorkflowPayload, TenantMetadata>(task)?;
        self.cancel(TimerKey::new(
            TimerKind::ScheduledWorkflow,
            payload.scheduled_workflow_id,
        ));
        Ok(())
    }

    fn cancel(&self, key: TimerKey) {
        if !self.timers.cancel(&key) {
            debug!(
                ticker_id = %self.actions.ticker_id,
                timer = ?key.kind,
                id = %key.id,
                "no armed timer to cancel"
            );
        }
    }
}

#[async_trait]
impl TaskHandler for TickerWorker {
    async fn handle_task(&self, task: Task) -> AppResult<()> {
        match TaskKind::parse(task.id.as_str())? {
            TaskKind::ScheduleStepRunTimeout => self.schedule_step_run_timeout(&task),
            TaskKind::CancelStepRunTimeout => self.cancel_step_run_timeout(&task),
            TaskKind::ScheduleGetGroupKeyRunTimeout => {
                self.schedule_get_group_key_run_timeout(&task)
            }
            TaskKind::CancelGetGroupKeyRunTimeout => self.cancel_get_group_key_run_timeout(&task),
            TaskKind::ScheduleJobRunTimeout => self.schedule_job_run_timeout(&task),
            TaskKind::CancelJobRunTimeout => self.cancel_job_run_timeout(&task),
            TaskKind::ScheduleCron => self.schedule_cron(&task),
            TaskKind::CancelCron => self.cancel_cron(&task),
            TaskKind::ScheduleWorkflow => self.schedule_workflow(&task),
            TaskKind::CancelWorkflow => self.cancel_workflow(&task),
            other => Err(AppError::UnknownTask(format!(
                "ticker does not handle '{}'",
                other.as_str()
            ))),
        }
    }
}
