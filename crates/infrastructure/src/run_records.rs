use std::collections::HashMap;

use chrono::{DateTime, TimeDelta, Utc};
use drover_application::{
    CreateWorkflowRunInput, UpdateGetGroupKeyRunInput, UpdateStepRunInput,
    UpdateStepRunOverridesDataInput,
};
use drover_core::{AppError, AppResult, TenantId};
use drover_domain::{
    GetGroupKeyRun, JobRun, RunStatus, StepRun, StepRunResultArchive, StepRunStatus,
    WorkflowRun, parse_timeout,
};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Records created together for one new workflow run.
pub(crate) struct RunTree {
    pub(crate) workflow_run: WorkflowRun,
    pub(crate) job_runs: Vec<JobRun>,
    pub(crate) step_runs: Vec<StepRun>,
    pub(crate) get_group_key_run: Option<GetGroupKeyRun>,
}

/// Builds the pending workflow run, job runs, step runs and group key run.
pub(crate) fn build_run_tree(
    tenant_id: TenantId,
    input: CreateWorkflowRunInput,
    now: DateTime<Utc>,
) -> AppResult<RunTree> {
    let CreateWorkflowRunInput {
        workflow_version,
        input,
        trigger,
    } = input;

    let schedule_timeout_at = workflow_version
        .schedule_timeout()
        .map(|timeout| deadline_after(now, timeout))
        .transpose()?;

    let workflow_run = WorkflowRun {
        id: Uuid::new_v4().to_string(),
        tenant_id,
        workflow_version_id: workflow_version.id().to_owned(),
        status: RunStatus::Pending,
        input: input.clone(),
        trigger,
        error: None,
        created_at: now,
        started_at: None,
        finished_at: None,
    };

    let mut job_runs = Vec::with_capacity(workflow_version.jobs().len());
    let mut step_runs = Vec::new();

    for job in workflow_version.jobs() {
        let job_run = JobRun {
            id: Uuid::new_v4().to_string(),
            tenant_id,
            workflow_run_id: workflow_run.id.clone(),
            job_name: job.name.clone(),
            status: RunStatus::Pending,
            timeout_at: None,
            ticker_id: None,
            started_at: None,
            finished_at: None,
            cancelled_at: None,
            cancelled_reason: None,
        };

        let mut step_run_ids: HashMap<&str, String> = HashMap::new();
        for step in &job.steps {
            let id = Uuid::new_v4().to_string();
            let parents = step
                .parents
                .iter()
                .map(|parent| {
                    step_run_ids.get(parent.as_str()).cloned().ok_or_else(|| {
                        AppError::Validation(format!(
                            "step '{}' references unknown parent '{parent}'",
                            step.readable_id
                        ))
                    })
                })
                .collect::<AppResult<Vec<_>>>()?;
            step_run_ids.insert(step.readable_id.as_str(), id.clone());

            step_runs.push(StepRun {
                id,
                tenant_id,
                job_run_id: job_run.id.clone(),
                workflow_run_id: workflow_run.id.clone(),
                step_readable_id: step.readable_id.clone(),
                action: step.action.clone(),
                parents,
                status: StepRunStatus::Pending,
                input: input.clone(),
                output: None,
                input_schema: Value::Object(Map::new()),
                caller_files: Value::Object(Map::new()),
                error: None,
                started_at: None,
                finished_at: None,
                failed_at: None,
                cancelled_at: None,
                cancelled_reason: None,
                retry_count: 0,
                schedule_timeout_at,
                timeout_at: None,
                requeue_after: None,
                ticker_id: None,
                created_at: now,
                updated_at: now,
            });
        }

        job_runs.push(job_run);
    }

    let get_group_key_run = workflow_version.concurrency().map(|_| GetGroupKeyRun {
        id: Uuid::new_v4().to_string(),
        tenant_id,
        workflow_run_id: workflow_run.id.clone(),
        status: StepRunStatus::Pending,
        output: None,
        error: None,
        requeue_after: None,
        schedule_timeout_at,
        timeout_at: None,
        ticker_id: None,
        created_at: now,
        started_at: None,
        finished_at: None,
    });

    Ok(RunTree {
        workflow_run,
        job_runs,
        step_runs,
        get_group_key_run,
    })
}

fn deadline_after(now: DateTime<Utc>, timeout: &str) -> AppResult<DateTime<Utc>> {
    let delta: TimeDelta = parse_timeout(timeout)?;
    now.checked_add_signed(delta)
        .ok_or_else(|| AppError::Validation(format!("timeout '{timeout}' is out of range")))
}

/// Applies a validated update to a step run record.
pub(crate) fn apply_step_run_update(
    step_run: &mut StepRun,
    input: &UpdateStepRunInput,
    now: DateTime<Utc>,
) -> AppResult<()> {
    if step_run.status.is_final() && !input.is_rerun {
        return Err(AppError::Conflict(format!(
            "step run '{}' is already {}",
            step_run.id,
            step_run.status.as_str()
        )));
    }

    if let Some(status) = input.status
        && !step_run.status.can_transition_to(status, input.is_rerun)
    {
        return Err(AppError::Conflict(format!(
            "step run '{}' cannot move from {} to {}",
            step_run.id,
            step_run.status.as_str(),
            status.as_str()
        )));
    }

    if input.is_rerun {
        step_run.output = None;
        step_run.error = None;
        step_run.started_at = None;
        step_run.finished_at = None;
        step_run.failed_at = None;
        step_run.cancelled_at = None;
        step_run.cancelled_reason = None;
    }

    if let Some(status) = input.status {
        step_run.status = status;
    }
    if let Some(value) = &input.input {
        step_run.input = value.clone();
    }
    if let Some(output) = &input.output {
        step_run.output = Some(output.clone());
    }
    if let Some(error) = &input.error {
        step_run.error = Some(error.clone());
    }
    if let Some(started_at) = input.started_at {
        step_run.started_at = Some(started_at);
    }
    if let Some(finished_at) = input.finished_at {
        step_run.finished_at = Some(finished_at);
    }
    if let Some(failed_at) = input.failed_at {
        step_run.failed_at = Some(failed_at);
    }
    if let Some(cancelled_at) = input.cancelled_at {
        step_run.cancelled_at = Some(cancelled_at);
    }
    if let Some(reason) = &input.cancelled_reason {
        step_run.cancelled_reason = Some(reason.clone());
    }
    if let Some(retry_count) = input.retry_count {
        step_run.retry_count = retry_count;
    }
    if let Some(requeue_after) = input.requeue_after {
        step_run.requeue_after = Some(requeue_after);
    }
    if let Some(schedule_timeout_at) = input.schedule_timeout_at {
        step_run.schedule_timeout_at = Some(schedule_timeout_at);
    }
    if let Some(timeout_at) = input.timeout_at {
        step_run.timeout_at = Some(timeout_at);
    }
    if let Some(ticker_id) = &input.ticker_id {
        step_run.ticker_id = Some(ticker_id.clone());
    }

    step_run.updated_at = now;
    Ok(())
}

/// Applies a validated update to a get-group-key run record.
pub(crate) fn apply_get_group_key_run_update(
    get_group_key_run: &mut GetGroupKeyRun,
    input: &UpdateGetGroupKeyRunInput,
) -> AppResult<()> {
    if let Some(status) = input.status
        && !get_group_key_run.status.can_transition_to(status, false)
    {
        return Err(AppError::Conflict(format!(
            "get group key run '{}' cannot move from {} to {}",
            get_group_key_run.id,
            get_group_key_run.status.as_str(),
            status.as_str()
        )));
    }

    if let Some(status) = input.status {
        get_group_key_run.status = status;
    }
    if let Some(output) = &input.output {
        get_group_key_run.output = Some(output.clone());
    }
    if let Some(error) = &input.error {
        get_group_key_run.error = Some(error.clone());
    }
    if let Some(requeue_after) = input.requeue_after {
        get_group_key_run.requeue_after = Some(requeue_after);
    }
    if let Some(schedule_timeout_at) = input.schedule_timeout_at {
        get_group_key_run.schedule_timeout_at = Some(schedule_timeout_at);
    }
    if let Some(timeout_at) = input.timeout_at {
        get_group_key_run.timeout_at = Some(timeout_at);
    }
    if let Some(ticker_id) = &input.ticker_id {
        get_group_key_run.ticker_id = Some(ticker_id.clone());
    }
    if let Some(started_at) = input.started_at {
        get_group_key_run.started_at = Some(started_at);
    }
    if let Some(finished_at) = input.finished_at {
        get_group_key_run.finished_at = Some(finished_at);
    }

    Ok(())
}

/// Moves a pending job or workflow run to running when work starts.
pub(crate) fn mark_started(status: &mut RunStatus, started_at: &mut Option<DateTime<Utc>>, now: DateTime<Utc>) {
    if *status == RunStatus::Pending {
        *status = RunStatus::Running;
        started_at.get_or_insert(now);
    }
}

/// Returns whether a step status change marks the start of work.
pub(crate) fn starts_work(status: Option<StepRunStatus>) -> bool {
    matches!(status, Some(StepRunStatus::Assigned | StepRunStatus::Running))
}

/// Copies the current result of a step run into an archive record.
pub(crate) fn archive_of(step_run: &StepRun, order: i64, now: DateTime<Utc>) -> StepRunResultArchive {
    StepRunResultArchive {
        id: Uuid::new_v4().to_string(),
        step_run_id: step_run.id.clone(),
        created_at: now,
        order,
        input: step_run.input.clone(),
        output: step_run.output.clone(),
        error: step_run.error.clone(),
        started_at: step_run.started_at,
        finished_at: step_run.finished_at,
        failed_at: step_run.failed_at,
        cancelled_at: step_run.cancelled_at,
        cancelled_reason: step_run.cancelled_reason.clone(),
        timeout_at: step_run.timeout_at,
    }
}

/// Merges an override under `overrides.<key>` into an input document.
pub(crate) fn merge_override(
    input: &Value,
    caller_files: &Value,
    update: &UpdateStepRunOverridesDataInput,
) -> AppResult<(Value, Value)> {
    if update.override_key.trim().is_empty() {
        return Err(AppError::Validation(
            "override key must not be empty".to_owned(),
        ));
    }

    let mut merged = match input {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        _ => {
            return Err(AppError::Validation(
                "step run input must be a JSON object to accept overrides".to_owned(),
            ));
        }
    };

    let overrides = merged
        .entry("overrides")
        .or_insert_with(|| Value::Object(Map::new()));
    if !overrides.is_object() {
        *overrides = Value::Object(Map::new());
    }
    if let Value::Object(overrides) = overrides {
        overrides.insert(update.override_key.clone(), update.data.clone());
    }

    let mut files = match caller_files {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    if let Some(caller_file) = &update.caller_file {
        files.insert(
            update.override_key.clone(),
            Value::String(caller_file.clone()),
        );
    }

    Ok((Value::Object(merged), Value::Object(files)))
}

/// Shallow-merges a schema object into an existing schema document.
pub(crate) fn merge_schema(existing: &Value, schema: &Value) -> AppResult<Value> {
    let Value::Object(additions) = schema else {
        return Err(AppError::Validation(
            "input schema must be a JSON object".to_owned(),
        ));
    };

    let mut merged = match existing {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    for (key, value) in additions {
        merged.insert(key.clone(), value.clone());
    }

    Ok(Value::Object(merged))
}
