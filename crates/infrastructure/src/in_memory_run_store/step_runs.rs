use super::*;

fn ordered_step_runs(state: &RunStoreState) -> impl Iterator<Item = &StepRun> {
    state
        .workflow_run_order
        .iter()
        .flat_map(move |workflow_run_id| {
            state
                .workflow_job_runs
                .get(workflow_run_id)
                .into_iter()
                .flatten()
        })
        .flat_map(move |job_run_id| state.job_step_runs.get(job_run_id).into_iter().flatten())
        .filter_map(move |step_run_id| state.step_runs.get(step_run_id))
}

fn tenant_step_run<'a>(
    state: &'a RunStoreState,
    tenant_id: TenantId,
    step_run_id: &str,
) -> AppResult<&'a StepRun> {
    state
        .step_runs
        .get(step_run_id)
        .filter(|step_run| step_run.tenant_id == tenant_id)
        .ok_or_else(|| step_run_not_found(step_run_id))
}

fn requeue_due(step_run: &StepRun, status: StepRunStatus, now: DateTime<Utc>) -> bool {
    step_run.status == status
        && step_run
            .requeue_after
            .is_some_and(|requeue_after| requeue_after <= now)
}

/// Propagates a step run status change to its job run and workflow run.
fn cascade(
    state: &mut RunStoreState,
    step_run: &StepRun,
    status: Option<StepRunStatus>,
    now: DateTime<Utc>,
) -> AppResult<StepRunUpdateInfo> {
    if starts_work(status) {
        if let Some(job_run) = state.job_runs.get_mut(&step_run.job_run_id) {
            mark_started(&mut job_run.status, &mut job_run.started_at, now);
        }
        if let Some(workflow_run) = state.workflow_runs.get_mut(&step_run.workflow_run_id) {
            mark_started(&mut workflow_run.status, &mut workflow_run.started_at, now);
        }
    }

    let mut job_run_final_state = false;
    let mut workflow_run_final_state = false;

    if status.is_some_and(|status| status.is_final()) {
        let job_outcome = RunStatus::aggregate(
            state
                .job_step_runs
                .get(&step_run.job_run_id)
                .into_iter()
                .flatten()
                .map(|id| {
                    state
                        .step_runs
                        .get(id)
                        .and_then(|sibling| sibling.status.final_outcome())
                }),
        );

        if let Some(outcome) = job_outcome
            && let Some(job_run) = state.job_runs.get_mut(&step_run.job_run_id)
            && job_run.status.can_transition_to(outcome)
        {
            job_run.status = outcome;
            job_run.finished_at = Some(now);
            if outcome == RunStatus::Cancelled {
                job_run.cancelled_at = Some(now);
            }
            job_run_final_state = true;
        }
    }

    if job_run_final_state {
        let failure = step_run.error.clone().or_else(|| {
            state
                .job_step_runs
                .get(&step_run.job_run_id)
                .into_iter()
                .flatten()
                .filter_map(|id| state.step_runs.get(id))
                .find(|sibling| sibling.status == StepRunStatus::Failed)
                .and_then(|sibling| sibling.error.clone())
        });
        let workflow_outcome = RunStatus::aggregate(
            state
                .workflow_job_runs
                .get(&step_run.workflow_run_id)
                .into_iter()
                .flatten()
                .map(|id| {
                    state
                        .job_runs
                        .get(id)
                        .and_then(|job_run| job_run.status.is_final().then_some(job_run.status))
                }),
        );

        if let Some(outcome) = workflow_outcome
            && let Some(workflow_run) = state.workflow_runs.get_mut(&step_run.workflow_run_id)
            && workflow_run.status.can_transition_to(outcome)
        {
            workflow_run.status = outcome;
            workflow_run.finished_at = Some(now);
            if outcome == RunStatus::Failed && workflow_run.error.is_none() {
                workflow_run.error = failure;
            }
            workflow_run_final_state = true;
        }
    }

    let workflow_run = state
        .workflow_runs
        .get(&step_run.workflow_run_id)
        .ok_or_else(|| {
            AppError::Internal(format!(
                "workflow run '{}' of step run '{}' is missing",
                step_run.workflow_run_id, step_run.id
            ))
        })?;

    Ok(StepRunUpdateInfo {
        job_run_final_state,
        workflow_run_final_state,
        workflow_run_id: workflow_run.id.clone(),
        workflow_run_status: workflow_run.status,
    })
}

#[async_trait]
impl StepRunRepository for InMemoryRunStore {
    async fn list_all_step_runs(&self, query: AllStepRunsQuery) -> AppResult<Vec<StepRun>> {
        let state = self.state.read().await;
        Ok(ordered_step_runs(&state)
            .filter(|step_run| {
                query
                    .ticker_id
                    .as_deref()
                    .is_none_or(|ticker_id| step_run.ticker_id.as_deref() == Some(ticker_id))
            })
            .filter(|step_run| query.status.is_none_or(|status| step_run.status == status))
            .cloned()
            .collect())
    }

    async fn list_step_runs(
        &self,
        tenant_id: TenantId,
        query: StepRunListQuery,
    ) -> AppResult<Vec<StepRun>> {
        let state = self.state.read().await;
        Ok(ordered_step_runs(&state)
            .filter(|step_run| step_run.tenant_id == tenant_id)
            .filter(|step_run| query.status.is_none_or(|status| step_run.status == status))
            .filter(|step_run| {
                query
                    .job_run_id
                    .as_deref()
                    .is_none_or(|job_run_id| step_run.job_run_id == job_run_id)
            })
            .filter(|step_run| {
                query
                    .workflow_run_id
                    .as_deref()
                    .is_none_or(|workflow_run_id| step_run.workflow_run_id == workflow_run_id)
            })
            .cloned()
            .collect())
    }

    async fn list_step_runs_to_requeue(&self, tenant_id: TenantId) -> AppResult<Vec<StepRun>> {
        let now = Utc::now();
        let state = self.state.read().await;
        Ok(ordered_step_runs(&state)
            .filter(|step_run| step_run.tenant_id == tenant_id)
            .filter(|step_run| requeue_due(step_run, StepRunStatus::Pending, now))
            .cloned()
            .collect())
    }

    async fn list_step_runs_to_reassign(&self, tenant_id: TenantId) -> AppResult<Vec<StepRun>> {
        let now = Utc::now();
        let state = self.state.read().await;
        Ok(ordered_step_runs(&state)
            .filter(|step_run| step_run.tenant_id == tenant_id)
            .filter(|step_run| requeue_due(step_run, StepRunStatus::Assigned, now))
            .cloned()
            .collect())
    }

    async fn list_startable_step_runs(
        &self,
        tenant_id: TenantId,
        job_run_id: &str,
        parent_step_run_id: &str,
    ) -> AppResult<Vec<StepRun>> {
        let state = self.state.read().await;
        let parents_succeeded = |step_run: &StepRun| {
            step_run.parents.iter().all(|parent_id| {
                state
                    .step_runs
                    .get(parent_id)
                    .is_some_and(|parent| parent.status == StepRunStatus::Succeeded)
            })
        };

        Ok(state
            .job_step_runs
            .get(job_run_id)
            .into_iter()
            .flatten()
            .filter_map(|id| state.step_runs.get(id))
            .filter(|step_run| step_run.tenant_id == tenant_id)
            .filter(|step_run| step_run.status == StepRunStatus::Pending)
            .filter(|step_run| step_run.parents.iter().any(|id| id == parent_step_run_id))
            .filter(|step_run| parents_succeeded(step_run))
            .cloned()
            .collect())
    }

    async fn find_step_run(
        &self,
        tenant_id: TenantId,
        step_run_id: &str,
    ) -> AppResult<Option<StepRun>> {
        Ok(self
            .state
            .read()
            .await
            .step_runs
            .get(step_run_id)
            .filter(|step_run| step_run.tenant_id == tenant_id)
            .cloned())
    }

    async fn queue_step_run_if_pending(
        &self,
        tenant_id: TenantId,
        step_run_id: &str,
        input: UpdateStepRunInput,
    ) -> AppResult<StepRun> {
        let now = Utc::now();
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        let mut updated = tenant_step_run(state, tenant_id, step_run_id)?.clone();
        if updated.status != StepRunStatus::Pending {
            return Err(AppError::NotPending(format!(
                "step run '{step_run_id}' is {}",
                updated.status.as_str()
            )));
        }

        apply_step_run_update(&mut updated, &input, now)?;
        state
            .step_runs
            .insert(updated.id.clone(), updated.clone());
        cascade(state, &updated, input.status, now)?;

        Ok(updated)
    }

    async fn update_step_run(
        &self,
        tenant_id: TenantId,
        step_run_id: &str,
        input: UpdateStepRunInput,
    ) -> AppResult<(StepRun, StepRunUpdateInfo)> {
        let now = Utc::now();
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        let current = tenant_step_run(state, tenant_id, step_run_id)?.clone();
        let mut updated = current.clone();
        apply_step_run_update(&mut updated, &input, now)?;

        if input.is_rerun {
            let job_run_finished = state
                .job_runs
                .get(&current.job_run_id)
                .is_some_and(|job_run| job_run.status.is_final());
            if job_run_finished {
                return Err(AppError::Conflict(format!(
                    "job run '{}' is already finished; step run '{step_run_id}' cannot be rerun",
                    current.job_run_id
                )));
            }

            let order = state.next_archive_order;
            state.next_archive_order += 1;
            state.archives.push(archive_of(&current, order, now));
        }

        state
            .step_runs
            .insert(updated.id.clone(), updated.clone());
        let info = cascade(state, &updated, input.status, now)?;

        Ok((updated, info))
    }

    async fn update_step_run_overrides_data(
        &self,
        tenant_id: TenantId,
        step_run_id: &str,
        input: UpdateStepRunOverridesDataInput,
    ) -> AppResult<Value> {
        let mut state = self.state.write().await;
        let step_run = state
            .step_runs
            .get_mut(step_run_id)
            .filter(|step_run| step_run.tenant_id == tenant_id)
            .ok_or_else(|| step_run_not_found(step_run_id))?;

        let (merged, caller_files) =
            merge_override(&step_run.input, &step_run.caller_files, &input)?;
        step_run.input = merged.clone();
        step_run.caller_files = caller_files;
        step_run.updated_at = Utc::now();

        Ok(merged)
    }

    async fn update_step_run_input_schema(
        &self,
        tenant_id: TenantId,
        step_run_id: &str,
        schema: Value,
    ) -> AppResult<Value> {
        let mut state = self.state.write().await;
        let step_run = state
            .step_runs
            .get_mut(step_run_id)
            .filter(|step_run| step_run.tenant_id == tenant_id)
            .ok_or_else(|| step_run_not_found(step_run_id))?;

        let merged = merge_schema(&step_run.input_schema, &schema)?;
        step_run.input_schema = merged.clone();
        step_run.updated_at = Utc::now();

        Ok(merged)
    }

    async fn cancel_pending_step_runs(
        &self,
        tenant_id: TenantId,
        job_run_id: &str,
        reason: &str,
    ) -> AppResult<u64> {
        let now = Utc::now();
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        let step_run_ids = state
            .job_step_runs
            .get(job_run_id)
            .cloned()
            .unwrap_or_default();

        let mut cancelled = 0;
        let mut last_cancelled = None;
        for step_run_id in step_run_ids {
            if let Some(step_run) = state.step_runs.get_mut(&step_run_id)
                && step_run.tenant_id == tenant_id
                && step_run.status == StepRunStatus::Pending
            {
                step_run.status = StepRunStatus::Cancelled;
                step_run.cancelled_at = Some(now);
                step_run.cancelled_reason = Some(reason.to_owned());
                step_run.updated_at = now;
                cancelled += 1;
                last_cancelled = Some(step_run.clone());
            }
        }

        if let Some(step_run) = last_cancelled {
            cascade(state, &step_run, Some(StepRunStatus::Cancelled), now)?;
        }

        Ok(cancelled)
    }

    async fn archive_step_run_result(
        &self,
        tenant_id: TenantId,
        step_run_id: &str,
    ) -> AppResult<StepRunResultArchive> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        let step_run = tenant_step_run(state, tenant_id, step_run_id)?;
        let archive = archive_of(step_run, state.next_archive_order, Utc::now());
        state.next_archive_order += 1;
        state.archives.push(archive.clone());

        Ok(archive)
    }

    async fn list_archived_step_run_results(
        &self,
        tenant_id: TenantId,
        step_run_id: &str,
    ) -> AppResult<Vec<StepRunResultArchive>> {
        let state = self.state.read().await;
        tenant_step_run(&state, tenant_id, step_run_id)?;

        let mut archives: Vec<StepRunResultArchive> = state
            .archives
            .iter()
            .filter(|archive| archive.step_run_id == step_run_id)
            .cloned()
            .collect();
        archives.sort_by(|left, right| right.order.cmp(&left.order));

        Ok(archives)
    }

    async fn get_latest_archived_step_run_result(
        &self,
        tenant_id: TenantId,
        step_run_id: &str,
    ) -> AppResult<Option<StepRunResultArchive>> {
        Ok(self
            .list_archived_step_run_results(tenant_id, step_run_id)
            .await?
            .into_iter()
            .next())
    }
}
