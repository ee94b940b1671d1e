use super::*;

#[async_trait]
impl WorkflowRunRepository for InMemoryRunStore {
    async fn create_workflow_run(
        &self,
        tenant_id: TenantId,
        input: CreateWorkflowRunInput,
    ) -> AppResult<WorkflowRun> {
        let tree = build_run_tree(tenant_id, input, Utc::now())?;
        let mut state = self.state.write().await;

        let workflow_run_id = tree.workflow_run.id.clone();
        for job_run in tree.job_runs {
            state
                .workflow_job_runs
                .entry(workflow_run_id.clone())
                .or_default()
                .push(job_run.id.clone());
            state.job_runs.insert(job_run.id.clone(), job_run);
        }

        for step_run in tree.step_runs {
            state
                .job_step_runs
                .entry(step_run.job_run_id.clone())
                .or_default()
                .push(step_run.id.clone());
            state.step_runs.insert(step_run.id.clone(), step_run);
        }

        if let Some(get_group_key_run) = tree.get_group_key_run {
            state
                .get_group_key_runs
                .insert(get_group_key_run.id.clone(), get_group_key_run);
        }

        state.workflow_run_order.push(workflow_run_id.clone());
        state
            .workflow_runs
            .insert(workflow_run_id, tree.workflow_run.clone());

        Ok(tree.workflow_run)
    }

    async fn find_workflow_run(
        &self,
        tenant_id: TenantId,
        workflow_run_id: &str,
    ) -> AppResult<Option<WorkflowRun>> {
        Ok(self
            .state
            .read()
            .await
            .workflow_runs
            .get(workflow_run_id)
            .filter(|run| run.tenant_id == tenant_id)
            .cloned())
    }

    async fn list_workflow_runs(&self, tenant_id: TenantId) -> AppResult<Vec<WorkflowRun>> {
        let state = self.state.read().await;
        Ok(state
            .workflow_run_order
            .iter()
            .filter_map(|id| state.workflow_runs.get(id))
            .filter(|run| run.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn find_job_run(
        &self,
        tenant_id: TenantId,
        job_run_id: &str,
    ) -> AppResult<Option<JobRun>> {
        Ok(self
            .state
            .read()
            .await
            .job_runs
            .get(job_run_id)
            .filter(|job_run| job_run.tenant_id == tenant_id)
            .cloned())
    }

    async fn list_job_runs(
        &self,
        tenant_id: TenantId,
        workflow_run_id: &str,
    ) -> AppResult<Vec<JobRun>> {
        let state = self.state.read().await;
        Ok(state
            .workflow_job_runs
            .get(workflow_run_id)
            .into_iter()
            .flatten()
            .filter_map(|id| state.job_runs.get(id))
            .filter(|job_run| job_run.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn find_get_group_key_run(
        &self,
        tenant_id: TenantId,
        get_group_key_run_id: &str,
    ) -> AppResult<Option<GetGroupKeyRun>> {
        Ok(self
            .state
            .read()
            .await
            .get_group_key_runs
            .get(get_group_key_run_id)
            .filter(|run| run.tenant_id == tenant_id)
            .cloned())
    }

    async fn queue_get_group_key_run_if_pending(
        &self,
        tenant_id: TenantId,
        get_group_key_run_id: &str,
        input: UpdateGetGroupKeyRunInput,
    ) -> AppResult<GetGroupKeyRun> {
        let mut state = self.state.write().await;
        let get_group_key_run = state
            .get_group_key_runs
            .get_mut(get_group_key_run_id)
            .filter(|run| run.tenant_id == tenant_id)
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "get group key run '{get_group_key_run_id}' does not exist"
                ))
            })?;

        if get_group_key_run.status != StepRunStatus::Pending {
            return Err(AppError::NotPending(format!(
                "get group key run '{get_group_key_run_id}' is {}",
                get_group_key_run.status.as_str()
            )));
        }

        let mut updated = get_group_key_run.clone();
        apply_get_group_key_run_update(&mut updated, &input)?;
        *get_group_key_run = updated.clone();
        Ok(updated)
    }
}
