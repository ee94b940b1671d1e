use super::*;

#[async_trait]
impl WorkflowRunRepository for PostgresRunStore {
    async fn create_workflow_run(
        &self,
        tenant_id: TenantId,
        input: CreateWorkflowRunInput,
    ) -> AppResult<WorkflowRun> {
        let tree = build_run_tree(tenant_id, input, Utc::now())?;
        let trigger = serde_json::to_value(&tree.workflow_run.trigger).map_err(|error| {
            AppError::Internal(format!("failed to serialize workflow run trigger: {error}"))
        })?;

        let mut transaction = self.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO workflow_runs (
                id,
                tenant_id,
                workflow_version_id,
                status,
                input,
                trigger,
                created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(parse_id("workflow run", &tree.workflow_run.id)?)
        .bind(tenant_id.as_uuid())
        .bind(parse_id(
            "workflow version",
            &tree.workflow_run.workflow_version_id,
        )?)
        .bind(tree.workflow_run.status.as_str())
        .bind(&tree.workflow_run.input)
        .bind(trigger)
        .bind(tree.workflow_run.created_at)
        .execute(&mut *transaction)
        .await
        .map_err(|error| upstream("insert workflow run", error))?;

        for (job_order, job_run) in tree.job_runs.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO job_runs (id, tenant_id, workflow_run_id, job_order, job_name, status)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(parse_id("job run", &job_run.id)?)
            .bind(tenant_id.as_uuid())
            .bind(parse_id("workflow run", &job_run.workflow_run_id)?)
            .bind(position(job_order)?)
            .bind(job_run.job_name.as_str())
            .bind(job_run.status.as_str())
            .execute(&mut *transaction)
            .await
            .map_err(|error| upstream("insert job run", error))?;
        }

        for (step_order, step_run) in tree.step_runs.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO step_runs (
                    id,
                    tenant_id,
                    job_run_id,
                    workflow_run_id,
                    step_order,
                    step_readable_id,
                    action,
                    parents,
                    status,
                    input,
                    input_schema,
                    caller_files,
                    schedule_timeout_at,
                    created_at,
                    updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
                "#,
            )
            .bind(parse_id("step run", &step_run.id)?)
            .bind(tenant_id.as_uuid())
            .bind(parse_id("job run", &step_run.job_run_id)?)
            .bind(parse_id("workflow run", &step_run.workflow_run_id)?)
            .bind(position(step_order)?)
            .bind(step_run.step_readable_id.as_str())
            .bind(step_run.action.as_str())
            .bind(&step_run.parents)
            .bind(step_run.status.as_str())
            .bind(&step_run.input)
            .bind(&step_run.input_schema)
            .bind(&step_run.caller_files)
            .bind(step_run.schedule_timeout_at)
            .bind(step_run.created_at)
            .bind(step_run.updated_at)
            .execute(&mut *transaction)
            .await
            .map_err(|error| upstream("insert step run", error))?;
        }

        if let Some(get_group_key_run) = &tree.get_group_key_run {
            sqlx::query(
                r#"
                INSERT INTO get_group_key_runs (
                    id,
                    tenant_id,
                    workflow_run_id,
                    status,
                    schedule_timeout_at,
                    created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(parse_id("get group key run", &get_group_key_run.id)?)
            .bind(tenant_id.as_uuid())
            .bind(parse_id(
                "workflow run",
                &get_group_key_run.workflow_run_id,
            )?)
            .bind(get_group_key_run.status.as_str())
            .bind(get_group_key_run.schedule_timeout_at)
            .bind(get_group_key_run.created_at)
            .execute(&mut *transaction)
            .await
            .map_err(|error| upstream("insert get group key run", error))?;
        }

        commit(transaction).await?;
        Ok(tree.workflow_run)
    }

    async fn find_workflow_run(
        &self,
        tenant_id: TenantId,
        workflow_run_id: &str,
    ) -> AppResult<Option<WorkflowRun>> {
        let sql = format!(
            "SELECT {WORKFLOW_RUN_COLUMNS} FROM workflow_runs WHERE tenant_id = $1 AND id = $2"
        );
        let row = sqlx::query_as::<_, WorkflowRunRow>(&sql)
            .bind(tenant_id.as_uuid())
            .bind(parse_id("workflow run", workflow_run_id)?)
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| upstream("find workflow run", error))?;

        row.map(WorkflowRunRow::into_workflow_run).transpose()
    }

    async fn list_workflow_runs(&self, tenant_id: TenantId) -> AppResult<Vec<WorkflowRun>> {
        let sql = format!(
            "SELECT {WORKFLOW_RUN_COLUMNS} FROM workflow_runs WHERE tenant_id = $1 ORDER BY run_order"
        );
        let rows = sqlx::query_as::<_, WorkflowRunRow>(&sql)
            .bind(tenant_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|error| upstream("list workflow runs", error))?;

        rows.into_iter()
            .map(WorkflowRunRow::into_workflow_run)
            .collect()
    }

    async fn find_job_run(
        &self,
        tenant_id: TenantId,
        job_run_id: &str,
    ) -> AppResult<Option<JobRun>> {
        let sql =
            format!("SELECT {JOB_RUN_COLUMNS} FROM job_runs WHERE tenant_id = $1 AND id = $2");
        let row = sqlx::query_as::<_, JobRunRow>(&sql)
            .bind(tenant_id.as_uuid())
            .bind(parse_id("job run", job_run_id)?)
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| upstream("find job run", error))?;

        row.map(JobRunRow::into_job_run).transpose()
    }

    async fn list_job_runs(
        &self,
        tenant_id: TenantId,
        workflow_run_id: &str,
    ) -> AppResult<Vec<JobRun>> {
        let sql = format!(
            "SELECT {JOB_RUN_COLUMNS} FROM job_runs \
             WHERE tenant_id = $1 AND workflow_run_id = $2 ORDER BY job_order"
        );
        let rows = sqlx::query_as::<_, JobRunRow>(&sql)
            .bind(tenant_id.as_uuid())
            .bind(parse_id("workflow run", workflow_run_id)?)
            .fetch_all(&self.pool)
            .await
            .map_err(|error| upstream("list job runs", error))?;

        rows.into_iter().map(JobRunRow::into_job_run).collect()
    }

    async fn find_get_group_key_run(
        &self,
        tenant_id: TenantId,
        get_group_key_run_id: &str,
    ) -> AppResult<Option<GetGroupKeyRun>> {
        let sql = format!(
            "SELECT {GET_GROUP_KEY_RUN_COLUMNS} FROM get_group_key_runs \
             WHERE tenant_id = $1 AND id = $2"
        );
        let row = sqlx::query_as::<_, GetGroupKeyRunRow>(&sql)
            .bind(tenant_id.as_uuid())
            .bind(parse_id("get group key run", get_group_key_run_id)?)
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| upstream("find get group key run", error))?;

        row.map(GetGroupKeyRunRow::into_get_group_key_run)
            .transpose()
    }

    async fn queue_get_group_key_run_if_pending(
        &self,
        tenant_id: TenantId,
        get_group_key_run_id: &str,
        input: UpdateGetGroupKeyRunInput,
    ) -> AppResult<GetGroupKeyRun> {
        let id = parse_id("get group key run", get_group_key_run_id)?;
        let mut transaction = self.begin().await?;

        let sql = format!(
            "SELECT {GET_GROUP_KEY_RUN_COLUMNS} FROM get_group_key_runs \
             WHERE tenant_id = $1 AND id = $2 FOR UPDATE"
        );
        let current = sqlx::query_as::<_, GetGroupKeyRunRow>(&sql)
            .bind(tenant_id.as_uuid())
            .bind(id)
            .fetch_optional(&mut *transaction)
            .await
            .map_err(|error| upstream("lock get group key run", error))?
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "get group key run '{get_group_key_run_id}' does not exist"
                ))
            })?
            .into_get_group_key_run()?;

        if current.status != StepRunStatus::Pending {
            return Err(AppError::NotPending(format!(
                "get group key run '{get_group_key_run_id}' is {}",
                current.status.as_str()
            )));
        }

        let mut updated = current;
        apply_get_group_key_run_update(&mut updated, &input)?;

        let rows_affected = sqlx::query(
            r#"
            UPDATE get_group_key_runs
            SET status = $3,
                output = $4,
                error = $5,
                requeue_after = $6,
                schedule_timeout_at = $7,
                timeout_at = $8,
                ticker_id = $9,
                started_at = $10,
                finished_at = $11
            WHERE tenant_id = $1 AND id = $2 AND status = 'PENDING'
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(id)
        .bind(updated.status.as_str())
        .bind(updated.output.as_deref())
        .bind(updated.error.as_deref())
        .bind(updated.requeue_after)
        .bind(updated.schedule_timeout_at)
        .bind(updated.timeout_at)
        .bind(updated.ticker_id.as_deref())
        .bind(updated.started_at)
        .bind(updated.finished_at)
        .execute(&mut *transaction)
        .await
        .map_err(|error| upstream("queue get group key run", error))?
        .rows_affected();

        if rows_affected == 0 {
            return Err(AppError::NotPending(format!(
                "get group key run '{get_group_key_run_id}' left pending"
            )));
        }

        commit(transaction).await?;
        Ok(updated)
    }
}

fn position(index: usize) -> AppResult<i32> {
    i32::try_from(index)
        .map_err(|error| AppError::Validation(format!("run position {index} is too large: {error}")))
}
