use super::*;

fn optional_id(kind: &str, value: Option<&str>) -> AppResult<Option<Uuid>> {
    value.map(|value| parse_id(kind, value)).transpose()
}

fn step_run_not_found(step_run_id: &str) -> AppError {
    AppError::NotFound(format!("step run '{step_run_id}' does not exist"))
}

async fn lock_step_run(
    transaction: &mut Transaction<'_, Postgres>,
    tenant_id: TenantId,
    step_run_id: &str,
) -> AppResult<StepRun> {
    let sql = format!(
        "SELECT {STEP_RUN_COLUMNS} FROM step_runs s WHERE s.tenant_id = $1 AND s.id = $2 FOR UPDATE"
    );
    sqlx::query_as::<_, StepRunRow>(&sql)
        .bind(tenant_id.as_uuid())
        .bind(parse_id("step run", step_run_id)?)
        .fetch_optional(&mut **transaction)
        .await
        .map_err(|error| upstream("lock step run", error))?
        .ok_or_else(|| step_run_not_found(step_run_id))?
        .into_step_run()
}

async fn write_step_run(
    transaction: &mut Transaction<'_, Postgres>,
    step_run: &StepRun,
) -> AppResult<()> {
    sqlx::query(
        r#"
        UPDATE step_runs
        SET status = $2,
            input = $3,
            output = $4,
            input_schema = $5,
            caller_files = $6,
            error = $7,
            started_at = $8,
            finished_at = $9,
            failed_at = $10,
            cancelled_at = $11,
            cancelled_reason = $12,
            retry_count = $13,
            schedule_timeout_at = $14,
            timeout_at = $15,
            requeue_after = $16,
            ticker_id = $17,
            updated_at = $18
        WHERE id = $1
        "#,
    )
    .bind(parse_id("step run", &step_run.id)?)
    .bind(step_run.status.as_str())
    .bind(&step_run.input)
    .bind(&step_run.output)
    .bind(&step_run.input_schema)
    .bind(&step_run.caller_files)
    .bind(step_run.error.as_deref())
    .bind(step_run.started_at)
    .bind(step_run.finished_at)
    .bind(step_run.failed_at)
    .bind(step_run.cancelled_at)
    .bind(step_run.cancelled_reason.as_deref())
    .bind(step_run.retry_count)
    .bind(step_run.schedule_timeout_at)
    .bind(step_run.timeout_at)
    .bind(step_run.requeue_after)
    .bind(step_run.ticker_id.as_deref())
    .bind(step_run.updated_at)
    .execute(&mut **transaction)
    .await
    .map_err(|error| upstream("update step run", error))?;

    Ok(())
}

async fn insert_archive(
    transaction: &mut Transaction<'_, Postgres>,
    step_run: &StepRun,
    now: DateTime<Utc>,
) -> AppResult<StepRunResultArchive> {
    let mut archive = archive_of(step_run, 0, now);
    archive.order = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO step_run_result_archives (
            id,
            step_run_id,
            created_at,
            input,
            output,
            error,
            started_at,
            finished_at,
            failed_at,
            cancelled_at,
            cancelled_reason,
            timeout_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        RETURNING archive_order
        "#,
    )
    .bind(parse_id("archive", &archive.id)?)
    .bind(parse_id("step run", &archive.step_run_id)?)
    .bind(archive.created_at)
    .bind(&archive.input)
    .bind(&archive.output)
    .bind(archive.error.as_deref())
    .bind(archive.started_at)
    .bind(archive.finished_at)
    .bind(archive.failed_at)
    .bind(archive.cancelled_at)
    .bind(archive.cancelled_reason.as_deref())
    .bind(archive.timeout_at)
    .fetch_one(&mut **transaction)
    .await
    .map_err(|error| upstream("archive step run result", error))?;

    Ok(archive)
}

/// Propagates a step run status change to its job run and workflow run.
///
/// The caller holds the job run row lock, so sibling updates are serialized
/// and the final aggregate observes every committed sibling status.
async fn cascade(
    transaction: &mut Transaction<'_, Postgres>,
    job_run_id: Uuid,
    workflow_run_id: Uuid,
    status: Option<StepRunStatus>,
    error: Option<&str>,
    now: DateTime<Utc>,
) -> AppResult<StepRunUpdateInfo> {
    if starts_work(status) {
        for (table, target) in [("job_runs", job_run_id), ("workflow_runs", workflow_run_id)] {
            let sql = format!(
                "UPDATE {table} SET status = 'RUNNING', started_at = COALESCE(started_at, $2) \
                 WHERE id = $1 AND status = 'PENDING'"
            );
            sqlx::query(&sql)
                .bind(target)
                .bind(now)
                .execute(&mut **transaction)
                .await
                .map_err(|error| upstream("mark run started", error))?;
        }
    }

    let mut job_run_final_state = false;
    if status.is_some_and(|status| status.is_final()) {
        let sibling_statuses = sqlx::query_scalar::<_, String>(
            "SELECT status FROM step_runs WHERE job_run_id = $1",
        )
        .bind(job_run_id)
        .fetch_all(&mut **transaction)
        .await
        .map_err(|error| upstream("list job step statuses", error))?;

        let outcomes = sibling_statuses
            .iter()
            .map(|value| StepRunStatus::parse(value).map(|status| status.final_outcome()))
            .collect::<AppResult<Vec<_>>>()?;

        if let Some(outcome) = RunStatus::aggregate(outcomes) {
            job_run_final_state = sqlx::query(
                r#"
                UPDATE job_runs
                SET status = $2,
                    finished_at = $3,
                    cancelled_at = CASE WHEN $2 = 'CANCELLED' THEN $3 ELSE cancelled_at END
                WHERE id = $1 AND status IN ('PENDING', 'RUNNING')
                "#,
            )
            .bind(job_run_id)
            .bind(outcome.as_str())
            .bind(now)
            .execute(&mut **transaction)
            .await
            .map_err(|error| upstream("finish job run", error))?
            .rows_affected()
                > 0;
        }
    }

    let mut workflow_run_final_state = false;
    if job_run_final_state {
        sqlx::query("SELECT id FROM workflow_runs WHERE id = $1 FOR UPDATE")
            .bind(workflow_run_id)
            .execute(&mut **transaction)
            .await
            .map_err(|error| upstream("lock workflow run", error))?;

        let job_statuses = sqlx::query_scalar::<_, String>(
            "SELECT status FROM job_runs WHERE workflow_run_id = $1",
        )
        .bind(workflow_run_id)
        .fetch_all(&mut **transaction)
        .await
        .map_err(|error| upstream("list workflow job statuses", error))?;

        let outcomes = job_statuses
            .iter()
            .map(|value| {
                RunStatus::parse(value).map(|status| status.is_final().then_some(status))
            })
            .collect::<AppResult<Vec<_>>>()?;

        if let Some(outcome) = RunStatus::aggregate(outcomes) {
            workflow_run_final_state = sqlx::query(
                r#"
                UPDATE workflow_runs
                SET status = $2,
                    finished_at = $3,
                    error = CASE
                        WHEN $2 = 'FAILED' THEN COALESCE(
                            error,
                            $4,
                            (
                                SELECT s.error FROM step_runs s
                                WHERE s.job_run_id = $5 AND s.status = 'FAILED'
                                ORDER BY s.step_order
                                LIMIT 1
                            )
                        )
                        ELSE error
                    END
                WHERE id = $1 AND status IN ('PENDING', 'RUNNING')
                "#,
            )
            .bind(workflow_run_id)
            .bind(outcome.as_str())
            .bind(now)
            .bind(error)
            .bind(job_run_id)
            .execute(&mut **transaction)
            .await
            .map_err(|error| upstream("finish workflow run", error))?
            .rows_affected()
                > 0;
        }
    }

    let workflow_run_status =
        sqlx::query_scalar::<_, String>("SELECT status FROM workflow_runs WHERE id = $1")
            .bind(workflow_run_id)
            .fetch_one(&mut **transaction)
            .await
            .map_err(|error| upstream("read workflow run status", error))?;

    Ok(StepRunUpdateInfo {
        job_run_final_state,
        workflow_run_final_state,
        workflow_run_id: workflow_run_id.to_string(),
        workflow_run_status: RunStatus::parse(workflow_run_status.as_str())?,
    })
}

impl PostgresRunStore {
    async fn transition_step_run(
        &self,
        tenant_id: TenantId,
        step_run_id: &str,
        input: UpdateStepRunInput,
        require_pending: bool,
    ) -> AppResult<(StepRun, StepRunUpdateInfo)> {
        let now = Utc::now();
        let mut transaction = self.begin().await?;

        let (job_run_id, job_run_status) = sqlx::query_as::<_, (Uuid, String)>(
            r#"
            SELECT j.id, j.status
            FROM job_runs j
            JOIN step_runs s ON s.job_run_id = j.id
            WHERE s.tenant_id = $1 AND s.id = $2
            FOR UPDATE OF j
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(parse_id("step run", step_run_id)?)
        .fetch_optional(&mut *transaction)
        .await
        .map_err(|error| upstream("lock job run", error))?
        .ok_or_else(|| step_run_not_found(step_run_id))?;

        let current = lock_step_run(&mut transaction, tenant_id, step_run_id).await?;
        if require_pending && current.status != StepRunStatus::Pending {
            return Err(AppError::NotPending(format!(
                "step run '{step_run_id}' is {}",
                current.status.as_str()
            )));
        }

        let mut updated = current.clone();
        apply_step_run_update(&mut updated, &input, now)?;

        if input.is_rerun {
            if RunStatus::parse(job_run_status.as_str())?.is_final() {
                return Err(AppError::Conflict(format!(
                    "job run '{job_run_id}' is already finished; step run '{step_run_id}' cannot be rerun"
                )));
            }
            insert_archive(&mut transaction, &current, now).await?;
        }

        write_step_run(&mut transaction, &updated).await?;
        let info = cascade(
            &mut transaction,
            job_run_id,
            parse_id("workflow run", &updated.workflow_run_id)?,
            input.status,
            updated.error.as_deref(),
            now,
        )
        .await?;

        commit(transaction).await?;
        Ok((updated, info))
    }

    async fn list_step_runs_where(
        &self,
        filter: &str,
        tenant_id: TenantId,
        status: StepRunStatus,
    ) -> AppResult<Vec<StepRun>> {
        let sql = format!(
            "SELECT {STEP_RUN_COLUMNS} FROM step_runs s \
             JOIN workflow_runs w ON w.id = s.workflow_run_id \
             WHERE s.tenant_id = $1 AND s.status = $2 AND {filter} \
             ORDER BY w.run_order, s.step_order"
        );
        let rows = sqlx::query_as::<_, StepRunRow>(&sql)
            .bind(tenant_id.as_uuid())
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|error| upstream("list step runs", error))?;

        rows.into_iter().map(StepRunRow::into_step_run).collect()
    }
}

#[async_trait]
impl StepRunRepository for PostgresRunStore {
    async fn list_all_step_runs(&self, query: AllStepRunsQuery) -> AppResult<Vec<StepRun>> {
        let sql = format!(
            "SELECT {STEP_RUN_COLUMNS} FROM step_runs s \
             JOIN workflow_runs w ON w.id = s.workflow_run_id \
             WHERE ($1::TEXT IS NULL OR s.ticker_id = $1) \
               AND ($2::TEXT IS NULL OR s.status = $2) \
             ORDER BY w.run_order, s.step_order"
        );
        let rows = sqlx::query_as::<_, StepRunRow>(&sql)
            .bind(query.ticker_id.as_deref())
            .bind(query.status.map(|status| status.as_str()))
            .fetch_all(&self.pool)
            .await
            .map_err(|error| upstream("list all step runs", error))?;

        rows.into_iter().map(StepRunRow::into_step_run).collect()
    }

    async fn list_step_runs(
        &self,
        tenant_id: TenantId,
        query: StepRunListQuery,
    ) -> AppResult<Vec<StepRun>> {
        let sql = format!(
            "SELECT {STEP_RUN_COLUMNS} FROM step_runs s \
             JOIN workflow_runs w ON w.id = s.workflow_run_id \
             WHERE s.tenant_id = $1 \
               AND ($2::TEXT IS NULL OR s.status = $2) \
               AND ($3::UUID IS NULL OR s.job_run_id = $3) \
               AND ($4::UUID IS NULL OR s.workflow_run_id = $4) \
             ORDER BY w.run_order, s.step_order"
        );
        let rows = sqlx::query_as::<_, StepRunRow>(&sql)
            .bind(tenant_id.as_uuid())
            .bind(query.status.map(|status| status.as_str()))
            .bind(optional_id("job run", query.job_run_id.as_deref())?)
            .bind(optional_id("workflow run", query.workflow_run_id.as_deref())?)
            .fetch_all(&self.pool)
            .await
            .map_err(|error| upstream("list step runs", error))?;

        rows.into_iter().map(StepRunRow::into_step_run).collect()
    }

    async fn list_step_runs_to_requeue(&self, tenant_id: TenantId) -> AppResult<Vec<StepRun>> {
        self.list_step_runs_where("s.requeue_after <= now()", tenant_id, StepRunStatus::Pending)
            .await
    }

    async fn list_step_runs_to_reassign(&self, tenant_id: TenantId) -> AppResult<Vec<StepRun>> {
        self.list_step_runs_where(
            "s.requeue_after <= now()",
            tenant_id,
            StepRunStatus::Assigned,
        )
        .await
    }

    async fn list_startable_step_runs(
        &self,
        tenant_id: TenantId,
        job_run_id: &str,
        parent_step_run_id: &str,
    ) -> AppResult<Vec<StepRun>> {
        let sql = format!(
            "SELECT {STEP_RUN_COLUMNS} FROM step_runs s \
             WHERE s.tenant_id = $1 \
               AND s.job_run_id = $2 \
               AND s.status = 'PENDING' \
               AND $3 = ANY(s.parents) \
               AND NOT EXISTS ( \
                   SELECT 1 FROM step_runs p \
                   WHERE p.id::TEXT = ANY(s.parents) AND p.status <> 'SUCCEEDED' \
               ) \
             ORDER BY s.step_order"
        );
        let rows = sqlx::query_as::<_, StepRunRow>(&sql)
            .bind(tenant_id.as_uuid())
            .bind(parse_id("job run", job_run_id)?)
            .bind(parent_step_run_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|error| upstream("list startable step runs", error))?;

        rows.into_iter().map(StepRunRow::into_step_run).collect()
    }

    async fn find_step_run(
        &self,
        tenant_id: TenantId,
        step_run_id: &str,
    ) -> AppResult<Option<StepRun>> {
        let sql = format!(
            "SELECT {STEP_RUN_COLUMNS} FROM step_runs s WHERE s.tenant_id = $1 AND s.id = $2"
        );
        let row = sqlx::query_as::<_, StepRunRow>(&sql)
            .bind(tenant_id.as_uuid())
            .bind(parse_id("step run", step_run_id)?)
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| upstream("find step run", error))?;

        row.map(StepRunRow::into_step_run).transpose()
    }

    async fn queue_step_run_if_pending(
        &self,
        tenant_id: TenantId,
        step_run_id: &str,
        input: UpdateStepRunInput,
    ) -> AppResult<StepRun> {
        let (step_run, _) = self
            .transition_step_run(tenant_id, step_run_id, input, true)
            .await?;
        Ok(step_run)
    }

    async fn update_step_run(
        &self,
        tenant_id: TenantId,
        step_run_id: &str,
        input: UpdateStepRunInput,
    ) -> AppResult<(StepRun, StepRunUpdateInfo)> {
        self.transition_step_run(tenant_id, step_run_id, input, false)
            .await
    }

    async fn update_step_run_overrides_data(
        &self,
        tenant_id: TenantId,
        step_run_id: &str,
        input: UpdateStepRunOverridesDataInput,
    ) -> AppResult<Value> {
        let mut transaction = self.begin().await?;
        let mut step_run = lock_step_run(&mut transaction, tenant_id, step_run_id).await?;

        let (merged, caller_files) =
            merge_override(&step_run.input, &step_run.caller_files, &input)?;
        step_run.input = merged.clone();
        step_run.caller_files = caller_files;
        step_run.updated_at = Utc::now();

        write_step_run(&mut transaction, &step_run).await?;
        commit(transaction).await?;
        Ok(merged)
    }

    async fn update_step_run_input_schema(
        &self,
        tenant_id: TenantId,
        step_run_id: &str,
        schema: Value,
    ) -> AppResult<Value> {
        let mut transaction = self.begin().await?;
        let mut step_run = lock_step_run(&mut transaction, tenant_id, step_run_id).await?;

        let merged = merge_schema(&step_run.input_schema, &schema)?;
        step_run.input_schema = merged.clone();
        step_run.updated_at = Utc::now();

        write_step_run(&mut transaction, &step_run).await?;
        commit(transaction).await?;
        Ok(merged)
    }

    async fn cancel_pending_step_runs(
        &self,
        tenant_id: TenantId,
        job_run_id: &str,
        reason: &str,
    ) -> AppResult<u64> {
        let now = Utc::now();
        let mut transaction = self.begin().await?;

        let Some((job_run_id, workflow_run_id)) = sqlx::query_as::<_, (Uuid, Uuid)>(
            "SELECT id, workflow_run_id FROM job_runs WHERE tenant_id = $1 AND id = $2 FOR UPDATE",
        )
        .bind(tenant_id.as_uuid())
        .bind(parse_id("job run", job_run_id)?)
        .fetch_optional(&mut *transaction)
        .await
        .map_err(|error| upstream("lock job run", error))?
        else {
            return Ok(0);
        };

        let cancelled = sqlx::query(
            r#"
            UPDATE step_runs
            SET status = 'CANCELLED',
                cancelled_at = $3,
                cancelled_reason = $4,
                updated_at = $3
            WHERE tenant_id = $1 AND job_run_id = $2 AND status = 'PENDING'
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(job_run_id)
        .bind(now)
        .bind(reason)
        .execute(&mut *transaction)
        .await
        .map_err(|error| upstream("cancel pending step runs", error))?
        .rows_affected();

        if cancelled > 0 {
            cascade(
                &mut transaction,
                job_run_id,
                workflow_run_id,
                Some(StepRunStatus::Cancelled),
                None,
                now,
            )
            .await?;
        }

        commit(transaction).await?;
        Ok(cancelled)
    }

    async fn archive_step_run_result(
        &self,
        tenant_id: TenantId,
        step_run_id: &str,
    ) -> AppResult<StepRunResultArchive> {
        let mut transaction = self.begin().await?;
        let step_run = lock_step_run(&mut transaction, tenant_id, step_run_id).await?;
        let archive = insert_archive(&mut transaction, &step_run, Utc::now()).await?;
        commit(transaction).await?;
        Ok(archive)
    }

    async fn list_archived_step_run_results(
        &self,
        tenant_id: TenantId,
        step_run_id: &str,
    ) -> AppResult<Vec<StepRunResultArchive>> {
        if self.find_step_run(tenant_id, step_run_id).await?.is_none() {
            return Err(step_run_not_found(step_run_id));
        }

        let sql = format!(
            "SELECT {ARCHIVE_COLUMNS} FROM step_run_result_archives a \
             WHERE a.step_run_id = $1 \
             ORDER BY a.archive_order DESC"
        );
        let rows = sqlx::query_as::<_, ArchiveRow>(&sql)
            .bind(parse_id("step run", step_run_id)?)
            .fetch_all(&self.pool)
            .await
            .map_err(|error| upstream("list archived step run results", error))?;

        Ok(rows.into_iter().map(StepRunResultArchive::from).collect())
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
