use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use drover_application::{
    AllStepRunsQuery, CreateWorkflowRunInput, StepRunListQuery, StepRunRepository,
    TickerRepository, UpdateGetGroupKeyRunInput, UpdateStepRunInput,
    UpdateStepRunOverridesDataInput, WorkflowRepository, WorkflowRunRepository,
};
use drover_core::{AppError, TenantId};
use drover_domain::{RunStatus, StepRun, StepRunStatus, WorkflowRun};
use serde_json::json;
use uuid::Uuid;

use super::InMemoryRunStore;
use crate::test_fixtures::{
    by_readable_id, chained_version, event_run_input, group_key_concurrency, versioned,
};

async fn create_run(store: &InMemoryRunStore, tenant_id: TenantId) -> WorkflowRun {
    let version = chained_version("user:created");
    let created = store
        .create_workflow_run(tenant_id, event_run_input(tenant_id, &version))
        .await;
    assert!(created.is_ok());
    created.unwrap_or_else(|_| unreachable!())
}

async fn step_runs_of(
    store: &InMemoryRunStore,
    tenant_id: TenantId,
    workflow_run: &WorkflowRun,
) -> Vec<StepRun> {
    let listed = store
        .list_step_runs(
            tenant_id,
            StepRunListQuery {
                workflow_run_id: Some(workflow_run.id.clone()),
                ..StepRunListQuery::default()
            },
        )
        .await;
    assert!(listed.is_ok());
    listed.unwrap_or_default()
}

async fn move_step(
    store: &InMemoryRunStore,
    tenant_id: TenantId,
    step_run_id: &str,
    statuses: &[StepRunStatus],
) {
    for status in statuses {
        let updated = store
            .update_step_run(tenant_id, step_run_id, UpdateStepRunInput::status(*status))
            .await;
        assert!(updated.is_ok());
    }
}

#[tokio::test]
async fn create_workflow_run_builds_pending_tree() {
    let store = InMemoryRunStore::new();
    let tenant_id = TenantId::new();
    let workflow_run = create_run(&store, tenant_id).await;

    assert_eq!(workflow_run.status, RunStatus::Pending);
    assert_eq!(workflow_run.input, json!({"user": "ada"}));

    let job_runs = store.list_job_runs(tenant_id, &workflow_run.id).await;
    assert!(job_runs.is_ok());
    let job_runs = job_runs.unwrap_or_default();
    assert_eq!(job_runs.len(), 1);
    assert_eq!(job_runs[0].status, RunStatus::Pending);

    let step_runs = step_runs_of(&store, tenant_id, &workflow_run).await;
    assert_eq!(step_runs.len(), 2);
    let first = by_readable_id(&step_runs, "first");
    let second = by_readable_id(&step_runs, "second");
    assert_eq!(second.parents, vec![first.id.clone()]);
    assert!(step_runs.iter().all(|step_run| {
        step_run.status == StepRunStatus::Pending && step_run.schedule_timeout_at.is_some()
    }));
}

#[tokio::test]
async fn reads_do_not_leak_across_tenants() {
    let store = InMemoryRunStore::new();
    let tenant_id = TenantId::new();
    let workflow_run = create_run(&store, tenant_id).await;
    let step_runs = step_runs_of(&store, tenant_id, &workflow_run).await;

    let other_tenant = TenantId::new();
    let found = store.find_workflow_run(other_tenant, &workflow_run.id).await;
    assert!(matches!(found, Ok(None)));

    let step = store.find_step_run(other_tenant, &step_runs[0].id).await;
    assert!(matches!(step, Ok(None)));

    let queued = store
        .queue_step_run_if_pending(
            other_tenant,
            &step_runs[0].id,
            UpdateStepRunInput::status(StepRunStatus::Assigned),
        )
        .await;
    assert!(matches!(queued, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn concurrent_queue_attempts_have_a_single_winner() {
    let store = Arc::new(InMemoryRunStore::new());
    let tenant_id = TenantId::new();
    let workflow_run = create_run(&store, tenant_id).await;
    let step_runs = step_runs_of(&store, tenant_id, &workflow_run).await;
    let step_run_id = by_readable_id(&step_runs, "first").id.clone();

    let mut handles = Vec::new();
    for attempt in 0..8 {
        let store = Arc::clone(&store);
        let step_run_id = step_run_id.clone();
        handles.push(tokio::spawn(async move {
            store
                .queue_step_run_if_pending(
                    tenant_id,
                    &step_run_id,
                    UpdateStepRunInput {
                        ticker_id: Some(format!("ticker-{attempt}")),
                        ..UpdateStepRunInput::status(StepRunStatus::Assigned)
                    },
                )
                .await
        }));
    }

    let mut winners = 0;
    let mut not_pending = 0;
    for handle in handles {
        match handle.await {
            Ok(Ok(_)) => winners += 1,
            Ok(Err(error)) if error.is_not_pending() => not_pending += 1,
            other => panic!("unexpected queue result: {other:?}"),
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(not_pending, 7);

    let stored = store.find_step_run(tenant_id, &step_run_id).await;
    assert!(matches!(
        stored,
        Ok(Some(step_run)) if step_run.status == StepRunStatus::Assigned && step_run.ticker_id.is_some()
    ));
}

#[tokio::test]
async fn assigning_a_step_starts_job_and_workflow() {
    let store = InMemoryRunStore::new();
    let tenant_id = TenantId::new();
    let workflow_run = create_run(&store, tenant_id).await;
    let step_runs = step_runs_of(&store, tenant_id, &workflow_run).await;

    let queued = store
        .queue_step_run_if_pending(
            tenant_id,
            &by_readable_id(&step_runs, "first").id,
            UpdateStepRunInput::status(StepRunStatus::Assigned),
        )
        .await;
    assert!(queued.is_ok());

    let job_runs = store
        .list_job_runs(tenant_id, &workflow_run.id)
        .await
        .unwrap_or_default();
    assert_eq!(job_runs[0].status, RunStatus::Running);
    assert!(job_runs[0].started_at.is_some());

    let stored = store.find_workflow_run(tenant_id, &workflow_run.id).await;
    assert!(matches!(stored, Ok(Some(run)) if run.status == RunStatus::Running));
}

#[tokio::test]
async fn illegal_transition_is_a_conflict() {
    let store = InMemoryRunStore::new();
    let tenant_id = TenantId::new();
    let workflow_run = create_run(&store, tenant_id).await;
    let step_runs = step_runs_of(&store, tenant_id, &workflow_run).await;

    let updated = store
        .update_step_run(
            tenant_id,
            &step_runs[0].id,
            UpdateStepRunInput::status(StepRunStatus::Succeeded),
        )
        .await;
    assert!(matches!(updated, Err(AppError::Conflict(_))));
}

#[tokio::test]
async fn final_step_statuses_cascade_to_job_and_workflow() {
    let store = InMemoryRunStore::new();
    let tenant_id = TenantId::new();
    let workflow_run = create_run(&store, tenant_id).await;
    let step_runs = step_runs_of(&store, tenant_id, &workflow_run).await;
    let first = by_readable_id(&step_runs, "first").id.clone();
    let second = by_readable_id(&step_runs, "second").id.clone();

    move_step(
        &store,
        tenant_id,
        &first,
        &[StepRunStatus::Assigned, StepRunStatus::Running],
    )
    .await;
    let first_done = store
        .update_step_run(
            tenant_id,
            &first,
            UpdateStepRunInput {
                output: Some(json!({"ok": true})),
                ..UpdateStepRunInput::status(StepRunStatus::Succeeded)
            },
        )
        .await;
    assert!(matches!(
        &first_done,
        Ok((_, info)) if !info.job_run_final_state && info.workflow_run_status == RunStatus::Running
    ));

    move_step(
        &store,
        tenant_id,
        &second,
        &[StepRunStatus::Assigned, StepRunStatus::Running],
    )
    .await;
    let second_failed = store
        .update_step_run(
            tenant_id,
            &second,
            UpdateStepRunInput {
                error: Some("boom".to_owned()),
                ..UpdateStepRunInput::status(StepRunStatus::Failed)
            },
        )
        .await;

    match second_failed {
        Ok((step_run, info)) => {
            assert_eq!(step_run.status, StepRunStatus::Failed);
            assert!(info.job_run_final_state);
            assert!(info.workflow_run_final_state);
            assert_eq!(info.workflow_run_id, workflow_run.id);
            assert_eq!(info.workflow_run_status, RunStatus::Failed);
        }
        Err(error) => panic!("unexpected update error: {error}"),
    }

    let stored = store.find_workflow_run(tenant_id, &workflow_run.id).await;
    assert!(matches!(
        stored,
        Ok(Some(run)) if run.finished_at.is_some() && run.error.as_deref() == Some("boom")
    ));
}

#[tokio::test]
async fn startable_step_runs_wait_for_every_parent() {
    let store = InMemoryRunStore::new();
    let tenant_id = TenantId::new();
    let workflow_run = create_run(&store, tenant_id).await;
    let step_runs = step_runs_of(&store, tenant_id, &workflow_run).await;
    let first = by_readable_id(&step_runs, "first").clone();

    let before = store
        .list_startable_step_runs(tenant_id, &first.job_run_id, &first.id)
        .await;
    assert!(matches!(before, Ok(runs) if runs.is_empty()));

    move_step(
        &store,
        tenant_id,
        &first.id,
        &[
            StepRunStatus::Assigned,
            StepRunStatus::Running,
            StepRunStatus::Succeeded,
        ],
    )
    .await;

    let after = store
        .list_startable_step_runs(tenant_id, &first.job_run_id, &first.id)
        .await;
    assert!(matches!(
        after,
        Ok(runs) if runs.len() == 1 && runs[0].step_readable_id == "second"
    ));
}

#[tokio::test]
async fn requeue_and_reassign_scans_respect_requeue_after() {
    let store = InMemoryRunStore::new();
    let tenant_id = TenantId::new();
    let workflow_run = create_run(&store, tenant_id).await;
    let step_runs = step_runs_of(&store, tenant_id, &workflow_run).await;
    let first = by_readable_id(&step_runs, "first").id.clone();
    let second = by_readable_id(&step_runs, "second").id.clone();

    let past = Utc::now() - TimeDelta::seconds(5);
    let future = Utc::now() + TimeDelta::minutes(5);

    let pending_due = store
        .update_step_run(
            tenant_id,
            &second,
            UpdateStepRunInput {
                requeue_after: Some(past),
                ..UpdateStepRunInput::default()
            },
        )
        .await;
    assert!(pending_due.is_ok());

    let assigned_later = store
        .queue_step_run_if_pending(
            tenant_id,
            &first,
            UpdateStepRunInput {
                requeue_after: Some(future),
                ..UpdateStepRunInput::status(StepRunStatus::Assigned)
            },
        )
        .await;
    assert!(assigned_later.is_ok());

    let to_requeue = store.list_step_runs_to_requeue(tenant_id).await;
    assert!(matches!(to_requeue, Ok(runs) if runs.len() == 1 && runs[0].id == second));

    let to_reassign = store.list_step_runs_to_reassign(tenant_id).await;
    assert!(matches!(to_reassign, Ok(runs) if runs.is_empty()));

    let overdue = store
        .update_step_run(
            tenant_id,
            &first,
            UpdateStepRunInput {
                requeue_after: Some(past),
                ..UpdateStepRunInput::default()
            },
        )
        .await;
    assert!(overdue.is_ok());

    let to_reassign = store.list_step_runs_to_reassign(tenant_id).await;
    assert!(matches!(to_reassign, Ok(runs) if runs.len() == 1 && runs[0].id == first));
}

#[tokio::test]
async fn list_all_step_runs_filters_by_ticker() {
    let store = InMemoryRunStore::new();
    let tenant_id = TenantId::new();
    let workflow_run = create_run(&store, tenant_id).await;
    let step_runs = step_runs_of(&store, tenant_id, &workflow_run).await;

    let assigned = store
        .update_step_run(
            tenant_id,
            &step_runs[0].id,
            UpdateStepRunInput {
                ticker_id: Some("ticker-a".to_owned()),
                ..UpdateStepRunInput::status(StepRunStatus::Assigned)
            },
        )
        .await;
    assert!(assigned.is_ok());

    let owned = store
        .list_all_step_runs(AllStepRunsQuery {
            ticker_id: Some("ticker-a".to_owned()),
            status: None,
        })
        .await;
    assert!(matches!(owned, Ok(runs) if runs.len() == 1 && runs[0].id == step_runs[0].id));

    let pending = store
        .list_all_step_runs(AllStepRunsQuery {
            ticker_id: None,
            status: Some(StepRunStatus::Pending),
        })
        .await;
    assert!(matches!(pending, Ok(runs) if runs.len() == 1));
}

#[tokio::test]
async fn cancel_pending_step_runs_skips_started_steps() {
    let store = InMemoryRunStore::new();
    let tenant_id = TenantId::new();
    let workflow_run = create_run(&store, tenant_id).await;
    let step_runs = step_runs_of(&store, tenant_id, &workflow_run).await;
    let first = by_readable_id(&step_runs, "first").clone();

    move_step(&store, tenant_id, &first.id, &[StepRunStatus::Assigned]).await;

    let cancelled = store
        .cancel_pending_step_runs(tenant_id, &first.job_run_id, "job timed out")
        .await;
    assert!(matches!(cancelled, Ok(1)));

    let second = store
        .find_step_run(tenant_id, &by_readable_id(&step_runs, "second").id)
        .await;
    assert!(matches!(
        second,
        Ok(Some(step_run))
            if step_run.status == StepRunStatus::Cancelled
                && step_run.cancelled_reason.as_deref() == Some("job timed out")
    ));
}

#[tokio::test]
async fn cancelling_pending_siblings_finalises_failed_job() {
    let store = InMemoryRunStore::new();
    let tenant_id = TenantId::new();
    let workflow_run = create_run(&store, tenant_id).await;
    let step_runs = step_runs_of(&store, tenant_id, &workflow_run).await;
    let first = by_readable_id(&step_runs, "first").clone();

    move_step(
        &store,
        tenant_id,
        &first.id,
        &[StepRunStatus::Assigned, StepRunStatus::Running],
    )
    .await;
    let failed = store
        .update_step_run(
            tenant_id,
            &first.id,
            UpdateStepRunInput {
                error: Some("boom".to_owned()),
                ..UpdateStepRunInput::status(StepRunStatus::Failed)
            },
        )
        .await;
    assert!(matches!(failed, Ok((_, info)) if !info.job_run_final_state));

    let cancelled = store
        .cancel_pending_step_runs(tenant_id, &first.job_run_id, "sibling failed")
        .await;
    assert!(matches!(cancelled, Ok(1)));

    let job_run = store.find_job_run(tenant_id, &first.job_run_id).await;
    assert!(matches!(
        job_run,
        Ok(Some(job_run)) if job_run.status == RunStatus::Failed && job_run.finished_at.is_some()
    ));

    let stored = store.find_workflow_run(tenant_id, &workflow_run.id).await;
    assert!(matches!(
        stored,
        Ok(Some(run))
            if run.status == RunStatus::Failed
                && run.finished_at.is_some()
                && run.error.as_deref() == Some("boom")
    ));
}

#[tokio::test]
async fn cancelling_every_pending_step_cancels_job_and_workflow() {
    let store = InMemoryRunStore::new();
    let tenant_id = TenantId::new();
    let workflow_run = create_run(&store, tenant_id).await;
    let step_runs = step_runs_of(&store, tenant_id, &workflow_run).await;
    let job_run_id = step_runs[0].job_run_id.clone();

    let cancelled = store
        .cancel_pending_step_runs(tenant_id, &job_run_id, "workflow cancelled")
        .await;
    assert!(matches!(cancelled, Ok(2)));

    let job_run = store.find_job_run(tenant_id, &job_run_id).await;
    assert!(matches!(
        job_run,
        Ok(Some(job_run)) if job_run.status == RunStatus::Cancelled && job_run.cancelled_at.is_some()
    ));

    let stored = store.find_workflow_run(tenant_id, &workflow_run.id).await;
    assert!(matches!(stored, Ok(Some(run)) if run.status == RunStatus::Cancelled));
}

#[tokio::test]
async fn finished_step_run_rejects_field_writes() {
    let store = InMemoryRunStore::new();
    let tenant_id = TenantId::new();
    let workflow_run = create_run(&store, tenant_id).await;
    let step_runs = step_runs_of(&store, tenant_id, &workflow_run).await;
    let first = by_readable_id(&step_runs, "first").id.clone();

    move_step(
        &store,
        tenant_id,
        &first,
        &[
            StepRunStatus::Assigned,
            StepRunStatus::Running,
            StepRunStatus::Succeeded,
        ],
    )
    .await;

    let overwrite = store
        .update_step_run(
            tenant_id,
            &first,
            UpdateStepRunInput {
                output: Some(json!({"late": true})),
                error: Some("late failure".to_owned()),
                ..UpdateStepRunInput::default()
            },
        )
        .await;
    assert!(matches!(overwrite, Err(AppError::Conflict(_))));

    let stored = store.find_step_run(tenant_id, &first).await;
    assert!(matches!(
        stored,
        Ok(Some(step_run))
            if step_run.status == StepRunStatus::Succeeded
                && step_run.output.is_none()
                && step_run.error.is_none()
    ));
}

#[tokio::test]
async fn rerun_archives_previous_result_and_resets_step() {
    let store = InMemoryRunStore::new();
    let tenant_id = TenantId::new();
    let workflow_run = create_run(&store, tenant_id).await;
    let step_runs = step_runs_of(&store, tenant_id, &workflow_run).await;
    let first = by_readable_id(&step_runs, "first").id.clone();

    move_step(
        &store,
        tenant_id,
        &first,
        &[StepRunStatus::Assigned, StepRunStatus::Running],
    )
    .await;
    let succeeded = store
        .update_step_run(
            tenant_id,
            &first,
            UpdateStepRunInput {
                output: Some(json!({"attempt": 1})),
                ..UpdateStepRunInput::status(StepRunStatus::Succeeded)
            },
        )
        .await;
    assert!(succeeded.is_ok());

    let rerun = store
        .update_step_run(
            tenant_id,
            &first,
            UpdateStepRunInput {
                is_rerun: true,
                ..UpdateStepRunInput::status(StepRunStatus::Pending)
            },
        )
        .await;
    assert!(matches!(
        &rerun,
        Ok((step_run, _))
            if step_run.status == StepRunStatus::Pending
                && step_run.output.is_none()
                && step_run.finished_at.is_none()
    ));

    let latest = store
        .get_latest_archived_step_run_result(tenant_id, &first)
        .await;
    assert!(matches!(
        latest,
        Ok(Some(archive)) if archive.output == Some(json!({"attempt": 1}))
    ));

    let manual = store.archive_step_run_result(tenant_id, &first).await;
    assert!(manual.is_ok());

    let manual_again = store.archive_step_run_result(tenant_id, &first).await;
    assert!(manual_again.is_ok());

    let archives = store
        .list_archived_step_run_results(tenant_id, &first)
        .await
        .unwrap_or_default();
    assert_eq!(archives.len(), 3);
    assert!(archives.windows(2).all(|pair| pair[0].order > pair[1].order));
    assert!(archives[0].output.is_none());
    assert_eq!(archives[2].output, Some(json!({"attempt": 1})));

    let latest = store
        .get_latest_archived_step_run_result(tenant_id, &first)
        .await;
    assert!(matches!(latest, Ok(Some(archive)) if archive == archives[0]));
}

#[tokio::test]
async fn rerun_of_finished_job_is_rejected() {
    let store = InMemoryRunStore::new();
    let tenant_id = TenantId::new();
    let workflow_run = create_run(&store, tenant_id).await;
    let step_runs = step_runs_of(&store, tenant_id, &workflow_run).await;
    let first = by_readable_id(&step_runs, "first").id.clone();
    let second = by_readable_id(&step_runs, "second").id.clone();

    move_step(&store, tenant_id, &first, &[StepRunStatus::Failed]).await;
    let finished = store
        .update_step_run(
            tenant_id,
            &second,
            UpdateStepRunInput::status(StepRunStatus::Cancelled),
        )
        .await;
    assert!(matches!(
        finished,
        Ok((_, info)) if info.job_run_final_state && info.workflow_run_status == RunStatus::Failed
    ));

    let rerun = store
        .update_step_run(
            tenant_id,
            &first,
            UpdateStepRunInput {
                is_rerun: true,
                ..UpdateStepRunInput::status(StepRunStatus::Pending)
            },
        )
        .await;
    assert!(matches!(rerun, Err(AppError::Conflict(_))));

    let archives = store
        .list_archived_step_run_results(tenant_id, &first)
        .await;
    assert!(matches!(archives, Ok(archives) if archives.is_empty()));
}

#[tokio::test]
async fn overrides_and_schema_merge_into_step_run() {
    let store = InMemoryRunStore::new();
    let tenant_id = TenantId::new();
    let workflow_run = create_run(&store, tenant_id).await;
    let step_runs = step_runs_of(&store, tenant_id, &workflow_run).await;
    let first = by_readable_id(&step_runs, "first").id.clone();

    let merged = store
        .update_step_run_overrides_data(
            tenant_id,
            &first,
            UpdateStepRunOverridesDataInput {
                override_key: "model".to_owned(),
                data: json!("large"),
                caller_file: Some("steps/first.py".to_owned()),
            },
        )
        .await;
    assert!(matches!(
        merged,
        Ok(input) if input == json!({"user": "ada", "overrides": {"model": "large"}})
    ));

    let schema = store
        .update_step_run_input_schema(tenant_id, &first, json!({"user": {"type": "string"}}))
        .await;
    assert!(matches!(schema, Ok(value) if value == json!({"user": {"type": "string"}})));

    let stored = store.find_step_run(tenant_id, &first).await;
    assert!(matches!(
        stored,
        Ok(Some(step_run)) if step_run.caller_files == json!({"model": "steps/first.py"})
    ));
}

#[tokio::test]
async fn group_key_run_queues_only_from_pending() {
    let store = InMemoryRunStore::new();
    let tenant_id = TenantId::new();
    let version = versioned(
        Uuid::new_v4().to_string(),
        "user:created",
        Some(group_key_concurrency()),
    );
    let created = store
        .create_workflow_run(tenant_id, event_run_input(tenant_id, &version))
        .await;
    assert!(created.is_ok());
    let workflow_run = created.unwrap_or_else(|_| unreachable!());

    let get_group_key_run_id = {
        let state = store.state.read().await;
        let found = state
            .get_group_key_runs
            .values()
            .find(|run| run.workflow_run_id == workflow_run.id)
            .map(|run| run.id.clone());
        assert!(found.is_some());
        found.unwrap_or_default()
    };

    let assign = || UpdateGetGroupKeyRunInput {
        status: Some(StepRunStatus::Assigned),
        ticker_id: Some("ticker-a".to_owned()),
        ..UpdateGetGroupKeyRunInput::default()
    };

    let first = store
        .queue_get_group_key_run_if_pending(tenant_id, &get_group_key_run_id, assign())
        .await;
    assert!(matches!(first, Ok(run) if run.status == StepRunStatus::Assigned));

    let second = store
        .queue_get_group_key_run_if_pending(tenant_id, &get_group_key_run_id, assign())
        .await;
    assert!(matches!(second, Err(error) if error.is_not_pending()));
}

#[tokio::test]
async fn latest_version_per_workflow_matches_events() {
    let store = InMemoryRunStore::new();
    let tenant_id = TenantId::new();
    let workflow_id = Uuid::new_v4().to_string();

    let old = versioned(workflow_id.clone(), "user:created", None);
    let new = versioned(workflow_id, "user:deleted", None);
    store.insert_workflow_version(tenant_id, old).await;
    store.insert_workflow_version(tenant_id, new.clone()).await;

    let created = store.list_workflows_for_event(tenant_id, "user:created").await;
    assert!(matches!(created, Ok(versions) if versions.is_empty()));

    let deleted = store.list_workflows_for_event(tenant_id, "user:deleted").await;
    assert!(matches!(deleted, Ok(versions) if versions == vec![new]));
}

#[tokio::test]
async fn ticker_heartbeat_never_moves_backwards() {
    let store = InMemoryRunStore::new();
    let created = store.create_ticker("ticker-a").await;
    assert!(created.is_ok());

    let later = Utc::now() + TimeDelta::seconds(30);
    let forward = store.update_ticker_heartbeat("ticker-a", later).await;
    assert!(matches!(forward, Ok(ticker) if ticker.last_heartbeat_at == later));

    let backward = store
        .update_ticker_heartbeat("ticker-a", later - TimeDelta::seconds(10))
        .await;
    assert!(matches!(backward, Ok(ticker) if ticker.last_heartbeat_at == later));

    assert!(store.delete_ticker("ticker-a").await.is_ok());
    assert!(store.delete_ticker("ticker-a").await.is_ok());

    let missing = store.update_ticker_heartbeat("ticker-a", later).await;
    assert!(matches!(missing, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn cron_runs_start_with_empty_input() {
    let store = InMemoryRunStore::new();
    let tenant_id = TenantId::new();
    let version = chained_version("user:created");

    let created = store
        .create_workflow_run(
            tenant_id,
            CreateWorkflowRunInput::from_cron(&version, "parent-1", "*/5 * * * *"),
        )
        .await;
    assert!(matches!(
        created,
        Ok(run) if run.input == json!({}) && run.trigger.trigger_type() == "cron"
    ));
}
