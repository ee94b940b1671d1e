use chrono::Utc;
use drover_application::CreateWorkflowRunInput;
use drover_core::TenantId;
use drover_domain::{
    Event, JobDefinition, StepDefinition, StepRun, WorkflowConcurrency, WorkflowVersion,
    WorkflowVersionInput,
};
use serde_json::json;
use uuid::Uuid;

/// Workflow `user-signup` with one job running `first` then `second`.
pub(crate) fn chained_version(event_key: &str) -> WorkflowVersion {
    versioned(Uuid::new_v4().to_string(), event_key, None)
}

/// Same as [`chained_version`] with a fixed workflow id and a group key action.
pub(crate) fn versioned(
    workflow_id: String,
    event_key: &str,
    concurrency: Option<WorkflowConcurrency>,
) -> WorkflowVersion {
    let version = WorkflowVersion::new(WorkflowVersionInput {
        id: Uuid::new_v4().to_string(),
        workflow_id,
        workflow_name: "user-signup".to_owned(),
        version: "v1".to_owned(),
        event_triggers: vec![event_key.to_owned()],
        cron_triggers: Vec::new(),
        schedule_timeout: Some("5m".to_owned()),
        concurrency,
        jobs: vec![JobDefinition {
            name: "main".to_owned(),
            timeout: None,
            steps: vec![
                StepDefinition {
                    readable_id: "first".to_owned(),
                    action: "default:first".to_owned(),
                    timeout: Some("60s".to_owned()),
                    retries: 0,
                    parents: Vec::new(),
                },
                StepDefinition {
                    readable_id: "second".to_owned(),
                    action: "default:second".to_owned(),
                    timeout: None,
                    retries: 0,
                    parents: vec!["first".to_owned()],
                },
            ],
        }],
    });
    assert!(version.is_ok());
    version.unwrap_or_else(|_| unreachable!())
}

pub(crate) fn group_key_concurrency() -> WorkflowConcurrency {
    WorkflowConcurrency {
        action: "default:group-key".to_owned(),
        timeout: Some("30s".to_owned()),
        max_runs: 1,
    }
}

pub(crate) fn event(tenant_id: TenantId, key: &str) -> Event {
    let event = Event::new(
        Uuid::new_v4().to_string(),
        tenant_id,
        key,
        json!({"user": "ada"}),
        Utc::now(),
    );
    assert!(event.is_ok());
    event.unwrap_or_else(|_| unreachable!())
}

pub(crate) fn event_run_input(tenant_id: TenantId, version: &WorkflowVersion) -> CreateWorkflowRunInput {
    CreateWorkflowRunInput::from_event(&event(tenant_id, "user:created"), version)
}

pub(crate) fn by_readable_id<'a>(step_runs: &'a [StepRun], readable_id: &str) -> &'a StepRun {
    let found = step_runs
        .iter()
        .find(|step_run| step_run.step_readable_id == readable_id);
    assert!(found.is_some());
    found.unwrap_or_else(|| unreachable!())
}
