use chrono::{DateTime, Utc};
use drover_core::{AppResult, NonEmptyString, TenantId};
use serde_json::Value;

/// Immutable ingested event.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    id: NonEmptyString,
    tenant_id: TenantId,
    key: NonEmptyString,
    data: Value,
    created_at: DateTime<Utc>,
}

impl Event {
    /// Creates a validated event.
    pub fn new(
        id: impl Into<String>,
        tenant_id: TenantId,
        key: impl Into<String>,
        data: Value,
        created_at: DateTime<Utc>,
    ) -> AppResult<Self> {
        Ok(Self {
            id: NonEmptyString::new(id)?,
            tenant_id,
            key: NonEmptyString::new(key)?,
            data,
            created_at,
        })
    }

    /// Returns the event identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        self.id.as_str()
    }

    /// Returns the tenant scope.
    #[must_use]
    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    /// Returns the event key matched against workflow triggers.
    #[must_use]
    pub fn key(&self) -> &str {
        self.key.as_str()
    }

    /// Returns the event payload.
    #[must_use]
    pub fn data(&self) -> &Value {
        &self.data
    }

    /// Returns the ingestion timestamp.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// One-off trigger that starts a workflow version at a fixed time.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledWorkflowTrigger {
    /// Trigger identifier.
    pub id: String,
    /// Tenant scope.
    pub tenant_id: TenantId,
    /// Workflow version started by the trigger.
    pub workflow_version_id: String,
    /// Time the trigger fires.
    pub trigger_at: DateTime<Utc>,
    /// Input passed to the created run.
    pub input: Value,
}
