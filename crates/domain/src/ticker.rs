use chrono::{DateTime, Utc};
use drover_core::TenantId;

/// Registered scheduling instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticker {
    /// Ticker identifier, also used to derive its queue name.
    pub id: String,
    /// Registration timestamp.
    pub created_at: DateTime<Utc>,
    /// Last heartbeat timestamp; never moves backwards.
    pub last_heartbeat_at: DateTime<Utc>,
    /// Whether the ticker still accepts new timers.
    pub is_active: bool,
}

/// Tenant listed by the periodic requeue scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tenant {
    /// Tenant identifier.
    pub id: TenantId,
    /// Display name.
    pub name: String,
}
