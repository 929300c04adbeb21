use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Lifecycle state of a tenant's worker instance.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Pending,
    Starting,
    Running,
    Stopping,
    Stopped,
    Hibernating,
    Error,
}

impl WorkerStatus {
    /// Terminal states release no invariants: a terminal instance does not
    /// hold its isolation slot and may be replaced by a new `create`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkerStatus::Stopped | WorkerStatus::Error)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Unknown,
    Healthy,
    Unhealthy,
}

/// Persisted record of one tenant's worker. At most one non-terminal
/// instance exists per tenant; isolation slots are unique among
/// non-terminal instances.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WorkerInstance {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub tenant_slug: String,
    pub container_id: Option<String>,
    pub container_name: Option<String>,
    pub status: WorkerStatus,
    pub isolation_slot: u8,
    pub health_status: HealthStatus,
    pub last_health_check: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl WorkerInstance {
    pub fn new(tenant_id: Uuid, tenant_slug: &str, isolation_slot: u8) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            tenant_slug: tenant_slug.to_string(),
            container_id: None,
            container_name: None,
            status: WorkerStatus::Pending,
            isolation_slot,
            health_status: HealthStatus::Unknown,
            last_health_check: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            stopped_at: None,
            error_message: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    WorkerCreated,
    WorkerStarted,
    WorkerStopped,
    WorkerHibernated,
    WorkerWoken,
    WorkerDestroyed,
}

/// Immutable audit entry appended on every successful lifecycle transition.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AuditRecord {
    pub tenant_id: Uuid,
    pub action: AuditAction,
    pub at: DateTime<Utc>,
    pub details: Value,
}

impl AuditRecord {
    pub fn new(tenant_id: Uuid, action: AuditAction, details: Value) -> Self {
        Self {
            tenant_id,
            action,
            at: Utc::now(),
            details,
        }
    }
}
