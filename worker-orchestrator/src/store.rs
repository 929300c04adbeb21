use crate::error::OrchestratorError;
use crate::model::{AuditRecord, WorkerInstance};
use crate::slots::{lowest_free_slot, POOL_SIZE};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Persistence seam for worker instances and the audit trail.
///
/// `allocate_slot` must be atomic with respect to concurrent allocations:
/// it reads the set of used slots, picks the lowest free one and persists
/// the new instance in one step. `MemoryStore` does this under a single
/// lock; a SQL-backed store would use a serializable transaction.
#[async_trait]
pub trait InstanceStore: Send + Sync {
    async fn get(&self, tenant_id: Uuid) -> Result<Option<WorkerInstance>, OrchestratorError>;

    async fn upsert(&self, instance: &WorkerInstance) -> Result<(), OrchestratorError>;

    /// Remove the tenant's instance record, releasing its slot.
    async fn delete(&self, tenant_id: Uuid) -> Result<(), OrchestratorError>;

    /// All non-terminal instances.
    async fn list_active(&self) -> Result<Vec<WorkerInstance>, OrchestratorError>;

    /// Atomically create a Pending instance holding the lowest free slot.
    /// Fails with `AlreadyRunning` when the tenant already has a
    /// non-terminal instance, and `SlotsExhausted` when the pool is full.
    /// A terminal record for the tenant is replaced.
    async fn allocate_slot(
        &self,
        tenant_id: Uuid,
        tenant_slug: &str,
    ) -> Result<WorkerInstance, OrchestratorError>;

    async fn append_audit(&self, record: AuditRecord) -> Result<(), OrchestratorError>;

    async fn audit_log(&self, tenant_id: Uuid) -> Result<Vec<AuditRecord>, OrchestratorError>;
}

#[derive(Default)]
struct MemoryStoreState {
    instances: HashMap<Uuid, WorkerInstance>,
    audit: Vec<AuditRecord>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryStoreState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InstanceStore for MemoryStore {
    async fn get(&self, tenant_id: Uuid) -> Result<Option<WorkerInstance>, OrchestratorError> {
        Ok(self.state.lock().unwrap().instances.get(&tenant_id).cloned())
    }

    async fn upsert(&self, instance: &WorkerInstance) -> Result<(), OrchestratorError> {
        self.state
            .lock()
            .unwrap()
            .instances
            .insert(instance.tenant_id, instance.clone());
        Ok(())
    }

    async fn delete(&self, tenant_id: Uuid) -> Result<(), OrchestratorError> {
        self.state.lock().unwrap().instances.remove(&tenant_id);
        Ok(())
    }

    async fn list_active(&self) -> Result<Vec<WorkerInstance>, OrchestratorError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .instances
            .values()
            .filter(|instance| !instance.is_terminal())
            .cloned()
            .collect())
    }

    async fn allocate_slot(
        &self,
        tenant_id: Uuid,
        tenant_slug: &str,
    ) -> Result<WorkerInstance, OrchestratorError> {
        let mut state = self.state.lock().unwrap();

        if let Some(existing) = state.instances.get(&tenant_id) {
            if !existing.is_terminal() {
                return Err(OrchestratorError::AlreadyRunning(tenant_id));
            }
        }

        let used: Vec<u8> = state
            .instances
            .values()
            .filter(|instance| !instance.is_terminal())
            .map(|instance| instance.isolation_slot)
            .collect();
        let slot = lowest_free_slot(&used)
            .ok_or(OrchestratorError::SlotsExhausted(POOL_SIZE as usize))?;

        let instance = WorkerInstance::new(tenant_id, tenant_slug, slot);
        state.instances.insert(tenant_id, instance.clone());
        Ok(instance)
    }

    async fn append_audit(&self, record: AuditRecord) -> Result<(), OrchestratorError> {
        self.state.lock().unwrap().audit.push(record);
        Ok(())
    }

    async fn audit_log(&self, tenant_id: Uuid) -> Result<Vec<AuditRecord>, OrchestratorError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .audit
            .iter()
            .filter(|record| record.tenant_id == tenant_id)
            .cloned()
            .collect())
    }
}
