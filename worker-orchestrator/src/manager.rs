use crate::backend::{BackendError, IsolationBackend, ManagedUnit, UnitState, WorkerSpec};
use crate::config::OrchestratorConfig;
use crate::credentials::CredentialStore;
use crate::error::OrchestratorError;
use crate::model::{AuditAction, AuditRecord, HealthStatus, WorkerInstance, WorkerStatus};
use crate::store::InstanceStore;
use chrono::Utc;
use log::{error, info, warn};
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

const LABEL_MANAGED_BY: &str = "managed-by";
const LABEL_TENANT_ID: &str = "tenant.id";
const LABEL_TENANT_SLUG: &str = "tenant.slug";
const MANAGED_BY: &str = "worker-orchestrator";

/// Lifecycle manager for per-tenant workers. Generic over the isolation
/// backend, the instance store and the credential store so tests can run
/// entirely in memory.
pub struct WorkerManager<B, S, C> {
    backend: B,
    store: S,
    credentials: C,
    config: OrchestratorConfig,
}

impl<B, S, C> WorkerManager<B, S, C>
where
    B: IsolationBackend,
    S: InstanceStore,
    C: CredentialStore,
{
    pub fn new(backend: B, store: S, credentials: C, config: OrchestratorConfig) -> Self {
        Self {
            backend,
            store,
            credentials,
            config,
        }
    }

    /// Provision a worker for the tenant: allocate a slot, stage credential
    /// material and create (but not start) the isolation unit.
    pub async fn create_worker(
        &self,
        tenant_id: Uuid,
        tenant_slug: &str,
    ) -> Result<WorkerInstance, OrchestratorError> {
        if let Some(existing) = self.store.get(tenant_id).await? {
            if !existing.is_terminal() {
                return Err(OrchestratorError::AlreadyRunning(tenant_id));
            }
        }
        // Checked before allocation so a credential-less tenant never
        // consumes a slot.
        if !self.credentials.has_credentials(tenant_id).await {
            return Err(OrchestratorError::CredentialsNotFound(tenant_id));
        }

        let mut instance = self.store.allocate_slot(tenant_id, tenant_slug).await?;
        info!(
            "Manager: creating worker for tenant {} (slug={}, slot={})",
            tenant_id, tenant_slug, instance.isolation_slot
        );

        let files = match self.credentials.export_for_worker(tenant_id).await {
            Ok(files) => files,
            Err(e) => {
                // Roll the allocation back, or a retry of `create` would hit
                // AlreadyRunning against a slot with nothing behind it.
                error!(
                    "Manager: credential export failed for {}, releasing slot {}: {}",
                    tenant_id, instance.isolation_slot, e
                );
                self.store.delete(tenant_id).await?;
                return Err(OrchestratorError::Store(e.to_string()));
            }
        };

        let spec = self.worker_spec(&instance, &files);
        match self.backend.create(&spec).await {
            Ok(unit_id) => {
                instance.container_id = Some(unit_id);
                instance.container_name = Some(spec.name.clone());
                instance.touch();
                self.store.upsert(&instance).await?;
                self.audit(
                    tenant_id,
                    AuditAction::WorkerCreated,
                    json!({ "slot": instance.isolation_slot, "name": spec.name }),
                )
                .await;
                Ok(instance)
            }
            Err(e) => {
                error!("Manager: backend create failed for {}: {}", tenant_id, e);
                instance.status = WorkerStatus::Error;
                instance.error_message = Some(e.to_string());
                instance.touch();
                self.store.upsert(&instance).await?;
                Err(OrchestratorError::Backend(e.to_string()))
            }
        }
    }

    pub async fn start_worker(&self, tenant_id: Uuid) -> Result<WorkerInstance, OrchestratorError> {
        let mut instance = self.require_instance(tenant_id).await?;
        if instance.status == WorkerStatus::Running {
            info!("Manager: worker for {} already running", tenant_id);
            return Ok(instance);
        }
        let unit_id = self.unit_id(&instance, tenant_id)?;

        instance.status = WorkerStatus::Starting;
        instance.touch();
        self.store.upsert(&instance).await?;

        match self.backend.start(&unit_id).await {
            Ok(()) => {
                instance.status = WorkerStatus::Running;
                instance.started_at = Some(Utc::now());
                instance.stopped_at = None;
                instance.error_message = None;
                instance.touch();
                self.store.upsert(&instance).await?;
                self.audit(tenant_id, AuditAction::WorkerStarted, json!({})).await;
                Ok(instance)
            }
            Err(BackendError::NotFound(_)) => {
                warn!("Manager: unit for {} disappeared before start", tenant_id);
                instance.status = WorkerStatus::Error;
                instance.error_message = Some("isolation unit not found".to_string());
                instance.touch();
                self.store.upsert(&instance).await?;
                Err(OrchestratorError::WorkerNotFound(tenant_id))
            }
            Err(e) => {
                instance.status = WorkerStatus::Error;
                instance.error_message = Some(e.to_string());
                instance.touch();
                self.store.upsert(&instance).await?;
                Err(OrchestratorError::Backend(e.to_string()))
            }
        }
    }

    pub async fn stop_worker(&self, tenant_id: Uuid) -> Result<WorkerInstance, OrchestratorError> {
        let mut instance = self.require_instance(tenant_id).await?;
        if matches!(instance.status, WorkerStatus::Stopped | WorkerStatus::Pending) {
            info!("Manager: worker for {} is not running, nothing to stop", tenant_id);
            return Ok(instance);
        }
        let unit_id = self.unit_id(&instance, tenant_id)?;

        instance.status = WorkerStatus::Stopping;
        instance.touch();
        self.store.upsert(&instance).await?;

        match self.backend.stop(&unit_id, self.config.stop_timeout()).await {
            Ok(()) | Err(BackendError::NotFound(_)) => {
                // A missing unit is as stopped as it gets.
                instance.status = WorkerStatus::Stopped;
                instance.stopped_at = Some(Utc::now());
                instance.touch();
                self.store.upsert(&instance).await?;
                self.audit(tenant_id, AuditAction::WorkerStopped, json!({})).await;
                Ok(instance)
            }
            Err(e) => {
                instance.status = WorkerStatus::Error;
                instance.error_message = Some(e.to_string());
                instance.touch();
                self.store.upsert(&instance).await?;
                Err(OrchestratorError::Backend(e.to_string()))
            }
        }
    }

    /// Stop the unit but keep the instance record and its slot, so `wake`
    /// can bring the tenant back without reprovisioning.
    pub async fn hibernate_worker(
        &self,
        tenant_id: Uuid,
    ) -> Result<WorkerInstance, OrchestratorError> {
        let mut instance = self.require_instance(tenant_id).await?;
        let unit_id = self.unit_id(&instance, tenant_id)?;

        match self.backend.stop(&unit_id, self.config.stop_timeout()).await {
            Ok(()) | Err(BackendError::NotFound(_)) => {}
            Err(e) => return Err(OrchestratorError::Backend(e.to_string())),
        }

        instance.status = WorkerStatus::Hibernating;
        instance.stopped_at = Some(Utc::now());
        instance.touch();
        self.store.upsert(&instance).await?;
        self.audit(tenant_id, AuditAction::WorkerHibernated, json!({})).await;
        Ok(instance)
    }

    pub async fn wake_worker(&self, tenant_id: Uuid) -> Result<WorkerInstance, OrchestratorError> {
        let mut instance = self.require_instance(tenant_id).await?;
        if instance.status != WorkerStatus::Hibernating {
            return Err(OrchestratorError::NotHibernating(tenant_id, instance.status));
        }
        let unit_id = self.unit_id(&instance, tenant_id)?;

        self.backend
            .start(&unit_id)
            .await
            .map_err(|e| OrchestratorError::Backend(e.to_string()))?;

        instance.status = WorkerStatus::Running;
        instance.started_at = Some(Utc::now());
        instance.stopped_at = None;
        instance.touch();
        self.store.upsert(&instance).await?;
        self.audit(tenant_id, AuditAction::WorkerWoken, json!({})).await;
        Ok(instance)
    }

    /// Tear the worker down completely and release its slot. Idempotent:
    /// destroying a tenant with no instance is a no-op.
    pub async fn destroy_worker(&self, tenant_id: Uuid) -> Result<(), OrchestratorError> {
        let instance = match self.store.get(tenant_id).await? {
            Some(instance) => instance,
            None => {
                info!("Manager: no worker for {}, destroy is a no-op", tenant_id);
                return Ok(());
            }
        };

        if let Some(unit_id) = instance.container_id.as_deref() {
            match self.backend.remove(unit_id).await {
                Ok(()) | Err(BackendError::NotFound(_)) => {}
                Err(e) => return Err(OrchestratorError::Backend(e.to_string())),
            }
        }

        if let Err(e) = self.credentials.delete_credentials(tenant_id).await {
            warn!("Manager: failed to discard staged credentials for {}: {}", tenant_id, e);
        }

        self.store.delete(tenant_id).await?;
        self.audit(
            tenant_id,
            AuditAction::WorkerDestroyed,
            json!({ "slot": instance.isolation_slot }),
        )
        .await;
        info!(
            "Manager: destroyed worker for {} (slot {} released)",
            tenant_id, instance.isolation_slot
        );
        Ok(())
    }

    /// Probe the worker's unit and persist the result. Workers not in the
    /// Running state report Unknown without touching the backend.
    pub async fn check_worker_health(
        &self,
        tenant_id: Uuid,
    ) -> Result<HealthStatus, OrchestratorError> {
        let mut instance = self.require_instance(tenant_id).await?;
        if instance.status != WorkerStatus::Running {
            return Ok(HealthStatus::Unknown);
        }
        let unit_id = self.unit_id(&instance, tenant_id)?;

        let health = match self.backend.inspect(&unit_id).await {
            Ok(UnitState::Running) => HealthStatus::Healthy,
            Ok(_) | Err(BackendError::NotFound(_)) => HealthStatus::Unhealthy,
            Err(e) => return Err(OrchestratorError::Backend(e.to_string())),
        };

        instance.health_status = health;
        instance.last_health_check = Some(Utc::now());
        instance.touch();
        self.store.upsert(&instance).await?;
        Ok(health)
    }

    /// Last `tail` lines of the worker's captured output.
    pub async fn get_worker_logs(
        &self,
        tenant_id: Uuid,
        tail: usize,
    ) -> Result<String, OrchestratorError> {
        let instance = self.require_instance(tenant_id).await?;
        let unit_id = self.unit_id(&instance, tenant_id)?;
        match self.backend.logs(&unit_id, tail).await {
            Ok(logs) => Ok(logs),
            Err(BackendError::NotFound(_)) => Err(OrchestratorError::WorkerNotFound(tenant_id)),
            Err(e) => Err(OrchestratorError::Backend(e.to_string())),
        }
    }

    /// Every unit carrying our management label, whether or not an instance
    /// record exists for it.
    pub async fn list_all_workers(&self) -> Result<Vec<ManagedUnit>, OrchestratorError> {
        self.backend
            .list(LABEL_MANAGED_BY, Some(MANAGED_BY))
            .await
            .map_err(|e| OrchestratorError::Backend(e.to_string()))
    }

    /// Stop every active worker. Failures are logged and skipped so one bad
    /// tenant cannot block the sweep.
    pub async fn stop_all_workers(&self) -> Result<usize, OrchestratorError> {
        let active = self.store.list_active().await?;
        let mut stopped = 0;
        for instance in active {
            match self.stop_worker(instance.tenant_id).await {
                Ok(_) => stopped += 1,
                Err(e) => error!(
                    "Manager: failed to stop worker for {}: {}",
                    instance.tenant_id, e
                ),
            }
        }
        Ok(stopped)
    }

    /// Remove labeled units with no backing instance record.
    pub async fn cleanup_orphaned_containers(&self) -> Result<usize, OrchestratorError> {
        let units = self.list_all_workers().await?;
        let mut removed = 0;
        for unit in units {
            let tenant_id = unit
                .labels
                .get(LABEL_TENANT_ID)
                .and_then(|raw| Uuid::parse_str(raw).ok());
            let known = match tenant_id {
                Some(tenant_id) => self
                    .store
                    .get(tenant_id)
                    .await?
                    .and_then(|instance| instance.container_id)
                    .map(|id| id == unit.id)
                    .unwrap_or(false),
                None => false,
            };
            if !known {
                warn!("Manager: removing orphaned unit '{}' ({})", unit.name, unit.id);
                match self.backend.remove(&unit.id).await {
                    Ok(()) | Err(BackendError::NotFound(_)) => removed += 1,
                    Err(e) => error!("Manager: failed to remove orphan {}: {}", unit.id, e),
                }
            }
        }
        Ok(removed)
    }

    pub async fn get_worker(
        &self,
        tenant_id: Uuid,
    ) -> Result<Option<WorkerInstance>, OrchestratorError> {
        self.store.get(tenant_id).await
    }

    pub async fn audit_log(&self, tenant_id: Uuid) -> Result<Vec<AuditRecord>, OrchestratorError> {
        self.store.audit_log(tenant_id).await
    }

    fn worker_spec(
        &self,
        instance: &WorkerInstance,
        files: &crate::credentials::CredentialFiles,
    ) -> WorkerSpec {
        let mut env = HashMap::new();
        env.insert("TENANT_ID".to_string(), instance.tenant_id.to_string());
        env.insert("TENANT_SLUG".to_string(), instance.tenant_slug.clone());
        env.insert(
            "QUEUE_URL".to_string(),
            self.config.queue_url_for_slot(instance.isolation_slot),
        );
        env.insert(
            "API_KEY_FILE".to_string(),
            "/run/secrets/api_key".to_string(),
        );
        env.insert(
            "SECRET_KEY_FILE".to_string(),
            "/run/secrets/secret_key".to_string(),
        );
        if files.has_ca {
            env.insert("CA_PATH".to_string(), "/run/secrets/ca.pfx".to_string());
            env.insert(
                "CA_PASSWORD_FILE".to_string(),
                "/run/secrets/ca_password".to_string(),
            );
        }

        let mut labels = HashMap::new();
        labels.insert(LABEL_MANAGED_BY.to_string(), MANAGED_BY.to_string());
        labels.insert(LABEL_TENANT_ID.to_string(), instance.tenant_id.to_string());
        labels.insert(
            LABEL_TENANT_SLUG.to_string(),
            instance.tenant_slug.clone(),
        );

        WorkerSpec {
            name: self.config.container_name(&instance.tenant_slug),
            command: self.config.worker_command.clone(),
            env,
            secret_mounts: vec![files.dir.clone()],
            labels,
            memory_limit: self.config.memory_limit.clone(),
            cpu_quota: self.config.cpu_quota,
        }
    }

    async fn require_instance(
        &self,
        tenant_id: Uuid,
    ) -> Result<WorkerInstance, OrchestratorError> {
        self.store
            .get(tenant_id)
            .await?
            .ok_or(OrchestratorError::WorkerNotFound(tenant_id))
    }

    fn unit_id(
        &self,
        instance: &WorkerInstance,
        tenant_id: Uuid,
    ) -> Result<String, OrchestratorError> {
        instance
            .container_id
            .clone()
            .ok_or(OrchestratorError::WorkerNotFound(tenant_id))
    }

    async fn audit(&self, tenant_id: Uuid, action: AuditAction, details: serde_json::Value) {
        let record = AuditRecord::new(tenant_id, action, details);
        if let Err(e) = self.store.append_audit(record).await {
            warn!("Manager: failed to append audit record for {}: {}", tenant_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::credentials::MemoryCredentialStore;
    use crate::store::MemoryStore;

    struct Harness {
        manager: WorkerManager<MemoryBackend, MemoryStore, MemoryCredentialStore>,
        backend: MemoryBackend,
        credentials: MemoryCredentialStore,
    }

    fn harness() -> Harness {
        let _ = env_logger::builder().is_test(true).try_init();
        let backend = MemoryBackend::new();
        let store = MemoryStore::new();
        let credentials = MemoryCredentialStore::new();
        let manager = WorkerManager::new(
            backend.clone(),
            store,
            credentials.clone(),
            OrchestratorConfig::default(),
        );
        Harness {
            manager,
            backend,
            credentials,
        }
    }

    fn tenant(h: &Harness) -> Uuid {
        let id = Uuid::new_v4();
        h.credentials.add(id);
        id
    }

    #[tokio::test]
    async fn create_provisions_pending_worker_with_lowest_slot() {
        let h = harness();
        let id = tenant(&h);

        let instance = h.manager.create_worker(id, "acme").await.unwrap();
        assert_eq!(instance.status, WorkerStatus::Pending);
        assert_eq!(instance.isolation_slot, 0);
        assert_eq!(instance.container_name.as_deref(), Some("worker-acme"));
        assert!(h.credentials.staged(id));

        let unit_id = instance.container_id.unwrap();
        assert_eq!(h.backend.unit_state(&unit_id), Some(UnitState::Created));
    }

    #[tokio::test]
    async fn create_rejects_a_second_active_worker_for_the_same_tenant() {
        let h = harness();
        let id = tenant(&h);
        h.manager.create_worker(id, "acme").await.unwrap();

        let err = h.manager.create_worker(id, "acme").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::AlreadyRunning(t) if t == id));
    }

    #[tokio::test]
    async fn missing_credentials_fail_before_any_slot_is_taken() {
        let h = harness();
        let no_creds = Uuid::new_v4();

        let err = h.manager.create_worker(no_creds, "ghost").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::CredentialsNotFound(_)));

        // Slot 0 is still free for the next tenant.
        let id = tenant(&h);
        let instance = h.manager.create_worker(id, "acme").await.unwrap();
        assert_eq!(instance.isolation_slot, 0);
    }

    #[tokio::test]
    async fn failed_credential_export_releases_the_slot_for_a_retry() {
        let h = harness();
        let id = tenant(&h);
        h.credentials.fail_exports(true);

        let err = h.manager.create_worker(id, "acme").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Store(_)));
        // No wedged Pending record is left holding the slot.
        assert!(h.manager.get_worker(id).await.unwrap().is_none());

        // Once the export works again, the same tenant gets slot 0 back.
        h.credentials.fail_exports(false);
        let instance = h.manager.create_worker(id, "acme").await.unwrap();
        assert_eq!(instance.isolation_slot, 0);
        assert_eq!(instance.status, WorkerStatus::Pending);
    }

    #[tokio::test]
    async fn pool_exhausts_at_sixteen_and_reuses_released_slots() {
        let h = harness();
        let mut tenants = Vec::new();
        for i in 0..16 {
            let id = tenant(&h);
            let instance = h
                .manager
                .create_worker(id, &format!("t{}", i))
                .await
                .unwrap();
            assert_eq!(instance.isolation_slot, i as u8);
            tenants.push(id);
        }

        let extra = tenant(&h);
        let err = h.manager.create_worker(extra, "extra").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::SlotsExhausted(16)));

        // Destroying slot 1 frees exactly that slot.
        h.manager.destroy_worker(tenants[1]).await.unwrap();
        let instance = h.manager.create_worker(extra, "extra").await.unwrap();
        assert_eq!(instance.isolation_slot, 1);
    }

    #[tokio::test]
    async fn start_transitions_to_running_and_is_idempotent() {
        let h = harness();
        let id = tenant(&h);
        h.manager.create_worker(id, "acme").await.unwrap();

        let started = h.manager.start_worker(id).await.unwrap();
        assert_eq!(started.status, WorkerStatus::Running);
        assert!(started.started_at.is_some());

        // Second start is a no-op.
        let again = h.manager.start_worker(id).await.unwrap();
        assert_eq!(again.status, WorkerStatus::Running);
    }

    #[tokio::test]
    async fn start_on_a_vanished_unit_marks_the_worker_errored() {
        let h = harness();
        let id = tenant(&h);
        let instance = h.manager.create_worker(id, "acme").await.unwrap();
        h.backend.forget(instance.container_id.as_deref().unwrap());

        let err = h.manager.start_worker(id).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::WorkerNotFound(_)));

        let stored = h.manager.get_worker(id).await.unwrap().unwrap();
        assert_eq!(stored.status, WorkerStatus::Error);
        assert!(stored.error_message.is_some());
    }

    #[tokio::test]
    async fn stop_is_a_no_op_for_pending_and_stopped_workers() {
        let h = harness();
        let id = tenant(&h);
        h.manager.create_worker(id, "acme").await.unwrap();

        let still_pending = h.manager.stop_worker(id).await.unwrap();
        assert_eq!(still_pending.status, WorkerStatus::Pending);

        h.manager.start_worker(id).await.unwrap();
        let stopped = h.manager.stop_worker(id).await.unwrap();
        assert_eq!(stopped.status, WorkerStatus::Stopped);
        assert!(stopped.stopped_at.is_some());

        let again = h.manager.stop_worker(id).await.unwrap();
        assert_eq!(again.status, WorkerStatus::Stopped);
    }

    #[tokio::test]
    async fn stopping_a_vanished_unit_counts_as_stopped() {
        let h = harness();
        let id = tenant(&h);
        let instance = h.manager.create_worker(id, "acme").await.unwrap();
        h.manager.start_worker(id).await.unwrap();
        h.backend.forget(instance.container_id.as_deref().unwrap());

        let stopped = h.manager.stop_worker(id).await.unwrap();
        assert_eq!(stopped.status, WorkerStatus::Stopped);
    }

    #[tokio::test]
    async fn hibernate_keeps_the_slot_and_wake_resumes() {
        let h = harness();
        let id = tenant(&h);
        h.manager.create_worker(id, "acme").await.unwrap();
        h.manager.start_worker(id).await.unwrap();

        let asleep = h.manager.hibernate_worker(id).await.unwrap();
        assert_eq!(asleep.status, WorkerStatus::Hibernating);
        assert_eq!(asleep.isolation_slot, 0);

        // Hibernating still holds the slot: a new tenant gets slot 1.
        let other = tenant(&h);
        let neighbour = h.manager.create_worker(other, "other").await.unwrap();
        assert_eq!(neighbour.isolation_slot, 1);

        let awake = h.manager.wake_worker(id).await.unwrap();
        assert_eq!(awake.status, WorkerStatus::Running);
        assert_eq!(awake.isolation_slot, 0);
    }

    #[tokio::test]
    async fn wake_requires_the_hibernating_state() {
        let h = harness();
        let id = tenant(&h);
        h.manager.create_worker(id, "acme").await.unwrap();
        h.manager.start_worker(id).await.unwrap();

        let err = h.manager.wake_worker(id).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::NotHibernating(t, WorkerStatus::Running) if t == id
        ));
    }

    #[tokio::test]
    async fn destroy_is_idempotent_and_discards_staged_credentials() {
        let h = harness();
        let id = tenant(&h);
        h.manager.create_worker(id, "acme").await.unwrap();
        assert!(h.credentials.staged(id));

        h.manager.destroy_worker(id).await.unwrap();
        assert!(h.manager.get_worker(id).await.unwrap().is_none());
        assert!(!h.credentials.staged(id));

        // Second destroy with no record succeeds.
        h.manager.destroy_worker(id).await.unwrap();
    }

    #[tokio::test]
    async fn health_is_unknown_unless_running_then_tracks_the_unit() {
        let h = harness();
        let id = tenant(&h);
        let instance = h.manager.create_worker(id, "acme").await.unwrap();

        assert_eq!(
            h.manager.check_worker_health(id).await.unwrap(),
            HealthStatus::Unknown
        );

        h.manager.start_worker(id).await.unwrap();
        assert_eq!(
            h.manager.check_worker_health(id).await.unwrap(),
            HealthStatus::Healthy
        );

        h.backend.forget(instance.container_id.as_deref().unwrap());
        assert_eq!(
            h.manager.check_worker_health(id).await.unwrap(),
            HealthStatus::Unhealthy
        );

        let stored = h.manager.get_worker(id).await.unwrap().unwrap();
        assert_eq!(stored.health_status, HealthStatus::Unhealthy);
        assert!(stored.last_health_check.is_some());
    }

    #[tokio::test]
    async fn create_failure_records_the_error_and_surfaces_it() {
        let h = harness();
        let id = tenant(&h);
        h.backend
            .fail_next(BackendError::Api("image pull failed".into()));

        let err = h.manager.create_worker(id, "acme").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Backend(_)));

        let stored = h.manager.get_worker(id).await.unwrap().unwrap();
        assert_eq!(stored.status, WorkerStatus::Error);
        assert!(stored.error_message.unwrap().contains("image pull failed"));
    }

    #[tokio::test]
    async fn worker_logs_are_served_with_the_requested_tail() {
        let h = harness();
        let id = tenant(&h);
        let instance = h.manager.create_worker(id, "acme").await.unwrap();
        h.manager.start_worker(id).await.unwrap();

        let unit_id = instance.container_id.as_deref().unwrap();
        h.backend.append_log(unit_id, "listening on queue");
        h.backend.append_log(unit_id, "received ping");
        h.backend.append_log(unit_id, "completed ping");

        let all = h.manager.get_worker_logs(id, 10).await.unwrap();
        assert!(all.contains("listening on queue"));
        assert!(all.contains("completed ping"));

        let last = h.manager.get_worker_logs(id, 1).await.unwrap();
        assert_eq!(last, "completed ping");

        let err = h
            .manager
            .get_worker_logs(Uuid::new_v4(), 10)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::WorkerNotFound(_)));
    }

    #[tokio::test]
    async fn stop_all_workers_sweeps_every_running_tenant() {
        let h = harness();
        for i in 0..3 {
            let id = tenant(&h);
            h.manager.create_worker(id, &format!("t{}", i)).await.unwrap();
            h.manager.start_worker(id).await.unwrap();
        }

        let stopped = h.manager.stop_all_workers().await.unwrap();
        assert_eq!(stopped, 3);
    }

    #[tokio::test]
    async fn orphaned_units_are_removed_but_tracked_ones_survive() {
        let h = harness();
        let id = tenant(&h);
        let tracked = h.manager.create_worker(id, "acme").await.unwrap();

        // A labeled unit nobody tracks.
        let orphan_spec = WorkerSpec {
            name: "worker-ghost".into(),
            command: vec!["trading-worker".into()],
            env: HashMap::new(),
            secret_mounts: vec![],
            labels: HashMap::from([
                (LABEL_MANAGED_BY.to_string(), MANAGED_BY.to_string()),
                (LABEL_TENANT_ID.to_string(), Uuid::new_v4().to_string()),
            ]),
            memory_limit: None,
            cpu_quota: None,
        };
        h.backend.create(&orphan_spec).await.unwrap();

        let removed = h.manager.cleanup_orphaned_containers().await.unwrap();
        assert_eq!(removed, 1);

        let tracked_unit = tracked.container_id.unwrap();
        assert!(h.backend.unit_state(&tracked_unit).is_some());
    }

    #[tokio::test]
    async fn successful_transitions_leave_an_audit_trail() {
        let h = harness();
        let id = tenant(&h);
        h.manager.create_worker(id, "acme").await.unwrap();
        h.manager.start_worker(id).await.unwrap();
        h.manager.hibernate_worker(id).await.unwrap();
        h.manager.wake_worker(id).await.unwrap();
        h.manager.stop_worker(id).await.unwrap();
        h.manager.destroy_worker(id).await.unwrap();

        let actions: Vec<AuditAction> = h
            .manager
            .audit_log(id)
            .await
            .unwrap()
            .iter()
            .map(|record| record.action)
            .collect();
        assert_eq!(
            actions,
            vec![
                AuditAction::WorkerCreated,
                AuditAction::WorkerStarted,
                AuditAction::WorkerHibernated,
                AuditAction::WorkerWoken,
                AuditAction::WorkerStopped,
                AuditAction::WorkerDestroyed,
            ]
        );
    }
}
