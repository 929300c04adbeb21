use async_trait::async_trait;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Result of staging a tenant's credential material on disk for a worker.
/// The directory is mounted read-only into the worker's unit.
#[derive(Debug, Clone)]
pub struct CredentialFiles {
    pub dir: PathBuf,
    /// Whether a CA bundle (and its password file) was staged alongside the
    /// API key pair.
    pub has_ca: bool,
}

/// Where tenant brokerage credentials live. The orchestrator never reads
/// credential values itself; it only stages them for worker consumption.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn has_credentials(&self, tenant_id: Uuid) -> bool;

    /// Write the tenant's credentials to a per-tenant directory and return
    /// the file layout for mounting.
    async fn export_for_worker(&self, tenant_id: Uuid) -> anyhow::Result<CredentialFiles>;

    /// Remove previously staged material. Idempotent.
    async fn delete_credentials(&self, tenant_id: Uuid) -> anyhow::Result<()>;
}

#[derive(Default)]
struct MemoryCredentialState {
    tenants: HashSet<Uuid>,
    staged: HashSet<Uuid>,
    fail_exports: bool,
}

/// Test credential store: tracks which tenants have credentials and which
/// have staged export directories, without touching the filesystem.
#[derive(Clone, Default)]
pub struct MemoryCredentialStore {
    state: Arc<Mutex<MemoryCredentialState>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, tenant_id: Uuid) {
        self.state.lock().unwrap().tenants.insert(tenant_id);
    }

    pub fn staged(&self, tenant_id: Uuid) -> bool {
        self.state.lock().unwrap().staged.contains(&tenant_id)
    }

    /// Make every `export_for_worker` call fail, simulating a full or
    /// unwritable secrets directory.
    pub fn fail_exports(&self, fail: bool) {
        self.state.lock().unwrap().fail_exports = fail;
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn has_credentials(&self, tenant_id: Uuid) -> bool {
        self.state.lock().unwrap().tenants.contains(&tenant_id)
    }

    async fn export_for_worker(&self, tenant_id: Uuid) -> anyhow::Result<CredentialFiles> {
        let mut state = self.state.lock().unwrap();
        if state.fail_exports {
            anyhow::bail!("cannot write credential files for tenant {}", tenant_id);
        }
        if !state.tenants.contains(&tenant_id) {
            anyhow::bail!("no credentials for tenant {}", tenant_id);
        }
        state.staged.insert(tenant_id);
        Ok(CredentialFiles {
            dir: PathBuf::from(format!("/tmp/credentials/{}", tenant_id)),
            has_ca: false,
        })
    }

    async fn delete_credentials(&self, tenant_id: Uuid) -> anyhow::Result<()> {
        self.state.lock().unwrap().staged.remove(&tenant_id);
        Ok(())
    }
}
