pub mod local;
pub mod memory;

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub use local::LocalProcessBackend;
pub use memory::MemoryBackend;

/// Everything the backend needs to materialize one tenant worker.
#[derive(Debug, Clone)]
pub struct WorkerSpec {
    pub name: String,
    pub command: Vec<String>,
    pub env: HashMap<String, String>,
    /// Host directories mounted read-only at `/run/secrets` inside the unit.
    pub secret_mounts: Vec<PathBuf>,
    pub labels: HashMap<String, String>,
    pub memory_limit: Option<String>,
    pub cpu_quota: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Created,
    Running,
    Exited,
}

/// A unit the backend knows about, as returned by `list`.
#[derive(Debug, Clone)]
pub struct ManagedUnit {
    pub id: String,
    pub name: String,
    pub state: UnitState,
    pub labels: HashMap<String, String>,
}

#[derive(Error, Debug)]
pub enum BackendError {
    /// The unit does not exist (out-of-band removal, stale id).
    #[error("unit not found: {0}")]
    NotFound(String),

    #[error("backend api error: {0}")]
    Api(String),
}

/// Seam between the lifecycle manager and whatever actually runs workers.
/// `create` only materializes the unit; `start` makes it run.
#[async_trait]
pub trait IsolationBackend: Send + Sync {
    async fn create(&self, spec: &WorkerSpec) -> Result<String, BackendError>;
    async fn start(&self, id: &str) -> Result<(), BackendError>;
    async fn stop(&self, id: &str, timeout: Duration) -> Result<(), BackendError>;
    async fn remove(&self, id: &str) -> Result<(), BackendError>;
    async fn inspect(&self, id: &str) -> Result<UnitState, BackendError>;
    /// Last `tail` lines of the unit's captured output.
    async fn logs(&self, id: &str, tail: usize) -> Result<String, BackendError>;
    async fn list(
        &self,
        label_key: &str,
        label_value: Option<&str>,
    ) -> Result<Vec<ManagedUnit>, BackendError>;
}
