pub mod backend;
pub mod config;
pub mod credentials;
pub mod error;
pub mod manager;
pub mod model;
pub mod slots;
pub mod store;

pub use backend::{BackendError, IsolationBackend, ManagedUnit, UnitState, WorkerSpec};
pub use config::OrchestratorConfig;
pub use credentials::{CredentialFiles, CredentialStore, MemoryCredentialStore};
pub use error::OrchestratorError;
pub use manager::WorkerManager;
pub use model::{AuditAction, AuditRecord, HealthStatus, WorkerInstance, WorkerStatus};
pub use store::{InstanceStore, MemoryStore};
