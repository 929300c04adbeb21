use crate::model::WorkerStatus;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("no worker found for tenant {0}")]
    WorkerNotFound(Uuid),

    #[error("tenant {0} already has an active worker")]
    AlreadyRunning(Uuid),

    #[error("no credentials stored for tenant {0}")]
    CredentialsNotFound(Uuid),

    #[error("all {0} isolation slots are in use")]
    SlotsExhausted(usize),

    #[error("worker for tenant {0} is {1:?}, not hibernating")]
    NotHibernating(Uuid, WorkerStatus),

    #[error("isolation backend error: {0}")]
    Backend(String),

    #[error("instance store error: {0}")]
    Store(String),
}
