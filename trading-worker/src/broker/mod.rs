pub mod error;
pub mod paper;
pub mod types;

pub use error::BrokerError;
pub use paper::{PaperBroker, PaperControls};
pub use types::{
    Action, Contract, Deal, OrderStatus, OrderStatusReport, OrderTicket, Position, TradeHandle,
};

use async_trait::async_trait;
use std::sync::Arc;

/// Credential material injected into the worker process. Values come from
/// environment variables or mounted secret files; encryption and storage of
/// the material is an external collaborator's job.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub api_key: String,
    pub secret_key: String,
    pub ca_path: Option<String>,
    pub ca_password: Option<String>,
}

/// One logged-in brokerage session (simulation or live).
///
/// Implementations wrap the vendor SDK; the paper implementation in this
/// crate is the in-process stand-in used by tests and mock deployments.
#[async_trait]
pub trait BrokerSession: Send + Sync + std::fmt::Debug {
    /// Lightweight call that validates the session token, used as the
    /// idle health probe.
    async fn probe(&self) -> Result<(), BrokerError>;

    /// Full contract catalog known to this session.
    async fn contracts(&self) -> Result<Vec<Contract>, BrokerError>;

    /// Open positions on the derivatives account.
    async fn positions(&self) -> Result<Vec<Position>, BrokerError>;

    /// Place a market order and return the handle needed to poll it.
    async fn place_order(
        &self,
        contract: &Contract,
        action: Action,
        quantity: i64,
    ) -> Result<TradeHandle, BrokerError>;

    /// Poll the brokerage for the current status of a placed order.
    async fn update_status(&self, handle: &TradeHandle)
        -> Result<OrderStatusReport, BrokerError>;

    /// All trades the session knows about. Used to reconcile status checks
    /// for orders placed before a worker restart.
    async fn list_trades(&self) -> Result<Vec<TradeHandle>, BrokerError>;

    /// Graceful sign-off. May hang on a dead session; callers bound it
    /// with a wall-clock timeout.
    async fn logout(&self) -> Result<(), BrokerError>;
}

/// Factory for brokerage sessions, one login per call.
#[async_trait]
pub trait Brokerage: Send + Sync + std::fmt::Debug {
    async fn connect(
        &self,
        credentials: &Credentials,
        simulation: bool,
    ) -> Result<Arc<dyn BrokerSession>, BrokerError>;
}
