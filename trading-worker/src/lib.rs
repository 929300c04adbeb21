pub mod broker;
pub mod config;
pub mod connection;
pub mod handlers;
pub mod pending;
pub mod runtime;

pub use config::WorkerConfig;
pub use connection::ConnectionManager;
pub use pending::PendingTrades;
pub use runtime::WorkerRuntime;
