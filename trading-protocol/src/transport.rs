use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Abstraction over the list-based push / blocking-pop queue substrate.
/// Implementation details (Redis, in-memory) are hidden behind this trait.
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Append a payload to the list at `key`.
    async fn push(&self, key: &str, payload: &str) -> Result<()>;

    /// Append a payload and arm an expiry on the key, so an abandoned
    /// response does not leak in the store.
    async fn push_with_expiry(&self, key: &str, payload: &str, ttl: Duration) -> Result<()>;

    /// Pop the head of the list at `key`, blocking up to `timeout`.
    /// Returns `None` when the timeout elapses with nothing to pop.
    async fn pop(&self, key: &str, timeout: Duration) -> Result<Option<String>>;
}
