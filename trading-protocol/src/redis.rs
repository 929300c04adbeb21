use crate::transport::QueueTransport;
use ::redis::aio::ConnectionManager;
use ::redis::AsyncCommands;
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use std::time::Duration;

/// Redis-backed queue substrate: RPUSH / BLPOP / EXPIRE on plain lists.
#[derive(Clone)]
pub struct RedisQueue {
    manager: ConnectionManager,
}

impl RedisQueue {
    /// Connect to a Redis-compatible store, e.g. `redis://localhost:6379/3`.
    /// The database index in the URL is the tenant's isolation slot.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = ::redis::Client::open(url).context("invalid queue URL")?;
        let manager = ConnectionManager::new(client)
            .await
            .context("failed to connect to queue store")?;
        debug!("Queue: connected to {}", url);
        Ok(Self { manager })
    }
}

#[async_trait]
impl QueueTransport for RedisQueue {
    async fn push(&self, key: &str, payload: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.rpush::<_, _, ()>(key, payload)
            .await
            .context("queue push failed")?;
        Ok(())
    }

    async fn push_with_expiry(&self, key: &str, payload: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.manager.clone();
        ::redis::pipe()
            .rpush(key, payload)
            .expire(key, ttl.as_secs() as i64)
            .query_async::<_, ()>(&mut conn)
            .await
            .context("queue push with expiry failed")?;
        Ok(())
    }

    async fn pop(&self, key: &str, timeout: Duration) -> Result<Option<String>> {
        let mut conn = self.manager.clone();
        // BLPOP returns (key, payload) or nil on timeout.
        let popped: Option<(String, String)> = ::redis::cmd("BLPOP")
            .arg(key)
            .arg(timeout.as_secs_f64())
            .query_async(&mut conn)
            .await
            .context("queue blocking pop failed")?;
        Ok(popped.map(|(_, payload)| payload))
    }
}
