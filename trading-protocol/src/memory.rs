use crate::transport::QueueTransport;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Default)]
struct Shared {
    lists: HashMap<String, VecDeque<String>>,
    expiries: HashMap<String, Instant>,
}

impl Shared {
    fn purge_expired(&mut self) {
        let now = Instant::now();
        let dead: Vec<String> = self
            .expiries
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in dead {
            self.expiries.remove(&key);
            self.lists.remove(&key);
        }
    }
}

/// In-memory queue substrate for tests and single-process runs.
/// Same push / blocking-pop / expiry semantics as the Redis transport.
#[derive(Clone, Default)]
pub struct MemoryQueue {
    shared: Arc<Mutex<Shared>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of payloads currently queued under `key`.
    pub fn len(&self, key: &str) -> usize {
        let mut shared = self.shared.lock().unwrap();
        shared.purge_expired();
        shared.lists.get(key).map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, key: &str) -> bool {
        self.len(key) == 0
    }
}

#[async_trait]
impl QueueTransport for MemoryQueue {
    async fn push(&self, key: &str, payload: &str) -> Result<()> {
        let mut shared = self.shared.lock().unwrap();
        shared.purge_expired();
        shared
            .lists
            .entry(key.to_string())
            .or_default()
            .push_back(payload.to_string());
        Ok(())
    }

    async fn push_with_expiry(&self, key: &str, payload: &str, ttl: Duration) -> Result<()> {
        let mut shared = self.shared.lock().unwrap();
        shared.purge_expired();
        shared
            .lists
            .entry(key.to_string())
            .or_default()
            .push_back(payload.to_string());
        shared
            .expiries
            .insert(key.to_string(), Instant::now() + ttl);
        Ok(())
    }

    async fn pop(&self, key: &str, timeout: Duration) -> Result<Option<String>> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut shared = self.shared.lock().unwrap();
                shared.purge_expired();
                if let Some(list) = shared.lists.get_mut(key) {
                    if let Some(payload) = list.pop_front() {
                        return Ok(Some(payload));
                    }
                }
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}
