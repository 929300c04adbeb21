use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct OrchestratorConfig {
    /// Network/image identity of managed units (informational labels).
    pub network: String,
    /// Command line used to launch a worker.
    pub worker_command: Vec<String>,

    // Queue endpoint; each worker gets its own database index (its slot).
    pub queue_host: String,
    pub queue_port: u16,

    /// Host directory under which per-tenant credential exports are staged.
    pub secrets_dir: PathBuf,

    // Resource limits handed to the isolation backend.
    pub memory_limit: Option<String>,
    pub cpu_quota: Option<f64>,

    pub stop_timeout_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            network: "trading".to_string(),
            worker_command: vec!["trading-worker".to_string()],
            queue_host: "127.0.0.1".to_string(),
            queue_port: 6379,
            secrets_dir: PathBuf::from("/var/lib/worker-orchestrator/secrets"),
            memory_limit: Some("512m".to_string()),
            cpu_quota: Some(0.5),
            stop_timeout_secs: 10,
        }
    }
}

impl OrchestratorConfig {
    /// Layered load: defaults, then `orchestrator.toml` if present, then
    /// `ORCHESTRATOR_*` environment overrides.
    pub fn load() -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?)
            .add_source(config::File::with_name("orchestrator").required(false))
            .add_source(config::Environment::with_prefix("ORCHESTRATOR"))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Queue URL for a worker in the given isolation slot. The slot selects
    /// the database index, so tenants can never see each other's queues.
    pub fn queue_url_for_slot(&self, slot: u8) -> String {
        format!("redis://{}:{}/{}", self.queue_host, self.queue_port, slot)
    }

    pub fn container_name(&self, tenant_slug: &str) -> String {
        format!("worker-{}", tenant_slug)
    }

    pub fn stop_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.stop_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_url_uses_the_slot_as_database_index() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.queue_url_for_slot(0), "redis://127.0.0.1:6379/0");
        assert_eq!(config.queue_url_for_slot(15), "redis://127.0.0.1:6379/15");
    }

    #[test]
    fn container_names_are_slug_scoped() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.container_name("acme"), "worker-acme");
    }
}
