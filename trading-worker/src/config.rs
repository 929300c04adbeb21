use crate::broker::{Brokerage, Credentials, PaperBroker};
use crate::connection::ConnectionSettings;
use anyhow::{bail, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use trading_protocol::QueueNames;

/// Worker process configuration. Populated from the environment the
/// orchestrator injects into the isolation unit; durations are plain
/// seconds so tests can shrink them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub tenant_id: String,
    pub tenant_slug: String,
    pub queue_url: String,
    pub mock_mode: bool,

    pub max_connect_attempts: u32,
    pub connect_retry_delay_secs: u64,
    pub queue_poll_timeout_secs: u64,
    pub health_check_interval_secs: u64,
    pub signoff_timeout_secs: u64,
    pub response_ttl_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            tenant_id: String::new(),
            tenant_slug: String::new(),
            queue_url: "redis://localhost:6379/0".to_string(),
            mock_mode: false,

            max_connect_attempts: 10,
            connect_retry_delay_secs: 5,
            queue_poll_timeout_secs: 5,
            health_check_interval_secs: 300,
            signoff_timeout_secs: 3,
            response_ttl_secs: 60,
        }
    }
}

impl WorkerConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(id) = std::env::var("TENANT_ID") {
            config.tenant_id = id;
        }
        if let Ok(slug) = std::env::var("TENANT_SLUG") {
            config.tenant_slug = slug;
        }
        if let Ok(url) = std::env::var("QUEUE_URL").or_else(|_| std::env::var("REDIS_URL")) {
            config.queue_url = url;
        }
        config.mock_mode = std::env::var("DEV_MOCK_MODE")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        config
    }

    pub fn queue_names(&self) -> QueueNames {
        QueueNames::from_tenant(if self.tenant_id.is_empty() {
            None
        } else {
            Some(&self.tenant_id)
        })
    }

    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            max_connect_attempts: self.max_connect_attempts,
            connect_retry_delay: Duration::from_secs(self.connect_retry_delay_secs),
            health_check_interval: Duration::from_secs(self.health_check_interval_secs),
            signoff_timeout: Duration::from_secs(self.signoff_timeout_secs),
        }
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.queue_poll_timeout_secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn response_ttl(&self) -> Duration {
        Duration::from_secs(self.response_ttl_secs)
    }
}

/// Select the brokerage implementation for this deployment.
///
/// Only the paper brokerage ships in this crate; a live adapter implements
/// `Brokerage` and replaces this selection at the deployment boundary.
/// Running against the paper brokerage requires the explicit opt-in so a
/// misconfigured production worker fails at startup instead of quietly
/// filling orders in memory.
pub fn select_brokerage(config: &WorkerConfig) -> Result<Arc<dyn Brokerage>> {
    if config.mock_mode {
        Ok(Arc::new(PaperBroker::new()))
    } else {
        bail!(
            "no live brokerage adapter is configured; set DEV_MOCK_MODE=true \
             to serve requests from the paper brokerage"
        )
    }
}

/// Read a secret from an environment variable, falling back to a file
/// whose path is named by `<name>_FILE` (mounted secrets).
pub fn read_secret(env_name: &str, file_env_name: &str) -> Option<String> {
    if let Ok(value) = std::env::var(env_name) {
        if !value.is_empty() {
            return Some(value);
        }
    }
    if let Ok(path) = std::env::var(file_env_name) {
        let path = Path::new(&path);
        match std::fs::read_to_string(path) {
            Ok(contents) => return Some(contents.trim().to_string()),
            Err(_) => warn!("Worker: secret file not found: {}", path.display()),
        }
    }
    None
}

/// Load brokerage credentials from the injected environment.
pub fn load_credentials() -> Result<Credentials> {
    let api_key = read_secret("API_KEY", "API_KEY_FILE");
    let secret_key = read_secret("SECRET_KEY", "SECRET_KEY_FILE");
    let (Some(api_key), Some(secret_key)) = (api_key, secret_key) else {
        bail!(
            "API credentials not found. Set API_KEY/SECRET_KEY or \
             API_KEY_FILE/SECRET_KEY_FILE for mounted secrets."
        );
    };
    Ok(Credentials {
        api_key,
        secret_key,
        ca_path: read_secret("CA_PATH", "CA_PATH_FILE"),
        ca_password: read_secret("CA_PASSWORD", "CA_PASSWORD_FILE"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_id_selects_the_namespaced_queue() {
        let config = WorkerConfig {
            tenant_id: "t-7".into(),
            ..WorkerConfig::default()
        };
        assert_eq!(
            config.queue_names().request_queue(),
            "tenant:t-7:trading:requests"
        );

        let bare = WorkerConfig::default();
        assert_eq!(bare.queue_names().request_queue(), "trading:requests");
    }

    #[test]
    fn brokerage_selection_requires_the_mock_opt_in() {
        let mock = WorkerConfig {
            mock_mode: true,
            ..WorkerConfig::default()
        };
        assert!(select_brokerage(&mock).is_ok());

        let live = WorkerConfig::default();
        let err = select_brokerage(&live).unwrap_err();
        assert!(err.to_string().contains("no live brokerage adapter"));
    }
}
