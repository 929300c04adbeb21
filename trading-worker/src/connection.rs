use crate::broker::{BrokerError, BrokerSession, Brokerage, Credentials};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Tunables for the per-mode connection state machine. Tests shrink these.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub max_connect_attempts: u32,
    pub connect_retry_delay: Duration,
    pub health_check_interval: Duration,
    pub signoff_timeout: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            max_connect_attempts: 10,
            connect_retry_delay: Duration::from_secs(5),
            health_check_interval: Duration::from_secs(300),
            signoff_timeout: Duration::from_secs(3),
        }
    }
}

struct ModeSlot {
    session: Option<Arc<dyn BrokerSession>>,
    last_success: Option<Instant>,
    invalidating: bool,
}

impl ModeSlot {
    fn new() -> Self {
        Self {
            session: None,
            last_success: None,
            invalidating: false,
        }
    }
}

fn mode_str(simulation: bool) -> &'static str {
    if simulation {
        "simulation"
    } else {
        "live"
    }
}

/// Owns up to two brokerage sessions (simulation / live) and walks each
/// through Absent -> Connecting -> Connected -> Degraded -> Invalidated.
///
/// The request loop is single-threaded, so the manager is `&mut self`
/// throughout; only the sign-off during invalidation leaves the loop, on a
/// spawned task bounded by a wall-clock timeout.
pub struct ConnectionManager {
    brokerage: Arc<dyn Brokerage>,
    credentials: Credentials,
    settings: ConnectionSettings,
    slots: [ModeSlot; 2],
}

fn idx(simulation: bool) -> usize {
    simulation as usize
}

impl ConnectionManager {
    pub fn new(
        brokerage: Arc<dyn Brokerage>,
        credentials: Credentials,
        settings: ConnectionSettings,
    ) -> Self {
        Self {
            brokerage,
            credentials,
            settings,
            slots: [ModeSlot::new(), ModeSlot::new()],
        }
    }

    pub fn is_connected(&self, simulation: bool) -> bool {
        self.slots[idx(simulation)].session.is_some()
    }

    /// Record a successful operation on this mode.
    pub fn mark_success(&mut self, simulation: bool) {
        self.slots[idx(simulation)].last_success = Some(Instant::now());
    }

    /// Get the session for a mode, connecting lazily with a bounded retry
    /// loop. Exhausting the retries fails this request but leaves the mode
    /// Absent, so the next request tries again.
    pub async fn session(
        &mut self,
        simulation: bool,
    ) -> Result<Arc<dyn BrokerSession>, BrokerError> {
        if let Some(session) = &self.slots[idx(simulation)].session {
            return Ok(session.clone());
        }

        info!("Connection: establishing {} session...", mode_str(simulation));
        let mut last_error: Option<BrokerError> = None;
        for attempt in 1..=self.settings.max_connect_attempts {
            match self.brokerage.connect(&self.credentials, simulation).await {
                Ok(session) => {
                    info!(
                        "Connection: {} session established (attempt {})",
                        mode_str(simulation),
                        attempt
                    );
                    let slot = &mut self.slots[idx(simulation)];
                    slot.session = Some(session.clone());
                    slot.last_success = Some(Instant::now());
                    return Ok(session);
                }
                Err(e) => {
                    error!(
                        "Connection: {} login attempt {} failed: {}",
                        mode_str(simulation),
                        attempt,
                        e
                    );
                    last_error = Some(e);
                    if attempt < self.settings.max_connect_attempts {
                        tokio::time::sleep(self.settings.connect_retry_delay).await;
                    }
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| BrokerError::Other("login failed with no attempts made".into())))
    }

    /// Drop the session for a mode and sign off with a hard timeout.
    ///
    /// The reference is detached first so no later request can touch the
    /// half-dead session. Sign-off runs on its own task; on timeout it is
    /// abandoned, not awaited. Concurrent invalidations coalesce.
    pub async fn invalidate(&mut self, simulation: bool) {
        let slot = &mut self.slots[idx(simulation)];
        if slot.invalidating {
            debug!(
                "Connection: already invalidating {} session, skipping",
                mode_str(simulation)
            );
            return;
        }
        let Some(old_session) = slot.session.take() else {
            debug!("Connection: no {} session to invalidate", mode_str(simulation));
            return;
        };
        slot.invalidating = true;
        warn!("Connection: invalidating {} session...", mode_str(simulation));

        let signoff = tokio::spawn(async move { old_session.logout().await });
        match tokio::time::timeout(self.settings.signoff_timeout, signoff).await {
            Ok(Ok(Ok(()))) => debug!("Connection: sign-off completed"),
            Ok(Ok(Err(e))) => debug!("Connection: sign-off completed with error: {}", e),
            Ok(Err(e)) => debug!("Connection: sign-off task failed: {}", e),
            Err(_) => warn!(
                "Connection: sign-off timed out after {:?}, abandoning old {} session",
                self.settings.signoff_timeout,
                mode_str(simulation)
            ),
        }

        self.slots[idx(simulation)].invalidating = false;
        info!(
            "Connection: {} session invalidated, will reconnect on next request",
            mode_str(simulation)
        );
    }

    /// Invalidate the mode if the error means the session is dead.
    /// Business rejections never touch connection state.
    pub async fn handle_error(&mut self, simulation: bool, error: &BrokerError) {
        if error.is_connection_fault() {
            error!(
                "Connection: fault on {} session: {}",
                mode_str(simulation),
                error
            );
            self.invalidate(simulation).await;
        }
    }

    /// Proactive staleness detection, run while the request queue is idle:
    /// probe any mode whose last success is older than the health interval.
    pub async fn idle_health_check(&mut self) {
        for simulation in [true, false] {
            let probe_target = {
                let slot = &self.slots[idx(simulation)];
                match (&slot.session, slot.last_success) {
                    (Some(session), Some(last))
                        if last.elapsed() > self.settings.health_check_interval =>
                    {
                        Some((session.clone(), last.elapsed()))
                    }
                    _ => None,
                }
            };
            let Some((session, idle_for)) = probe_target else {
                continue;
            };
            info!(
                "Connection: checking {} session health (last success {:?} ago)",
                mode_str(simulation),
                idle_for
            );
            match session.probe().await {
                Ok(()) => {
                    debug!("Connection: {} health check passed", mode_str(simulation));
                    self.mark_success(simulation);
                }
                Err(e) => {
                    warn!(
                        "Connection: {} session appears stale ({}), invalidating",
                        mode_str(simulation),
                        e
                    );
                    self.invalidate(simulation).await;
                }
            }
        }
    }

    /// Invalidate every open mode. Each sign-off is bounded by the
    /// configured timeout, so shutdown cannot hang on a dead session.
    pub async fn shutdown(&mut self) {
        for simulation in [true, false] {
            if self.is_connected(simulation) {
                info!("Connection: cleaning up {} session...", mode_str(simulation));
                self.invalidate(simulation).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::PaperBroker;

    fn fast_settings() -> ConnectionSettings {
        ConnectionSettings {
            max_connect_attempts: 3,
            connect_retry_delay: Duration::from_millis(10),
            health_check_interval: Duration::from_millis(50),
            signoff_timeout: Duration::from_millis(100),
        }
    }

    fn manager(broker: PaperBroker) -> ConnectionManager {
        ConnectionManager::new(
            Arc::new(broker),
            Credentials::default(),
            fast_settings(),
        )
    }

    #[tokio::test]
    async fn lazy_connect_retries_until_login_succeeds() {
        let broker = PaperBroker::new();
        let controls = broker.controls();
        controls.fail_connects(2);
        let mut manager = manager(broker);

        assert!(!manager.is_connected(true));
        manager.session(true).await.unwrap();
        assert!(manager.is_connected(true));
        assert_eq!(controls.connect_attempts(), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_leave_the_mode_absent() {
        let broker = PaperBroker::new();
        let controls = broker.controls();
        controls.fail_connects(3);
        let mut manager = manager(broker);

        let err = manager.session(true).await.unwrap_err();
        assert!(err.is_connection_fault());
        assert!(!manager.is_connected(true));

        // The next request retries from Absent and succeeds.
        manager.session(true).await.unwrap();
        assert!(manager.is_connected(true));
    }

    #[tokio::test]
    async fn connection_fault_forces_a_fresh_session() {
        let broker = PaperBroker::new();
        let controls = broker.controls();
        let mut manager = manager(broker);

        manager.session(true).await.unwrap();
        let attempts_before = controls.connect_attempts();

        manager
            .handle_error(true, &BrokerError::TokenExpired("expired".into()))
            .await;
        assert!(!manager.is_connected(true));

        manager.session(true).await.unwrap();
        assert_eq!(controls.connect_attempts(), attempts_before + 1);
    }

    #[tokio::test]
    async fn business_rejection_leaves_the_session_alone() {
        let broker = PaperBroker::new();
        let mut manager = manager(broker);

        manager.session(true).await.unwrap();
        manager
            .handle_error(true, &BrokerError::ContractNotFound("MXF".into()))
            .await;
        assert!(manager.is_connected(true));
    }

    #[tokio::test]
    async fn hung_signoff_is_abandoned_within_the_timeout() {
        let broker = PaperBroker::new();
        let controls = broker.controls();
        controls.hang_logout(true);
        let mut manager = manager(broker);

        manager.session(true).await.unwrap();
        let started = Instant::now();
        manager.invalidate(true).await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!manager.is_connected(true));
        assert_eq!(controls.logout_calls(), 1);
    }

    #[tokio::test]
    async fn idle_probe_invalidates_a_stale_session() {
        let broker = PaperBroker::new();
        let controls = broker.controls();
        let mut manager = manager(broker);

        manager.session(true).await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;

        controls.fail_next(BrokerError::TokenExpired("stale".into()));
        manager.idle_health_check().await;
        assert!(!manager.is_connected(true));
    }

    #[tokio::test]
    async fn idle_probe_success_refreshes_last_success() {
        let broker = PaperBroker::new();
        let mut manager = manager(broker);

        manager.session(true).await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;

        manager.idle_health_check().await;
        assert!(manager.is_connected(true));

        // Freshly probed, the next sweep does nothing.
        manager.idle_health_check().await;
        assert!(manager.is_connected(true));
    }

    #[tokio::test]
    async fn modes_are_tracked_independently() {
        let broker = PaperBroker::new();
        let mut manager = manager(broker);

        manager.session(true).await.unwrap();
        manager.session(false).await.unwrap();
        manager.invalidate(true).await;
        assert!(!manager.is_connected(true));
        assert!(manager.is_connected(false));
    }

    #[tokio::test]
    async fn shutdown_signs_off_every_open_mode() {
        let broker = PaperBroker::new();
        let controls = broker.controls();
        let mut manager = manager(broker);

        manager.session(true).await.unwrap();
        manager.session(false).await.unwrap();
        manager.shutdown().await;
        assert!(!manager.is_connected(true));
        assert!(!manager.is_connected(false));
        assert_eq!(controls.logout_calls(), 2);
    }
}
