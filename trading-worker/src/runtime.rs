use crate::config::WorkerConfig;
use crate::connection::ConnectionManager;
use crate::handlers::{handle_operation, OpError};
use crate::pending::PendingTrades;
use log::{debug, error, info, warn};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use trading_protocol::{QueueNames, QueueTransport, TradingRequest, TradingResponse};

/// The per-tenant worker: single consumer of the tenant request queue.
///
/// Requests are processed one at a time, so two order placements for the
/// same tenant can never race against the brokerage session.
pub struct WorkerRuntime<Q: QueueTransport> {
    transport: Q,
    names: QueueNames,
    connections: ConnectionManager,
    pending: PendingTrades,
    poll_timeout: Duration,
    health_check_interval: Duration,
    response_ttl: Duration,
}

impl<Q: QueueTransport> WorkerRuntime<Q> {
    pub fn new(
        transport: Q,
        names: QueueNames,
        connections: ConnectionManager,
        pending: PendingTrades,
        config: &WorkerConfig,
    ) -> Self {
        Self {
            transport,
            names,
            connections,
            pending,
            poll_timeout: config.poll_timeout(),
            health_check_interval: config.health_check_interval(),
            response_ttl: config.response_ttl(),
        }
    }

    /// Main loop. Returns once `shutdown` flips to true and every open
    /// connection mode has been signed off (bounded per mode).
    ///
    /// Shutdown is checked between iterations, never raced against the pop:
    /// a request consumed from the queue always gets its response published
    /// before the loop honors the signal. The short poll timeout bounds how
    /// long an idle worker takes to notice shutdown.
    pub async fn run(mut self, shutdown: watch::Receiver<bool>) {
        let request_queue = self.names.request_queue();
        info!("Worker: starting, listening on queue: {}", request_queue);

        // Eager first connection so the first request does not pay the
        // login latency. Failure is not fatal; requests retry lazily.
        if let Err(e) = self.connections.session(true).await {
            warn!("Worker: initial simulation connection failed: {}", e);
        }

        let mut last_health_check = Instant::now();

        while !*shutdown.borrow() {
            match self.transport.pop(&request_queue, self.poll_timeout).await {
                Ok(Some(payload)) => self.process(&payload).await,
                Ok(None) => {
                    // Idle: a good time to look for stale sessions.
                    if last_health_check.elapsed() > self.health_check_interval {
                        debug!("Worker: periodic health check during idle");
                        self.connections.idle_health_check().await;
                        last_health_check = Instant::now();
                    }
                }
                Err(e) => {
                    error!("Worker: queue error: {}", e);
                    tokio::time::sleep(self.poll_timeout).await;
                }
            }
        }

        info!("Worker: shutting down...");
        self.connections.shutdown().await;
        info!("Worker: stopped");
    }

    async fn process(&mut self, payload: &str) {
        let request = match TradingRequest::from_json(payload) {
            Ok(request) => request,
            Err(e) => {
                error!("Worker: discarding malformed request: {}", e);
                return;
            }
        };
        info!(
            "Worker: received {:?} (simulation={}, id={})",
            request.operation, request.simulation, request.request_id
        );

        let response = self.execute(&request).await;
        if response.success {
            self.connections.mark_success(request.simulation);
        }

        let response_key = self.names.response_key(&request.request_id);
        match response.to_json() {
            Ok(json) => {
                if let Err(e) = self
                    .transport
                    .push_with_expiry(&response_key, &json, self.response_ttl)
                    .await
                {
                    error!(
                        "Worker: failed to publish response for {}: {}",
                        request.request_id, e
                    );
                }
            }
            Err(e) => error!("Worker: failed to encode response: {}", e),
        }

        info!(
            "Worker: completed {:?} (success={}, id={})",
            request.operation, response.success, request.request_id
        );
    }

    async fn execute(&mut self, request: &TradingRequest) -> TradingResponse {
        let session = match self.connections.session(request.simulation).await {
            Ok(session) => session,
            Err(e) => {
                return TradingResponse::err(
                    &request.request_id,
                    format!("Connection error: {}", e),
                );
            }
        };

        match handle_operation(&session, &mut self.pending, request).await {
            Ok(data) => TradingResponse::ok(&request.request_id, data),
            Err(OpError::Broker(e)) => {
                self.connections.handle_error(request.simulation, &e).await;
                let message = if e.is_connection_fault() {
                    format!("Connection error: {}", e)
                } else {
                    e.to_string()
                };
                TradingResponse::err(&request.request_id, message)
            }
            Err(OpError::BadRequest(message)) => {
                TradingResponse::err(&request.request_id, message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{
        Action, BrokerError, Credentials, PaperBroker, PaperControls, Position,
    };
    use crate::connection::ConnectionSettings;
    use std::sync::Arc;
    use trading_protocol::{MemoryQueue, QueueClient};

    struct Harness {
        client: QueueClient<MemoryQueue>,
        queue: MemoryQueue,
        names: QueueNames,
        controls: PaperControls,
        shutdown: watch::Sender<bool>,
        handle: tokio::task::JoinHandle<()>,
    }

    fn fast_config() -> WorkerConfig {
        WorkerConfig {
            tenant_id: "tenant-1".into(),
            queue_poll_timeout_secs: 1,
            ..WorkerConfig::default()
        }
    }

    fn start_worker() -> Harness {
        let _ = env_logger::builder().is_test(true).try_init();

        let queue = MemoryQueue::new();
        let config = fast_config();
        let names = config.queue_names();

        let broker = PaperBroker::new();
        let controls = broker.controls();
        let connections = ConnectionManager::new(
            Arc::new(broker),
            Credentials::default(),
            ConnectionSettings {
                max_connect_attempts: 2,
                connect_retry_delay: Duration::from_millis(10),
                health_check_interval: Duration::from_millis(50),
                signoff_timeout: Duration::from_millis(100),
            },
        );

        let runtime = WorkerRuntime::new(
            queue.clone(),
            names.clone(),
            connections,
            PendingTrades::new(),
            &config,
        );

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(runtime.run(rx));
        Harness {
            client: QueueClient::new(queue.clone(), names.clone()),
            queue,
            names,
            controls,
            shutdown: tx,
            handle,
        }
    }

    fn short_position(code: &str, quantity: i64) -> Position {
        Position {
            id: "p1".into(),
            code: code.into(),
            direction: Action::Sell,
            quantity,
            price: 22500.0,
            last_price: 22500.0,
            pnl: 0.0,
            yd_quantity: 0,
        }
    }

    #[tokio::test]
    async fn ping_round_trip_reports_healthy() {
        let harness = start_worker();
        assert!(harness.client.check_worker_health().await);
        let _ = harness.shutdown.send(true);
    }

    #[tokio::test]
    async fn entry_order_nets_against_a_short_position_end_to_end() {
        let harness = start_worker();
        harness
            .controls
            .set_positions(vec![short_position("MXFF5", 3)]);

        let response = harness
            .client
            .place_entry_order("MXF202501", 5, "Buy", true)
            .await
            .unwrap();
        assert!(response.success);
        let data = response.data.unwrap();
        assert_eq!(data["quantity"], 8);
        assert_eq!(data["original_quantity"], 5);
        assert_eq!(data["code"], "MXFF5");

        let _ = harness.shutdown.send(true);
    }

    #[tokio::test]
    async fn exit_order_without_position_succeeds_with_null_order() {
        let harness = start_worker();

        let response = harness
            .client
            .place_exit_order("MXF202501", "Buy", true)
            .await
            .unwrap();
        assert!(response.success);
        let data = response.data.unwrap();
        assert!(data["order_id"].is_null());
        assert_eq!(data["message"], "No position to exit");

        let _ = harness.shutdown.send(true);
    }

    #[tokio::test]
    async fn order_status_is_pollable_after_placement() {
        let harness = start_worker();

        let placed = harness
            .client
            .place_entry_order("MXF202501", 2, "Sell", true)
            .await
            .unwrap();
        let data = placed.data.unwrap();

        let status = harness
            .client
            .check_order_status(
                data["order_id"].as_str().unwrap(),
                data["seqno"].as_str().unwrap(),
                true,
            )
            .await
            .unwrap();
        assert!(status.success);
        assert_eq!(status.data.unwrap()["status"], "Filled");

        let _ = harness.shutdown.send(true);
    }

    #[tokio::test]
    async fn connection_fault_fails_the_request_then_recovers() {
        let harness = start_worker();

        // Wait for the eager connection, then poison the next call.
        tokio::time::sleep(Duration::from_millis(50)).await;
        harness
            .controls
            .fail_next(BrokerError::TokenExpired("poisoned".into()));

        let failed = harness.client.get_positions(true).await.unwrap();
        assert!(!failed.success);
        assert!(failed.error.unwrap().contains("Connection error"));

        // The stale session was invalidated; the next request reconnects.
        let attempts_before = harness.controls.connect_attempts();
        let recovered = harness.client.get_positions(true).await.unwrap();
        assert!(recovered.success);
        assert!(harness.controls.connect_attempts() > attempts_before);

        let _ = harness.shutdown.send(true);
    }

    #[tokio::test]
    async fn business_rejection_does_not_drop_the_session() {
        let harness = start_worker();

        let rejected = harness.client.get_symbol_info("NOPE", true).await.unwrap();
        assert!(!rejected.success);

        // Same session still serves the next request without reconnecting.
        let attempts_before = harness.controls.connect_attempts();
        let ok = harness.client.get_symbols(true).await.unwrap();
        assert!(ok.success);
        assert_eq!(harness.controls.connect_attempts(), attempts_before);

        let _ = harness.shutdown.send(true);
    }

    #[tokio::test]
    async fn consumed_request_is_answered_even_when_shutdown_races_it() {
        let harness = start_worker();
        assert!(harness.client.check_worker_health().await);

        let request = trading_protocol::TradingRequest {
            request_id: "race-1".into(),
            operation: trading_protocol::TradingOperation::GetSymbols,
            simulation: true,
            params: serde_json::Map::new(),
        };
        harness
            .queue
            .push(&harness.names.request_queue(), &request.to_json().unwrap())
            .await
            .unwrap();
        let _ = harness.shutdown.send(true);

        tokio::time::timeout(Duration::from_secs(3), harness.handle)
            .await
            .expect("worker did not stop in time")
            .unwrap();

        // The request was either never consumed or it got its response;
        // consumed-and-dropped must not happen.
        let still_queued = harness.queue.len(&harness.names.request_queue());
        let response = harness
            .queue
            .pop(
                &harness.names.response_key(&request.request_id),
                Duration::from_millis(50),
            )
            .await
            .unwrap();
        assert!(
            still_queued == 1 || response.is_some(),
            "request consumed but no response published"
        );
    }

    #[tokio::test]
    async fn shutdown_signs_off_open_sessions_and_exits() {
        let harness = start_worker();
        assert!(harness.client.check_worker_health().await);

        let _ = harness.shutdown.send(true);
        tokio::time::timeout(Duration::from_secs(3), harness.handle)
            .await
            .expect("worker did not stop in time")
            .unwrap();
        assert!(harness.controls.logout_calls() >= 1);
    }
}
