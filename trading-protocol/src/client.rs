use crate::keys::{QueueNames, RESPONSE_TTL_SECS};
use crate::message::{TradingOperation, TradingRequest, TradingResponse};
use crate::transport::QueueTransport;
use log::{debug, error};
use serde_json::{json, Map, Value};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Default wait bound for a response.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Order status checks may take longer on the brokerage side.
pub const STATUS_TIMEOUT: Duration = Duration::from_secs(60);
/// Health pings should fail fast.
pub const PING_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum ClientError {
    /// No response arrived within the wait bound. The request may still be
    /// processed server-side afterward; the client cannot retract it.
    #[error("trading request timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to communicate with trading queue: {0}")]
    Transport(#[from] anyhow::Error),

    #[error("failed to encode or decode queue message: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Producer-side client for the tenant request queue.
///
/// Used by stateless front-end processes: pushes a request onto the tenant's
/// shared request queue and blocks on the per-request response key. The
/// single-consumer worker guarantees FIFO processing; retry policy is the
/// caller's responsibility.
pub struct QueueClient<T: QueueTransport> {
    transport: T,
    names: QueueNames,
}

impl<T: QueueTransport> QueueClient<T> {
    pub fn new(transport: T, names: QueueNames) -> Self {
        Self { transport, names }
    }

    /// Submit a request and wait for the matching response.
    pub async fn submit(
        &self,
        operation: TradingOperation,
        simulation: bool,
        params: Map<String, Value>,
        timeout: Duration,
    ) -> Result<TradingResponse, ClientError> {
        let request_id = Uuid::new_v4().to_string();
        let request = TradingRequest {
            request_id: request_id.clone(),
            operation,
            simulation,
            params,
        };

        let response_key = self.names.response_key(&request_id);

        self.transport
            .push(&self.names.request_queue(), &request.to_json()?)
            .await?;
        debug!("Client: submitted {:?} (id={})", operation, request_id);

        match self.transport.pop(&response_key, timeout).await? {
            Some(payload) => {
                let response = TradingResponse::from_json(&payload)?;
                debug!(
                    "Client: response for {} (success={})",
                    request_id, response.success
                );
                Ok(response)
            }
            None => {
                error!("Client: request {} timed out after {:?}", request_id, timeout);
                Err(ClientError::Timeout(timeout))
            }
        }
    }

    /// Check worker liveness with a short ping.
    pub async fn check_worker_health(&self) -> bool {
        match self
            .submit(TradingOperation::Ping, true, Map::new(), PING_TIMEOUT)
            .await
        {
            Ok(response) => response.success,
            Err(_) => false,
        }
    }

    pub async fn get_symbols(&self, simulation: bool) -> Result<TradingResponse, ClientError> {
        self.submit(
            TradingOperation::GetSymbols,
            simulation,
            Map::new(),
            REQUEST_TIMEOUT,
        )
        .await
    }

    pub async fn get_symbol_info(
        &self,
        symbol: &str,
        simulation: bool,
    ) -> Result<TradingResponse, ClientError> {
        self.submit(
            TradingOperation::GetSymbolInfo,
            simulation,
            params(&[("symbol", json!(symbol))]),
            REQUEST_TIMEOUT,
        )
        .await
    }

    pub async fn get_contract_codes(
        &self,
        simulation: bool,
    ) -> Result<TradingResponse, ClientError> {
        self.submit(
            TradingOperation::GetContractCodes,
            simulation,
            Map::new(),
            REQUEST_TIMEOUT,
        )
        .await
    }

    pub async fn get_positions(&self, simulation: bool) -> Result<TradingResponse, ClientError> {
        self.submit(
            TradingOperation::GetPositions,
            simulation,
            Map::new(),
            REQUEST_TIMEOUT,
        )
        .await
    }

    pub async fn get_futures_overview(
        &self,
        simulation: bool,
    ) -> Result<TradingResponse, ClientError> {
        self.submit(
            TradingOperation::GetFuturesOverview,
            simulation,
            Map::new(),
            REQUEST_TIMEOUT,
        )
        .await
    }

    pub async fn get_product_contracts(
        &self,
        product: &str,
        simulation: bool,
    ) -> Result<TradingResponse, ClientError> {
        self.submit(
            TradingOperation::GetProductContracts,
            simulation,
            params(&[("product", json!(product))]),
            REQUEST_TIMEOUT,
        )
        .await
    }

    pub async fn place_entry_order(
        &self,
        symbol: &str,
        quantity: i64,
        action: &str,
        simulation: bool,
    ) -> Result<TradingResponse, ClientError> {
        self.submit(
            TradingOperation::PlaceEntryOrder,
            simulation,
            params(&[
                ("symbol", json!(symbol)),
                ("quantity", json!(quantity)),
                ("action", json!(action)),
            ]),
            REQUEST_TIMEOUT,
        )
        .await
    }

    pub async fn place_exit_order(
        &self,
        symbol: &str,
        position_direction: &str,
        simulation: bool,
    ) -> Result<TradingResponse, ClientError> {
        self.submit(
            TradingOperation::PlaceExitOrder,
            simulation,
            params(&[
                ("symbol", json!(symbol)),
                ("position_direction", json!(position_direction)),
            ]),
            REQUEST_TIMEOUT,
        )
        .await
    }

    pub async fn check_order_status(
        &self,
        order_id: &str,
        seqno: &str,
        simulation: bool,
    ) -> Result<TradingResponse, ClientError> {
        self.submit(
            TradingOperation::CheckOrderStatus,
            simulation,
            params(&[("order_id", json!(order_id)), ("seqno", json!(seqno))]),
            STATUS_TIMEOUT,
        )
        .await
    }

    /// TTL the worker arms on response keys, exposed for consumers that
    /// re-poll a response key after a client-side timeout.
    pub fn response_ttl() -> Duration {
        Duration::from_secs(RESPONSE_TTL_SECS)
    }
}

fn params(entries: &[(&str, Value)]) -> Map<String, Value> {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}
