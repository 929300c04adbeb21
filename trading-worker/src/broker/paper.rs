use super::error::BrokerError;
use super::types::{
    Action, Contract, Deal, OrderStatus, OrderStatusReport, OrderTicket, Position, TradeHandle,
};
use super::{BrokerSession, Brokerage, Credentials};
use async_trait::async_trait;
use log::{debug, info};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// An order accepted by the paper brokerage.
#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub ticket: OrderTicket,
    pub code: String,
    pub action: Action,
    pub quantity: i64,
    pub price: f64,
}

#[derive(Debug, Default)]
struct PaperState {
    catalog: Vec<Contract>,
    positions: Vec<Position>,
    orders: Vec<PlacedOrder>,
    next_order: u64,
    connect_attempts: u64,
    failing_connects: u32,
    scripted_failures: VecDeque<BrokerError>,
    hang_logout: bool,
    logout_calls: u64,
}

/// Test/inspection handle shared with the broker and all of its sessions.
#[derive(Debug, Clone, Default)]
pub struct PaperControls {
    state: Arc<Mutex<PaperState>>,
}

impl PaperControls {
    pub fn set_positions(&self, positions: Vec<Position>) {
        self.state.lock().unwrap().positions = positions;
    }

    /// Make the next `count` login attempts fail with a timeout.
    pub fn fail_connects(&self, count: u32) {
        self.state.lock().unwrap().failing_connects = count;
    }

    /// Queue an error to be returned by the next session call.
    pub fn fail_next(&self, error: BrokerError) {
        self.state.lock().unwrap().scripted_failures.push_back(error);
    }

    /// Make `logout` hang far longer than any sign-off timeout.
    pub fn hang_logout(&self, hang: bool) {
        self.state.lock().unwrap().hang_logout = hang;
    }

    pub fn placed_orders(&self) -> Vec<PlacedOrder> {
        self.state.lock().unwrap().orders.clone()
    }

    pub fn connect_attempts(&self) -> u64 {
        self.state.lock().unwrap().connect_attempts
    }

    pub fn logout_calls(&self) -> u64 {
        self.state.lock().unwrap().logout_calls
    }
}

/// In-process brokerage used by tests and mock deployments. Sessions share
/// one scriptable state so positions survive reconnects, the way a real
/// brokerage account does.
#[derive(Debug)]
pub struct PaperBroker {
    controls: PaperControls,
}

impl PaperBroker {
    pub fn new() -> Self {
        let controls = PaperControls::default();
        controls.state.lock().unwrap().catalog = default_catalog();
        Self { controls }
    }

    pub fn controls(&self) -> PaperControls {
        self.controls.clone()
    }
}

impl Default for PaperBroker {
    fn default() -> Self {
        Self::new()
    }
}

fn default_catalog() -> Vec<Contract> {
    let mut catalog = Vec::new();
    for product in ["MXF", "TXF"] {
        for (suffix, month, name) in [("F5", "202501", "front"), ("G5", "202502", "next")] {
            catalog.push(Contract {
                product: product.to_string(),
                symbol: format!("{}{}", product, month),
                code: format!("{}{}", product, suffix),
                name: format!("{} {}", product, name),
                category: "Futures".to_string(),
                delivery_month: month.to_string(),
                underlying_kind: "I".to_string(),
                limit_up: 25000.0,
                limit_down: 20000.0,
                reference: 22500.0,
            });
        }
    }
    catalog
}

#[async_trait]
impl Brokerage for PaperBroker {
    async fn connect(
        &self,
        _credentials: &Credentials,
        simulation: bool,
    ) -> Result<Arc<dyn BrokerSession>, BrokerError> {
        let mut state = self.controls.state.lock().unwrap();
        state.connect_attempts += 1;
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(BrokerError::Timeout("paper login timed out".into()));
        }
        drop(state);
        info!(
            "PaperBroker: session established ({})",
            if simulation { "simulation" } else { "live" }
        );
        Ok(Arc::new(PaperSession {
            controls: self.controls.clone(),
        }))
    }
}

#[derive(Debug)]
pub struct PaperSession {
    controls: PaperControls,
}

impl PaperSession {
    fn take_scripted_failure(&self) -> Result<(), BrokerError> {
        let mut state = self.controls.state.lock().unwrap();
        match state.scripted_failures.pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl BrokerSession for PaperSession {
    async fn probe(&self) -> Result<(), BrokerError> {
        self.take_scripted_failure()
    }

    async fn contracts(&self) -> Result<Vec<Contract>, BrokerError> {
        self.take_scripted_failure()?;
        Ok(self.controls.state.lock().unwrap().catalog.clone())
    }

    async fn positions(&self) -> Result<Vec<Position>, BrokerError> {
        self.take_scripted_failure()?;
        Ok(self.controls.state.lock().unwrap().positions.clone())
    }

    async fn place_order(
        &self,
        contract: &Contract,
        action: Action,
        quantity: i64,
    ) -> Result<TradeHandle, BrokerError> {
        self.take_scripted_failure()?;
        let mut state = self.controls.state.lock().unwrap();
        state.next_order += 1;
        let n = state.next_order;
        let ticket = OrderTicket {
            order_id: format!("paper-{:06}", n),
            seqno: format!("{}", 100000 + n),
            ordno: format!("M{:06}", n),
        };
        let handle = TradeHandle {
            ticket: ticket.clone(),
            token: ticket.seqno.clone(),
        };
        debug!(
            "PaperBroker: accepted {:?} {} x{} ({})",
            action, contract.code, quantity, ticket.order_id
        );
        state.orders.push(PlacedOrder {
            ticket,
            code: contract.code.clone(),
            action,
            quantity,
            price: contract.reference,
        });
        Ok(handle)
    }

    async fn update_status(
        &self,
        handle: &TradeHandle,
    ) -> Result<OrderStatusReport, BrokerError> {
        self.take_scripted_failure()?;
        let state = self.controls.state.lock().unwrap();
        let order = state
            .orders
            .iter()
            .find(|o| o.ticket.seqno == handle.token)
            .ok_or_else(|| {
                BrokerError::Other(format!("unknown trade token {}", handle.token))
            })?;
        // Paper fills are immediate at the reference price.
        Ok(OrderStatusReport {
            status: OrderStatus::Filled,
            order_quantity: order.quantity,
            deal_quantity: order.quantity,
            cancel_quantity: 0,
            deals: vec![Deal {
                seq: "1".to_string(),
                price: order.price,
                quantity: order.quantity,
                ts: chrono::Utc::now().timestamp(),
            }],
        })
    }

    async fn list_trades(&self) -> Result<Vec<TradeHandle>, BrokerError> {
        self.take_scripted_failure()?;
        let state = self.controls.state.lock().unwrap();
        Ok(state
            .orders
            .iter()
            .map(|o| TradeHandle {
                ticket: o.ticket.clone(),
                token: o.ticket.seqno.clone(),
            })
            .collect())
    }

    async fn logout(&self) -> Result<(), BrokerError> {
        let hang = {
            let mut state = self.controls.state.lock().unwrap();
            state.logout_calls += 1;
            state.hang_logout
        };
        if hang {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        Ok(())
    }
}
