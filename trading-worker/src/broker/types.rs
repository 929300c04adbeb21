use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Buy,
    Sell,
}

impl Action {
    pub fn opposite(&self) -> Action {
        match self {
            Action::Buy => Action::Sell,
            Action::Sell => Action::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Buy => "Buy",
            Action::Sell => "Sell",
        }
    }

    pub fn parse(value: &str) -> Option<Action> {
        match value {
            "Buy" => Some(Action::Buy),
            "Sell" => Some(Action::Sell),
            _ => None,
        }
    }
}

/// A tradable futures contract as the brokerage catalog describes it.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Contract {
    pub product: String,
    pub symbol: String,
    pub code: String,
    pub name: String,
    pub category: String,
    pub delivery_month: String,
    pub underlying_kind: String,
    pub limit_up: f64,
    pub limit_down: f64,
    pub reference: f64,
}

/// An open position held at the brokerage. `quantity` is always positive;
/// `direction` carries the side.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Position {
    pub id: String,
    pub code: String,
    pub direction: Action,
    pub quantity: i64,
    pub price: f64,
    pub last_price: f64,
    pub pnl: f64,
    pub yd_quantity: i64,
}

impl Position {
    /// Signed quantity: positive long, negative short.
    pub fn signed_quantity(&self) -> i64 {
        match self.direction {
            Action::Buy => self.quantity,
            Action::Sell => -self.quantity,
        }
    }
}

/// Identifiers the brokerage assigns to a placed order.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct OrderTicket {
    pub order_id: String,
    pub seqno: String,
    pub ordno: String,
}

/// Opaque handle to a brokerage-side trade object, needed to poll its
/// fill status later. `token` is meaningful only to the issuing session.
#[derive(Debug, Clone)]
pub struct TradeHandle {
    pub ticket: OrderTicket,
    pub token: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    PendingSubmit,
    Submitted,
    PartFilled,
    Filled,
    Cancelled,
    Failed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::PendingSubmit => "PendingSubmit",
            OrderStatus::Submitted => "Submitted",
            OrderStatus::PartFilled => "PartFilled",
            OrderStatus::Filled => "Filled",
            OrderStatus::Cancelled => "Cancelled",
            OrderStatus::Failed => "Failed",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Deal {
    pub seq: String,
    pub price: f64,
    pub quantity: i64,
    pub ts: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct OrderStatusReport {
    pub status: OrderStatus,
    pub order_quantity: i64,
    pub deal_quantity: i64,
    pub cancel_quantity: i64,
    pub deals: Vec<Deal>,
}

impl OrderStatusReport {
    /// Volume-weighted average fill price across deals, 0.0 when unfilled.
    pub fn fill_avg_price(&self) -> f64 {
        let total_qty: i64 = self.deals.iter().map(|d| d.quantity).sum();
        if total_qty == 0 {
            return 0.0;
        }
        let total_value: f64 = self
            .deals
            .iter()
            .map(|d| d.price * d.quantity as f64)
            .sum();
        total_value / total_qty as f64
    }
}
