use crate::broker::{Action, BrokerError, BrokerSession, Contract, Position};
use crate::pending::PendingTrades;
use log::{debug, info};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use thiserror::Error;
use trading_protocol::{TradingOperation, TradingRequest};

#[derive(Error, Debug)]
pub enum OpError {
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// Malformed or incomplete request parameters. Always a failed
    /// response, never a connection-state change.
    #[error("{0}")]
    BadRequest(String),
}

fn require_str<'a>(params: &'a Map<String, Value>, name: &str) -> Result<&'a str, OpError> {
    params
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| OpError::BadRequest(format!("missing parameter '{}'", name)))
}

fn require_i64(params: &Map<String, Value>, name: &str) -> Result<i64, OpError> {
    params
        .get(name)
        .and_then(Value::as_i64)
        .ok_or_else(|| OpError::BadRequest(format!("missing parameter '{}'", name)))
}

async fn contract_by_symbol(
    session: &Arc<dyn BrokerSession>,
    symbol: &str,
) -> Result<Contract, OpError> {
    session
        .contracts()
        .await?
        .into_iter()
        .find(|c| c.symbol == symbol)
        .ok_or_else(|| OpError::Broker(BrokerError::ContractNotFound(symbol.to_string())))
}

/// Net position for a contract code: positive long, negative short, 0 flat.
async fn current_position(
    session: &Arc<dyn BrokerSession>,
    code: &str,
) -> Result<i64, OpError> {
    let positions = session.positions().await?;
    Ok(positions
        .iter()
        .filter(|p| p.code == code)
        .map(Position::signed_quantity)
        .sum())
}

fn contract_json(contract: &Contract) -> Value {
    json!({
        "symbol": contract.symbol,
        "code": contract.code,
        "name": contract.name,
        "category": contract.category,
        "delivery_month": contract.delivery_month,
    })
}

/// Execute one request against an established session. Returns the `data`
/// payload for the success response; errors are classified by the caller.
pub async fn handle_operation(
    session: &Arc<dyn BrokerSession>,
    pending: &mut PendingTrades,
    request: &TradingRequest,
) -> Result<Value, OpError> {
    let params = &request.params;
    match request.operation {
        TradingOperation::Ping => Ok(json!({
            "status": "healthy",
            "simulation": request.simulation,
        })),

        TradingOperation::GetSymbols => {
            let catalog = session.contracts().await?;
            let symbols: Vec<Value> = catalog.iter().map(contract_json).collect();
            let count = symbols.len();
            Ok(json!({ "symbols": symbols, "count": count }))
        }

        TradingOperation::GetSymbolInfo => {
            let symbol = require_str(params, "symbol")?;
            let contract = contract_by_symbol(session, symbol).await?;
            Ok(json!({
                "symbol": contract.symbol,
                "code": contract.code,
                "name": contract.name,
                "category": contract.category,
                "delivery_month": contract.delivery_month,
                "underlying_kind": contract.underlying_kind,
                "limit_up": contract.limit_up,
                "limit_down": contract.limit_down,
                "reference": contract.reference,
            }))
        }

        TradingOperation::GetContractCodes => {
            let codes: Vec<String> = session
                .contracts()
                .await?
                .into_iter()
                .map(|c| c.code)
                .collect();
            let count = codes.len();
            Ok(json!({ "contracts": codes, "count": count }))
        }

        TradingOperation::GetPositions => {
            let catalog = session.contracts().await?;
            let positions = session.positions().await?;
            let rows: Vec<Value> = positions
                .iter()
                .map(|p| {
                    // Map the brokerage code back to a symbol; fall back to
                    // the code when the catalog does not know it.
                    let symbol = catalog
                        .iter()
                        .find(|c| c.code == p.code)
                        .map(|c| c.symbol.clone())
                        .unwrap_or_else(|| p.code.clone());
                    json!({
                        "id": p.id,
                        "symbol": symbol,
                        "code": p.code,
                        "direction": p.direction.as_str(),
                        "quantity": p.quantity,
                        "price": p.price,
                        "last_price": p.last_price,
                        "pnl": p.pnl,
                        "yd_quantity": p.yd_quantity,
                    })
                })
                .collect();
            let count = rows.len();
            Ok(json!({ "positions": rows, "count": count }))
        }

        TradingOperation::GetFuturesOverview => {
            let catalog = session.contracts().await?;
            let mut products: Vec<Value> = Vec::new();
            let mut seen: Vec<String> = Vec::new();
            for contract in &catalog {
                if seen.contains(&contract.product) {
                    continue;
                }
                seen.push(contract.product.clone());
                let contracts: Vec<Value> = catalog
                    .iter()
                    .filter(|c| c.product == contract.product)
                    .map(|c| json!({ "symbol": c.symbol, "name": c.name, "code": c.code }))
                    .collect();
                let count = contracts.len();
                products.push(json!({
                    "product": contract.product,
                    "contracts": contracts,
                    "count": count,
                }));
            }
            Ok(json!({ "products": products }))
        }

        TradingOperation::GetProductContracts => {
            let product = require_str(params, "product")?.to_uppercase();
            let contracts: Vec<Value> = session
                .contracts()
                .await?
                .iter()
                .filter(|c| c.product == product)
                .map(contract_json)
                .collect();
            if contracts.is_empty() {
                return Err(OpError::BadRequest(format!(
                    "Product '{}' not found",
                    product
                )));
            }
            let count = contracts.len();
            Ok(json!({
                "product": product,
                "contracts": contracts,
                "count": count,
            }))
        }

        TradingOperation::PlaceEntryOrder => {
            place_entry_order(session, pending, params).await
        }

        TradingOperation::PlaceExitOrder => place_exit_order(session, pending, params).await,

        TradingOperation::CheckOrderStatus => {
            check_order_status(session, pending, params).await
        }
    }
}

/// Entry orders net against the existing position: an order opposing the
/// current position is sized to close it and open the requested quantity
/// in one transaction (full reversal).
async fn place_entry_order(
    session: &Arc<dyn BrokerSession>,
    pending: &mut PendingTrades,
    params: &Map<String, Value>,
) -> Result<Value, OpError> {
    let symbol = require_str(params, "symbol")?;
    let original_quantity = require_i64(params, "quantity")?;
    let action_str = require_str(params, "action")?;
    let action = Action::parse(action_str)
        .ok_or_else(|| OpError::BadRequest(format!("invalid action '{}'", action_str)))?;

    let contract = contract_by_symbol(session, symbol).await?;
    let position = current_position(session, &contract.code).await?;

    let mut quantity = original_quantity;
    match action {
        Action::Buy if position < 0 => quantity -= position,
        Action::Sell if position > 0 => quantity += position,
        _ => {}
    }
    if quantity != original_quantity {
        info!(
            "Worker: reversing position of {} on {} (order quantity {} -> {})",
            position, contract.code, original_quantity, quantity
        );
    }

    let handle = session.place_order(&contract, action, quantity).await?;
    let ticket = handle.ticket.clone();
    pending.insert(handle);

    Ok(json!({
        "order_id": ticket.order_id,
        "seqno": ticket.seqno,
        "ordno": ticket.ordno,
        "action": action.as_str(),
        "quantity": quantity,
        "original_quantity": original_quantity,
        "symbol": contract.symbol,
        "code": contract.code,
    }))
}

/// Exit orders take direction and quantity purely from the live position.
/// No position is not an error: the caller gets success with a null order.
async fn place_exit_order(
    session: &Arc<dyn BrokerSession>,
    pending: &mut PendingTrades,
    params: &Map<String, Value>,
) -> Result<Value, OpError> {
    let symbol = require_str(params, "symbol")?;
    let direction_str = require_str(params, "position_direction")?;
    let direction = Action::parse(direction_str)
        .ok_or_else(|| {
            OpError::BadRequest(format!("invalid position_direction '{}'", direction_str))
        })?;

    let contract = contract_by_symbol(session, symbol).await?;
    let position = current_position(session, &contract.code).await?;

    let (action, quantity) = match direction {
        Action::Buy if position > 0 => (Action::Sell, position),
        Action::Sell if position < 0 => (Action::Buy, -position),
        _ => {
            return Ok(json!({
                "message": "No position to exit",
                "order_id": null,
            }));
        }
    };

    let handle = session.place_order(&contract, action, quantity).await?;
    let ticket = handle.ticket.clone();
    pending.insert(handle);

    Ok(json!({
        "order_id": ticket.order_id,
        "seqno": ticket.seqno,
        "ordno": ticket.ordno,
        "action": action.as_str(),
        "quantity": quantity,
        "symbol": contract.symbol,
        "code": contract.code,
    }))
}

async fn check_order_status(
    session: &Arc<dyn BrokerSession>,
    pending: &mut PendingTrades,
    params: &Map<String, Value>,
) -> Result<Value, OpError> {
    let order_id = require_str(params, "order_id")?.to_string();
    let seqno = require_str(params, "seqno")?.to_string();

    if pending.get(&order_id, &seqno).is_none() {
        // The in-memory map is lost on restart; reconcile against the
        // trades the session still knows and cache any match.
        debug!(
            "Worker: trade {}:{} not in pending map, reconciling with session trades",
            order_id, seqno
        );
        let known = session.list_trades().await?;
        if let Some(found) = known
            .into_iter()
            .find(|t| t.ticket.order_id == order_id && t.ticket.seqno == seqno)
        {
            pending.insert(found);
        }
    }

    let handle = pending.get(&order_id, &seqno).cloned().ok_or_else(|| {
        OpError::BadRequest(format!(
            "Trade not found: {}",
            PendingTrades::key(&order_id, &seqno)
        ))
    })?;

    let report = session.update_status(&handle).await?;
    Ok(json!({
        "status": report.status.as_str(),
        "order_id": order_id,
        "seqno": seqno,
        "ordno": handle.ticket.ordno,
        "order_quantity": report.order_quantity,
        "deal_quantity": report.deal_quantity,
        "cancel_quantity": report.cancel_quantity,
        "fill_avg_price": report.fill_avg_price(),
        "deals": report.deals.iter().map(|d| json!({
            "seq": d.seq,
            "price": d.price,
            "quantity": d.quantity,
            "ts": d.ts,
        })).collect::<Vec<Value>>(),
    }))
}
