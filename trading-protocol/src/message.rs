use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The fixed set of operations a tenant worker understands.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TradingOperation {
    Ping,
    GetSymbols,
    GetSymbolInfo,
    GetContractCodes,
    GetPositions,
    GetFuturesOverview,
    GetProductContracts,
    PlaceEntryOrder,
    PlaceExitOrder,
    CheckOrderStatus,
}

/// Request message pushed onto a tenant's request queue.
///
/// `request_id` is the correlation token: the worker echoes it back on the
/// response key derived from it.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TradingRequest {
    pub request_id: String,
    pub operation: TradingOperation,
    pub simulation: bool,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl TradingRequest {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(data: &str) -> serde_json::Result<Self> {
        serde_json::from_str(data)
    }
}

/// Response message for a single request. Exactly one is produced per
/// request the worker actually picks up.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TradingResponse {
    pub request_id: String,
    pub success: bool,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl TradingResponse {
    pub fn ok(request_id: impl Into<String>, data: Value) -> Self {
        Self {
            request_id: request_id.into(),
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(request_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(data: &str) -> serde_json::Result<Self> {
        serde_json::from_str(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn operation_uses_snake_case_on_the_wire() {
        let op = serde_json::to_string(&TradingOperation::PlaceEntryOrder).unwrap();
        assert_eq!(op, "\"place_entry_order\"");
        let back: TradingOperation = serde_json::from_str("\"check_order_status\"").unwrap();
        assert_eq!(back, TradingOperation::CheckOrderStatus);
    }

    #[test]
    fn request_roundtrip_keeps_params() {
        let mut params = Map::new();
        params.insert("symbol".into(), json!("MXF"));
        params.insert("quantity".into(), json!(5));
        let req = TradingRequest {
            request_id: "r-1".into(),
            operation: TradingOperation::PlaceEntryOrder,
            simulation: true,
            params,
        };
        let parsed = TradingRequest::from_json(&req.to_json().unwrap()).unwrap();
        assert_eq!(parsed.request_id, "r-1");
        assert_eq!(parsed.params["quantity"], json!(5));
    }

    #[test]
    fn response_defaults_missing_fields() {
        let parsed =
            TradingResponse::from_json(r#"{"request_id":"r-2","success":false}"#).unwrap();
        assert!(parsed.data.is_none());
        assert!(parsed.error.is_none());
    }
}
