use crate::error::{DeviceError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Batched property read
pub const GET_PROPERTIES: &str = "get_properties";

/// Batched property write
pub const SET_PROPERTIES: &str = "set_properties";

/// Action invocation
pub const ACTION: &str = "action";

/// Status code of a successful slot
pub const CODE_OK: i64 = 0;

/// One item of a get/set/action request, addressed by device id and the
/// service/property id pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyRequest {
    pub did: String,
    pub siid: u32,
    pub piid: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// One slot of a batched response, in the same position as its request item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyResult {
    pub code: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl PropertyResult {
    /// Parse a raw response slot
    pub fn from_slot(slot: &Value) -> Result<Self> {
        Ok(Self::deserialize(slot)?)
    }

    /// Whether the slot reports success
    pub fn is_ok(&self) -> bool {
        self.code == CODE_OK
    }

    /// The slot value, only when the slot succeeded and carries one
    pub fn ok_value(&self) -> Option<&Value> {
        if self.is_ok() {
            self.value.as_ref()
        } else {
            None
        }
    }
}

impl PropertyRequest {
    /// Convert into a positional `params` entry
    pub fn to_param(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// JSON-RPC request sent to the device gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: Uuid,
    pub method: String,
    pub params: Vec<Value>,
}

/// JSON-RPC message received from the device gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Absent on unsolicited notifications
    #[serde(default)]
    pub id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorBody>,
}

/// Error body of a failed RPC
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcErrorBody {
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

impl RpcRequest {
    /// Create a new request with a fresh correlation id
    pub fn new(method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            method: method.into(),
            params,
        }
    }
}

impl RpcResponse {
    /// Check if the response carries an error
    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    /// Unwrap the ordered result array or convert the error body
    pub fn into_result(self) -> Result<Vec<Value>> {
        if let Some(error) = self.error {
            return Err(DeviceError::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        self.result
            .ok_or_else(|| DeviceError::InvalidResponse("No result in RPC response".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn read_request_omits_value() {
        let request = PropertyRequest {
            did: "1234".to_string(),
            siid: 2,
            piid: 1,
            value: None,
        };

        assert_eq!(
            request.to_param().unwrap(),
            json!({"did": "1234", "siid": 2, "piid": 1})
        );
    }

    #[test]
    fn slot_without_value_is_not_ok_value() {
        let slot = PropertyResult::from_slot(&json!({"code": 0})).unwrap();
        assert!(slot.is_ok());
        assert!(slot.ok_value().is_none());

        let failed = PropertyResult::from_slot(&json!({"code": -4004, "value": 1})).unwrap();
        assert!(!failed.is_ok());
        assert!(failed.ok_value().is_none());
    }

    #[test]
    fn malformed_slot_is_an_error() {
        assert!(PropertyResult::from_slot(&json!("nope")).is_err());
    }

    #[test]
    fn error_response_maps_to_rpc_error() {
        let response: RpcResponse = serde_json::from_value(json!({
            "id": Uuid::nil(),
            "error": {"code": -5001, "message": "device offline"}
        }))
        .unwrap();

        assert!(response.has_error());
        match response.into_result() {
            Err(DeviceError::Rpc { code, message }) => {
                assert_eq!(code, -5001);
                assert_eq!(message, "device offline");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn notification_has_no_id() {
        let response: RpcResponse = serde_json::from_value(json!({
            "method": "properties_changed",
            "params": []
        }))
        .unwrap();
        assert!(response.id.is_none());
        assert_eq!(response.method.as_deref(), Some("properties_changed"));
    }
}
