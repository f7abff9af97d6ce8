//! JSON-RPC 2.0 types for the native messaging channel.

use serde::Deserialize;
use serde_json::{Value, json};

use arca::error::HostError;

/// JSON parse failure.
pub const PARSE_ERROR: i32 = -32700;
/// Unknown method.
pub const METHOD_NOT_FOUND: i32 = -32601;

/// An incoming JSON-RPC message from the extension.
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    /// Protocol tag, expected to be "2.0".
    #[serde(default)]
    pub jsonrpc: String,
    /// Request id; absent for notifications.
    #[serde(default)]
    pub id: Option<Value>,
    /// Method name.
    pub method: String,
    /// Parameters object.
    #[serde(default)]
    pub params: Option<Value>,
}

/// Builds a success response.
#[must_use]
pub fn response_ok(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

/// Builds an error response from raw parts.
#[must_use]
pub fn response_err(id: Value, code: i32, message: &str) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "error": { "code": code, "message": message } })
}

/// Builds an error response from a [`HostError`], carrying its kind and
/// suggestion in the error `data`.
#[must_use]
pub fn response_host_err(id: Value, err: &HostError) -> Value {
    let mut data = json!({ "kind": err.kind() });
    if let Some(suggestion) = err.suggestion() {
        data["suggestion"] = json!(suggestion);
    }
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": err.code(), "message": err.to_string(), "data": data },
    })
}

/// Builds a host-to-extension notification (no id).
#[must_use]
pub fn notification(method: &str, params: Value) -> Value {
    json!({ "jsonrpc": "2.0", "method": method, "params": params })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_error_shape() {
        let err = HostError::WalletLocked;
        let response = response_host_err(json!(7), &err);
        assert_eq!(response["error"]["code"], -32031);
        assert_eq!(response["error"]["data"]["kind"], "wallet_locked");
        assert_eq!(response["id"], 7);
    }

    #[test]
    fn test_notification_has_no_id() {
        let n = notification("wallet_event", json!({ "type": "block_new" }));
        assert!(n.get("id").is_none());
        assert_eq!(n["method"], "wallet_event");
    }
}
