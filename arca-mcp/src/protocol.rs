//! MCP wire types.
//!
//! JSON-RPC 2.0 envelope plus the MCP-specific result shapes. Tool failures
//! travel as `isError: true` results with a structured error body, never as
//! transport-level JSON-RPC errors; the JSON-RPC error object is reserved
//! for protocol violations (unknown method, malformed envelope).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use arca::error::HostError;

/// MCP protocol version implemented by this server.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Server name advertised in `initialize`.
pub const SERVER_NAME: &str = "arca-wallet-host";

/// An incoming JSON-RPC request or notification.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol tag, expected to be "2.0".
    #[serde(default)]
    pub jsonrpc: String,
    /// Request id; absent for notifications.
    #[serde(default)]
    pub id: Option<Value>,
    /// Method name.
    pub method: String,
    /// Method parameters.
    #[serde(default)]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// True when this is a notification (no response expected).
    #[must_use]
    pub const fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// Builds a JSON-RPC success response.
#[must_use]
pub fn rpc_result(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

/// Builds a JSON-RPC error response.
#[must_use]
pub fn rpc_error(id: Value, code: i32, message: &str) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "error": { "code": code, "message": message } })
}

/// One content item of a tool result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ContentItem {
    /// Text content.
    Text {
        /// The text value.
        text: String,
    },
}

impl ContentItem {
    /// Creates a text content item.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// Result of a tool call.
#[derive(Debug, Clone, Serialize)]
pub struct CallToolResult {
    /// Content items returned to the agent.
    pub content: Vec<ContentItem>,
    /// Whether the tool failed.
    #[serde(rename = "isError")]
    pub is_error: bool,
    /// Machine-readable side channel.
    #[serde(rename = "structuredContent", skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
}

impl CallToolResult {
    /// Wraps a successful tool payload: pretty JSON in the text channel,
    /// the raw value in the structured side channel.
    #[must_use]
    pub fn success(value: Value) -> Self {
        let text = serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string());
        Self {
            content: vec![ContentItem::text(text)],
            is_error: false,
            structured_content: Some(value),
        }
    }

    /// Wraps a domain error as an `isError` result with the structured
    /// error body.
    #[must_use]
    pub fn error(err: &HostError) -> Self {
        let body = serde_json::to_value(err.to_body()).unwrap_or_else(|_| json!(err.to_string()));
        Self {
            content: vec![ContentItem::text(
                serde_json::to_string(&body).unwrap_or_else(|_| err.to_string()),
            )],
            is_error: true,
            structured_content: Some(body),
        }
    }
}

/// The `initialize` response body.
#[must_use]
pub fn initialize_result() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {
            "tools": { "listChanged": false },
            "resources": { "subscribe": false, "listChanged": false },
        },
        "serverInfo": {
            "name": SERVER_NAME,
            "version": env!("CARGO_PKG_VERSION"),
        },
    })
}

/// Extracts `name` and `arguments` from `tools/call` params.
///
/// # Errors
///
/// Fails with [`HostError::MissingRequiredField`] when `name` is absent.
pub fn parse_tool_call(params: Option<&Value>) -> Result<(String, Map<String, Value>), HostError> {
    let params = params.and_then(Value::as_object);
    let name = params
        .and_then(|p| p.get("name"))
        .and_then(Value::as_str)
        .ok_or_else(|| HostError::MissingRequiredField {
            field: "name".to_owned(),
        })?;
    let arguments = params
        .and_then(|p| p.get("arguments"))
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    Ok((name.to_owned(), arguments))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_detection() {
        let req: JsonRpcRequest =
            serde_json::from_value(json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }))
                .unwrap();
        assert!(req.is_notification());

        let req: JsonRpcRequest =
            serde_json::from_value(json!({ "jsonrpc": "2.0", "id": 1, "method": "ping" })).unwrap();
        assert!(!req.is_notification());
    }

    #[test]
    fn test_error_result_shape() {
        let err = HostError::WalletLocked;
        let result = CallToolResult::error(&err);
        assert!(result.is_error);
        let body = result.structured_content.unwrap();
        assert_eq!(body["code"], -32031);
        assert_eq!(body["kind"], "wallet_locked");
    }

    #[test]
    fn test_success_result_carries_both_channels() {
        let result = CallToolResult::success(json!({ "balance": "1" }));
        assert!(!result.is_error);
        assert_eq!(result.structured_content.unwrap()["balance"], "1");
        let ContentItem::Text { text } = &result.content[0];
        assert!(text.contains("balance"));
    }

    #[test]
    fn test_parse_tool_call() {
        let params = json!({ "name": "get_balance", "arguments": { "address": "0xabc" } });
        let (name, args) = parse_tool_call(Some(&params)).unwrap();
        assert_eq!(name, "get_balance");
        assert_eq!(args["address"], "0xabc");

        assert!(parse_tool_call(None).is_err());
    }
}
