//! The MCP HTTP/SSE transport.
//!
//! Two coexisting entry modes share one method surface:
//!
//! 1. **Streamable HTTP** — `POST /mcp` takes a JSON-RPC envelope and
//!    answers in the response body.
//! 2. **Pure SSE** — `GET /sse` opens a `text/event-stream`; the first
//!    event (`endpoint`) names the companion POST endpoint
//!    (`/messages?session_id=<id>`). Responses to posted requests and
//!    wallet-event notifications arrive as `message` events on the open
//!    stream.
//!
//! Wallet events reach SSE clients through a broadcaster subscription per
//! session; a slow client's backlog is bounded by the broadcaster's
//! drop-oldest queue, so publishers never block on this transport.

use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{Method, StatusCode};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use dashmap::DashMap;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::cors;

use arca::dispatch::Dispatcher;
use arca::error::HostError;
use arca::event::EventKind;

use crate::protocol::{
    CallToolResult, JsonRpcRequest, initialize_result, parse_tool_call, rpc_error, rpc_result,
};
use crate::registry::Registry;

/// Shared state behind the axum router.
#[derive(Clone)]
pub struct AppState {
    dispatcher: Arc<Dispatcher>,
    registry: Arc<Registry>,
    sessions: Arc<DashMap<String, mpsc::Sender<SseEvent>>>,
    resource_timeout: Duration,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("sessions", &self.sessions.len())
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Builds the transport state.
    #[must_use]
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        registry: Arc<Registry>,
        resource_timeout: Duration,
    ) -> Self {
        Self {
            dispatcher,
            registry,
            sessions: Arc::new(DashMap::new()),
            resource_timeout,
        }
    }
}

/// Builds the MCP router.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/mcp", post(mcp_handler))
        .route("/sse", get(sse_handler))
        .route("/messages", post(messages_handler))
        .route("/health", get(health_handler))
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any),
        )
        .with_state(state)
}

/// Binds and serves until the token is cancelled.
///
/// # Errors
///
/// Fails with [`HostError::Internal`] when the address cannot be bound.
pub async fn serve(
    addr: SocketAddr,
    state: AppState,
    shutdown: CancellationToken,
) -> Result<(), HostError> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| HostError::internal(format!("cannot bind {addr}: {e}")))?;
    tracing::info!("MCP transport listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| HostError::internal(format!("MCP server failed: {e}")))
}

async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

/// `POST /mcp` — streamable HTTP mode.
async fn mcp_handler(State(state): State<AppState>, Json(request): Json<JsonRpcRequest>) -> Response {
    match handle_envelope(&state, request).await {
        Some(response) => Json(response).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

/// `GET /sse` — pure SSE mode.
async fn sse_handler(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Sse<impl futures_util::Stream<Item = Result<SseEvent, Infallible>>> {
    let session_id = new_session_id();
    let filter = params.get("events").map(|spec| {
        spec.split(',')
            .filter_map(|kind| kind.trim().parse::<EventKind>().ok())
            .collect::<HashSet<EventKind>>()
    });

    let broadcaster = Arc::clone(state.dispatcher.broadcaster());
    let subscription = broadcaster.subscribe(format!("sse-{session_id}"), filter);

    let (tx, rx) = mpsc::channel::<SseEvent>(64);
    let endpoint = SseEvent::default()
        .event("endpoint")
        .data(format!("/messages?session_id={session_id}"));
    let _ = tx.try_send(endpoint);
    state.sessions.insert(session_id.clone(), tx.clone());
    tracing::info!(session = %session_id, "SSE session opened");

    // Pump wallet events into the stream until the client goes away.
    let sessions = Arc::clone(&state.sessions);
    tokio::spawn(async move {
        loop {
            tokio::select! {
                event = subscription.recv() => {
                    let Some(event) = event else { break };
                    let notification = json!({
                        "jsonrpc": "2.0",
                        "method": "notifications/wallet_event",
                        "params": event,
                    });
                    let sse = SseEvent::default().event("message").data(notification.to_string());
                    if tx.send(sse).await.is_err() {
                        break;
                    }
                }
                () = tx.closed() => break,
            }
        }
        broadcaster.unsubscribe(&format!("sse-{session_id}"));
        sessions.remove(&session_id);
        tracing::info!(session = %session_id, "SSE session closed");
    });

    let stream = futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (Ok(event), rx))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// `POST /messages?session_id=<id>` — companion endpoint of SSE mode.
async fn messages_handler(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    Json(request): Json<JsonRpcRequest>,
) -> Response {
    let Some(session_id) = params.get("session_id") else {
        return (StatusCode::BAD_REQUEST, "missing session_id").into_response();
    };
    // Clone the sender out so no map reference is held across awaits.
    let Some(tx) = state.sessions.get(session_id).map(|entry| entry.value().clone()) else {
        return (StatusCode::NOT_FOUND, "unknown session").into_response();
    };

    if let Some(response) = handle_envelope(&state, request).await {
        let sse = SseEvent::default().event("message").data(response.to_string());
        let _ = tx.send(sse).await;
    }
    StatusCode::ACCEPTED.into_response()
}

/// Routes one JSON-RPC envelope. Returns `None` for notifications.
async fn handle_envelope(state: &AppState, request: JsonRpcRequest) -> Option<Value> {
    if request.is_notification() {
        tracing::debug!(method = %request.method, "notification received");
        return None;
    }
    let id = request.id.clone().unwrap_or(Value::Null);

    let response = match request.method.as_str() {
        "initialize" => rpc_result(id, initialize_result()),
        "ping" => rpc_result(id, json!({})),
        "tools/list" => rpc_result(id, json!({ "tools": state.registry.list_tools() })),
        "tools/call" => {
            let result = match parse_tool_call(request.params.as_ref()) {
                Ok((name, arguments)) => {
                    match state
                        .registry
                        .call_tool(&state.dispatcher, &name, &arguments)
                        .await
                    {
                        Ok(value) => CallToolResult::success(value),
                        Err(err) => {
                            tracing::debug!(tool = %name, error = %err, "tool call failed");
                            CallToolResult::error(&err)
                        }
                    }
                }
                Err(err) => CallToolResult::error(&err),
            };
            match serde_json::to_value(result) {
                Ok(value) => rpc_result(id, value),
                Err(e) => rpc_error(id, -32603, &format!("cannot serialize result: {e}")),
            }
        }
        "resources/list" => rpc_result(
            id,
            json!({ "resources": state.registry.list_resources() }),
        ),
        "resources/read" => {
            let uri = request
                .params
                .as_ref()
                .and_then(|p| p.get("uri"))
                .and_then(Value::as_str);
            match uri {
                None => rpc_error(id, arca::error::CODE_INVALID_PARAMS, "missing uri"),
                Some(uri) => {
                    let read = state.registry.read_resource(&state.dispatcher, uri);
                    match tokio::time::timeout(state.resource_timeout, read).await {
                        Ok(Ok((mime_type, body))) => rpc_result(
                            id,
                            json!({
                                "contents": [{ "uri": uri, "mimeType": mime_type, "text": body }]
                            }),
                        ),
                        Ok(Err(err)) => rpc_error(id, err.code(), &err.to_string()),
                        Err(_) => {
                            let err = HostError::Timeout {
                                seconds: state.resource_timeout.as_secs(),
                            };
                            rpc_error(id, err.code(), &err.to_string())
                        }
                    }
                }
            }
        }
        other => rpc_error(id, -32601, &format!("method not found: {other}")),
    };
    Some(response)
}

fn new_session_id() -> String {
    use rand::Rng;
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use arca::adapter::ChainAdapter;
    use arca::adapter::mock::MockChainAdapter;
    use arca::keystore::mock::MockKeystore;

    fn test_state() -> AppState {
        let broadcaster = Arc::new(arca::broadcast::Broadcaster::new());
        let mut chains: HashMap<arca::ChainRef, Arc<dyn ChainAdapter>> = HashMap::new();
        for chain in arca::ChainRef::ALL {
            chains.insert(chain, Arc::new(MockChainAdapter::new(chain)));
        }
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(MockKeystore::unlocked()),
            chains,
            Arc::new(arca::pending::PendingTxStore::new(Arc::clone(&broadcaster))),
            broadcaster,
            arca::config::RunMode::Test,
            Duration::from_secs(5),
        ));
        let registry = Arc::new(Registry::new(
            crate::tools::tool_specs(),
            crate::resources::resource_specs(),
        ));
        AppState::new(dispatcher, registry, Duration::from_secs(10))
    }

    fn request(method: &str, id: Value, params: Value) -> JsonRpcRequest {
        serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_initialize() {
        let state = test_state();
        let response = handle_envelope(&state, request("initialize", json!(1), json!({})))
            .await
            .unwrap();
        assert_eq!(response["result"]["protocolVersion"], "2024-11-05");
        assert!(response["result"]["capabilities"]["tools"].is_object());
    }

    #[tokio::test]
    async fn test_tools_list_and_call() {
        let state = test_state();
        let response = handle_envelope(&state, request("tools/list", json!(2), json!({})))
            .await
            .unwrap();
        let tools = response["result"]["tools"].as_array().unwrap();
        assert!(tools.iter().any(|t| t["name"] == "get_balance"));

        let call = request(
            "tools/call",
            json!(3),
            json!({
                "name": "get_balance",
                "arguments": {
                    "address": format!("0x{}", "12".repeat(20)),
                    "token": "ETH",
                },
            }),
        );
        let response = handle_envelope(&state, call).await.unwrap();
        assert_eq!(response["result"]["isError"], false);
        assert!(response["result"]["structuredContent"]["balance"].is_string());
    }

    #[tokio::test]
    async fn test_tool_error_is_iserror_not_transport_error() {
        let state = test_state();
        let call = request(
            "tools/call",
            json!(4),
            json!({
                "name": "get_balance",
                "arguments": {
                    "address": format!("0x{}", "12".repeat(20)),
                    "token": "UNSUPPORTED_TOKEN",
                },
            }),
        );
        let response = handle_envelope(&state, call).await.unwrap();
        assert!(response.get("error").is_none());
        assert_eq!(response["result"]["isError"], true);
        assert_eq!(
            response["result"]["structuredContent"]["kind"],
            "token_not_supported"
        );
        assert!(
            response["result"]["structuredContent"]["suggestion"]
                .as_str()
                .unwrap()
                .contains("BNB")
        );
    }

    #[tokio::test]
    async fn test_unknown_method_is_transport_error() {
        let state = test_state();
        let response = handle_envelope(&state, request("bogus/method", json!(5), json!({})))
            .await
            .unwrap();
        assert_eq!(response["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn test_resources_read() {
        let state = test_state();
        let response = handle_envelope(
            &state,
            request("resources/read", json!(6), json!({ "uri": "chains://supported" })),
        )
        .await
        .unwrap();
        let contents = &response["result"]["contents"][0];
        assert_eq!(contents["mimeType"], "application/json");
        let chains: Vec<Value> = serde_json::from_str(contents["text"].as_str().unwrap()).unwrap();
        assert_eq!(chains.len(), 3);
    }

    #[tokio::test]
    async fn test_notifications_get_no_response() {
        let state = test_state();
        let request: JsonRpcRequest = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized",
        }))
        .unwrap();
        assert!(handle_envelope(&state, request).await.is_none());
    }
}
