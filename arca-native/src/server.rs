//! Native messaging read loop and method dispatch.
//!
//! Standard input carries extension requests, standard output carries
//! responses and host-initiated notifications (standard error is reserved
//! for logs). A single writer task serializes the output stream; wallet
//! events arrive through a broadcaster subscription and are forwarded as
//! `wallet_event` notifications.
//!
//! This transport is the only place the security-sensitive wallet methods
//! (`import_wallet`, `export_wallet`, `unlock_wallet`) are reachable.

use std::sync::Arc;

use serde_json::{Map, Value, json};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use arca::dispatch::Dispatcher;
use arca::error::HostError;

use crate::framing::{read_frame, write_frame};
use crate::rpc::{
    METHOD_NOT_FOUND, PARSE_ERROR, Request, notification, response_err, response_host_err,
    response_ok,
};

/// The native messaging transport.
pub struct NativeTransport {
    dispatcher: Arc<Dispatcher>,
}

impl std::fmt::Debug for NativeTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeTransport").finish_non_exhaustive()
    }
}

impl NativeTransport {
    /// Creates the transport over the given dispatcher.
    #[must_use]
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Runs on the process's stdin/stdout until end-of-stream or shutdown.
    ///
    /// # Errors
    ///
    /// Propagates I/O failures on the stdio pipes.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), HostError> {
        let stdin = tokio::io::stdin();
        let stdout = tokio::io::stdout();
        self.run_with(stdin, stdout, shutdown).await
    }

    /// Runs over arbitrary streams. Tests drive this with in-memory pipes.
    ///
    /// # Errors
    ///
    /// Propagates I/O failures on the streams.
    pub async fn run_with<R, W>(
        self,
        mut reader: R,
        mut writer: W,
        shutdown: CancellationToken,
    ) -> Result<(), HostError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (out_tx, mut out_rx) = mpsc::channel::<Value>(64);

        // Single writer task serializes responses and notifications.
        let writer_task = tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                let bytes = match serde_json::to_vec(&message) {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        tracing::error!(error = %err, "cannot serialize outbound message");
                        continue;
                    }
                };
                if let Err(err) = write_frame(&mut writer, &bytes).await {
                    tracing::error!(error = %err, "stdout write failed");
                    break;
                }
            }
        });

        // Forward wallet events to the extension.
        let broadcaster = Arc::clone(self.dispatcher.broadcaster());
        let subscription = broadcaster.subscribe("native-host", None);
        let event_tx = out_tx.clone();
        let event_shutdown = shutdown.clone();
        let event_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = subscription.recv() => {
                        let Some(event) = event else { break };
                        let params = serde_json::to_value(&event).unwrap_or(Value::Null);
                        if event_tx.send(notification("wallet_event", params)).await.is_err() {
                            break;
                        }
                    }
                    () = event_shutdown.cancelled() => break,
                }
            }
        });

        loop {
            tokio::select! {
                frame = read_frame(&mut reader) => {
                    match frame {
                        Ok(Some(payload)) => {
                            if let Some(response) = self.handle_frame(&payload).await {
                                if out_tx.send(response).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Ok(None) => {
                            tracing::info!("extension closed the pipe");
                            break;
                        }
                        Err(err) => {
                            tracing::error!(error = %err, "stdin read failed");
                            break;
                        }
                    }
                }
                () = shutdown.cancelled() => {
                    tracing::info!("native transport shutting down");
                    break;
                }
            }
        }

        broadcaster.unsubscribe("native-host");
        drop(out_tx);
        event_task.abort();
        let _ = writer_task.await;
        Ok(())
    }

    async fn handle_frame(&self, payload: &[u8]) -> Option<Value> {
        let request: Request = match serde_json::from_slice(payload) {
            Ok(request) => request,
            Err(err) => {
                return Some(response_err(
                    Value::Null,
                    PARSE_ERROR,
                    &format!("parse error: {err}"),
                ));
            }
        };
        let id = request.id.clone()?;
        Some(handle_request(&self.dispatcher, &request, id).await)
    }
}

fn s<'a>(params: &'a Map<String, Value>, name: &str) -> Option<&'a str> {
    params.get(name).and_then(Value::as_str)
}

fn req_s<'a>(params: &'a Map<String, Value>, name: &'static str) -> Result<&'a str, HostError> {
    s(params, name).ok_or_else(|| HostError::MissingRequiredField {
        field: name.to_owned(),
    })
}

/// Dispatches one request to the operation facade.
pub async fn handle_request(dispatcher: &Dispatcher, request: &Request, id: Value) -> Value {
    let empty = Map::new();
    let params = request
        .params
        .as_ref()
        .and_then(Value::as_object)
        .unwrap_or(&empty);

    let result = dispatch_method(dispatcher, &request.method, params).await;
    match result {
        Ok(Some(value)) => response_ok(id, value),
        Ok(None) => response_err(
            id,
            METHOD_NOT_FOUND,
            &format!("method not found: {}", request.method),
        ),
        Err(err) => {
            tracing::debug!(method = %request.method, error = %err, "request failed");
            response_host_err(id, &err)
        }
    }
}

/// Routes a method to the dispatcher. `Ok(None)` means unknown method.
async fn dispatch_method(
    d: &Dispatcher,
    method: &str,
    p: &Map<String, Value>,
) -> Result<Option<Value>, HostError> {
    let value = match method {
        "ping" => json!("pong"),

        // Security-sensitive surface, available on this transport only.
        "import_wallet" => {
            d.import_wallet(
                req_s(p, "mnemonic")?,
                req_s(p, "password")?,
                req_s(p, "chain")?,
                s(p, "derivation_path"),
            )
            .await?
        }
        "export_wallet" => d.export_wallet()?,
        "switch_chain" => d.switch_chain()?,
        "unlock_wallet" => d.unlock_wallet(req_s(p, "password")?).await?,

        "lock_wallet" => d.lock_wallet().await?,
        "create_wallet" => {
            d.create_wallet(req_s(p, "chain")?, req_s(p, "password")?).await?
        }
        "list_wallets" => d.list_wallets().await?,
        "switch_wallet" => {
            d.switch_wallet(req_s(p, "chain")?, req_s(p, "address")?).await?
        }
        "set_wallet_label" => {
            d.set_wallet_label(req_s(p, "address")?, req_s(p, "label")?).await?
        }
        "delete_wallet" => {
            d.delete_wallet(req_s(p, "address")?, req_s(p, "password")?).await?
        }
        "wallet_status" => d.wallet_status().await?,

        "get_balance" => {
            d.get_balance(req_s(p, "address")?, s(p, "token"), s(p, "chain")).await?
        }
        "send_transaction" => {
            d.send_transaction(
                req_s(p, "chain")?,
                req_s(p, "from")?,
                req_s(p, "to")?,
                req_s(p, "amount")?,
                s(p, "token"),
                p.get("gas_limit").and_then(Value::as_u64),
                s(p, "gas_price"),
            )
            .await?
        }
        "estimate_gas" => {
            d.estimate_gas(
                req_s(p, "chain")?,
                req_s(p, "from")?,
                req_s(p, "to")?,
                req_s(p, "amount")?,
                s(p, "token"),
            )
            .await?
        }
        "simulate_transaction" => {
            d.simulate_transaction(
                req_s(p, "chain")?,
                req_s(p, "from")?,
                req_s(p, "to")?,
                req_s(p, "amount")?,
                s(p, "token"),
            )
            .await?
        }
        "get_pending_transactions" => {
            d.get_pending_transactions(
                s(p, "chain"),
                s(p, "address"),
                s(p, "type"),
                p.get("limit").and_then(Value::as_i64),
                p.get("offset").and_then(Value::as_i64),
            )
            .await?
        }
        "get_transaction_status" => {
            d.get_transaction_status(req_s(p, "tx_hash")?, s(p, "chain")).await?
        }
        "get_transaction_history" => {
            d.get_transaction_history(
                req_s(p, "address")?,
                s(p, "chain"),
                p.get("from_block").and_then(Value::as_u64),
                p.get("to_block").and_then(Value::as_u64),
                p.get("limit").and_then(Value::as_i64),
                p.get("offset").and_then(Value::as_i64),
            )
            .await?
        }
        "approve_transaction" => {
            d.approve_transaction(req_s(p, "tx_hash")?, req_s(p, "action")?, s(p, "reason"))
                .await?
        }
        "reject_transaction" => {
            d.reject_transaction(
                req_s(p, "transaction_ids")?,
                req_s(p, "reason")?,
                s(p, "details"),
                p.get("audit_log").and_then(Value::as_bool).unwrap_or(true),
            )
            .await?
        }
        "sign_message" => {
            d.sign_message(req_s(p, "address")?, req_s(p, "message")?).await?
        }
        "swap_tokens" => {
            d.swap_tokens(
                req_s(p, "chain")?,
                req_s(p, "token_in")?,
                req_s(p, "token_out")?,
                s(p, "amount_in"),
                s(p, "amount_out"),
                req_s(p, "from")?,
                p.get("slippage").and_then(Value::as_f64),
                s(p, "dex"),
            )
            .await?
        }
        "web3_request" => {
            d.web3_request(
                req_s(p, "method")?,
                p.get("params").unwrap_or(&Value::Null),
                s(p, "origin").unwrap_or("unknown"),
            )
            .await?
        }
        _ => return Ok(None),
    };
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    use arca::adapter::ChainAdapter;
    use arca::adapter::mock::MockChainAdapter;
    use arca::broadcast::Broadcaster;
    use arca::config::RunMode;
    use arca::keystore::mock::MockKeystore;
    use arca::pending::PendingTxStore;

    fn dispatcher() -> Arc<Dispatcher> {
        let broadcaster = Arc::new(Broadcaster::new());
        let mut chains: HashMap<arca::ChainRef, Arc<dyn ChainAdapter>> = HashMap::new();
        for chain in arca::ChainRef::ALL {
            chains.insert(chain, Arc::new(MockChainAdapter::new(chain)));
        }
        Arc::new(Dispatcher::new(
            Arc::new(MockKeystore::new()),
            chains,
            Arc::new(PendingTxStore::new(Arc::clone(&broadcaster))),
            broadcaster,
            RunMode::Test,
            Duration::from_secs(5),
        ))
    }

    fn request(method: &str, params: Value) -> Request {
        serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_import_wallet_reachable_here() {
        let d = dispatcher();
        let response = handle_request(
            &d,
            &request(
                "import_wallet",
                json!({
                    "mnemonic": "legal winner thank year wave sausage worth useful legal winner thank yellow",
                    "password": "password123",
                    "chain": "ethereum",
                }),
            ),
            json!(1),
        )
        .await;
        assert!(response.get("error").is_none(), "unexpected error: {response}");
        assert!(response["result"]["address"].is_string());
    }

    #[tokio::test]
    async fn test_export_wallet_reserved_code() {
        let d = dispatcher();
        let response = handle_request(&d, &request("export_wallet", json!({})), json!(2)).await;
        assert_eq!(response["error"]["code"], -32013);
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let d = dispatcher();
        let response = handle_request(&d, &request("mystery", json!({})), json!(3)).await;
        assert_eq!(response["error"]["code"], METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_missing_param_is_invalid_params() {
        let d = dispatcher();
        let response = handle_request(&d, &request("get_balance", json!({})), json!(4)).await;
        assert_eq!(response["error"]["code"], arca::error::CODE_INVALID_PARAMS);
        assert!(
            response["error"]["message"]
                .as_str()
                .unwrap()
                .contains("address")
        );
    }

    #[tokio::test]
    async fn test_web3_request_round_trip_over_pipes() {
        let d = dispatcher();
        let transport = NativeTransport::new(Arc::clone(&d));
        let shutdown = CancellationToken::new();

        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server_io);
        let (mut client_read, mut client_write) = tokio::io::split(client_io);

        let server = tokio::spawn(transport.run_with(server_read, server_write, shutdown.clone()));

        let body = json!({
            "jsonrpc": "2.0",
            "id": 42,
            "method": "web3_request",
            "params": {
                "method": "eth_sendTransaction",
                "params": [{
                    "from": format!("0x{}", "12".repeat(20)),
                    "to": format!("0x{}", "34".repeat(20)),
                    "value": "0x16345785d8a0000",
                }],
                "origin": "https://uniswap.org",
            },
        });
        crate::framing::write_frame(&mut client_write, &serde_json::to_vec(&body).unwrap())
            .await
            .unwrap();

        // The host pushes the transaction_pending notification and the
        // response; order between them is not fixed.
        let mut response = None;
        let mut pending_event = None;
        for _ in 0..2 {
            let frame = crate::framing::read_frame(&mut client_read).await.unwrap().unwrap();
            let message: Value = serde_json::from_slice(&frame).unwrap();
            if message.get("id").is_some() {
                response = Some(message);
            } else if message["method"] == "wallet_event" {
                pending_event = Some(message);
            }
        }

        let response = response.expect("no response frame");
        assert_eq!(response["id"], 42);
        let tx_hash = response["result"].as_str().unwrap();
        assert!(tx_hash.starts_with("0x"));

        let event = pending_event.expect("no wallet_event notification");
        assert_eq!(event["params"]["type"], "transaction_pending");

        shutdown.cancel();
        server.await.unwrap().unwrap();
    }
}
