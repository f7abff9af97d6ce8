//! Resource declarations for the MCP transport.

use serde_json::{Value, json};

use arca::dispatch::Dispatcher;
use arca::error::HostError;
use arca::event::EventKind;

use crate::registry::{BoxFuture, ResourceSpec};

fn chains_supported(d: &Dispatcher) -> BoxFuture<'_, Result<String, HostError>> {
    Box::pin(async move {
        let chains: Vec<Value> = d
            .configured_chains()
            .into_iter()
            .map(|chain| {
                json!({
                    "chain": chain,
                    "chain_id": chain.protocol_chain_id(),
                    "native_symbol": chain.native_symbol(),
                    "finality": chain.default_finality(),
                })
            })
            .collect();
        serde_json::to_string_pretty(&chains)
            .map_err(|e| HostError::internal(format!("cannot serialize chain list: {e}")))
    })
}

fn wallet_status(d: &Dispatcher) -> BoxFuture<'_, Result<String, HostError>> {
    Box::pin(async move {
        let status = d.wallet_status().await?;
        let locked = status["locked"].as_bool().unwrap_or(true);
        let count = status["wallet_count"].as_u64().unwrap_or(0);

        let mut body = String::from("# Wallet Status\n\n");
        body.push_str(&format!(
            "- **Keystore**: {}\n",
            if locked { "locked" } else { "unlocked" }
        ));
        body.push_str(&format!("- **Wallets**: {count}\n"));

        if let Some(active) = status["active"].as_object() {
            if active.is_empty() {
                body.push_str("- **Active wallets**: none\n");
            } else {
                body.push_str("\n## Active wallets\n\n");
                for (chain, address) in active {
                    body.push_str(&format!(
                        "- `{chain}`: `{}`\n",
                        address.as_str().unwrap_or("?")
                    ));
                }
            }
        }
        Ok(body)
    })
}

fn events_sse(_d: &Dispatcher) -> BoxFuture<'_, Result<String, HostError>> {
    Box::pin(async move {
        let kinds: Vec<&str> = EventKind::ALL.iter().map(EventKind::as_str).collect();
        let meta = json!({
            "endpoint": "/sse",
            "message_endpoint": "/messages",
            "content_type": "text/event-stream",
            "event_types": kinds,
            "filter": "pass ?events=<comma-separated types> to subscribe to a subset",
        });
        serde_json::to_string_pretty(&meta)
            .map_err(|e| HostError::internal(format!("cannot serialize event metadata: {e}")))
    })
}

/// All resources exposed over MCP.
#[must_use]
pub fn resource_specs() -> Vec<ResourceSpec> {
    vec![
        ResourceSpec {
            uri: "chains://supported",
            name: "Supported chains",
            description: "Chains this host can operate on, with ids and finality thresholds.",
            mime_type: "application/json",
            handler: chains_supported,
        },
        ResourceSpec {
            uri: "wallet://status",
            name: "Wallet status",
            description: "Keystore lock state and active wallets per chain.",
            mime_type: "text/markdown",
            handler: wallet_status,
        },
        ResourceSpec {
            uri: "events://sse",
            name: "Event stream",
            description: "Metadata describing the server-sent event stream.",
            mime_type: "application/json",
            handler: events_sse,
        },
    ]
}
