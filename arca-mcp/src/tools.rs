//! Tool declarations for the MCP transport.
//!
//! Only the agent-safe subset of the dispatcher is declared here. The
//! security-sensitive operations (`import_wallet`, `export_wallet`,
//! `unlock_wallet`) exist exclusively on the native messaging transport
//! and must never appear in this list.

use serde_json::{Map, Value};

use arca::dispatch::Dispatcher;
use arca::error::HostError;

use crate::registry::{BoxFuture, PropertySpec, PropertyType, ToolSpec};

const CHAINS: &[&str] = &["ethereum", "bsc", "solana"];
const ACTIONS: &[&str] = &["approve", "reject"];
const REASONS: &[&str] = &[
    "suspicious_activity",
    "high_gas_fee",
    "user_request",
    "security_concern",
    "duplicate_transaction",
];
const TX_TYPES: &[&str] = &["transfer", "swap", "approve", "contract_call"];

fn s<'a>(args: &'a Map<String, Value>, name: &str) -> Option<&'a str> {
    args.get(name).and_then(Value::as_str)
}

fn req<'a>(args: &'a Map<String, Value>, name: &'static str) -> Result<&'a str, HostError> {
    s(args, name).ok_or_else(|| HostError::MissingRequiredField {
        field: name.to_owned(),
    })
}

fn int(args: &Map<String, Value>, name: &str) -> Option<i64> {
    args.get(name).and_then(Value::as_i64)
}

fn uint(args: &Map<String, Value>, name: &str) -> Option<u64> {
    args.get(name).and_then(Value::as_u64)
}

fn boolean(args: &Map<String, Value>, name: &str) -> Option<bool> {
    args.get(name).and_then(Value::as_bool)
}

fn create_wallet<'a>(
    d: &'a Dispatcher,
    args: &'a Map<String, Value>,
) -> BoxFuture<'a, Result<Value, HostError>> {
    Box::pin(async move { d.create_wallet(req(args, "chain")?, req(args, "password")?).await })
}

fn lock_wallet<'a>(
    d: &'a Dispatcher,
    _args: &'a Map<String, Value>,
) -> BoxFuture<'a, Result<Value, HostError>> {
    Box::pin(async move { d.lock_wallet().await })
}

fn get_balance<'a>(
    d: &'a Dispatcher,
    args: &'a Map<String, Value>,
) -> BoxFuture<'a, Result<Value, HostError>> {
    Box::pin(async move {
        d.get_balance(req(args, "address")?, s(args, "token"), s(args, "chain"))
            .await
    })
}

fn send_transaction<'a>(
    d: &'a Dispatcher,
    args: &'a Map<String, Value>,
) -> BoxFuture<'a, Result<Value, HostError>> {
    Box::pin(async move {
        d.send_transaction(
            req(args, "chain")?,
            req(args, "from")?,
            req(args, "to")?,
            req(args, "amount")?,
            s(args, "token"),
            uint(args, "gas_limit"),
            s(args, "gas_price"),
        )
        .await
    })
}

fn estimate_gas<'a>(
    d: &'a Dispatcher,
    args: &'a Map<String, Value>,
) -> BoxFuture<'a, Result<Value, HostError>> {
    Box::pin(async move {
        d.estimate_gas(
            req(args, "chain")?,
            req(args, "from")?,
            req(args, "to")?,
            req(args, "amount")?,
            s(args, "token"),
        )
        .await
    })
}

fn simulate_transaction<'a>(
    d: &'a Dispatcher,
    args: &'a Map<String, Value>,
) -> BoxFuture<'a, Result<Value, HostError>> {
    Box::pin(async move {
        d.simulate_transaction(
            req(args, "chain")?,
            req(args, "from")?,
            req(args, "to")?,
            req(args, "amount")?,
            s(args, "token"),
        )
        .await
    })
}

fn get_pending_transactions<'a>(
    d: &'a Dispatcher,
    args: &'a Map<String, Value>,
) -> BoxFuture<'a, Result<Value, HostError>> {
    Box::pin(async move {
        d.get_pending_transactions(
            s(args, "chain"),
            s(args, "address"),
            s(args, "type"),
            int(args, "limit"),
            int(args, "offset"),
        )
        .await
    })
}

fn get_transaction_status<'a>(
    d: &'a Dispatcher,
    args: &'a Map<String, Value>,
) -> BoxFuture<'a, Result<Value, HostError>> {
    Box::pin(async move {
        d.get_transaction_status(req(args, "tx_hash")?, s(args, "chain"))
            .await
    })
}

fn get_transaction_history<'a>(
    d: &'a Dispatcher,
    args: &'a Map<String, Value>,
) -> BoxFuture<'a, Result<Value, HostError>> {
    Box::pin(async move {
        d.get_transaction_history(
            req(args, "address")?,
            s(args, "chain"),
            uint(args, "from_block"),
            uint(args, "to_block"),
            int(args, "limit"),
            int(args, "offset"),
        )
        .await
    })
}

fn approve_transaction<'a>(
    d: &'a Dispatcher,
    args: &'a Map<String, Value>,
) -> BoxFuture<'a, Result<Value, HostError>> {
    Box::pin(async move {
        d.approve_transaction(req(args, "tx_hash")?, req(args, "action")?, s(args, "reason"))
            .await
    })
}

fn reject_transaction<'a>(
    d: &'a Dispatcher,
    args: &'a Map<String, Value>,
) -> BoxFuture<'a, Result<Value, HostError>> {
    Box::pin(async move {
        d.reject_transaction(
            req(args, "transaction_ids")?,
            req(args, "reason")?,
            s(args, "details"),
            boolean(args, "audit_log").unwrap_or(true),
        )
        .await
    })
}

fn sign_message<'a>(
    d: &'a Dispatcher,
    args: &'a Map<String, Value>,
) -> BoxFuture<'a, Result<Value, HostError>> {
    Box::pin(async move { d.sign_message(req(args, "address")?, req(args, "message")?).await })
}

fn swap_tokens<'a>(
    d: &'a Dispatcher,
    args: &'a Map<String, Value>,
) -> BoxFuture<'a, Result<Value, HostError>> {
    Box::pin(async move {
        d.swap_tokens(
            req(args, "chain")?,
            req(args, "token_in")?,
            req(args, "token_out")?,
            s(args, "amount_in"),
            s(args, "amount_out"),
            req(args, "from")?,
            args.get("slippage").and_then(Value::as_f64),
            s(args, "dex"),
        )
        .await
    })
}

/// All tools exposed over MCP, in listing order.
#[must_use]
pub fn tool_specs() -> Vec<ToolSpec> {
    use PropertySpec as P;
    use PropertyType as T;

    vec![
        ToolSpec {
            name: "create_wallet",
            description: "Create a new wallet for a chain. The mnemonic is stored encrypted and never returned.",
            properties: vec![
                P::required("chain", T::String, "Target chain").with_enum(CHAINS),
                P::required("password", T::String, "Password protecting the keystore"),
            ],
            handler: create_wallet,
        },
        ToolSpec {
            name: "lock_wallet",
            description: "Lock the keystore, wiping decrypted key material from memory.",
            properties: vec![],
            handler: lock_wallet,
        },
        ToolSpec {
            name: "get_balance",
            description: "Get the balance of an address for a native token or token contract.",
            properties: vec![
                P::required("address", T::String, "Account address"),
                P::optional("token", T::String, "Native symbol (ETH, BNB, SOL) or contract address; defaults to the chain's native token"),
                P::optional("chain", T::String, "Target chain; inferred from token or address when omitted").with_enum(CHAINS),
            ],
            handler: get_balance,
        },
        ToolSpec {
            name: "send_transaction",
            description: "Sign and broadcast a transfer from a wallet held by the keystore.",
            properties: vec![
                P::required("chain", T::String, "Target chain").with_enum(CHAINS),
                P::required("from", T::String, "Sender address"),
                P::required("to", T::String, "Recipient address"),
                P::required("amount", T::String, "Decimal amount in whole tokens"),
                P::optional("token", T::String, "Native symbol or contract address"),
                P::optional("gas_limit", T::Integer, "Gas limit override"),
                P::optional("gas_price", T::String, "Gas price override, native base units"),
            ],
            handler: send_transaction,
        },
        ToolSpec {
            name: "estimate_gas",
            description: "Estimate the fee of a transfer without sending it.",
            properties: vec![
                P::required("chain", T::String, "Target chain").with_enum(CHAINS),
                P::required("from", T::String, "Sender address"),
                P::required("to", T::String, "Recipient address"),
                P::required("amount", T::String, "Decimal amount in whole tokens"),
                P::optional("token", T::String, "Native symbol or contract address"),
            ],
            handler: estimate_gas,
        },
        ToolSpec {
            name: "simulate_transaction",
            description: "Dry-run a transfer and report expected outcome. Never broadcasts.",
            properties: vec![
                P::required("chain", T::String, "Target chain").with_enum(CHAINS),
                P::required("from", T::String, "Sender address"),
                P::required("to", T::String, "Recipient address"),
                P::required("amount", T::String, "Decimal amount in whole tokens"),
                P::optional("token", T::String, "Native symbol or contract address"),
            ],
            handler: simulate_transaction,
        },
        ToolSpec {
            name: "get_pending_transactions",
            description: "List transactions awaiting approval, newest first.",
            properties: vec![
                P::optional("chain", T::String, "Filter by chain").with_enum(CHAINS),
                P::optional("address", T::String, "Filter by sender or recipient address"),
                P::optional("type", T::String, "Filter by transaction type").with_enum(TX_TYPES),
                P::optional("limit", T::Integer, "Page size (1-100, default 10)"),
                P::optional("offset", T::Integer, "Results to skip"),
            ],
            handler: get_pending_transactions,
        },
        ToolSpec {
            name: "get_transaction_status",
            description: "Get confirmation state for a transaction hash.",
            properties: vec![
                P::required("tx_hash", T::String, "Transaction hash or signature"),
                P::optional("chain", T::String, "Target chain; inferred from the hash shape when omitted").with_enum(CHAINS),
            ],
            handler: get_transaction_status,
        },
        ToolSpec {
            name: "get_transaction_history",
            description: "Fetch transaction history for an address.",
            properties: vec![
                P::required("address", T::String, "Account address"),
                P::optional("chain", T::String, "Target chain").with_enum(CHAINS),
                P::optional("from_block", T::Integer, "Earliest block or slot"),
                P::optional("to_block", T::Integer, "Latest block or slot"),
                P::optional("limit", T::Integer, "Page size (1-100, default 10)"),
                P::optional("offset", T::Integer, "Results to skip"),
            ],
            handler: get_transaction_history,
        },
        ToolSpec {
            name: "approve_transaction",
            description: "Approve or reject a pending transaction. Rejection requires a reason.",
            properties: vec![
                P::required("tx_hash", T::String, "Pending transaction hash"),
                P::required("action", T::String, "Decision").with_enum(ACTIONS),
                P::optional("reason", T::String, "Rejection reason").with_enum(REASONS),
            ],
            handler: approve_transaction,
        },
        ToolSpec {
            name: "reject_transaction",
            description: "Reject a batch of pending transactions by id.",
            properties: vec![
                P::required("transaction_ids", T::String, "Comma-separated transaction ids"),
                P::required("reason", T::String, "Rejection reason").with_enum(REASONS),
                P::optional("details", T::String, "Free-form details for the event payload"),
                P::optional("notify_user", T::Boolean, "Also notify the browser extension"),
                P::optional("audit_log", T::Boolean, "Write an audit log line (default true)"),
            ],
            handler: reject_transaction,
        },
        ToolSpec {
            name: "sign_message",
            description: "Sign a message with a wallet key. EVM messages use EIP-191; Solana messages are signed as bytes.",
            properties: vec![
                P::required("address", T::String, "Signing address"),
                P::required(
                    "message",
                    T::String,
                    "Message text; 0x-hex for EVM byte payloads, base64: prefix for Solana raw-byte payloads",
                ),
            ],
            handler: sign_message,
        },
        ToolSpec {
            name: "swap_tokens",
            description: "Record a token swap for approval. Exactly one of amount_in / amount_out must be set.",
            properties: vec![
                P::required("chain", T::String, "Target chain").with_enum(CHAINS),
                P::required("token_in", T::String, "Token to sell"),
                P::required("token_out", T::String, "Token to buy"),
                P::optional("amount_in", T::String, "Exact input amount"),
                P::optional("amount_out", T::String, "Exact output amount"),
                P::required("from", T::String, "Wallet address funding the swap"),
                P::optional("slippage", T::Number, "Max slippage percent (0-100)"),
                P::optional("deadline", T::Integer, "Unix deadline for the swap"),
                P::optional("dex", T::String, "Preferred DEX identifier"),
            ],
            handler: swap_tokens,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use arca::pending::RejectReason;

    #[test]
    fn test_sensitive_tools_absent() {
        let names: Vec<&str> = tool_specs().iter().map(|t| t.name).collect();
        for forbidden in ["import_wallet", "export_wallet", "unlock_wallet", "web3_request"] {
            assert!(!names.contains(&forbidden), "{forbidden} must be T1-only");
        }
    }

    #[test]
    fn test_core_tools_present() {
        let names: Vec<&str> = tool_specs().iter().map(|t| t.name).collect();
        for expected in [
            "create_wallet",
            "get_balance",
            "send_transaction",
            "estimate_gas",
            "simulate_transaction",
            "get_pending_transactions",
            "get_transaction_status",
            "get_transaction_history",
            "approve_transaction",
            "reject_transaction",
            "sign_message",
            "swap_tokens",
        ] {
            assert!(names.contains(&expected), "missing tool {expected}");
        }
    }

    #[test]
    fn test_reason_enum_matches_store() {
        for reason in REASONS {
            assert!(reason.parse::<RejectReason>().is_ok());
        }
        assert_eq!(REASONS.len(), RejectReason::ALLOWED.split(", ").count());
    }
}
