//! Typed wallet events.
//!
//! Events are immutable after creation and carry a process-unique id.
//! They flow from the pending-transaction store and the dispatcher through
//! the [broadcaster](crate::broadcast) to SSE sessions and the native
//! messaging transport.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::chain::ChainRef;
use crate::timestamp::UnixTimestamp;

static NEXT_EVENT_ID: AtomicU64 = AtomicU64::new(1);

/// The kind of a wallet event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A transaction entered the pending table and awaits a decision.
    TransactionPending,
    /// A pending transaction was approved and is being broadcast.
    TransactionProcessing,
    /// A transaction was accepted by the chain.
    TransactionConfirmed,
    /// A broadcast or on-chain execution failed.
    TransactionFailed,
    /// A pending transaction was rejected.
    TransactionRejected,
    /// An account balance changed.
    BalanceChanged,
    /// The keystore lock state or wallet set changed.
    WalletStatusChanged,
    /// A new block was observed.
    BlockNew,
}

impl EventKind {
    /// All event kinds, in declaration order.
    pub const ALL: [Self; 8] = [
        Self::TransactionPending,
        Self::TransactionProcessing,
        Self::TransactionConfirmed,
        Self::TransactionFailed,
        Self::TransactionRejected,
        Self::BalanceChanged,
        Self::WalletStatusChanged,
        Self::BlockNew,
    ];

    /// The snake_case wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::TransactionPending => "transaction_pending",
            Self::TransactionProcessing => "transaction_processing",
            Self::TransactionConfirmed => "transaction_confirmed",
            Self::TransactionFailed => "transaction_failed",
            Self::TransactionRejected => "transaction_rejected",
            Self::BalanceChanged => "balance_changed",
            Self::WalletStatusChanged => "wallet_status_changed",
            Self::BlockNew => "block_new",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown event type: {s}"))
    }
}

/// A wallet event. Immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Process-unique id (`evt_<n>`).
    pub id: String,
    /// Event kind.
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Creation time.
    pub timestamp: UnixTimestamp,
    /// The chain this event concerns, when applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain: Option<ChainRef>,
    /// Event payload.
    pub data: Map<String, Value>,
}

impl Event {
    /// Creates an event with a fresh id and the current timestamp.
    #[must_use]
    pub fn new(kind: EventKind, chain: Option<ChainRef>, data: Map<String, Value>) -> Self {
        let n = NEXT_EVENT_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            id: format!("evt_{n}"),
            kind,
            timestamp: UnixTimestamp::now(),
            chain,
            data,
        }
    }

    /// Convenience constructor from `(key, value)` pairs.
    #[must_use]
    pub fn with_fields(
        kind: EventKind,
        chain: Option<ChainRef>,
        fields: &[(&str, Value)],
    ) -> Self {
        let mut data = Map::new();
        for (key, value) in fields {
            data.insert((*key).to_owned(), value.clone());
        }
        Self::new(kind, chain, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ids_are_unique_and_increasing() {
        let a = Event::new(EventKind::BlockNew, None, Map::new());
        let b = Event::new(EventKind::BlockNew, None, Map::new());
        assert_ne!(a.id, b.id);
        let na: u64 = a.id.trim_start_matches("evt_").parse().unwrap();
        let nb: u64 = b.id.trim_start_matches("evt_").parse().unwrap();
        assert!(nb > na);
    }

    #[test]
    fn test_kind_wire_names() {
        assert_eq!(EventKind::TransactionPending.as_str(), "transaction_pending");
        assert_eq!(
            "balance_changed".parse::<EventKind>().unwrap(),
            EventKind::BalanceChanged
        );
        assert!("not_a_kind".parse::<EventKind>().is_err());
    }

    #[test]
    fn test_serialized_shape() {
        let event = Event::with_fields(
            EventKind::TransactionPending,
            Some(ChainRef::Ethereum),
            &[("hash", json!("0xabc"))],
        );
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "transaction_pending");
        assert_eq!(value["chain"], "ethereum");
        assert_eq!(value["data"]["hash"], "0xabc");
    }
}
