//! Pending-transaction table and state machine.
//!
//! The table is in-memory and process-scoped; nothing here is persisted.
//! A single mutex serializes mutations, so status transitions for one hash
//! occur in a fixed order regardless of interleaved callers. Lifecycle
//! events are published while the lock is still held, which pins the event
//! order to the transition order.
//!
//! ```text
//!   pending ──approve──▶ processing ──broadcast-ok──▶ confirmed
//!      │                     └──broadcast-fail──▶ failed
//!      └─reject──▶ rejected
//! ```
//!
//! Terminal states are sinks: once `confirmed`, `failed`, or `rejected`,
//! no operation changes the status again (confirmation counts may still be
//! refreshed for reporting).

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::broadcast::Broadcaster;
use crate::chain::ChainRef;
use crate::error::HostError;
use crate::event::{Event, EventKind};
use crate::timestamp::UnixTimestamp;

/// Transaction category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxKind {
    /// Native or token transfer.
    Transfer,
    /// DEX swap.
    Swap,
    /// Token allowance approval.
    Approve,
    /// Arbitrary contract call.
    ContractCall,
}

impl TxKind {
    /// The snake_case wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Transfer => "transfer",
            Self::Swap => "swap",
            Self::Approve => "approve",
            Self::ContractCall => "contract_call",
        }
    }
}

impl fmt::Display for TxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TxKind {
    type Err = HostError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transfer" => Ok(Self::Transfer),
            "swap" => Ok(Self::Swap),
            "approve" => Ok(Self::Approve),
            "contract_call" => Ok(Self::ContractCall),
            other => Err(HostError::invalid_args_with(
                format!("unknown transaction type: {other}"),
                "Valid types: transfer, swap, approve, contract_call",
            )),
        }
    }
}

/// Lifecycle state of a pending transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    /// Awaiting an agent decision.
    Pending,
    /// Approved; broadcast in progress or awaiting chain acceptance.
    Processing,
    /// Accepted by the chain.
    Confirmed,
    /// Broadcast or execution failed.
    Failed,
    /// Rejected by the agent.
    Rejected,
}

impl TxStatus {
    /// True for sink states that never transition again.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Failed | Self::Rejected)
    }

    /// The snake_case wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
            Self::Rejected => "rejected",
        }
    }

    const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Pending, Self::Rejected)
                | (Self::Processing, Self::Confirmed)
                | (Self::Processing, Self::Failed)
        )
    }

    const fn event_kind(self) -> Option<EventKind> {
        match self {
            Self::Pending => Some(EventKind::TransactionPending),
            Self::Processing => Some(EventKind::TransactionProcessing),
            Self::Confirmed => Some(EventKind::TransactionConfirmed),
            Self::Failed => Some(EventKind::TransactionFailed),
            Self::Rejected => Some(EventKind::TransactionRejected),
        }
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transaction recorded by the host, awaiting or past an agent decision.
///
/// `hash` is the host-assigned opaque id; `chain_hash` is the on-chain hash
/// once broadcast (the two coincide for agent-initiated sends).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingTx {
    /// Host-assigned opaque id.
    pub hash: String,
    /// Target chain.
    pub chain: ChainRef,
    /// Sender address.
    pub from: String,
    /// Recipient address.
    pub to: String,
    /// Decimal-string amount.
    pub amount: String,
    /// Native symbol or contract address.
    pub token: String,
    /// Transaction category.
    #[serde(rename = "type")]
    pub kind: TxKind,
    /// Lifecycle state.
    pub status: TxStatus,
    /// Observed confirmations.
    pub confirmations: u64,
    /// Confirmations required for finality reporting.
    pub required_confirmations: u64,
    /// Estimated or observed fee, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_fee: Option<String>,
    /// Caller-supplied priority hint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    /// When the record was created.
    pub submitted_at: UnixTimestamp,
    /// When the confirmation monitor last looked at it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_checked: Option<UnixTimestamp>,
    /// On-chain hash, set once broadcast.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_hash: Option<String>,
}

/// Filter for [`PendingTxStore::query`].
#[derive(Debug, Clone, Default)]
pub struct TxFilter {
    /// Match only this chain.
    pub chain: Option<ChainRef>,
    /// Match transactions where `from` or `to` equals this address.
    pub address: Option<String>,
    /// Match only this transaction category.
    pub kind: Option<TxKind>,
}

impl TxFilter {
    fn matches(&self, tx: &PendingTx) -> bool {
        if let Some(chain) = self.chain {
            if tx.chain != chain {
                return false;
            }
        }
        if let Some(address) = &self.address {
            if !tx.from.eq_ignore_ascii_case(address) && !tx.to.eq_ignore_ascii_case(address) {
                return false;
            }
        }
        if let Some(kind) = self.kind {
            if tx.kind != kind {
                return false;
            }
        }
        true
    }
}

/// Pagination window with the clamping rules applied at construction.
#[derive(Debug, Clone, Copy)]
pub struct Page {
    /// First result index.
    pub offset: usize,
    /// Maximum results returned.
    pub limit: usize,
}

impl Page {
    /// Maximum page size.
    pub const MAX_LIMIT: usize = 100;
    /// Page size used when the caller passes none or a non-positive value.
    pub const DEFAULT_LIMIT: usize = 10;

    /// Builds a page from raw caller values: `limit` ≤ 0 becomes the
    /// default, `limit` > 100 is clamped to 100, negative offsets become 0.
    #[must_use]
    pub fn clamped(offset: Option<i64>, limit: Option<i64>) -> Self {
        let limit = match limit {
            Some(l) if l > 0 => usize::try_from(l).unwrap_or(Self::MAX_LIMIT).min(Self::MAX_LIMIT),
            _ => Self::DEFAULT_LIMIT,
        };
        let offset = match offset {
            Some(o) if o > 0 => usize::try_from(o).unwrap_or(0),
            _ => 0,
        };
        Self { offset, limit }
    }
}

/// Allowed reasons for rejecting a pending transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// The transaction looks malicious or anomalous.
    SuspiciousActivity,
    /// The fee is unreasonable.
    HighGasFee,
    /// The user asked for it.
    UserRequest,
    /// A security policy fired.
    SecurityConcern,
    /// A duplicate of an existing transaction.
    DuplicateTransaction,
}

impl RejectReason {
    /// Comma-separated list of all allowed reasons, for error hints.
    pub const ALLOWED: &'static str =
        "suspicious_activity, high_gas_fee, user_request, security_concern, duplicate_transaction";

    /// The snake_case wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SuspiciousActivity => "suspicious_activity",
            Self::HighGasFee => "high_gas_fee",
            Self::UserRequest => "user_request",
            Self::SecurityConcern => "security_concern",
            Self::DuplicateTransaction => "duplicate_transaction",
        }
    }
}

impl FromStr for RejectReason {
    type Err = HostError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "suspicious_activity" => Ok(Self::SuspiciousActivity),
            "high_gas_fee" => Ok(Self::HighGasFee),
            "user_request" => Ok(Self::UserRequest),
            "security_concern" => Ok(Self::SecurityConcern),
            "duplicate_transaction" => Ok(Self::DuplicateTransaction),
            other => Err(HostError::InvalidReason {
                reason: other.to_owned(),
                allowed: Self::ALLOWED.to_owned(),
            }),
        }
    }
}

/// Per-transaction outcome of a batch rejection.
#[derive(Debug, Clone, Serialize)]
pub struct RejectOutcome {
    /// The transaction id the outcome refers to.
    pub hash: String,
    /// Whether this transaction was rejected by the batch.
    pub rejected: bool,
    /// Failure detail for transactions that could not be rejected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Summary of a batch rejection.
#[derive(Debug, Clone, Serialize)]
pub struct RejectSummary {
    /// Number of ids in the batch.
    pub total_processed: usize,
    /// Number of transactions moved to `rejected`.
    pub total_rejected: usize,
    /// Number of per-item failures.
    pub total_failed: usize,
    /// Per-transaction outcomes, in input order.
    pub results: Vec<RejectOutcome>,
}

/// In-memory pending-transaction store.
pub struct PendingTxStore {
    table: Mutex<HashMap<String, PendingTx>>,
    broadcaster: Arc<Broadcaster>,
}

impl fmt::Debug for PendingTxStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingTxStore").finish_non_exhaustive()
    }
}

impl PendingTxStore {
    /// Creates an empty store publishing through the given broadcaster.
    #[must_use]
    pub fn new(broadcaster: Arc<Broadcaster>) -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
            broadcaster,
        }
    }

    fn lifecycle_event(tx: &PendingTx, kind: EventKind) -> Event {
        Event::with_fields(
            kind,
            Some(tx.chain),
            &[
                ("hash", json!(tx.hash)),
                ("from", json!(tx.from)),
                ("to", json!(tx.to)),
                ("amount", json!(tx.amount)),
                ("token", json!(tx.token)),
                ("tx_type", json!(tx.kind.as_str())),
                ("status", json!(tx.status.as_str())),
            ],
        )
    }

    /// Inserts a new record and publishes its lifecycle event.
    ///
    /// # Errors
    ///
    /// Fails with [`HostError::InvalidArgs`] if the hash is already present.
    pub fn add(&self, tx: PendingTx) -> Result<(), HostError> {
        let table = &mut *self.table.lock().expect("pending table lock poisoned");
        if table.contains_key(&tx.hash) {
            return Err(HostError::invalid_args(format!(
                "transaction {} already recorded",
                tx.hash
            )));
        }
        if let Some(kind) = tx.status.event_kind() {
            self.broadcaster.publish(&Self::lifecycle_event(&tx, kind));
        }
        table.insert(tx.hash.clone(), tx);
        Ok(())
    }

    /// Looks up a record by host-assigned hash, falling back to the
    /// on-chain hash.
    #[must_use]
    pub fn get(&self, hash: &str) -> Option<PendingTx> {
        let table = self.table.lock().expect("pending table lock poisoned");
        table.get(hash).cloned().or_else(|| {
            table
                .values()
                .find(|tx| tx.chain_hash.as_deref() == Some(hash))
                .cloned()
        })
    }

    /// Queries the table with a snapshot taken at call entry.
    ///
    /// Results are ordered by `submitted_at` descending, ties broken by hash
    /// ascending. Returns the page plus the total match count.
    #[must_use]
    pub fn query(&self, filter: &TxFilter, page: Page) -> (Vec<PendingTx>, usize) {
        let mut matches: Vec<PendingTx> = {
            let table = self.table.lock().expect("pending table lock poisoned");
            table.values().filter(|tx| filter.matches(tx)).cloned().collect()
        };
        // Formatting happens on the snapshot, outside the lock.
        matches.sort_by(|a, b| {
            b.submitted_at
                .cmp(&a.submitted_at)
                .then_with(|| a.hash.cmp(&b.hash))
        });
        let total = matches.len();
        let paged = matches
            .into_iter()
            .skip(page.offset)
            .take(page.limit)
            .collect();
        (paged, total)
    }

    /// Drives a status transition, publishing the corresponding event
    /// before the table lock is released.
    ///
    /// `chain_hash` and `confirmations`, when given, are recorded on the
    /// same transition.
    ///
    /// # Errors
    ///
    /// [`HostError::NotFound`] for unknown hashes; [`HostError::InvalidArgs`]
    /// for transitions the state machine forbids (including any transition
    /// out of a terminal state).
    pub fn update_status(
        &self,
        hash: &str,
        next: TxStatus,
        chain_hash: Option<String>,
        confirmations: Option<u64>,
    ) -> Result<PendingTx, HostError> {
        let table = &mut *self.table.lock().expect("pending table lock poisoned");
        let tx = table.get_mut(hash).ok_or_else(|| HostError::NotFound {
            what: format!("transaction {hash}"),
        })?;

        if !tx.status.can_transition_to(next) {
            return Err(HostError::invalid_args(format!(
                "transaction {hash} cannot move from {} to {next}",
                tx.status
            )));
        }

        tx.status = next;
        tx.last_checked = Some(UnixTimestamp::now());
        if let Some(chain_hash) = chain_hash {
            tx.chain_hash = Some(chain_hash);
        }
        if let Some(confirmations) = confirmations {
            tx.confirmations = confirmations;
        }

        let snapshot = tx.clone();
        if let Some(kind) = next.event_kind() {
            self.broadcaster
                .publish(&Self::lifecycle_event(&snapshot, kind));
        }
        Ok(snapshot)
    }

    /// Refreshes monitoring fields without a state transition or event.
    pub fn record_check(&self, hash: &str, confirmations: u64) {
        let table = &mut *self.table.lock().expect("pending table lock poisoned");
        if let Some(tx) = table.get_mut(hash) {
            tx.confirmations = confirmations;
            tx.last_checked = Some(UnixTimestamp::now());
        }
    }

    /// Rejects a batch of transactions.
    ///
    /// The reason has already been validated by parsing [`RejectReason`]
    /// before any record is touched. Unknown and already-terminal ids
    /// produce per-item failures without failing the batch, and emit no
    /// event.
    #[must_use]
    pub fn reject_many(
        &self,
        hashes: &[String],
        reason: RejectReason,
        details: Option<&str>,
    ) -> RejectSummary {
        let table = &mut *self.table.lock().expect("pending table lock poisoned");
        let mut results = Vec::with_capacity(hashes.len());
        let mut rejected = 0usize;

        for hash in hashes {
            let Some(tx) = table.get_mut(hash) else {
                results.push(RejectOutcome {
                    hash: hash.clone(),
                    rejected: false,
                    error: Some("transaction not found".to_owned()),
                });
                continue;
            };
            if tx.status.is_terminal() {
                results.push(RejectOutcome {
                    hash: hash.clone(),
                    rejected: false,
                    error: Some(format!("transaction already {}", tx.status)),
                });
                continue;
            }
            if tx.status != TxStatus::Pending {
                results.push(RejectOutcome {
                    hash: hash.clone(),
                    rejected: false,
                    error: Some(format!("transaction is {}, only pending ones can be rejected", tx.status)),
                });
                continue;
            }

            tx.status = TxStatus::Rejected;
            tx.last_checked = Some(UnixTimestamp::now());
            let mut event = Self::lifecycle_event(tx, EventKind::TransactionRejected);
            event
                .data
                .insert("reason".to_owned(), json!(reason.as_str()));
            if let Some(details) = details {
                event.data.insert("details".to_owned(), json!(details));
            }
            self.broadcaster.publish(&event);
            rejected += 1;
            results.push(RejectOutcome {
                hash: hash.clone(),
                rejected: true,
                error: None,
            });
        }

        RejectSummary {
            total_processed: hashes.len(),
            total_rejected: rejected,
            total_failed: hashes.len() - rejected,
            results,
        }
    }

    /// Hashes currently worth polling: broadcast transactions that are not
    /// yet final.
    #[must_use]
    pub fn in_flight(&self) -> Vec<PendingTx> {
        let table = self.table.lock().expect("pending table lock poisoned");
        table
            .values()
            .filter(|tx| {
                tx.chain_hash.is_some()
                    && (tx.status == TxStatus::Processing
                        || (tx.status == TxStatus::Confirmed
                            && tx.confirmations < tx.required_confirmations))
            })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (PendingTxStore, Arc<Broadcaster>, crate::broadcast::Subscription) {
        let broadcaster = Arc::new(Broadcaster::new());
        let sub = broadcaster.subscribe("test", None);
        (PendingTxStore::new(Arc::clone(&broadcaster)), broadcaster, sub)
    }

    fn tx(hash: &str, submitted_at: u64) -> PendingTx {
        PendingTx {
            hash: hash.to_owned(),
            chain: ChainRef::Ethereum,
            from: "0xfrom".to_owned(),
            to: "0xto".to_owned(),
            amount: "0.1".to_owned(),
            token: "ETH".to_owned(),
            kind: TxKind::Transfer,
            status: TxStatus::Pending,
            confirmations: 0,
            required_confirmations: 12,
            gas_fee: None,
            priority: None,
            submitted_at: UnixTimestamp::from_secs(submitted_at),
            last_checked: None,
            chain_hash: None,
        }
    }

    #[test]
    fn test_add_publishes_pending_event() {
        let (store, _b, sub) = store();
        store.add(tx("0xaaa", 1)).unwrap();
        let event = sub.try_recv().unwrap();
        assert_eq!(event.kind, EventKind::TransactionPending);
        assert_eq!(event.data["hash"], "0xaaa");
    }

    #[test]
    fn test_full_lifecycle_emits_ordered_events() {
        let (store, _b, sub) = store();
        store.add(tx("0xaaa", 1)).unwrap();
        store
            .update_status("0xaaa", TxStatus::Processing, None, None)
            .unwrap();
        store
            .update_status("0xaaa", TxStatus::Confirmed, Some("0xchain".to_owned()), Some(1))
            .unwrap();

        let kinds: Vec<EventKind> = std::iter::from_fn(|| sub.try_recv())
            .map(|e| e.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::TransactionPending,
                EventKind::TransactionProcessing,
                EventKind::TransactionConfirmed,
            ]
        );
        let tx = store.get("0xaaa").unwrap();
        assert_eq!(tx.status, TxStatus::Confirmed);
        assert_eq!(tx.chain_hash.as_deref(), Some("0xchain"));
    }

    #[test]
    fn test_terminal_states_are_sinks() {
        let (store, _b, _sub) = store();
        store.add(tx("0xaaa", 1)).unwrap();
        store
            .update_status("0xaaa", TxStatus::Processing, None, None)
            .unwrap();
        store
            .update_status("0xaaa", TxStatus::Failed, None, None)
            .unwrap();

        for next in [TxStatus::Pending, TxStatus::Processing, TxStatus::Confirmed] {
            assert!(store.update_status("0xaaa", next, None, None).is_err());
        }
        assert_eq!(store.get("0xaaa").unwrap().status, TxStatus::Failed);
    }

    #[test]
    fn test_skipping_processing_is_forbidden() {
        let (store, _b, _sub) = store();
        store.add(tx("0xaaa", 1)).unwrap();
        assert!(
            store
                .update_status("0xaaa", TxStatus::Confirmed, None, None)
                .is_err()
        );
    }

    #[test]
    fn test_query_orders_and_pages() {
        let (store, _b, _sub) = store();
        store.add(tx("0xbbb", 10)).unwrap();
        store.add(tx("0xaaa", 10)).unwrap();
        store.add(tx("0xccc", 20)).unwrap();

        let (page, total) = store.query(&TxFilter::default(), Page::clamped(None, None));
        assert_eq!(total, 3);
        let hashes: Vec<&str> = page.iter().map(|t| t.hash.as_str()).collect();
        // Newest first; equal timestamps ordered by hash.
        assert_eq!(hashes, vec!["0xccc", "0xaaa", "0xbbb"]);

        let (page, _) = store.query(&TxFilter::default(), Page::clamped(Some(1), Some(1)));
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].hash, "0xaaa");
    }

    #[test]
    fn test_page_clamping() {
        let page = Page::clamped(Some(-5), Some(0));
        assert_eq!(page.offset, 0);
        assert_eq!(page.limit, Page::DEFAULT_LIMIT);

        let page = Page::clamped(None, Some(1000));
        assert_eq!(page.limit, Page::MAX_LIMIT);
    }

    #[test]
    fn test_query_filters() {
        let (store, _b, _sub) = store();
        let mut solana = tx("sig1", 5);
        solana.chain = ChainRef::Solana;
        solana.from = "SolFrom".to_owned();
        store.add(solana).unwrap();
        store.add(tx("0xaaa", 6)).unwrap();

        let filter = TxFilter {
            chain: Some(ChainRef::Solana),
            ..Default::default()
        };
        let (page, total) = store.query(&filter, Page::clamped(None, None));
        assert_eq!(total, 1);
        assert_eq!(page[0].hash, "sig1");

        let filter = TxFilter {
            address: Some("0xTO".to_owned()),
            ..Default::default()
        };
        let (_, total) = store.query(&filter, Page::clamped(None, None));
        assert_eq!(total, 1);
    }

    #[test]
    fn test_reject_batch_partial_failure() {
        let (store, _b, sub) = store();
        store.add(tx("0xaaa", 1)).unwrap();

        let summary = store.reject_many(
            &["0xaaa".to_owned(), "0xbbb".to_owned()],
            RejectReason::HighGasFee,
            None,
        );
        assert_eq!(summary.total_processed, 2);
        assert_eq!(summary.total_rejected, 1);
        assert_eq!(summary.total_failed, 1);
        assert!(summary.results[0].rejected);
        assert!(!summary.results[1].rejected);

        let events: Vec<Event> = std::iter::from_fn(|| sub.try_recv()).collect();
        let rejected: Vec<&Event> = events
            .iter()
            .filter(|e| e.kind == EventKind::TransactionRejected)
            .collect();
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].data["reason"], "high_gas_fee");
    }

    #[test]
    fn test_reject_is_idempotent_per_item() {
        let (store, _b, sub) = store();
        store.add(tx("0xaaa", 1)).unwrap();

        let ids = vec!["0xaaa".to_owned()];
        let first = store.reject_many(&ids, RejectReason::UserRequest, None);
        assert_eq!(first.total_rejected, 1);

        let second = store.reject_many(&ids, RejectReason::UserRequest, None);
        assert_eq!(second.total_rejected, 0);
        assert_eq!(second.total_failed, 1);
        assert!(second.results[0].error.as_ref().unwrap().contains("rejected"));

        let rejected_events = std::iter::from_fn(|| sub.try_recv())
            .filter(|e| e.kind == EventKind::TransactionRejected)
            .count();
        assert_eq!(rejected_events, 1);
    }

    #[test]
    fn test_unknown_reason_fails_before_mutation() {
        let (store, _b, _sub) = store();
        store.add(tx("0xaaa", 1)).unwrap();

        // Parsing the reason fails before reject_many can run.
        let err = "suspicious".parse::<RejectReason>().unwrap_err();
        assert_eq!(err.kind(), "invalid_reason");
        assert_eq!(store.get("0xaaa").unwrap().status, TxStatus::Pending);
    }

    #[test]
    fn test_in_flight_tracks_broadcast_txs() {
        let (store, _b, _sub) = store();
        store.add(tx("0xaaa", 1)).unwrap();
        assert!(store.in_flight().is_empty());

        store
            .update_status("0xaaa", TxStatus::Processing, Some("0xchain".to_owned()), None)
            .unwrap();
        assert_eq!(store.in_flight().len(), 1);
    }

    #[test]
    fn test_get_falls_back_to_chain_hash() {
        let (store, _b, _sub) = store();
        store.add(tx("0xaaa", 1)).unwrap();
        store
            .update_status("0xaaa", TxStatus::Processing, Some("0xchain".to_owned()), None)
            .unwrap();
        assert_eq!(store.get("0xchain").unwrap().hash, "0xaaa");
    }
}
