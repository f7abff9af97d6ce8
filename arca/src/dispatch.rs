//! Operation dispatcher.
//!
//! The façade both transports call into. Every operation follows the same
//! shape: validate arguments, check the keystore lock when a key is needed,
//! select the chain (explicit parameter or shape detection), call the chain
//! adapter under the request deadline, record the outcome in the pending
//! store, publish events, and format the response as JSON.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Map, Value, json};

use crate::adapter::{ChainAdapter, SOLANA_OFFCHAIN_SENTINEL, SendRequest};
use crate::broadcast::Broadcaster;
use crate::chain::{self, ChainFamily, ChainRef};
use crate::config::RunMode;
use crate::error::HostError;
use crate::event::{Event, EventKind};
use crate::keystore::Keystore;
use crate::pending::{
    Page, PendingTx, PendingTxStore, RejectReason, TxFilter, TxKind, TxStatus,
};
use crate::timestamp::UnixTimestamp;
use crate::token;

/// The wallet-facing operation façade.
pub struct Dispatcher {
    keystore: Arc<dyn Keystore>,
    chains: HashMap<ChainRef, Arc<dyn ChainAdapter>>,
    pending: Arc<PendingTxStore>,
    broadcaster: Arc<Broadcaster>,
    run_mode: RunMode,
    tool_deadline: Duration,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("chains", &self.chains.keys().collect::<Vec<_>>())
            .field("run_mode", &self.run_mode)
            .field("tool_deadline", &self.tool_deadline)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Wires the dispatcher to its collaborators.
    #[must_use]
    pub fn new(
        keystore: Arc<dyn Keystore>,
        chains: HashMap<ChainRef, Arc<dyn ChainAdapter>>,
        pending: Arc<PendingTxStore>,
        broadcaster: Arc<Broadcaster>,
        run_mode: RunMode,
        tool_deadline: Duration,
    ) -> Self {
        Self {
            keystore,
            chains,
            pending,
            broadcaster,
            run_mode,
            tool_deadline,
        }
    }

    /// The broadcaster events are published through.
    #[must_use]
    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    /// The pending-transaction store.
    #[must_use]
    pub fn pending_store(&self) -> &Arc<PendingTxStore> {
        &self.pending
    }

    /// Chains with a configured adapter.
    #[must_use]
    pub fn configured_chains(&self) -> Vec<ChainRef> {
        let mut chains: Vec<ChainRef> = self.chains.keys().copied().collect();
        chains.sort();
        chains
    }

    fn adapter(&self, chain: ChainRef) -> Result<&Arc<dyn ChainAdapter>, HostError> {
        self.chains.get(&chain).ok_or(HostError::UnsupportedChain {
            chain: Some(chain.to_string()),
            suggestion: Some("Supported chains: ethereum, bsc, solana".to_owned()),
        })
    }

    async fn with_deadline<T>(
        &self,
        fut: impl Future<Output = Result<T, HostError>> + Send,
    ) -> Result<T, HostError> {
        match tokio::time::timeout(self.tool_deadline, fut).await {
            Ok(result) => result,
            Err(_) => Err(HostError::Timeout {
                seconds: self.tool_deadline.as_secs(),
            }),
        }
    }

    fn require_unlocked(&self) -> Result<(), HostError> {
        if self.keystore.is_unlocked() {
            Ok(())
        } else {
            Err(HostError::WalletLocked)
        }
    }

    fn host_hash(chain: ChainRef) -> String {
        use rand::Rng;
        let mut rng = rand::rng();
        match chain.family() {
            ChainFamily::Evm => {
                let mut bytes = [0u8; 32];
                rng.fill_bytes(&mut bytes);
                let mut out = String::with_capacity(66);
                out.push_str("0x");
                for b in bytes {
                    out.push_str(&format!("{b:02x}"));
                }
                out
            }
            ChainFamily::Solana => {
                let mut bytes = [0u8; 64];
                rng.fill_bytes(&mut bytes);
                bs58::encode(bytes).into_string()
            }
        }
    }

    fn publish_wallet_status(&self, locked: bool, wallet_count: usize) {
        let event = Event::with_fields(
            EventKind::WalletStatusChanged,
            None,
            &[("locked", json!(locked)), ("wallet_count", json!(wallet_count))],
        );
        self.broadcaster.publish(&event);
    }

    fn publish_balance_changed(&self, chain: ChainRef, address: &str) {
        let event = Event::with_fields(
            EventKind::BalanceChanged,
            Some(chain),
            &[("address", json!(address))],
        );
        self.broadcaster.publish(&event);
    }

    async fn wallet_count(&self) -> usize {
        self.keystore.list_wallets().await.map_or(0, |w| w.len())
    }

    // --- wallet operations -------------------------------------------------

    /// Creates a wallet. The generated mnemonic stays inside the keystore
    /// and is never part of the response.
    ///
    /// # Errors
    ///
    /// Propagates keystore failures (`WeakPassword`, `UnsupportedChain`).
    pub async fn create_wallet(&self, chain: &str, password: &str) -> Result<Value, HostError> {
        let chain: ChainRef = chain.parse()?;
        let info = self.keystore.create_wallet(chain, password).await?;
        self.publish_wallet_status(false, self.wallet_count().await);
        Ok(json!({
            "address": info.address,
            "public_key": info.public_key,
            "chain": chain,
        }))
    }

    /// Imports a wallet from a mnemonic. Only reachable from the native
    /// messaging transport; the MCP tool registry must not expose it.
    ///
    /// # Errors
    ///
    /// `InvalidMnemonic`, `WeakPassword`, `UnsupportedChain`,
    /// `DuplicateWallet` per the keystore contract.
    pub async fn import_wallet(
        &self,
        mnemonic: &str,
        password: &str,
        chain: &str,
        derivation_path: Option<&str>,
    ) -> Result<Value, HostError> {
        let chain: ChainRef = chain.parse()?;
        let info = self
            .keystore
            .import_wallet(chain, mnemonic, password, derivation_path)
            .await?;
        self.publish_wallet_status(false, self.wallet_count().await);
        Ok(json!({
            "address": info.address,
            "public_key": info.public_key,
            "chain": chain,
            "imported_at": info.imported_at,
        }))
    }

    /// Unlocks the keystore.
    ///
    /// # Errors
    ///
    /// Propagates keystore password failures.
    pub async fn unlock_wallet(&self, password: &str) -> Result<Value, HostError> {
        self.keystore.unlock(password).await?;
        self.publish_wallet_status(false, self.wallet_count().await);
        Ok(json!({ "unlocked": true }))
    }

    /// Locks the keystore, zeroing decrypted seeds.
    pub async fn lock_wallet(&self) -> Result<Value, HostError> {
        self.keystore.lock().await;
        self.publish_wallet_status(true, self.wallet_count().await);
        Ok(json!({ "locked": true }))
    }

    /// Lists wallets (addresses and metadata only).
    ///
    /// # Errors
    ///
    /// Propagates keystore storage failures.
    pub async fn list_wallets(&self) -> Result<Value, HostError> {
        let wallets = self.keystore.list_wallets().await?;
        Ok(json!({ "wallets": wallets }))
    }

    /// Switches the active wallet for a chain.
    ///
    /// # Errors
    ///
    /// `WalletNotFound` when the address is unknown on that chain.
    pub async fn switch_wallet(&self, chain: &str, address: &str) -> Result<Value, HostError> {
        let chain: ChainRef = chain.parse()?;
        self.keystore.switch_active(chain, address).await?;
        self.publish_wallet_status(!self.keystore.is_unlocked(), self.wallet_count().await);
        Ok(json!({ "chain": chain, "active_address": address }))
    }

    /// Relabels a wallet.
    ///
    /// # Errors
    ///
    /// `WalletNotFound` when the address is unknown.
    pub async fn set_wallet_label(&self, address: &str, label: &str) -> Result<Value, HostError> {
        self.keystore.set_label(address, label).await?;
        Ok(json!({ "address": address, "label": label }))
    }

    /// Deletes a wallet after re-confirming the password.
    ///
    /// # Errors
    ///
    /// `WalletNotFound` or password failures from the keystore.
    pub async fn delete_wallet(&self, address: &str, password: &str) -> Result<Value, HostError> {
        self.keystore.delete_wallet(address, password).await?;
        self.publish_wallet_status(!self.keystore.is_unlocked(), self.wallet_count().await);
        Ok(json!({ "deleted": address }))
    }

    /// Reserved surface; export semantics are future work.
    ///
    /// # Errors
    ///
    /// Always fails with `NotSupported`.
    pub fn export_wallet(&self) -> Result<Value, HostError> {
        Err(HostError::NotSupported {
            method: "export_wallet".to_owned(),
        })
    }

    /// Reserved surface; runtime chain switching is future work.
    ///
    /// # Errors
    ///
    /// Always fails with `NotSupported`.
    pub fn switch_chain(&self) -> Result<Value, HostError> {
        Err(HostError::NotSupported {
            method: "switch_chain".to_owned(),
        })
    }

    /// Lock state and wallet summary, for `wallet://status` and the
    /// extension status view.
    ///
    /// # Errors
    ///
    /// Propagates keystore storage failures.
    pub async fn wallet_status(&self) -> Result<Value, HostError> {
        let wallets = self.keystore.list_wallets().await?;
        let mut active = Map::new();
        for wallet in wallets.iter().filter(|w| w.active) {
            active.insert(wallet.chain.to_string(), json!(wallet.address));
        }
        Ok(json!({
            "locked": !self.keystore.is_unlocked(),
            "wallet_count": wallets.len(),
            "active": active,
            "chains": self.configured_chains(),
            "test_mode": self.run_mode.is_test(),
        }))
    }

    // --- chain operations --------------------------------------------------

    fn resolve_chain_for_balance(
        &self,
        chain: Option<&str>,
        address: &str,
        token: Option<&str>,
    ) -> Result<ChainRef, HostError> {
        if let Some(chain) = chain {
            return chain.parse();
        }
        if let Some(token) = token {
            if let Ok(chain) = token::infer_chain_for_token(token) {
                return Ok(chain);
            }
        }
        chain::detect_chain_for_address(address)
    }

    /// Queries a balance.
    ///
    /// The chain is taken from the explicit parameter, inferred from a
    /// native token symbol, or detected from the address shape, in that
    /// order.
    ///
    /// # Errors
    ///
    /// `TokenNotSupported` for unknown tokens, `RpcUnavailable` when the
    /// pool is exhausted.
    pub async fn get_balance(
        &self,
        address: &str,
        token: Option<&str>,
        chain: Option<&str>,
    ) -> Result<Value, HostError> {
        if address.trim().is_empty() {
            return Err(HostError::MissingRequiredField {
                field: "address".to_owned(),
            });
        }
        let chain = self.resolve_chain_for_balance(chain, address, token)?;
        let token_id = token::resolve_token(chain, token)?;
        let adapter = self.adapter(chain)?;
        let info = self
            .with_deadline(adapter.get_balance(address, &token_id))
            .await?;
        Ok(json!({
            "address": address,
            "chain": chain,
            "token": token.unwrap_or(info.symbol.as_str()),
            "balance": info.amount,
            "decimals": info.decimals,
            "symbol": info.symbol,
        }))
    }

    fn build_send_request(
        chain: ChainRef,
        from: &str,
        to: &str,
        amount: &str,
        token: Option<&str>,
        gas_limit: Option<u64>,
        gas_price: Option<&str>,
    ) -> Result<SendRequest, HostError> {
        for (field, value) in [("from", from), ("to", to), ("amount", amount)] {
            if value.trim().is_empty() {
                return Err(HostError::MissingRequiredField {
                    field: field.to_owned(),
                });
            }
        }
        let valid_to = match chain.family() {
            ChainFamily::Evm => token::is_evm_address(to),
            ChainFamily::Solana => token::is_solana_address(to),
        };
        if !valid_to {
            return Err(HostError::invalid_args(format!(
                "recipient {to} is not a valid {chain} address"
            )));
        }
        let gas_price = gas_price
            .map(|p| {
                p.parse::<u128>().map_err(|_| {
                    HostError::invalid_args("gas_price must be an integer in native base units")
                })
            })
            .transpose()?;
        Ok(SendRequest {
            from: from.to_owned(),
            to: to.to_owned(),
            amount: amount.to_owned(),
            token: token::resolve_token(chain, token)?,
            gas_limit,
            gas_price,
        })
    }

    /// Builds, signs, and broadcasts a transfer, recording it for
    /// confirmation tracking.
    ///
    /// # Errors
    ///
    /// `WalletLocked`, `InsufficientBalance`, `BroadcastFailed`, `Timeout`.
    #[allow(clippy::too_many_arguments)]
    pub async fn send_transaction(
        &self,
        chain: &str,
        from: &str,
        to: &str,
        amount: &str,
        token: Option<&str>,
        gas_limit: Option<u64>,
        gas_price: Option<&str>,
    ) -> Result<Value, HostError> {
        self.require_unlocked()?;
        let chain: ChainRef = chain.parse()?;
        let req = Self::build_send_request(chain, from, to, amount, token, gas_limit, gas_price)?;
        let adapter = self.adapter(chain)?;

        let host_hash = Self::host_hash(chain);
        let record = PendingTx {
            hash: host_hash.clone(),
            chain,
            from: req.from.clone(),
            to: req.to.clone(),
            amount: req.amount.clone(),
            token: token.unwrap_or(chain.native_symbol()).to_owned(),
            kind: TxKind::Transfer,
            status: TxStatus::Pending,
            confirmations: 0,
            required_confirmations: adapter.required_confirmations(),
            gas_fee: None,
            priority: None,
            submitted_at: UnixTimestamp::now(),
            last_checked: None,
            chain_hash: None,
        };
        self.pending.add(record)?;

        let chain_hash = match self.with_deadline(adapter.send_transaction(&req)).await {
            Ok(hash) => hash,
            Err(err) => {
                // Deadline expiry leaves the record pending; real broadcast
                // failures resolve it.
                if !matches!(err, HostError::Timeout { .. }) {
                    let _ = self
                        .pending
                        .update_status(&host_hash, TxStatus::Processing, None, None);
                    let _ = self
                        .pending
                        .update_status(&host_hash, TxStatus::Failed, None, None);
                }
                return Err(err);
            }
        };

        self.pending
            .update_status(&host_hash, TxStatus::Processing, Some(chain_hash.clone()), None)?;
        tracing::info!(chain = %chain, tx_hash = %chain_hash, "transaction broadcast");

        Ok(json!({
            "tx_hash": chain_hash,
            "host_hash": host_hash,
            "status": "pending",
            "chain": chain,
        }))
    }

    /// Estimates fees for a transfer.
    ///
    /// # Errors
    ///
    /// `RpcUnavailable` when the pool is exhausted.
    pub async fn estimate_gas(
        &self,
        chain: &str,
        from: &str,
        to: &str,
        amount: &str,
        token: Option<&str>,
    ) -> Result<Value, HostError> {
        let chain: ChainRef = chain.parse()?;
        let req = Self::build_send_request(chain, from, to, amount, token, None, None)?;
        let adapter = self.adapter(chain)?;
        let estimate = self.with_deadline(adapter.estimate_gas(&req)).await?;
        Ok(json!({
            "chain": chain,
            "gas_limit": estimate.gas_limit,
            "gas_price": estimate.gas_price,
        }))
    }

    /// Dry-runs a transfer. Never broadcasts and records nothing.
    ///
    /// # Errors
    ///
    /// `RpcUnavailable` when the pool is exhausted.
    pub async fn simulate_transaction(
        &self,
        chain: &str,
        from: &str,
        to: &str,
        amount: &str,
        token: Option<&str>,
    ) -> Result<Value, HostError> {
        let chain: ChainRef = chain.parse()?;
        let req = Self::build_send_request(chain, from, to, amount, token, None, None)?;
        let adapter = self.adapter(chain)?;
        let report = self.with_deadline(adapter.simulate(&req)).await?;
        Ok(json!({
            "chain": chain,
            "success": report.success,
            "gas_used": report.gas_used,
            "gas_price": report.gas_price,
            "total_cost": report.total_cost,
            "balance_change": report.balance_change,
            "warnings": report.warnings,
            "errors": report.errors,
        }))
    }

    /// Queries the pending-transaction table.
    ///
    /// # Errors
    ///
    /// `InvalidArgs` for unknown chain or type filters.
    pub async fn get_pending_transactions(
        &self,
        chain: Option<&str>,
        address: Option<&str>,
        tx_type: Option<&str>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Value, HostError> {
        let filter = TxFilter {
            chain: chain.map(str::parse).transpose()?,
            address: address.map(str::to_owned),
            kind: tx_type.map(str::parse).transpose()?,
        };
        let page = Page::clamped(offset, limit);
        let (transactions, total) = self.pending.query(&filter, page);
        Ok(json!({
            "transactions": transactions,
            "total": total,
            "offset": page.offset,
            "limit": page.limit,
        }))
    }

    /// Queries confirmation state for a transaction hash.
    ///
    /// The chain comes from the explicit parameter, a pending record, or
    /// the hash shape, in that order.
    ///
    /// # Errors
    ///
    /// `UnsupportedChain` when the shape is ambiguous and no `chain` was
    /// given.
    pub async fn get_transaction_status(
        &self,
        tx_hash: &str,
        chain: Option<&str>,
    ) -> Result<Value, HostError> {
        let record = self.pending.get(tx_hash);
        let chain = match (chain, &record) {
            (Some(chain), _) => chain.parse()?,
            (None, Some(record)) => record.chain,
            (None, None) => chain::detect_chain_for_hash(tx_hash)?,
        };

        // Not yet broadcast: answer from the local record.
        if let Some(record) = &record {
            if record.chain_hash.is_none() {
                return Ok(json!({
                    "tx_hash": tx_hash,
                    "chain": chain,
                    "status": record.status,
                    "confirmations": record.confirmations,
                }));
            }
        }

        let query_hash = record
            .as_ref()
            .and_then(|r| r.chain_hash.clone())
            .unwrap_or_else(|| tx_hash.to_owned());
        let adapter = self.adapter(chain)?;
        let info = self
            .with_deadline(adapter.confirm_transaction(&query_hash))
            .await?;
        Ok(json!({
            "tx_hash": tx_hash,
            "chain": chain,
            "status": info.status,
            "confirmations": info.confirmations,
            "block_number": info.block_number,
            "gas_used": info.gas_used,
            "fee": info.fee,
            "timestamp": info.timestamp,
            "error": info.error,
        }))
    }

    /// Fetches transaction history for an address.
    ///
    /// # Errors
    ///
    /// `RpcUnavailable` when the explorer API fails.
    pub async fn get_transaction_history(
        &self,
        address: &str,
        chain: Option<&str>,
        from_block: Option<u64>,
        to_block: Option<u64>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Value, HostError> {
        let chain = match chain {
            Some(chain) => chain.parse()?,
            None => chain::detect_chain_for_address(address)?,
        };
        let adapter = self.adapter(chain)?;
        let entries = self
            .with_deadline(adapter.transaction_history(address, from_block, to_block))
            .await?;
        let page = Page::clamped(offset, limit);
        let total = entries.len();
        let entries: Vec<_> = entries
            .into_iter()
            .skip(page.offset)
            .take(page.limit)
            .collect();
        Ok(json!({
            "address": address,
            "chain": chain,
            "transactions": entries,
            "total": total,
            "offset": page.offset,
            "limit": page.limit,
        }))
    }

    /// Drives the pending-transaction state machine for one transaction.
    ///
    /// `approve` broadcasts and settles the transaction; `reject` requires
    /// a `reason` from the allowed set.
    ///
    /// # Errors
    ///
    /// `MissingRequiredField` for a reject without reason, `InvalidReason`
    /// for reasons outside the allowed set, `NotFound` for unknown hashes.
    pub async fn approve_transaction(
        &self,
        tx_hash: &str,
        action: &str,
        reason: Option<&str>,
    ) -> Result<Value, HostError> {
        match action {
            "approve" => self.approve_and_broadcast(tx_hash).await,
            "reject" => {
                let reason = reason.ok_or_else(|| HostError::MissingRequiredField {
                    field: "reason".to_owned(),
                })?;
                let reason: RejectReason = reason.parse()?;
                if self.pending.get(tx_hash).is_none() {
                    return Err(HostError::NotFound {
                        what: format!("transaction {tx_hash}"),
                    });
                }
                let summary =
                    self.pending
                        .reject_many(&[tx_hash.to_owned()], reason, None);
                let outcome = summary.results.first();
                match outcome {
                    Some(outcome) if outcome.rejected => Ok(json!({
                        "tx_hash": tx_hash,
                        "action": "reject",
                        "status": "rejected",
                        "reason": reason.as_str(),
                    })),
                    Some(outcome) => Err(HostError::invalid_args(
                        outcome
                            .error
                            .clone()
                            .unwrap_or_else(|| "rejection failed".to_owned()),
                    )),
                    None => Err(HostError::internal("empty rejection batch")),
                }
            }
            other => Err(HostError::invalid_args_with(
                format!("unknown action: {other}"),
                "Valid actions: approve, reject",
            )),
        }
    }

    async fn approve_and_broadcast(&self, tx_hash: &str) -> Result<Value, HostError> {
        self.require_unlocked()?;
        let record = self.pending.get(tx_hash).ok_or_else(|| HostError::NotFound {
            what: format!("transaction {tx_hash}"),
        })?;
        if record.status != TxStatus::Pending {
            return Err(HostError::invalid_args(format!(
                "transaction {tx_hash} is {}, only pending ones can be approved",
                record.status
            )));
        }

        let adapter = self.adapter(record.chain)?;
        // The record was validated when it entered the table; swap records
        // carry a router label in `to`, so recipient-shape checks do not
        // apply here.
        let req = SendRequest {
            from: record.from.clone(),
            to: record.to.clone(),
            amount: record.amount.clone(),
            token: token::resolve_token(
                record.chain,
                Some(record.token.as_str()).filter(|t| !t.is_empty()),
            )?,
            gas_limit: None,
            gas_price: None,
        };

        self.pending
            .update_status(&record.hash, TxStatus::Processing, None, None)?;

        match self.with_deadline(adapter.send_transaction(&req)).await {
            Ok(chain_hash) => {
                self.pending.update_status(
                    &record.hash,
                    TxStatus::Confirmed,
                    Some(chain_hash.clone()),
                    None,
                )?;
                self.publish_balance_changed(record.chain, &record.from);
                tracing::info!(
                    chain = %record.chain,
                    tx_hash = %chain_hash,
                    "approved transaction broadcast"
                );
                Ok(json!({
                    "tx_hash": record.hash,
                    "chain_hash": chain_hash,
                    "action": "approve",
                    "status": "confirmed",
                }))
            }
            Err(err) => {
                if !matches!(err, HostError::Timeout { .. }) {
                    let _ = self
                        .pending
                        .update_status(&record.hash, TxStatus::Failed, None, None);
                }
                Err(err)
            }
        }
    }

    /// Rejects a batch of pending transactions.
    ///
    /// The reason is validated before any record is touched; per-item
    /// failures (unknown or already-terminal ids) do not fail the batch.
    ///
    /// # Errors
    ///
    /// `InvalidReason` when the reason is outside the allowed set,
    /// `MissingRequiredField` for an empty id list.
    pub async fn reject_transaction(
        &self,
        transaction_ids: &str,
        reason: &str,
        details: Option<&str>,
        audit_log: bool,
    ) -> Result<Value, HostError> {
        let reason: RejectReason = reason.parse()?;
        let ids: Vec<String> = transaction_ids
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect();
        if ids.is_empty() {
            return Err(HostError::MissingRequiredField {
                field: "transaction_ids".to_owned(),
            });
        }

        let summary = self.pending.reject_many(&ids, reason, details);
        if audit_log {
            tracing::info!(
                reason = reason.as_str(),
                total = summary.total_processed,
                rejected = summary.total_rejected,
                failed = summary.total_failed,
                "transaction rejection batch"
            );
        }
        Ok(json!({
            "total_processed": summary.total_processed,
            "total_rejected": summary.total_rejected,
            "total_failed": summary.total_failed,
            "reason": reason.as_str(),
            "results": summary.results,
        }))
    }

    /// Signs a message with the key behind `address`.
    ///
    /// EVM messages are hashed per EIP-191 inside the adapter, with
    /// `0x`-hex payloads decoded first. Solana messages may carry raw
    /// bytes by base64-encoding them behind a `base64:` prefix; a decoded
    /// payload that opens with the off-chain sentinel is signed as raw
    /// bytes (the adapter strips the marker and signs what follows),
    /// while plain strings are signed over their UTF-8 encoding. Payloads
    /// shaped like a transaction envelope are refused.
    ///
    /// # Errors
    ///
    /// `WalletLocked`, `DangerousPayload`, `WalletNotFound`.
    pub async fn sign_message(&self, address: &str, message: &str) -> Result<Value, HostError> {
        self.require_unlocked()?;
        let chain = chain::detect_chain_for_address(address)?;
        let bytes = Self::message_bytes(chain, message)?;
        Self::reject_transaction_like(chain, &bytes)?;
        let adapter = self.adapter(chain)?;
        let signature = self
            .with_deadline(adapter.sign_message(address, &bytes))
            .await?;
        Ok(json!({
            "address": address,
            "chain": chain,
            "signature": signature,
        }))
    }

    fn message_bytes(chain: ChainRef, message: &str) -> Result<Vec<u8>, HostError> {
        match chain.family() {
            ChainFamily::Evm => {
                // 0x-hex messages are signed over their decoded bytes,
                // plain strings over their UTF-8 encoding.
                if let Some(hex) = message.strip_prefix("0x") {
                    if hex.len() % 2 == 0 && hex.bytes().all(|b| b.is_ascii_hexdigit()) {
                        let bytes = (0..hex.len())
                            .step_by(2)
                            .map(|i| u8::from_str_radix(&hex[i..i + 2], 16))
                            .collect::<Result<Vec<u8>, _>>()
                            .map_err(|_| HostError::invalid_args("invalid hex message"))?;
                        return Ok(bytes);
                    }
                }
                Ok(message.as_bytes().to_vec())
            }
            ChainFamily::Solana => {
                // Raw payloads (the off-chain sentinel opens with 0xff,
                // which no UTF-8 string can carry) arrive base64-encoded.
                if let Some(encoded) = message.strip_prefix("base64:") {
                    return BASE64
                        .decode(encoded)
                        .map_err(|_| HostError::invalid_args("invalid base64 message"));
                }
                Ok(message.as_bytes().to_vec())
            }
        }
    }

    fn reject_transaction_like(chain: ChainRef, bytes: &[u8]) -> Result<(), HostError> {
        let dangerous = match chain.family() {
            // Typed-transaction envelope markers and RLP list headers.
            ChainFamily::Evm => matches!(bytes.first().copied(), Some(0x01..=0x04 | 0xc0..=0xff)),
            // A wire transaction starts with a small compact signature
            // count followed by 64-byte signatures.
            ChainFamily::Solana => {
                !bytes.starts_with(SOLANA_OFFCHAIN_SENTINEL)
                    && matches!(bytes.first().copied(), Some(0x01..=0x08))
                    && bytes.len() > 64
            }
        };
        if dangerous {
            return Err(HostError::DangerousPayload {
                message: "message is indistinguishable from a transaction envelope".to_owned(),
            });
        }
        Ok(())
    }

    /// Records a swap for approval. Routing math is delegated to the DEX at
    /// approval time; exactly one of `amount_in` / `amount_out` must be set.
    ///
    /// # Errors
    ///
    /// `InvalidArgs` unless exactly one amount field is present.
    #[allow(clippy::too_many_arguments)]
    pub async fn swap_tokens(
        &self,
        chain: &str,
        token_in: &str,
        token_out: &str,
        amount_in: Option<&str>,
        amount_out: Option<&str>,
        from: &str,
        slippage: Option<f64>,
        dex: Option<&str>,
    ) -> Result<Value, HostError> {
        let chain: ChainRef = chain.parse()?;
        let (amount, direction) = match (amount_in, amount_out) {
            (Some(amount), None) => (amount, "exact_in"),
            (None, Some(amount)) => (amount, "exact_out"),
            _ => {
                return Err(HostError::invalid_args_with(
                    "exactly one of amount_in and amount_out must be set",
                    "Pass amount_in for exact-input swaps or amount_out for exact-output swaps",
                ));
            }
        };
        token::resolve_token(chain, Some(token_in))?;
        token::resolve_token(chain, Some(token_out))?;
        crate::amount::to_base_units(amount, 18)?;
        if let Some(slippage) = slippage {
            if !(0.0..=100.0).contains(&slippage) {
                return Err(HostError::invalid_args("slippage must be between 0 and 100"));
            }
        }

        let hash = Self::host_hash(chain);
        let record = PendingTx {
            hash: hash.clone(),
            chain,
            from: from.to_owned(),
            to: dex.unwrap_or("dex-router").to_owned(),
            amount: amount.to_owned(),
            token: token_in.to_owned(),
            kind: TxKind::Swap,
            status: TxStatus::Pending,
            confirmations: 0,
            required_confirmations: self.adapter(chain)?.required_confirmations(),
            gas_fee: None,
            priority: None,
            submitted_at: UnixTimestamp::now(),
            last_checked: None,
            chain_hash: None,
        };
        self.pending.add(record)?;

        Ok(json!({
            "tx_hash": hash,
            "status": "pending",
            "chain": chain,
            "token_in": token_in,
            "token_out": token_out,
            "direction": direction,
            "amount": amount,
        }))
    }

    // --- extension passthrough ---------------------------------------------

    /// Handles an extension-originated EVM request. Only reachable from the
    /// native messaging transport.
    ///
    /// Value-transfer methods create a pending record instead of
    /// broadcasting; read-only methods pass through to the chain adapter.
    ///
    /// # Errors
    ///
    /// `InvalidArgs` for malformed parameter shapes.
    pub async fn web3_request(
        &self,
        method: &str,
        params: &Value,
        origin: &str,
    ) -> Result<Value, HostError> {
        tracing::debug!(method, origin, "web3 request");
        match method {
            "eth_sendTransaction" => self.record_web3_send(params, origin).await,
            "eth_accounts" | "eth_requestAccounts" => {
                let active = self.keystore.active_wallet(ChainRef::Ethereum).await?;
                Ok(json!(active.map(|w| vec![w.address]).unwrap_or_default()))
            }
            "personal_sign" => {
                let arr = params
                    .as_array()
                    .ok_or_else(|| HostError::invalid_args("personal_sign expects an array"))?;
                let message = arr
                    .first()
                    .and_then(Value::as_str)
                    .ok_or_else(|| HostError::MissingRequiredField {
                        field: "message".to_owned(),
                    })?;
                let address = arr
                    .get(1)
                    .and_then(Value::as_str)
                    .ok_or_else(|| HostError::MissingRequiredField {
                        field: "address".to_owned(),
                    })?;
                let result = self.sign_message(address, message).await?;
                Ok(result["signature"].clone())
            }
            _ => {
                let adapter = self.adapter(ChainRef::Ethereum)?;
                self.with_deadline(adapter.raw_request(method, params.clone()))
                    .await
            }
        }
    }

    async fn record_web3_send(&self, params: &Value, origin: &str) -> Result<Value, HostError> {
        let call = params
            .as_array()
            .and_then(|a| a.first())
            .and_then(Value::as_object)
            .ok_or_else(|| {
                HostError::invalid_args("eth_sendTransaction expects [{from, to, value, ...}]")
            })?;

        let from = call
            .get("from")
            .and_then(Value::as_str)
            .ok_or_else(|| HostError::MissingRequiredField {
                field: "from".to_owned(),
            })?;
        let to = call
            .get("to")
            .and_then(Value::as_str)
            .ok_or_else(|| HostError::MissingRequiredField {
                field: "to".to_owned(),
            })?;
        let value_wei = call
            .get("value")
            .and_then(Value::as_str)
            .map(|v| {
                u128::from_str_radix(v.trim_start_matches("0x"), 16)
                    .map_err(|_| HostError::invalid_args(format!("invalid value: {v}")))
            })
            .transpose()?
            .unwrap_or(0);
        let has_data = call
            .get("data")
            .and_then(Value::as_str)
            .is_some_and(|d| !d.is_empty() && d != "0x");

        let chain = ChainRef::Ethereum;
        let hash = Self::host_hash(chain);
        let record = PendingTx {
            hash: hash.clone(),
            chain,
            from: from.to_owned(),
            to: to.to_owned(),
            amount: crate::amount::from_base_units(value_wei, 18),
            token: chain.native_symbol().to_owned(),
            kind: if has_data {
                TxKind::ContractCall
            } else {
                TxKind::Transfer
            },
            status: TxStatus::Pending,
            confirmations: 0,
            required_confirmations: self.adapter(chain)?.required_confirmations(),
            gas_fee: None,
            priority: Some(origin.to_owned()),
            submitted_at: UnixTimestamp::now(),
            last_checked: None,
            chain_hash: None,
        };
        self.pending.add(record)?;
        tracing::info!(origin, tx_hash = %hash, "recorded extension transaction for approval");

        Ok(json!(hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::mock::MockChainAdapter;
    use crate::broadcast::Subscription;
    use crate::keystore::mock::MockKeystore;

    fn dispatcher_with(keystore: MockKeystore) -> (Dispatcher, Subscription) {
        let broadcaster = Arc::new(Broadcaster::new());
        let sub = broadcaster.subscribe("test", None);
        let pending = Arc::new(PendingTxStore::new(Arc::clone(&broadcaster)));
        let mut chains: HashMap<ChainRef, Arc<dyn ChainAdapter>> = HashMap::new();
        for chain in ChainRef::ALL {
            chains.insert(chain, Arc::new(MockChainAdapter::new(chain)));
        }
        let dispatcher = Dispatcher::new(
            Arc::new(keystore),
            chains,
            pending,
            broadcaster,
            RunMode::Test,
            Duration::from_secs(30),
        );
        (dispatcher, sub)
    }

    fn dispatcher() -> (Dispatcher, Subscription) {
        dispatcher_with(MockKeystore::unlocked())
    }

    fn evm_address() -> String {
        format!("0x{}", "12".repeat(20))
    }

    fn drain_kinds(sub: &Subscription) -> Vec<EventKind> {
        std::iter::from_fn(|| sub.try_recv()).map(|e| e.kind).collect()
    }

    #[tokio::test]
    async fn test_balance_token_normalization() {
        let (dispatcher, _sub) = dispatcher();
        let addr = evm_address();

        // BNB resolves to the BSC chain without an explicit parameter.
        let result = dispatcher.get_balance(&addr, Some("BNB"), None).await.unwrap();
        assert_eq!(result["chain"], "bsc");
        assert!(result["balance"].is_string());

        let err = dispatcher
            .get_balance(&addr, Some("UNSUPPORTED_TOKEN"), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "token_not_supported");
        assert!(err.suggestion().unwrap().contains("BNB"));
    }

    #[tokio::test]
    async fn test_transaction_status_chain_detection() {
        let (dispatcher, _sub) = dispatcher();

        let evm_hash = format!("0x{}", "ab".repeat(32));
        let result = dispatcher
            .get_transaction_status(&evm_hash, None)
            .await
            .unwrap();
        assert_eq!(result["chain"], "ethereum");

        let sol_sig = "4".repeat(88);
        let result = dispatcher
            .get_transaction_status(&sol_sig, None)
            .await
            .unwrap();
        assert_eq!(result["chain"], "solana");

        let err = dispatcher
            .get_transaction_status("0xdeadbeef", None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "unsupported_chain");
        assert!(err.suggestion().unwrap().contains("chain"));
    }

    #[tokio::test]
    async fn test_web3_request_then_approve_confirms() {
        let (dispatcher, sub) = dispatcher();

        let params = json!([{
            "from": evm_address(),
            "to": format!("0x{}", "34".repeat(20)),
            "value": "0x16345785d8a0000",
        }]);
        let result = dispatcher
            .web3_request("eth_sendTransaction", &params, "https://uniswap.org")
            .await
            .unwrap();
        let tx_hash = result.as_str().unwrap().to_owned();

        let record = dispatcher.pending_store().get(&tx_hash).unwrap();
        assert_eq!(record.status, TxStatus::Pending);
        assert_eq!(record.amount, "0.1");
        assert_eq!(drain_kinds(&sub), vec![EventKind::TransactionPending]);

        let result = dispatcher
            .approve_transaction(&tx_hash, "approve", None)
            .await
            .unwrap();
        assert_eq!(result["status"], "confirmed");

        let kinds = drain_kinds(&sub);
        assert_eq!(
            kinds,
            vec![
                EventKind::TransactionProcessing,
                EventKind::TransactionConfirmed,
                EventKind::BalanceChanged,
            ]
        );
        let record = dispatcher.pending_store().get(&tx_hash).unwrap();
        assert_eq!(record.status, TxStatus::Confirmed);
        assert!(record.chain_hash.is_some());
    }

    #[tokio::test]
    async fn test_reject_requires_reason() {
        let (dispatcher, sub) = dispatcher();
        let params = json!([{ "from": evm_address(), "to": evm_address(), "value": "0x1" }]);
        let tx_hash = dispatcher
            .web3_request("eth_sendTransaction", &params, "https://dapp.example")
            .await
            .unwrap()
            .as_str()
            .unwrap()
            .to_owned();
        let _ = drain_kinds(&sub);

        let err = dispatcher
            .approve_transaction(&tx_hash, "reject", None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("reason"));

        let err = dispatcher
            .approve_transaction(&tx_hash, "reject", Some("suspicious"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_reason");
        assert!(drain_kinds(&sub).is_empty());

        dispatcher
            .approve_transaction(&tx_hash, "reject", Some("suspicious_activity"))
            .await
            .unwrap();
        assert_eq!(drain_kinds(&sub), vec![EventKind::TransactionRejected]);
        assert_eq!(
            dispatcher.pending_store().get(&tx_hash).unwrap().status,
            TxStatus::Rejected
        );
    }

    #[tokio::test]
    async fn test_reject_batch_partial_failure() {
        let (dispatcher, sub) = dispatcher();
        let params = json!([{ "from": evm_address(), "to": evm_address(), "value": "0x1" }]);
        let tx_hash = dispatcher
            .web3_request("eth_sendTransaction", &params, "https://dapp.example")
            .await
            .unwrap()
            .as_str()
            .unwrap()
            .to_owned();
        let _ = drain_kinds(&sub);

        let ids = format!("{tx_hash},0x{}", "bb".repeat(32));
        let result = dispatcher
            .reject_transaction(&ids, "high_gas_fee", None, true)
            .await
            .unwrap();
        assert_eq!(result["total_processed"], 2);
        assert_eq!(result["total_rejected"], 1);
        assert_eq!(result["total_failed"], 1);

        let rejected = drain_kinds(&sub)
            .into_iter()
            .filter(|k| *k == EventKind::TransactionRejected)
            .count();
        assert_eq!(rejected, 1);
    }

    #[tokio::test]
    async fn test_locked_keystore_blocks_and_emits_nothing() {
        let (dispatcher, sub) = dispatcher_with(MockKeystore::new());

        let err = dispatcher
            .send_transaction("ethereum", &evm_address(), &evm_address(), "0.1", None, None, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "wallet_locked");

        let err = dispatcher
            .sign_message(&evm_address(), "hello")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "wallet_locked");

        assert!(drain_kinds(&sub).is_empty());
    }

    #[tokio::test]
    async fn test_send_transaction_records_and_broadcasts() {
        let (dispatcher, sub) = dispatcher();
        let result = dispatcher
            .send_transaction("ethereum", &evm_address(), &evm_address(), "0.5", None, None, None)
            .await
            .unwrap();
        assert_eq!(result["status"], "pending");
        let chain_hash = result["tx_hash"].as_str().unwrap();
        assert!(chain_hash.starts_with("0x"));

        let record = dispatcher.pending_store().get(chain_hash).unwrap();
        assert_eq!(record.status, TxStatus::Processing);
        assert_eq!(
            drain_kinds(&sub),
            vec![EventKind::TransactionPending, EventKind::TransactionProcessing]
        );
    }

    #[tokio::test]
    async fn test_simulate_records_nothing() {
        let (dispatcher, sub) = dispatcher();
        let result = dispatcher
            .simulate_transaction("ethereum", &evm_address(), &evm_address(), "0.5", None)
            .await
            .unwrap();
        assert_eq!(result["success"], true);
        assert!(drain_kinds(&sub).is_empty());
        let (txs, _) = dispatcher
            .pending_store()
            .query(&TxFilter::default(), Page::clamped(None, None));
        assert!(txs.is_empty());
    }

    #[tokio::test]
    async fn test_swap_requires_exactly_one_amount() {
        let (dispatcher, _sub) = dispatcher();
        let from = evm_address();

        let err = dispatcher
            .swap_tokens("ethereum", "ETH", &evm_address(), None, None, &from, None, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_args");

        let err = dispatcher
            .swap_tokens(
                "ethereum",
                "ETH",
                &evm_address(),
                Some("1"),
                Some("2"),
                &from,
                None,
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_args");

        let result = dispatcher
            .swap_tokens(
                "ethereum",
                "ETH",
                &evm_address(),
                Some("1"),
                None,
                &from,
                Some(0.5),
                None,
            )
            .await
            .unwrap();
        assert_eq!(result["status"], "pending");
        assert_eq!(result["direction"], "exact_in");
    }

    #[tokio::test]
    async fn test_sign_message_rejects_transaction_like_payloads() {
        let (dispatcher, _sub) = dispatcher();

        // RLP list header: a legacy transaction envelope.
        let err = dispatcher
            .sign_message(&evm_address(), &format!("0xf8{}", "00".repeat(40)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "dangerous_payload");

        // Plain text is fine.
        dispatcher
            .sign_message(&evm_address(), "hello world")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_solana_sentinel_payload_signs_raw_bytes() {
        let (dispatcher, _sub) = dispatcher();
        let address = bs58::encode([9u8; 32]).into_string();

        // A raw payload that is not valid UTF-8 can only arrive base64
        // encoded; the sentinel exempts it from the envelope check.
        let mut raw = SOLANA_OFFCHAIN_SENTINEL.to_vec();
        raw.extend_from_slice(&[0xff, 0x00, 0x42]);
        let message = format!("base64:{}", BASE64.encode(&raw));
        let result = dispatcher.sign_message(&address, &message).await.unwrap();
        assert!(result["signature"].is_string());

        // Same leading-byte shape without the sentinel reads as a wire
        // transaction and is refused.
        let tx_like = vec![0x01u8; 80];
        let message = format!("base64:{}", BASE64.encode(&tx_like));
        let err = dispatcher.sign_message(&address, &message).await.unwrap_err();
        assert_eq!(err.kind(), "dangerous_payload");

        let err = dispatcher
            .sign_message(&address, "base64:!!not-base64!!")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_args");
    }

    #[tokio::test]
    async fn test_solana_sentinel_marks_payload_plain_text_signs_utf8() {
        let (dispatcher, _sub) = dispatcher();
        let address = bs58::encode([9u8; 32]).into_string();

        // The sentinel is a marker, not signed content: signing
        // sentinel+payload covers the same bytes as the bare payload,
        // whether that payload arrives raw or as a plain string.
        let mut raw = SOLANA_OFFCHAIN_SENTINEL.to_vec();
        raw.extend_from_slice(b"attest");
        let sentinel_message = format!("base64:{}", BASE64.encode(&raw));
        let from_sentinel = dispatcher
            .sign_message(&address, &sentinel_message)
            .await
            .unwrap();
        let from_plain = dispatcher.sign_message(&address, "attest").await.unwrap();
        assert_eq!(from_sentinel["signature"], from_plain["signature"]);

        // A different plain string signs differently.
        let other = dispatcher.sign_message(&address, "other").await.unwrap();
        assert_ne!(from_plain["signature"], other["signature"]);
    }

    #[tokio::test]
    async fn test_export_wallet_reserved() {
        let (dispatcher, _sub) = dispatcher();
        let err = dispatcher.export_wallet().unwrap_err();
        assert_eq!(err.kind(), "not_supported");
        assert_eq!(err.code(), -32013);
    }

    #[tokio::test]
    async fn test_create_wallet_hides_mnemonic() {
        let (dispatcher, sub) = dispatcher_with(MockKeystore::new());
        let result = dispatcher
            .create_wallet("ethereum", "password123")
            .await
            .unwrap();
        assert!(result.get("mnemonic").is_none());
        assert!(result.get("address").is_some());
        assert_eq!(drain_kinds(&sub), vec![EventKind::WalletStatusChanged]);

        // Round trip: the fresh address answers balance queries.
        let address = result["address"].as_str().unwrap();
        let balance = dispatcher.get_balance(address, None, Some("ethereum")).await.unwrap();
        assert!(balance["balance"].is_string());
    }
}
