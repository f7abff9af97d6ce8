//! Background confirmation polling.
//!
//! A single poller walks the in-flight set (broadcast transactions that are
//! not yet final) at a fixed interval, refreshes confirmation counts, and
//! drives the remaining state-machine transitions. Per-hash event order is
//! preserved because all transitions go through the store's serialized
//! `update_status`.
//!
//! The poller is not started in test mode.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::adapter::{ChainAdapter, ConfirmStatus};
use crate::broadcast::Broadcaster;
use crate::chain::ChainRef;
use crate::event::{Event, EventKind};
use crate::pending::{PendingTxStore, TxStatus};

/// Default polling interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Polls in-flight transactions and publishes confirmation progress.
pub struct ConfirmationMonitor {
    pending: Arc<PendingTxStore>,
    chains: HashMap<ChainRef, Arc<dyn ChainAdapter>>,
    broadcaster: Arc<Broadcaster>,
    interval: Duration,
}

impl std::fmt::Debug for ConfirmationMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfirmationMonitor")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl ConfirmationMonitor {
    /// Creates a monitor with the default interval.
    #[must_use]
    pub fn new(
        pending: Arc<PendingTxStore>,
        chains: HashMap<ChainRef, Arc<dyn ChainAdapter>>,
        broadcaster: Arc<Broadcaster>,
    ) -> Self {
        Self {
            pending,
            chains,
            broadcaster,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Overrides the polling interval.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Runs until the token is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(interval = ?self.interval, "confirmation monitor started");
        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    tracing::info!("confirmation monitor stopped");
                    return;
                }
                () = tokio::time::sleep(self.interval) => {
                    self.poll_once().await;
                }
            }
        }
    }

    /// One polling pass over the in-flight set.
    pub async fn poll_once(&self) {
        for tx in self.pending.in_flight() {
            let Some(adapter) = self.chains.get(&tx.chain) else {
                continue;
            };
            let Some(chain_hash) = tx.chain_hash.as_deref() else {
                continue;
            };
            match adapter.confirm_transaction(chain_hash).await {
                Ok(info) => self.apply(&tx.hash, tx.chain, tx.status, &info),
                Err(err) => {
                    tracing::debug!(
                        chain = %tx.chain,
                        tx_hash = %chain_hash,
                        error = %err,
                        "confirmation query failed, will retry"
                    );
                    self.pending.record_check(&tx.hash, tx.confirmations);
                }
            }
        }
    }

    fn apply(
        &self,
        host_hash: &str,
        chain: ChainRef,
        current: TxStatus,
        info: &crate::adapter::ConfirmationInfo,
    ) {
        match (current, info.status) {
            (TxStatus::Processing, ConfirmStatus::Confirmed) => {
                if let Ok(tx) = self.pending.update_status(
                    host_hash,
                    TxStatus::Confirmed,
                    None,
                    Some(info.confirmations),
                ) {
                    let event = Event::with_fields(
                        EventKind::BalanceChanged,
                        Some(chain),
                        &[("address", serde_json::json!(tx.from))],
                    );
                    self.broadcaster.publish(&event);
                }
            }
            (TxStatus::Processing, ConfirmStatus::Failed) => {
                let _ = self.pending.update_status(
                    host_hash,
                    TxStatus::Failed,
                    None,
                    Some(info.confirmations),
                );
            }
            // Pending on-chain, or confirmed records still accruing
            // confirmations toward finality: refresh counters only.
            _ => self.pending.record_check(host_hash, info.confirmations),
        }
    }
}
