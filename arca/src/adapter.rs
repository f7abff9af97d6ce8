//! Chain-adapter contract.
//!
//! One adapter exists per configured chain. Adapters own their RPC pools
//! and never see key material: signing goes through the
//! [keystore](crate::keystore), which hands back detached signatures.
//!
//! [`mock::MockChainAdapter`] is the deterministic test-mode implementation
//! selected by `RUN_MODE=test`, letting the pending-transaction state
//! machine run without live RPC.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::chain::ChainRef;
use crate::error::HostError;
use crate::timestamp::UnixTimestamp;
use crate::token::TokenId;

/// Sentinel prefix marking a Solana off-chain payload.
///
/// A message whose bytes open with this marker is a raw-byte payload: the
/// adapter strips the marker and signs the remaining bytes verbatim.
/// Anything else reaching [`ChainAdapter::sign_message`] is the UTF-8
/// encoding of a plain string. The leading `0xff` byte is never valid
/// UTF-8, so sentinel payloads cannot be confused with text.
pub const SOLANA_OFFCHAIN_SENTINEL: &[u8] = b"\xffsolana offchain";

/// A token balance.
#[derive(Debug, Clone, Serialize)]
pub struct BalanceInfo {
    /// Decimal-string amount in whole tokens.
    pub amount: String,
    /// Token decimals.
    pub decimals: u8,
    /// Display symbol.
    pub symbol: String,
}

/// A gas estimate.
#[derive(Debug, Clone, Serialize)]
pub struct GasEstimate {
    /// Gas limit (EVM) or compute budget proxy (Solana), stringified.
    pub gas_limit: String,
    /// Gas price in native base units, stringified.
    pub gas_price: String,
}

/// Parameters of an outbound transfer.
#[derive(Debug, Clone)]
pub struct SendRequest {
    /// Sender address; its key must be held by the keystore.
    pub from: String,
    /// Recipient address.
    pub to: String,
    /// Decimal-string amount.
    pub amount: String,
    /// Resolved token identifier.
    pub token: TokenId,
    /// Caller-supplied gas limit override.
    pub gas_limit: Option<u64>,
    /// Caller-supplied gas price override, in native base units.
    pub gas_price: Option<u128>,
}

/// Result of a dry-run. Simulation never broadcasts.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    /// Whether execution would succeed.
    pub success: bool,
    /// Gas the execution would consume, stringified.
    pub gas_used: String,
    /// Gas price assumed, stringified.
    pub gas_price: String,
    /// Amount plus fee, stringified in native base units.
    pub total_cost: String,
    /// Net balance change for the sender, decimal string.
    pub balance_change: String,
    /// Non-fatal findings.
    pub warnings: Vec<String>,
    /// Fatal findings.
    pub errors: Vec<String>,
}

/// On-chain status of a transaction as reported by the RPC layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmStatus {
    /// Known to the chain but not yet in a block.
    Pending,
    /// Included and successful.
    Confirmed,
    /// Included but reverted or errored.
    Failed,
    /// Unknown to every queried endpoint. Not an error.
    NotFound,
}

/// Confirmation details for a transaction hash.
#[derive(Debug, Clone, Serialize)]
pub struct ConfirmationInfo {
    /// On-chain status.
    pub status: ConfirmStatus,
    /// Confirmations observed.
    pub confirmations: u64,
    /// Block number or slot, when included.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    /// Gas used, when included.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_used: Option<String>,
    /// Fee paid in native base units, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fee: Option<String>,
    /// Block timestamp, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<UnixTimestamp>,
    /// Failure detail for failed transactions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One entry of an address's transaction history.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    /// Transaction hash.
    pub hash: String,
    /// Sender.
    pub from: String,
    /// Recipient.
    pub to: String,
    /// Transferred value, decimal string.
    pub value: String,
    /// Block number or slot.
    pub block_number: u64,
    /// Block timestamp, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<UnixTimestamp>,
    /// Outcome as reported by the source.
    pub status: String,
}

/// Per-chain operations the dispatcher routes to.
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    /// The chain this adapter serves.
    fn chain(&self) -> ChainRef;

    /// Confirmations required before a transaction is reported final.
    fn required_confirmations(&self) -> u64;

    /// Queries a balance.
    async fn get_balance(&self, address: &str, token: &TokenId)
    -> Result<BalanceInfo, HostError>;

    /// Estimates fees for a transfer.
    async fn estimate_gas(&self, req: &SendRequest) -> Result<GasEstimate, HostError>;

    /// Builds, signs, and broadcasts a transfer. Returns the on-chain hash.
    async fn send_transaction(&self, req: &SendRequest) -> Result<String, HostError>;

    /// Dry-runs a transfer without broadcasting.
    async fn simulate(&self, req: &SendRequest) -> Result<SimulationReport, HostError>;

    /// Queries confirmation state for a hash.
    async fn confirm_transaction(&self, hash: &str) -> Result<ConfirmationInfo, HostError>;

    /// Signs a message with the address's key. Returns the signature in the
    /// chain's customary encoding (0x-hex for EVM, base58 for Solana).
    async fn sign_message(&self, address: &str, message: &[u8]) -> Result<String, HostError>;

    /// Fetches transaction history for an address from the explorer API.
    async fn transaction_history(
        &self,
        address: &str,
        from_block: Option<u64>,
        to_block: Option<u64>,
    ) -> Result<Vec<HistoryEntry>, HostError>;

    /// Raw JSON-RPC passthrough for extension-originated requests.
    async fn raw_request(&self, method: &str, params: Value) -> Result<Value, HostError>;
}

#[async_trait]
impl<T: ChainAdapter> ChainAdapter for Arc<T> {
    fn chain(&self) -> ChainRef {
        (**self).chain()
    }
    fn required_confirmations(&self) -> u64 {
        (**self).required_confirmations()
    }
    async fn get_balance(&self, address: &str, token: &TokenId)
    -> Result<BalanceInfo, HostError> {
        (**self).get_balance(address, token).await
    }
    async fn estimate_gas(&self, req: &SendRequest) -> Result<GasEstimate, HostError> {
        (**self).estimate_gas(req).await
    }
    async fn send_transaction(&self, req: &SendRequest) -> Result<String, HostError> {
        (**self).send_transaction(req).await
    }
    async fn simulate(&self, req: &SendRequest) -> Result<SimulationReport, HostError> {
        (**self).simulate(req).await
    }
    async fn confirm_transaction(&self, hash: &str) -> Result<ConfirmationInfo, HostError> {
        (**self).confirm_transaction(hash).await
    }
    async fn sign_message(&self, address: &str, message: &[u8]) -> Result<String, HostError> {
        (**self).sign_message(address, message).await
    }
    async fn transaction_history(
        &self,
        address: &str,
        from_block: Option<u64>,
        to_block: Option<u64>,
    ) -> Result<Vec<HistoryEntry>, HostError> {
        (**self)
            .transaction_history(address, from_block, to_block)
            .await
    }
    async fn raw_request(&self, method: &str, params: Value) -> Result<Value, HostError> {
        (**self).raw_request(method, params).await
    }
}

pub mod mock {
    //! Deterministic adapter used in test mode.

    use std::sync::atomic::{AtomicU64, Ordering};

    use serde_json::json;

    use super::{
        BalanceInfo, ChainAdapter, ConfirmStatus, ConfirmationInfo, GasEstimate, HistoryEntry,
        SOLANA_OFFCHAIN_SENTINEL, SendRequest, SimulationReport,
    };
    use crate::chain::{ChainFamily, ChainRef};
    use crate::error::HostError;
    use crate::timestamp::UnixTimestamp;
    use crate::token::TokenId;
    use async_trait::async_trait;

    /// A chain adapter with canned, deterministic responses.
    ///
    /// Broadcast hashes are derived from a per-adapter counter so tests can
    /// predict them; every broadcast is instantly confirmable with the
    /// chain's full finality.
    #[derive(Debug)]
    pub struct MockChainAdapter {
        chain: ChainRef,
        counter: AtomicU64,
    }

    impl MockChainAdapter {
        /// Creates a mock adapter for the given chain.
        #[must_use]
        pub fn new(chain: ChainRef) -> Self {
            Self {
                chain,
                counter: AtomicU64::new(1),
            }
        }

        fn next_hash(&self) -> String {
            let n = self.counter.fetch_add(1, Ordering::Relaxed);
            match self.chain.family() {
                ChainFamily::Evm => format!("0x{n:064x}"),
                ChainFamily::Solana => {
                    let mut bytes = [0u8; 64];
                    bytes[..8].copy_from_slice(&n.to_be_bytes());
                    bs58::encode(bytes).into_string()
                }
            }
        }
    }

    #[async_trait]
    impl ChainAdapter for MockChainAdapter {
        fn chain(&self) -> ChainRef {
            self.chain
        }

        fn required_confirmations(&self) -> u64 {
            self.chain.default_finality()
        }

        async fn get_balance(
            &self,
            _address: &str,
            token: &TokenId,
        ) -> Result<BalanceInfo, HostError> {
            Ok(BalanceInfo {
                amount: "1".to_owned(),
                decimals: if self.chain == ChainRef::Solana { 9 } else { 18 },
                symbol: match token {
                    TokenId::Native => self.chain.native_symbol().to_owned(),
                    TokenId::Contract(addr) => addr.clone(),
                },
            })
        }

        async fn estimate_gas(&self, _req: &SendRequest) -> Result<GasEstimate, HostError> {
            Ok(GasEstimate {
                gas_limit: "21000".to_owned(),
                gas_price: "1000000000".to_owned(),
            })
        }

        async fn send_transaction(&self, req: &SendRequest) -> Result<String, HostError> {
            crate::amount::to_base_units(&req.amount, 18)?;
            Ok(self.next_hash())
        }

        async fn simulate(&self, req: &SendRequest) -> Result<SimulationReport, HostError> {
            crate::amount::to_base_units(&req.amount, 18)?;
            Ok(SimulationReport {
                success: true,
                gas_used: "21000".to_owned(),
                gas_price: "1000000000".to_owned(),
                total_cost: "21000000000000".to_owned(),
                balance_change: format!("-{}", req.amount),
                warnings: Vec::new(),
                errors: Vec::new(),
            })
        }

        async fn confirm_transaction(&self, _hash: &str) -> Result<ConfirmationInfo, HostError> {
            Ok(ConfirmationInfo {
                status: ConfirmStatus::Confirmed,
                confirmations: self.required_confirmations(),
                block_number: Some(1),
                gas_used: Some("21000".to_owned()),
                fee: Some("21000000000000".to_owned()),
                timestamp: Some(UnixTimestamp::now()),
                error: None,
            })
        }

        async fn sign_message(&self, _address: &str, message: &[u8]) -> Result<String, HostError> {
            match self.chain.family() {
                ChainFamily::Evm => Ok(format!("0x{}", "ab".repeat(65))),
                ChainFamily::Solana => {
                    // Mirrors the live adapter: sentinel payloads are
                    // signed over the bytes after the marker.
                    let payload = message
                        .strip_prefix(SOLANA_OFFCHAIN_SENTINEL)
                        .unwrap_or(message);
                    let mut bytes = [0u8; 64];
                    let n = payload.len().min(64);
                    bytes[..n].copy_from_slice(&payload[..n]);
                    Ok(bs58::encode(bytes).into_string())
                }
            }
        }

        async fn transaction_history(
            &self,
            address: &str,
            _from_block: Option<u64>,
            _to_block: Option<u64>,
        ) -> Result<Vec<HistoryEntry>, HostError> {
            Ok(vec![HistoryEntry {
                hash: self.next_hash(),
                from: address.to_owned(),
                to: address.to_owned(),
                value: "0".to_owned(),
                block_number: 1,
                timestamp: Some(UnixTimestamp::now()),
                status: "confirmed".to_owned(),
            }])
        }

        async fn raw_request(&self, method: &str, _params: serde_json::Value)
        -> Result<serde_json::Value, HostError> {
            match method {
                "eth_chainId" => Ok(json!(format!("0x{:x}", self.chain.protocol_chain_id()))),
                "eth_blockNumber" => Ok(json!("0x1")),
                _ => Ok(json!(null)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockChainAdapter;
    use super::*;

    #[tokio::test]
    async fn test_mock_hashes_match_chain_shape() {
        let evm = MockChainAdapter::new(ChainRef::Ethereum);
        let req = SendRequest {
            from: "0xfrom".into(),
            to: "0xto".into(),
            amount: "0.1".into(),
            token: TokenId::Native,
            gas_limit: None,
            gas_price: None,
        };
        let hash = evm.send_transaction(&req).await.unwrap();
        assert_eq!(hash.len(), 66);
        assert!(hash.starts_with("0x"));

        let sol = MockChainAdapter::new(ChainRef::Solana);
        let sig = sol.send_transaction(&req).await.unwrap();
        assert!((80..=90).contains(&sig.len()));
    }

    #[tokio::test]
    async fn test_mock_confirms_with_full_finality() {
        let adapter = MockChainAdapter::new(ChainRef::Solana);
        let info = adapter.confirm_transaction("sig").await.unwrap();
        assert_eq!(info.status, ConfirmStatus::Confirmed);
        assert_eq!(info.confirmations, 32);
    }
}
