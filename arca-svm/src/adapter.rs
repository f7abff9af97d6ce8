//! Solana chain operations over JSON-RPC.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures_util::future::select_ok;
use serde_json::{Value, json};
use solana_hash::Hash;
use solana_instruction::{AccountMeta, Instruction};
use solana_message::Message;
use solana_pubkey::Pubkey;
use solana_signature::Signature;
use solana_transaction::Transaction;

use arca::adapter::{
    BalanceInfo, ChainAdapter, ConfirmStatus, ConfirmationInfo, GasEstimate, HistoryEntry,
    SendRequest, SimulationReport,
};
use arca::chain::{ChainRef, ChainSettings};
use arca::error::HostError;
use arca::keystore::Keystore;
use arca::rpc::RpcPool;
use arca::timestamp::UnixTimestamp;
use arca::token::TokenId;

/// Lamports per signature, the flat fee of a simple transfer.
const LAMPORTS_PER_SIGNATURE: u64 = 5_000;
/// SOL has nine decimal places.
const SOL_DECIMALS: u8 = 9;
/// The system program id is the all-zero pubkey.
const SYSTEM_PROGRAM_ID: Pubkey = Pubkey::new_from_array([0u8; 32]);

/// Chain adapter for Solana mainnet-beta.
pub struct SolanaAdapter {
    pool: RpcPool,
    broadcast_channels: Vec<String>,
    keystore: Arc<dyn Keystore>,
    required_confirmations: u64,
}

impl std::fmt::Debug for SolanaAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SolanaAdapter")
            .field("pool", &self.pool)
            .field("broadcast_channels", &self.broadcast_channels)
            .finish_non_exhaustive()
    }
}

impl SolanaAdapter {
    /// Builds an adapter from chain settings.
    #[must_use]
    pub fn new(settings: &ChainSettings, keystore: Arc<dyn Keystore>) -> Self {
        Self {
            pool: RpcPool::new(settings.rpc_urls.clone()),
            broadcast_channels: settings.broadcast_channels.clone(),
            keystore,
            required_confirmations: settings.required_confirmations,
        }
    }

    fn parse_pubkey(value: &str) -> Result<Pubkey, HostError> {
        Pubkey::from_str(value)
            .map_err(|_| HostError::invalid_args(format!("invalid Solana address: {value}")))
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value, HostError> {
        self.pool.call(method, params).await.map_err(HostError::from)
    }

    async fn latest_blockhash(&self) -> Result<Hash, HostError> {
        let result = self
            .rpc("getLatestBlockhash", json!([{ "commitment": "finalized" }]))
            .await?;
        let blockhash = result["value"]["blockhash"]
            .as_str()
            .ok_or_else(|| HostError::internal("getLatestBlockhash returned no blockhash"))?;
        Hash::from_str(blockhash)
            .map_err(|_| HostError::internal(format!("bad blockhash: {blockhash}")))
    }

    async fn token_decimals(&self, mint: &Pubkey) -> Result<u8, HostError> {
        let result = self
            .rpc("getTokenSupply", json!([mint.to_string()]))
            .await?;
        let decimals = result["value"]["decimals"]
            .as_u64()
            .ok_or_else(|| HostError::internal("getTokenSupply returned no decimals"))?;
        u8::try_from(decimals).map_err(|_| HostError::internal("token decimals out of range"))
    }

    /// Finds the owner's token account holding `mint`, largest balance
    /// first. The adapter does not create associated token accounts.
    async fn token_account(&self, owner: &Pubkey, mint: &Pubkey) -> Result<Pubkey, HostError> {
        let result = self
            .rpc(
                "getTokenAccountsByOwner",
                json!([
                    owner.to_string(),
                    { "mint": mint.to_string() },
                    { "encoding": "jsonParsed" }
                ]),
            )
            .await?;
        let accounts = result["value"].as_array().cloned().unwrap_or_default();
        let best = accounts
            .iter()
            .max_by_key(|acc| {
                acc["account"]["data"]["parsed"]["info"]["tokenAmount"]["amount"]
                    .as_str()
                    .and_then(|a| a.parse::<u128>().ok())
                    .unwrap_or(0)
            })
            .and_then(|acc| acc["pubkey"].as_str())
            .map(Self::parse_pubkey)
            .transpose()?;
        best.ok_or_else(|| HostError::BroadcastFailed {
            message: format!("{owner} holds no token account for mint {mint}"),
        })
    }

    fn system_transfer(from: &Pubkey, to: &Pubkey, lamports: u64) -> Instruction {
        // System program instruction 2 (Transfer): u32 LE discriminant
        // followed by the lamport amount.
        let mut data = Vec::with_capacity(12);
        data.extend_from_slice(&2u32.to_le_bytes());
        data.extend_from_slice(&lamports.to_le_bytes());
        Instruction {
            program_id: SYSTEM_PROGRAM_ID,
            accounts: vec![AccountMeta::new(*from, true), AccountMeta::new(*to, false)],
            data,
        }
    }

    fn spl_transfer(
        source: &Pubkey,
        destination: &Pubkey,
        owner: &Pubkey,
        amount: u64,
    ) -> Instruction {
        // SPL Token instruction 3 (Transfer): u8 discriminant followed by
        // the amount in base units.
        let mut data = Vec::with_capacity(9);
        data.push(3u8);
        data.extend_from_slice(&amount.to_le_bytes());
        Instruction {
            program_id: spl_token::id(),
            accounts: vec![
                AccountMeta::new(*source, false),
                AccountMeta::new(*destination, false),
                AccountMeta::new_readonly(*owner, true),
            ],
            data,
        }
    }

    async fn build_transfer(&self, req: &SendRequest) -> Result<(Instruction, Pubkey), HostError> {
        let from = Self::parse_pubkey(&req.from)?;
        let to = Self::parse_pubkey(&req.to)?;
        match &req.token {
            TokenId::Native => {
                let lamports = arca::amount::to_base_units(&req.amount, SOL_DECIMALS)?;
                let lamports = u64::try_from(lamports)
                    .map_err(|_| HostError::invalid_args("amount too large"))?;
                Ok((Self::system_transfer(&from, &to, lamports), from))
            }
            TokenId::Contract(mint) => {
                let mint = Self::parse_pubkey(mint)?;
                let decimals = self.token_decimals(&mint).await?;
                let amount = arca::amount::to_base_units(&req.amount, decimals)?;
                let amount = u64::try_from(amount)
                    .map_err(|_| HostError::invalid_args("amount too large"))?;
                let source = self.token_account(&from, &mint).await?;
                let destination = self.token_account(&to, &mint).await?;
                Ok((Self::spl_transfer(&source, &destination, &from, amount), from))
            }
        }
    }

    /// Broadcasts wire bytes across the primary pool and every extra
    /// channel in parallel, returning the first accepted signature.
    async fn broadcast(&self, wire: &[u8]) -> Result<String, HostError> {
        type Attempt<'a> = std::pin::Pin<
            Box<dyn std::future::Future<Output = Result<Value, arca::rpc::RpcError>> + Send + 'a>,
        >;

        let encoded = BASE64.encode(wire);
        let params = json!([encoded, { "encoding": "base64" }]);

        let mut attempts: Vec<Attempt<'_>> = Vec::with_capacity(1 + self.broadcast_channels.len());
        attempts.push(Box::pin(self.pool.call("sendTransaction", params.clone())));
        for channel in &self.broadcast_channels {
            attempts.push(Box::pin(self.pool.call_url(
                channel,
                "sendTransaction",
                params.clone(),
            )));
        }

        match select_ok(attempts).await {
            Ok((result, _remaining)) => result
                .as_str()
                .map(str::to_owned)
                .ok_or_else(|| HostError::internal("sendTransaction returned no signature")),
            Err(err) => Err(HostError::BroadcastFailed {
                message: err.to_string(),
            }),
        }
    }
}

#[async_trait]
impl ChainAdapter for SolanaAdapter {
    fn chain(&self) -> ChainRef {
        ChainRef::Solana
    }

    fn required_confirmations(&self) -> u64 {
        self.required_confirmations
    }

    async fn get_balance(
        &self,
        address: &str,
        token: &TokenId,
    ) -> Result<BalanceInfo, HostError> {
        let owner = Self::parse_pubkey(address)?;
        match token {
            TokenId::Native => {
                let result = self.rpc("getBalance", json!([owner.to_string()])).await?;
                let lamports = result["value"]
                    .as_u64()
                    .ok_or_else(|| HostError::internal("getBalance returned no value"))?;
                Ok(BalanceInfo {
                    amount: arca::amount::from_base_units(u128::from(lamports), SOL_DECIMALS),
                    decimals: SOL_DECIMALS,
                    symbol: "SOL".to_owned(),
                })
            }
            TokenId::Contract(mint_str) => {
                let mint = Self::parse_pubkey(mint_str)?;
                let result = self
                    .rpc(
                        "getTokenAccountsByOwner",
                        json!([
                            owner.to_string(),
                            { "mint": mint.to_string() },
                            { "encoding": "jsonParsed" }
                        ]),
                    )
                    .await?;
                let accounts = result["value"].as_array().cloned().unwrap_or_default();
                let mut total: u128 = 0;
                let mut decimals = 0u8;
                for account in &accounts {
                    let token_amount =
                        &account["account"]["data"]["parsed"]["info"]["tokenAmount"];
                    if let Some(amount) = token_amount["amount"]
                        .as_str()
                        .and_then(|a| a.parse::<u128>().ok())
                    {
                        total += amount;
                    }
                    if let Some(d) = token_amount["decimals"].as_u64() {
                        decimals = u8::try_from(d).unwrap_or(decimals);
                    }
                }
                Ok(BalanceInfo {
                    amount: arca::amount::from_base_units(total, decimals),
                    decimals,
                    symbol: mint_str.clone(),
                })
            }
        }
    }

    async fn estimate_gas(&self, _req: &SendRequest) -> Result<GasEstimate, HostError> {
        Ok(GasEstimate {
            gas_limit: "1".to_owned(),
            gas_price: LAMPORTS_PER_SIGNATURE.to_string(),
        })
    }

    async fn send_transaction(&self, req: &SendRequest) -> Result<String, HostError> {
        let (instruction, payer) = self.build_transfer(req).await?;
        let blockhash = self.latest_blockhash().await?;

        let message = Message::new_with_blockhash(&[instruction], Some(&payer), &blockhash);
        let serialized = message.serialize();
        let sig_bytes = self.keystore.sign_ed25519(&req.from, &serialized).await?;

        let transaction = Transaction {
            signatures: vec![Signature::from(sig_bytes)],
            message,
        };
        let wire = bincode::serialize(&transaction)
            .map_err(|e| HostError::internal(format!("transaction serialization failed: {e}")))?;

        let signature = self.broadcast(&wire).await?;
        tracing::debug!(tx_hash = %signature, "transaction accepted");
        Ok(signature)
    }

    async fn simulate(&self, req: &SendRequest) -> Result<SimulationReport, HostError> {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        let lamports = match &req.token {
            TokenId::Native => {
                u64::try_from(arca::amount::to_base_units(&req.amount, SOL_DECIMALS)?)
                    .map_err(|_| HostError::invalid_args("amount too large"))?
            }
            TokenId::Contract(_) => 0,
        };
        let fee = LAMPORTS_PER_SIGNATURE;

        let owner = Self::parse_pubkey(&req.from)?;
        match self.rpc("getBalance", json!([owner.to_string()])).await {
            Ok(result) => {
                let balance = result["value"].as_u64().unwrap_or(0);
                if balance < lamports + fee {
                    errors.push("insufficient balance for amount plus fee".to_owned());
                }
            }
            Err(err) => warnings.push(format!("balance check unavailable: {err}")),
        }

        Ok(SimulationReport {
            success: errors.is_empty(),
            gas_used: "1".to_owned(),
            gas_price: fee.to_string(),
            total_cost: (u128::from(lamports) + u128::from(fee)).to_string(),
            balance_change: format!("-{}", req.amount),
            warnings,
            errors,
        })
    }

    async fn confirm_transaction(&self, hash: &str) -> Result<ConfirmationInfo, HostError> {
        let result = self
            .rpc(
                "getSignatureStatuses",
                json!([[hash], { "searchTransactionHistory": true }]),
            )
            .await?;
        let status = &result["value"][0];

        if status.is_null() {
            return Ok(ConfirmationInfo {
                status: ConfirmStatus::NotFound,
                confirmations: 0,
                block_number: None,
                gas_used: None,
                fee: None,
                timestamp: None,
                error: None,
            });
        }

        let slot = status["slot"].as_u64();
        let failed = !status["err"].is_null();
        let confirmation_status = status["confirmationStatus"].as_str().unwrap_or("processed");
        // A null confirmation count means the transaction is rooted.
        let confirmations = status["confirmations"]
            .as_u64()
            .unwrap_or(self.required_confirmations.max(32));

        let timestamp = match slot {
            Some(slot) => self
                .rpc("getBlockTime", json!([slot]))
                .await
                .ok()
                .and_then(|t| t.as_u64())
                .map(UnixTimestamp::from_secs),
            None => None,
        };

        let chain_status = if failed {
            ConfirmStatus::Failed
        } else if confirmation_status == "processed" {
            ConfirmStatus::Pending
        } else {
            ConfirmStatus::Confirmed
        };

        Ok(ConfirmationInfo {
            status: chain_status,
            confirmations,
            block_number: slot,
            gas_used: Some("1".to_owned()),
            fee: Some(LAMPORTS_PER_SIGNATURE.to_string()),
            timestamp,
            error: failed.then(|| status["err"].to_string()),
        })
    }

    async fn sign_message(&self, address: &str, message: &[u8]) -> Result<String, HostError> {
        // The off-chain sentinel marks a raw-byte payload: strip the
        // marker and sign what follows verbatim. Anything else is the
        // UTF-8 encoding of a plain string, signed as-is.
        let payload = message
            .strip_prefix(arca::adapter::SOLANA_OFFCHAIN_SENTINEL)
            .unwrap_or(message);
        let signature = self.keystore.sign_ed25519(address, payload).await?;
        Ok(bs58::encode(signature).into_string())
    }

    async fn transaction_history(
        &self,
        address: &str,
        from_block: Option<u64>,
        to_block: Option<u64>,
    ) -> Result<Vec<HistoryEntry>, HostError> {
        let owner = Self::parse_pubkey(address)?;
        let result = self
            .rpc(
                "getSignaturesForAddress",
                json!([owner.to_string(), { "limit": 100 }]),
            )
            .await?;
        let entries = result.as_array().cloned().unwrap_or_default();
        let history = entries
            .iter()
            .filter_map(|entry| {
                let slot = entry["slot"].as_u64()?;
                if from_block.is_some_and(|min| slot < min)
                    || to_block.is_some_and(|max| slot > max)
                {
                    return None;
                }
                Some(HistoryEntry {
                    hash: entry["signature"].as_str()?.to_owned(),
                    from: address.to_owned(),
                    to: String::new(),
                    value: "0".to_owned(),
                    block_number: slot,
                    timestamp: entry["blockTime"].as_u64().map(UnixTimestamp::from_secs),
                    status: if entry["err"].is_null() {
                        "confirmed".to_owned()
                    } else {
                        "failed".to_owned()
                    },
                })
            })
            .collect();
        Ok(history)
    }

    async fn raw_request(&self, method: &str, params: Value) -> Result<Value, HostError> {
        self.rpc(method, params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arca::keystore::mock::MockKeystore;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn rpc_result(value: Value) -> ResponseTemplate {
        ResponseTemplate::new(200)
            .set_body_json(json!({ "jsonrpc": "2.0", "id": 1, "result": value }))
    }

    fn adapter_for(server: &MockServer, channels: Vec<String>) -> SolanaAdapter {
        let settings = ChainSettings {
            rpc_urls: vec![server.uri()],
            explorer_api: None,
            required_confirmations: 32,
            broadcast_channels: channels,
        };
        SolanaAdapter::new(&settings, Arc::new(MockKeystore::unlocked()))
    }

    fn pubkey(byte: u8) -> String {
        bs58::encode([byte; 32]).into_string()
    }

    #[test]
    fn test_system_transfer_encoding() {
        let from = Pubkey::new_from_array([1u8; 32]);
        let to = Pubkey::new_from_array([2u8; 32]);
        let ix = SolanaAdapter::system_transfer(&from, &to, 1_000_000);

        assert_eq!(ix.program_id, SYSTEM_PROGRAM_ID);
        assert_eq!(ix.accounts.len(), 2);
        assert!(ix.accounts[0].is_signer);
        assert!(!ix.accounts[1].is_signer);
        // u32 discriminant 2, then 1_000_000 LE.
        assert_eq!(&ix.data[..4], &[2, 0, 0, 0]);
        assert_eq!(&ix.data[4..], &1_000_000u64.to_le_bytes());
    }

    #[test]
    fn test_spl_transfer_encoding() {
        let source = Pubkey::new_from_array([1u8; 32]);
        let dest = Pubkey::new_from_array([2u8; 32]);
        let owner = Pubkey::new_from_array([3u8; 32]);
        let ix = SolanaAdapter::spl_transfer(&source, &dest, &owner, 500);

        assert_eq!(ix.program_id, spl_token::id());
        assert_eq!(ix.data[0], 3);
        assert_eq!(&ix.data[1..], &500u64.to_le_bytes());
        assert!(ix.accounts[2].is_signer);
    }

    #[tokio::test]
    async fn test_native_balance() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": "getBalance" })))
            .respond_with(rpc_result(json!({ "context": {}, "value": 2_500_000_000u64 })))
            .mount(&server)
            .await;

        let adapter = adapter_for(&server, Vec::new());
        let balance = adapter
            .get_balance(&pubkey(7), &TokenId::Native)
            .await
            .unwrap();
        assert_eq!(balance.amount, "2.5");
        assert_eq!(balance.symbol, "SOL");
    }

    #[tokio::test]
    async fn test_confirm_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": "getSignatureStatuses" })))
            .respond_with(rpc_result(json!({ "context": {}, "value": [null] })))
            .mount(&server)
            .await;

        let adapter = adapter_for(&server, Vec::new());
        let info = adapter.confirm_transaction(&"5".repeat(88)).await.unwrap();
        assert_eq!(info.status, ConfirmStatus::NotFound);
    }

    #[tokio::test]
    async fn test_broadcast_uses_first_accepting_channel() {
        let primary = MockServer::start().await;
        let relayer = MockServer::start().await;
        // Primary refuses; the relayer accepts.
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&primary)
            .await;
        Mock::given(method("POST"))
            .respond_with(rpc_result(json!("5".repeat(88))))
            .mount(&relayer)
            .await;

        let adapter = adapter_for(&primary, vec![relayer.uri()]);
        let signature = adapter.broadcast(b"wire-bytes").await.unwrap();
        assert_eq!(signature, "5".repeat(88));
    }

    #[tokio::test]
    async fn test_sign_message_strips_offchain_sentinel() {
        let server = MockServer::start().await;
        let adapter = adapter_for(&server, Vec::new());
        let address = pubkey(7);

        // The mock keystore's ed25519 signature is a function of the
        // exact bytes handed to it, so equal signatures mean equal
        // signed payloads.
        let mut raw = arca::adapter::SOLANA_OFFCHAIN_SENTINEL.to_vec();
        raw.extend_from_slice(b"payload");
        let with_sentinel = adapter.sign_message(&address, &raw).await.unwrap();
        let bare = adapter.sign_message(&address, b"payload").await.unwrap();
        assert_eq!(with_sentinel, bare);

        let other = adapter.sign_message(&address, b"different").await.unwrap();
        assert_ne!(with_sentinel, other);
    }

    #[tokio::test]
    async fn test_broadcast_fails_when_all_channels_refuse() {
        let primary = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&primary)
            .await;

        let adapter = adapter_for(&primary, Vec::new());
        let err = adapter.broadcast(b"wire-bytes").await.unwrap_err();
        assert_eq!(err.kind(), "broadcast_failed");
    }
}
