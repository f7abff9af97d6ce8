//! EVM chain operations over JSON-RPC.

use std::sync::Arc;

use alloy_consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy_eips::eip2718::Encodable2718;
use alloy_primitives::{Address, B256, Bytes, Signature, TxKind, U256, eip191_hash_message, hex};
use alloy_sol_types::{SolCall, sol};
use async_trait::async_trait;
use serde_json::{Value, json};

use arca::adapter::{
    BalanceInfo, ChainAdapter, ConfirmStatus, ConfirmationInfo, GasEstimate, HistoryEntry,
    SendRequest, SimulationReport,
};
use arca::chain::{ChainRef, ChainSettings};
use arca::error::HostError;
use arca::keystore::Keystore;
use arca::rpc::{FailureClass, RpcError, RpcPool};
use arca::timestamp::UnixTimestamp;
use arca::token::TokenId;

sol! {
    function transfer(address to, uint256 amount) external returns (bool);
    function balanceOf(address owner) external view returns (uint256);
    function decimals() external view returns (uint8);
}

/// Gas limit of a plain native transfer.
const NATIVE_TRANSFER_GAS: u64 = 21_000;

/// Chain adapter for Ethereum and BSC.
pub struct EvmAdapter {
    chain: ChainRef,
    chain_id: u64,
    pool: RpcPool,
    explorer_api: Option<String>,
    keystore: Arc<dyn Keystore>,
    required_confirmations: u64,
    client: reqwest::Client,
}

impl std::fmt::Debug for EvmAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvmAdapter")
            .field("chain", &self.chain)
            .field("chain_id", &self.chain_id)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl EvmAdapter {
    /// Builds an adapter from chain settings.
    #[must_use]
    pub fn new(chain: ChainRef, settings: &ChainSettings, keystore: Arc<dyn Keystore>) -> Self {
        Self {
            chain,
            chain_id: chain.protocol_chain_id(),
            pool: RpcPool::new(settings.rpc_urls.clone()),
            explorer_api: settings.explorer_api.clone(),
            keystore,
            required_confirmations: settings.required_confirmations,
            client: reqwest::Client::new(),
        }
    }

    fn parse_address(value: &str) -> Result<Address, HostError> {
        value
            .parse()
            .map_err(|_| HostError::invalid_args(format!("invalid EVM address: {value}")))
    }

    fn parse_quantity(value: &Value, what: &str) -> Result<u128, HostError> {
        let s = value
            .as_str()
            .ok_or_else(|| HostError::internal(format!("{what}: expected a hex string")))?;
        u128::from_str_radix(s.trim_start_matches("0x"), 16)
            .map_err(|_| HostError::internal(format!("{what}: bad quantity {s}")))
    }

    fn parse_u256(value: &Value, what: &str) -> Result<U256, HostError> {
        let s = value
            .as_str()
            .ok_or_else(|| HostError::internal(format!("{what}: expected a hex string")))?;
        U256::from_str_radix(s.trim_start_matches("0x"), 16)
            .map_err(|_| HostError::internal(format!("{what}: bad quantity {s}")))
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value, HostError> {
        self.pool.call(method, params).await.map_err(HostError::from)
    }

    async fn gas_price(&self, req: &SendRequest) -> Result<u128, HostError> {
        if let Some(price) = req.gas_price {
            return Ok(price);
        }
        let result = self.rpc("eth_gasPrice", json!([])).await?;
        Self::parse_quantity(&result, "eth_gasPrice")
    }

    async fn nonce(&self, from: Address) -> Result<u64, HostError> {
        let result = self
            .rpc(
                "eth_getTransactionCount",
                json!([format!("{from:#x}"), "pending"]),
            )
            .await?;
        let nonce = Self::parse_quantity(&result, "eth_getTransactionCount")?;
        u64::try_from(nonce).map_err(|_| HostError::internal("nonce out of range"))
    }

    async fn token_decimals(&self, token: &Address) -> Result<u8, HostError> {
        let data = decimalsCall {}.abi_encode();
        let result = self
            .rpc(
                "eth_call",
                json!([
                    { "to": format!("{token:#x}"), "data": format!("0x{}", hex::encode(data)) },
                    "latest"
                ]),
            )
            .await?;
        let decimals = Self::parse_u256(&result, "decimals()")?;
        u8::try_from(decimals.to::<u64>().min(255))
            .map_err(|_| HostError::internal("token decimals out of range"))
    }

    /// Resolves the wire-level payload of a transfer: recipient, value, and
    /// calldata for either a native send or an ERC-20 `transfer`.
    async fn build_payload(
        &self,
        req: &SendRequest,
    ) -> Result<(Address, U256, Bytes, u8), HostError> {
        let to = Self::parse_address(&req.to)?;
        match &req.token {
            TokenId::Native => {
                let value = U256::from(arca::amount::to_base_units(&req.amount, 18)?);
                Ok((to, value, Bytes::new(), 18))
            }
            TokenId::Contract(contract) => {
                let contract = Self::parse_address(contract)?;
                let decimals = self.token_decimals(&contract).await?;
                let amount = U256::from(arca::amount::to_base_units(&req.amount, decimals)?);
                let data = transferCall { to, amount }.abi_encode();
                Ok((contract, U256::ZERO, Bytes::from(data), decimals))
            }
        }
    }

    async fn estimate_gas_limit(
        &self,
        from: Address,
        to: Address,
        value: U256,
        data: &Bytes,
    ) -> Result<u64, HostError> {
        if data.is_empty() {
            return Ok(NATIVE_TRANSFER_GAS);
        }
        let result = self
            .rpc(
                "eth_estimateGas",
                json!([{
                    "from": format!("{from:#x}"),
                    "to": format!("{to:#x}"),
                    "value": format!("{value:#x}"),
                    "data": format!("0x{}", hex::encode(data)),
                }]),
            )
            .await?;
        let limit = Self::parse_quantity(&result, "eth_estimateGas")?;
        u64::try_from(limit).map_err(|_| HostError::internal("gas limit out of range"))
    }

    fn map_broadcast_error(err: RpcError) -> HostError {
        match err.class {
            FailureClass::Logical => {
                let lower = err.message.to_ascii_lowercase();
                if lower.contains("insufficient funds") {
                    HostError::InsufficientBalance {
                        message: err.message,
                    }
                } else {
                    HostError::BroadcastFailed {
                        message: err.message,
                    }
                }
            }
            _ => HostError::RpcUnavailable {
                message: err.message,
            },
        }
    }
}

#[async_trait]
impl ChainAdapter for EvmAdapter {
    fn chain(&self) -> ChainRef {
        self.chain
    }

    fn required_confirmations(&self) -> u64 {
        self.required_confirmations
    }

    async fn get_balance(
        &self,
        address: &str,
        token: &TokenId,
    ) -> Result<BalanceInfo, HostError> {
        let owner = Self::parse_address(address)?;
        match token {
            TokenId::Native => {
                let result = self
                    .rpc("eth_getBalance", json!([format!("{owner:#x}"), "latest"]))
                    .await?;
                let wei = Self::parse_u256(&result, "eth_getBalance")?;
                Ok(BalanceInfo {
                    amount: format_units(wei, 18),
                    decimals: 18,
                    symbol: self.chain.native_symbol().to_owned(),
                })
            }
            TokenId::Contract(contract_str) => {
                let contract = Self::parse_address(contract_str)?;
                let decimals = self.token_decimals(&contract).await?;
                let data = balanceOfCall { owner }.abi_encode();
                let result = self
                    .rpc(
                        "eth_call",
                        json!([
                            { "to": format!("{contract:#x}"), "data": format!("0x{}", hex::encode(data)) },
                            "latest"
                        ]),
                    )
                    .await?;
                let raw = Self::parse_u256(&result, "balanceOf()")?;
                Ok(BalanceInfo {
                    amount: format_units(raw, decimals),
                    decimals,
                    symbol: contract_str.clone(),
                })
            }
        }
    }

    async fn estimate_gas(&self, req: &SendRequest) -> Result<GasEstimate, HostError> {
        let from = Self::parse_address(&req.from)?;
        let (to, value, data, _) = self.build_payload(req).await?;
        let gas_limit = match req.gas_limit {
            Some(limit) => limit,
            None => self.estimate_gas_limit(from, to, value, &data).await?,
        };
        let gas_price = self.gas_price(req).await?;
        Ok(GasEstimate {
            gas_limit: gas_limit.to_string(),
            gas_price: gas_price.to_string(),
        })
    }

    async fn send_transaction(&self, req: &SendRequest) -> Result<String, HostError> {
        let from = Self::parse_address(&req.from)?;
        let (to, value, data, _) = self.build_payload(req).await?;

        let nonce = self.nonce(from).await?;
        let gas_price = self.gas_price(req).await?;
        let gas_limit = match req.gas_limit {
            Some(limit) => limit,
            None => self.estimate_gas_limit(from, to, value, &data).await?,
        };

        let tx = TxLegacy {
            chain_id: Some(self.chain_id),
            nonce,
            gas_price,
            gas_limit,
            to: TxKind::Call(to),
            value,
            input: data,
        };

        let sighash = tx.signature_hash();
        let sig = self.keystore.sign_secp256k1(&req.from, sighash.into()).await?;
        let signature =
            Signature::from_scalars_and_parity(B256::from(sig.r), B256::from(sig.s), sig.v == 1);

        let signed = tx.into_signed(signature);
        let raw = TxEnvelope::Legacy(signed).encoded_2718();

        let result = self
            .pool
            .call(
                "eth_sendRawTransaction",
                json!([format!("0x{}", hex::encode(raw))]),
            )
            .await
            .map_err(Self::map_broadcast_error)?;

        let hash = result
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| HostError::internal("eth_sendRawTransaction returned no hash"))?;
        tracing::debug!(chain = %self.chain, nonce, tx_hash = %hash, "raw transaction accepted");
        Ok(hash)
    }

    async fn simulate(&self, req: &SendRequest) -> Result<SimulationReport, HostError> {
        let from = Self::parse_address(&req.from)?;
        let (to, value, data, _decimals) = self.build_payload(req).await?;
        let gas_price = self.gas_price(req).await?;

        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        let call_ok = self
            .rpc(
                "eth_call",
                json!([{
                    "from": format!("{from:#x}"),
                    "to": format!("{to:#x}"),
                    "value": format!("{value:#x}"),
                    "data": format!("0x{}", hex::encode(&data)),
                }, "latest"]),
            )
            .await;
        if let Err(err) = &call_ok {
            errors.push(format!("execution would revert: {err}"));
        }

        let gas_used = match self.estimate_gas_limit(from, to, value, &data).await {
            Ok(gas) => gas,
            Err(err) => {
                warnings.push(format!("gas estimation unavailable: {err}"));
                NATIVE_TRANSFER_GAS
            }
        };

        let fee = U256::from(gas_used) * U256::from(gas_price);
        let total_cost = value + fee;

        let balance_result = self
            .rpc("eth_getBalance", json!([format!("{from:#x}"), "latest"]))
            .await;
        if let Ok(balance) = balance_result {
            let balance = Self::parse_u256(&balance, "eth_getBalance")?;
            if balance < total_cost {
                errors.push("insufficient balance for amount plus fee".to_owned());
            }
        } else {
            warnings.push("balance check unavailable".to_owned());
        }

        Ok(SimulationReport {
            success: errors.is_empty(),
            gas_used: gas_used.to_string(),
            gas_price: gas_price.to_string(),
            total_cost: total_cost.to_string(),
            balance_change: format!("-{}", req.amount),
            warnings,
            errors,
        })
    }

    async fn confirm_transaction(&self, hash: &str) -> Result<ConfirmationInfo, HostError> {
        let receipt = self.rpc("eth_getTransactionReceipt", json!([hash])).await?;

        if receipt.is_null() {
            // No receipt yet: distinguish mempool-pending from unknown.
            let tx = self.rpc("eth_getTransactionByHash", json!([hash])).await?;
            let status = if tx.is_null() {
                ConfirmStatus::NotFound
            } else {
                ConfirmStatus::Pending
            };
            return Ok(ConfirmationInfo {
                status,
                confirmations: 0,
                block_number: None,
                gas_used: None,
                fee: None,
                timestamp: None,
                error: None,
            });
        }

        let block_number = Self::parse_quantity(&receipt["blockNumber"], "blockNumber")?;
        let gas_used = Self::parse_quantity(&receipt["gasUsed"], "gasUsed")?;
        let gas_price = receipt
            .get("effectiveGasPrice")
            .filter(|v| !v.is_null())
            .map(|v| Self::parse_quantity(v, "effectiveGasPrice"))
            .transpose()?
            .unwrap_or(0);
        let ok = receipt["status"].as_str() == Some("0x1");

        let head = self.rpc("eth_blockNumber", json!([])).await?;
        let head = Self::parse_quantity(&head, "eth_blockNumber")?;
        let confirmations = head.saturating_sub(block_number) + 1;

        let timestamp = match self
            .rpc(
                "eth_getBlockByNumber",
                json!([format!("0x{block_number:x}"), false]),
            )
            .await
        {
            Ok(block) if !block.is_null() => Self::parse_quantity(&block["timestamp"], "timestamp")
                .ok()
                .and_then(|t| u64::try_from(t).ok())
                .map(UnixTimestamp::from_secs),
            _ => None,
        };

        Ok(ConfirmationInfo {
            status: if ok {
                ConfirmStatus::Confirmed
            } else {
                ConfirmStatus::Failed
            },
            confirmations: u64::try_from(confirmations).unwrap_or(u64::MAX),
            block_number: u64::try_from(block_number).ok(),
            gas_used: Some(gas_used.to_string()),
            fee: Some((gas_used.saturating_mul(gas_price)).to_string()),
            timestamp,
            error: (!ok).then(|| "transaction reverted".to_owned()),
        })
    }

    async fn sign_message(&self, address: &str, message: &[u8]) -> Result<String, HostError> {
        let digest = eip191_hash_message(message);
        let sig = self.keystore.sign_secp256k1(address, digest.into()).await?;
        let mut out = Vec::with_capacity(65);
        out.extend_from_slice(&sig.r);
        out.extend_from_slice(&sig.s);
        // Electrum-style recovery id for personal_sign compatibility.
        out.push(27 + sig.v);
        Ok(format!("0x{}", hex::encode(out)))
    }

    async fn transaction_history(
        &self,
        address: &str,
        from_block: Option<u64>,
        to_block: Option<u64>,
    ) -> Result<Vec<HistoryEntry>, HostError> {
        let Some(explorer) = &self.explorer_api else {
            return Err(HostError::RpcUnavailable {
                message: format!("no explorer API configured for {}", self.chain),
            });
        };

        let url = format!(
            "{explorer}?module=account&action=txlist&address={address}&startblock={}&endblock={}&sort=desc",
            from_block.unwrap_or(0),
            to_block.map_or("latest".to_owned(), |b| b.to_string()),
        );
        let response: Value = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| HostError::RpcUnavailable {
                message: format!("explorer request failed: {e}"),
            })?
            .json()
            .await
            .map_err(|e| HostError::RpcUnavailable {
                message: format!("explorer returned bad body: {e}"),
            })?;

        let entries = response["result"].as_array().cloned().unwrap_or_default();
        let history = entries
            .iter()
            .filter_map(|entry| {
                Some(HistoryEntry {
                    hash: entry["hash"].as_str()?.to_owned(),
                    from: entry["from"].as_str().unwrap_or_default().to_owned(),
                    to: entry["to"].as_str().unwrap_or_default().to_owned(),
                    value: entry["value"].as_str().unwrap_or("0").to_owned(),
                    block_number: entry["blockNumber"]
                        .as_str()
                        .and_then(|b| b.parse().ok())
                        .unwrap_or(0),
                    timestamp: entry["timeStamp"]
                        .as_str()
                        .and_then(|t| t.parse().ok())
                        .map(UnixTimestamp::from_secs),
                    status: if entry["isError"].as_str() == Some("0") {
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

/// Formats a U256 base-unit value as a decimal string.
fn format_units(value: U256, decimals: u8) -> String {
    let scale = U256::from(10u64).pow(U256::from(decimals));
    if scale.is_zero() {
        return value.to_string();
    }
    let int_part = value / scale;
    let frac_part = value % scale;
    if frac_part.is_zero() {
        return int_part.to_string();
    }
    let frac = format!("{frac_part:0width$}", width = usize::from(decimals));
    let frac = frac.trim_end_matches('0');
    format!("{int_part}.{frac}")
}
