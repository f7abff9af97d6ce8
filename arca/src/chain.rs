//! Chain identification and per-chain settings.
//!
//! The host supports two chain families: EVM (Ethereum, BSC) and Solana.
//! [`ChainRef`] is the canonical runtime identifier; [`ChainSettings`] is the
//! read-only configuration an adapter is constructed from; hash-shape
//! detection maps opaque transaction hashes back to a chain when the caller
//! did not name one.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::HostError;

/// Canonical chain identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChainRef {
    /// Ethereum mainnet (chain id 1).
    Ethereum,
    /// BNB Smart Chain (chain id 56).
    Bsc,
    /// Solana mainnet-beta.
    Solana,
}

/// Chain families sharing a wire format and signature scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainFamily {
    /// secp256k1 accounts, 0x-hex addresses, JSON-RPC `eth_*` methods.
    Evm,
    /// ed25519 accounts, base58 addresses.
    Solana,
}

impl ChainRef {
    /// All chains the host knows about.
    pub const ALL: [Self; 3] = [Self::Ethereum, Self::Bsc, Self::Solana];

    /// The canonical lowercase name (`ethereum`, `bsc`, `solana`).
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ethereum => "ethereum",
            Self::Bsc => "bsc",
            Self::Solana => "solana",
        }
    }

    /// The family this chain belongs to.
    #[must_use]
    pub const fn family(&self) -> ChainFamily {
        match self {
            Self::Ethereum | Self::Bsc => ChainFamily::Evm,
            Self::Solana => ChainFamily::Solana,
        }
    }

    /// The native token symbol.
    #[must_use]
    pub const fn native_symbol(&self) -> &'static str {
        match self {
            Self::Ethereum => "ETH",
            Self::Bsc => "BNB",
            Self::Solana => "SOL",
        }
    }

    /// The protocol-level chain id for EVM chains; `0` for Solana.
    #[must_use]
    pub const fn protocol_chain_id(&self) -> u64 {
        match self {
            Self::Ethereum => 1,
            Self::Bsc => 56,
            Self::Solana => 0,
        }
    }

    /// Default confirmation count after which a transaction is reported final.
    #[must_use]
    pub const fn default_finality(&self) -> u64 {
        match self {
            Self::Ethereum => 12,
            Self::Bsc => 15,
            Self::Solana => 32,
        }
    }

    /// Finality threshold for chains the host has no specific default for.
    pub const FALLBACK_FINALITY: u64 = 6;
}

impl fmt::Display for ChainRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChainRef {
    type Err = HostError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ethereum" | "eth" => Ok(Self::Ethereum),
            "bsc" | "bnb" | "binance" => Ok(Self::Bsc),
            "solana" | "sol" => Ok(Self::Solana),
            other => Err(HostError::UnsupportedChain {
                chain: Some(other.to_owned()),
                suggestion: Some("Supported chains: ethereum, bsc, solana".to_owned()),
            }),
        }
    }
}

impl Serialize for ChainRef {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ChainRef {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Read-only per-chain configuration, fixed after load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainSettings {
    /// Ordered RPC endpoint URLs; earlier entries are preferred.
    pub rpc_urls: Vec<String>,
    /// Explorer API base URL for transaction history queries.
    #[serde(default)]
    pub explorer_api: Option<String>,
    /// Confirmations required before a transaction is reported final.
    pub required_confirmations: u64,
    /// Additional broadcast channel URLs tried in parallel with the
    /// primary pool (Solana only; ignored elsewhere).
    #[serde(default)]
    pub broadcast_channels: Vec<String>,
}

impl ChainSettings {
    /// Built-in defaults for a chain, used when the config file is absent.
    #[must_use]
    pub fn defaults_for(chain: ChainRef) -> Self {
        let rpc_urls = match chain {
            ChainRef::Ethereum => vec![
                "https://eth.llamarpc.com".to_owned(),
                "https://rpc.ankr.com/eth".to_owned(),
                "https://ethereum.publicnode.com".to_owned(),
            ],
            ChainRef::Bsc => vec![
                "https://bsc-dataseed.binance.org".to_owned(),
                "https://rpc.ankr.com/bsc".to_owned(),
                "https://bsc.publicnode.com".to_owned(),
            ],
            ChainRef::Solana => vec![
                "https://api.mainnet-beta.solana.com".to_owned(),
                "https://rpc.ankr.com/solana".to_owned(),
            ],
        };
        Self {
            rpc_urls,
            explorer_api: None,
            required_confirmations: chain.default_finality(),
            broadcast_channels: Vec::new(),
        }
    }
}

/// Infers the chain from the shape of a transaction hash.
///
/// A 66-character `0x`-prefixed hex string is an EVM hash (resolved to
/// Ethereum unless the caller names BSC); an 80–90 character base58 string
/// is a Solana signature. Anything else is ambiguous.
///
/// # Errors
///
/// Returns [`HostError::UnsupportedChain`] with a suggestion to pass an
/// explicit `chain` parameter when the shape is ambiguous.
pub fn detect_chain_for_hash(hash: &str) -> Result<ChainRef, HostError> {
    if hash.len() == 66
        && hash.starts_with("0x")
        && hash[2..].bytes().all(|b| b.is_ascii_hexdigit())
    {
        return Ok(ChainRef::Ethereum);
    }
    if (80..=90).contains(&hash.len()) && bs58::decode(hash).into_vec().is_ok() {
        return Ok(ChainRef::Solana);
    }
    Err(HostError::UnsupportedChain {
        chain: None,
        suggestion: Some(
            "Could not infer the chain from the hash shape; pass an explicit `chain` parameter"
                .to_owned(),
        ),
    })
}

/// Infers the chain family from the shape of an account address.
///
/// # Errors
///
/// Returns [`HostError::UnsupportedChain`] when the address matches neither
/// the EVM nor the Solana shape.
pub fn detect_chain_for_address(address: &str) -> Result<ChainRef, HostError> {
    if crate::token::is_evm_address(address) {
        return Ok(ChainRef::Ethereum);
    }
    if crate::token::is_solana_address(address) {
        return Ok(ChainRef::Solana);
    }
    Err(HostError::UnsupportedChain {
        chain: None,
        suggestion: Some(
            "Address matches neither an EVM nor a Solana account; pass an explicit `chain`"
                .to_owned(),
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_name_roundtrip() {
        for chain in ChainRef::ALL {
            assert_eq!(chain.as_str().parse::<ChainRef>().unwrap(), chain);
        }
    }

    #[test]
    fn test_chain_synonyms() {
        assert_eq!("ETH".parse::<ChainRef>().unwrap(), ChainRef::Ethereum);
        assert_eq!("binance".parse::<ChainRef>().unwrap(), ChainRef::Bsc);
        assert_eq!("SOL".parse::<ChainRef>().unwrap(), ChainRef::Solana);
        assert!("dogecoin".parse::<ChainRef>().is_err());
    }

    #[test]
    fn test_detect_evm_hash() {
        let hash = format!("0x{}", "ab".repeat(32));
        assert_eq!(detect_chain_for_hash(&hash).unwrap(), ChainRef::Ethereum);
    }

    #[test]
    fn test_detect_solana_signature() {
        // 88-character base58 string, the usual signature length.
        let sig = "5".repeat(88);
        assert_eq!(detect_chain_for_hash(&sig).unwrap(), ChainRef::Solana);
    }

    #[test]
    fn test_ambiguous_hash_suggests_chain_param() {
        let err = detect_chain_for_hash("0x1234").unwrap_err();
        match err {
            HostError::UnsupportedChain { suggestion, .. } => {
                assert!(suggestion.unwrap().contains("chain"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_finality_defaults() {
        assert_eq!(ChainRef::Ethereum.default_finality(), 12);
        assert_eq!(ChainRef::Bsc.default_finality(), 15);
        assert_eq!(ChainRef::Solana.default_finality(), 32);
        assert_eq!(ChainRef::FALLBACK_FINALITY, 6);
    }
}
