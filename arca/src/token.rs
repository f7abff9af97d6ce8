//! Token identifier resolution.
//!
//! A token argument is either a native symbol from a fixed table or a
//! chain-appropriate contract address. The native table accepts
//! case-insensitive synonyms; anything else must parse as a contract
//! address for the target chain or the operation fails with
//! [`HostError::TokenNotSupported`].

use std::fmt;

use crate::chain::ChainRef;
use crate::error::HostError;

/// Hint appended to token errors, listing the accepted native symbols.
pub const NATIVE_TOKEN_HINT: &str =
    "Supported native tokens: ETH, BNB, SOL; or pass a contract address for the target chain";

/// A resolved token identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenId {
    /// The chain's native token.
    Native,
    /// A token contract (ERC-20 address or SPL mint).
    Contract(String),
}

impl TokenId {
    /// True if this is the chain's native token.
    #[must_use]
    pub const fn is_native(&self) -> bool {
        matches!(self, Self::Native)
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native => f.write_str("native"),
            Self::Contract(addr) => f.write_str(addr),
        }
    }
}

/// Maps a native token symbol to its home chain, accepting synonyms.
///
/// Returns `None` for anything that is not a known native symbol.
#[must_use]
pub fn native_symbol_chain(symbol: &str) -> Option<ChainRef> {
    match symbol.to_ascii_lowercase().as_str() {
        "eth" | "ether" => Some(ChainRef::Ethereum),
        "bnb" | "binance" => Some(ChainRef::Bsc),
        "sol" | "solana" => Some(ChainRef::Solana),
        _ => None,
    }
}

/// True if the string is a well-formed 0x-prefixed 20-byte hex address.
#[must_use]
pub fn is_evm_address(s: &str) -> bool {
    s.len() == 42 && s.starts_with("0x") && s[2..].bytes().all(|b| b.is_ascii_hexdigit())
}

/// True if the string base58-decodes to a 32-byte Solana public key.
#[must_use]
pub fn is_solana_address(s: &str) -> bool {
    if !(32..=44).contains(&s.len()) {
        return false;
    }
    bs58::decode(s)
        .into_vec()
        .map(|bytes| bytes.len() == 32)
        .unwrap_or(false)
}

/// Resolves a token argument against a target chain.
///
/// An empty or absent token means the chain's native token.
///
/// # Errors
///
/// Fails with [`HostError::TokenNotSupported`] when the symbol belongs to a
/// different chain or the string is not a valid contract address for the
/// target chain's family.
pub fn resolve_token(chain: ChainRef, token: Option<&str>) -> Result<TokenId, HostError> {
    let Some(token) = token.map(str::trim).filter(|t| !t.is_empty()) else {
        return Ok(TokenId::Native);
    };

    if let Some(home) = native_symbol_chain(token) {
        if home == chain {
            return Ok(TokenId::Native);
        }
        return Err(HostError::TokenNotSupported {
            token: token.to_owned(),
            suggestion: format!(
                "{token} is the native token of {home}, not {chain}. {NATIVE_TOKEN_HINT}"
            ),
        });
    }

    let valid_contract = match chain.family() {
        crate::chain::ChainFamily::Evm => is_evm_address(token),
        crate::chain::ChainFamily::Solana => is_solana_address(token),
    };
    if valid_contract {
        return Ok(TokenId::Contract(token.to_owned()));
    }

    Err(HostError::TokenNotSupported {
        token: token.to_owned(),
        suggestion: NATIVE_TOKEN_HINT.to_owned(),
    })
}

/// Resolves a token argument to a chain when the caller did not name one.
///
/// Native symbols imply their home chain; contract addresses imply the
/// family default (Ethereum for hex, Solana for base58).
///
/// # Errors
///
/// Fails with [`HostError::TokenNotSupported`] for unrecognizable tokens.
pub fn infer_chain_for_token(token: &str) -> Result<ChainRef, HostError> {
    if let Some(home) = native_symbol_chain(token) {
        return Ok(home);
    }
    if is_evm_address(token) {
        return Ok(ChainRef::Ethereum);
    }
    if is_solana_address(token) {
        return Ok(ChainRef::Solana);
    }
    Err(HostError::TokenNotSupported {
        token: token.to_owned(),
        suggestion: NATIVE_TOKEN_HINT.to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_symbols_case_insensitive() {
        assert_eq!(native_symbol_chain("BNB"), Some(ChainRef::Bsc));
        assert_eq!(native_symbol_chain("ether"), Some(ChainRef::Ethereum));
        assert_eq!(native_symbol_chain("Sol"), Some(ChainRef::Solana));
        assert_eq!(native_symbol_chain("DOGE"), None);
    }

    #[test]
    fn test_resolve_native_on_home_chain() {
        assert_eq!(
            resolve_token(ChainRef::Bsc, Some("BNB")).unwrap(),
            TokenId::Native
        );
        assert_eq!(resolve_token(ChainRef::Ethereum, None).unwrap(), TokenId::Native);
    }

    #[test]
    fn test_resolve_native_on_wrong_chain_fails() {
        let err = resolve_token(ChainRef::Ethereum, Some("SOL")).unwrap_err();
        assert_eq!(err.kind(), "token_not_supported");
    }

    #[test]
    fn test_resolve_contract_addresses() {
        let evm = format!("0x{}", "12".repeat(20));
        assert_eq!(
            resolve_token(ChainRef::Ethereum, Some(&evm)).unwrap(),
            TokenId::Contract(evm.clone())
        );

        let mint = bs58::encode([7u8; 32]).into_string();
        assert_eq!(
            resolve_token(ChainRef::Solana, Some(&mint)).unwrap(),
            TokenId::Contract(mint)
        );
    }

    #[test]
    fn test_unknown_token_lists_natives() {
        let err = resolve_token(ChainRef::Bsc, Some("UNSUPPORTED_TOKEN")).unwrap_err();
        match err {
            HostError::TokenNotSupported { suggestion, .. } => {
                assert!(suggestion.contains("ETH"));
                assert!(suggestion.contains("BNB"));
                assert!(suggestion.contains("SOL"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_address_shapes() {
        assert!(is_evm_address("0x1234567890123456789012345678901234567890"));
        assert!(!is_evm_address("0x12345"));
        assert!(is_solana_address(&bs58::encode([1u8; 32]).into_string()));
        assert!(!is_solana_address("0x1234567890123456789012345678901234567890"));
    }
}
