//! Error taxonomy for wallet-host operations.
//!
//! Every failure that can cross a transport boundary is a [`HostError`].
//! Each variant maps to a stable negative integer code reused by both
//! transports: the Native Messaging side serializes it as a JSON-RPC
//! `error.code`, the MCP side embeds it in the structured error body of an
//! `isError` tool result.
//!
//! Code ranges are fixed by the wire contract with the browser extension:
//! `-32001..-32005` for import failures, `-32011..-32015` for export,
//! `-32031..-32036` for send, `-32602` for invalid parameters. Kinds outside
//! those ranges use the `-3207x` host range.

use serde::Serialize;

/// Invalid JSON-RPC parameters (reserved generic code).
pub const CODE_INVALID_PARAMS: i32 = -32602;
/// JSON-RPC internal error.
pub const CODE_INTERNAL: i32 = -32603;

/// Errors surfaced by wallet-host operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum HostError {
    /// Arguments failed validation against the operation's schema.
    #[error("Invalid arguments: {message}")]
    InvalidArgs {
        /// What was wrong with the arguments.
        message: String,
        /// Optional hint on how to fix the call.
        suggestion: Option<String>,
    },

    /// A required field was absent from the arguments.
    #[error("Missing required field: {field}")]
    MissingRequiredField {
        /// Name of the missing field.
        field: String,
    },

    /// The token identifier matches neither a native symbol nor a valid
    /// contract address for the target chain.
    #[error("Token not supported: {token}")]
    TokenNotSupported {
        /// The identifier as supplied by the caller.
        token: String,
        /// Lists the accepted native tokens.
        suggestion: String,
    },

    /// The chain could not be resolved from the arguments.
    #[error("Unsupported chain{}", .chain.as_ref().map(|c| format!(": {c}")).unwrap_or_default())]
    UnsupportedChain {
        /// The chain name or detected value, when one was supplied.
        chain: Option<String>,
        /// Hint, e.g. to pass an explicit `chain` parameter.
        suggestion: Option<String>,
    },

    /// The keystore is locked and the operation needs a key.
    #[error("Wallet is locked; unlock it first")]
    WalletLocked,

    /// No wallet matches the given address or id.
    #[error("Wallet not found: {address}")]
    WalletNotFound {
        /// Address or wallet id that failed to resolve.
        address: String,
    },

    /// The source account cannot cover amount plus fees.
    #[error("Insufficient balance: {message}")]
    InsufficientBalance {
        /// Detail from the chain, when available.
        message: String,
    },

    /// The mnemonic failed BIP-39 validation.
    #[error("Invalid mnemonic phrase")]
    InvalidMnemonic,

    /// The password is below the configured strength threshold.
    #[error("Password too weak: at least {min_len} characters required")]
    WeakPassword {
        /// Minimum accepted password length.
        min_len: usize,
    },

    /// A wallet with the same chain and address already exists.
    #[error("Wallet already exists for {chain} address {address}")]
    DuplicateWallet {
        /// Chain of the duplicate.
        chain: String,
        /// Address of the duplicate.
        address: String,
    },

    /// Every RPC endpoint in the pool failed.
    #[error("RPC unavailable: {message}")]
    RpcUnavailable {
        /// Aggregated failure detail.
        message: String,
    },

    /// The transaction could not be accepted by any broadcast channel.
    #[error("Broadcast failed: {message}")]
    BroadcastFailed {
        /// Detail from the last broadcast attempt.
        message: String,
    },

    /// The request deadline fired before the operation completed.
    #[error("Operation timed out after {seconds}s")]
    Timeout {
        /// Deadline that was exceeded, in seconds.
        seconds: u64,
    },

    /// The referenced entity does not exist.
    #[error("Not found: {what}")]
    NotFound {
        /// Description of what was looked up.
        what: String,
    },

    /// A rejection reason outside the allowed set was supplied.
    #[error("Invalid rejection reason: {reason}")]
    InvalidReason {
        /// The reason as supplied.
        reason: String,
        /// The allowed reasons, comma separated.
        allowed: String,
    },

    /// The payload to sign is indistinguishable from a transaction envelope.
    #[error("Dangerous payload: {message}")]
    DangerousPayload {
        /// Why the payload was rejected.
        message: String,
    },

    /// Keystore blob encryption or decryption failed.
    #[error("Keystore encryption failure: {message}")]
    StorageEncryption {
        /// Detail from the cipher or KDF layer.
        message: String,
    },

    /// The method surface is reserved but its semantics are not implemented.
    #[error("Not supported yet: {method}")]
    NotSupported {
        /// The reserved method name.
        method: String,
    },

    /// Unclassified internal failure.
    #[error("Internal error: {message}")]
    Internal {
        /// Detail for diagnostics.
        message: String,
    },
}

impl HostError {
    /// Shorthand for an [`HostError::InvalidArgs`] without a suggestion.
    pub fn invalid_args(message: impl Into<String>) -> Self {
        Self::InvalidArgs {
            message: message.into(),
            suggestion: None,
        }
    }

    /// Shorthand for an [`HostError::InvalidArgs`] carrying a hint.
    pub fn invalid_args_with(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::InvalidArgs {
            message: message.into(),
            suggestion: Some(suggestion.into()),
        }
    }

    /// Shorthand for an [`HostError::Internal`].
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// The stable wire code for this error.
    #[must_use]
    pub const fn code(&self) -> i32 {
        match self {
            Self::InvalidMnemonic => -32001,
            Self::WeakPassword { .. } => -32002,
            Self::UnsupportedChain { .. } => -32003,
            Self::DuplicateWallet { .. } => -32004,
            Self::StorageEncryption { .. } => -32005,
            // Export surface is reserved; unimplemented methods answer with
            // the export-type code.
            Self::NotSupported { .. } => -32013,
            Self::WalletLocked => -32031,
            Self::InsufficientBalance { .. } => -32032,
            Self::BroadcastFailed { .. } => -32036,
            Self::InvalidArgs { .. } | Self::MissingRequiredField { .. } => CODE_INVALID_PARAMS,
            Self::TokenNotSupported { .. } => -32071,
            Self::DangerousPayload { .. } => -32072,
            Self::NotFound { .. } => -32073,
            Self::Timeout { .. } => -32074,
            Self::RpcUnavailable { .. } => -32075,
            Self::WalletNotFound { .. } => -32076,
            Self::InvalidReason { .. } => -32077,
            Self::Internal { .. } => CODE_INTERNAL,
        }
    }

    /// A machine-readable kind slug, stable across releases.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidArgs { .. } => "invalid_args",
            Self::MissingRequiredField { .. } => "missing_required_field",
            Self::TokenNotSupported { .. } => "token_not_supported",
            Self::UnsupportedChain { .. } => "unsupported_chain",
            Self::WalletLocked => "wallet_locked",
            Self::WalletNotFound { .. } => "wallet_not_found",
            Self::InsufficientBalance { .. } => "insufficient_balance",
            Self::InvalidMnemonic => "invalid_mnemonic",
            Self::WeakPassword { .. } => "weak_password",
            Self::DuplicateWallet { .. } => "duplicate_wallet",
            Self::RpcUnavailable { .. } => "rpc_unavailable",
            Self::BroadcastFailed { .. } => "broadcast_failed",
            Self::Timeout { .. } => "timeout",
            Self::NotFound { .. } => "not_found",
            Self::InvalidReason { .. } => "invalid_reason",
            Self::DangerousPayload { .. } => "dangerous_payload",
            Self::StorageEncryption { .. } => "storage_encryption",
            Self::NotSupported { .. } => "not_supported",
            Self::Internal { .. } => "internal",
        }
    }

    /// The hint attached to this error, if any.
    #[must_use]
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::InvalidArgs { suggestion, .. } | Self::UnsupportedChain { suggestion, .. } => {
                suggestion.clone()
            }
            Self::TokenNotSupported { suggestion, .. } => Some(suggestion.clone()),
            Self::InvalidReason { allowed, .. } => {
                Some(format!("Allowed reasons: {allowed}"))
            }
            Self::WalletLocked => Some("Call unlock_wallet with your password first".to_owned()),
            _ => None,
        }
    }

    /// Serializes this error as the structured body used by MCP tool results.
    #[must_use]
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code(),
            kind: self.kind(),
            message: self.to_string(),
            suggestion: self.suggestion(),
        }
    }
}

/// Structured error body carried in MCP tool results.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    /// Stable wire code (same value as the JSON-RPC `error.code`).
    pub code: i32,
    /// Machine-readable kind slug.
    pub kind: &'static str,
    /// Human-readable message.
    pub message: String,
    /// Optional recovery hint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_import_codes_are_stable() {
        assert_eq!(HostError::InvalidMnemonic.code(), -32001);
        assert_eq!(HostError::WeakPassword { min_len: 8 }.code(), -32002);
        assert_eq!(
            HostError::UnsupportedChain {
                chain: Some("dogecoin".into()),
                suggestion: None
            }
            .code(),
            -32003
        );
        assert_eq!(
            HostError::DuplicateWallet {
                chain: "ethereum".into(),
                address: "0xabc".into()
            }
            .code(),
            -32004
        );
        assert_eq!(
            HostError::StorageEncryption {
                message: "bad tag".into()
            }
            .code(),
            -32005
        );
    }

    #[test]
    fn test_send_codes_are_stable() {
        assert_eq!(HostError::WalletLocked.code(), -32031);
        assert_eq!(
            HostError::InsufficientBalance {
                message: "0 < 1".into()
            }
            .code(),
            -32032
        );
        assert_eq!(
            HostError::BroadcastFailed {
                message: "nope".into()
            }
            .code(),
            -32036
        );
    }

    #[test]
    fn test_invalid_params_code() {
        assert_eq!(HostError::invalid_args("x").code(), CODE_INVALID_PARAMS);
        assert_eq!(
            HostError::MissingRequiredField {
                field: "reason".into()
            }
            .code(),
            CODE_INVALID_PARAMS
        );
    }

    #[test]
    fn test_body_carries_suggestion() {
        let err = HostError::TokenNotSupported {
            token: "DOGE".into(),
            suggestion: "Supported tokens: ETH, BNB, SOL".into(),
        };
        let body = err.to_body();
        assert_eq!(body.kind, "token_not_supported");
        assert!(body.suggestion.is_some());
    }
}
