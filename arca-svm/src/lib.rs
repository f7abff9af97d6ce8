//! Solana chain adapter.
//!
//! Builds system and SPL token transfers, signs them through the keystore's
//! ed25519 surface, and broadcasts in parallel across the primary RPC pool
//! plus any configured relayer channels — the first accepted signature
//! wins. All reads go through the core failover pool.

/// The adapter implementation.
pub mod adapter;

pub use adapter::SolanaAdapter;
