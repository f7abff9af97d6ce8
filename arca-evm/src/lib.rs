//! Ethereum-family chain adapter.
//!
//! One [`EvmAdapter`] instance serves one EVM chain (Ethereum or BSC — same
//! wire format, different chain id and RPC pool). All chain traffic goes
//! through the core [`RpcPool`](arca::rpc::RpcPool) for failover; signing is
//! delegated to the keystore, which returns detached secp256k1 signatures.

/// The adapter implementation.
pub mod adapter;

pub use adapter::EvmAdapter;
