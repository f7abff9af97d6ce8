//! Core of the arca native wallet host.
//!
//! This crate holds everything the transports share: the error taxonomy with
//! its stable JSON-RPC codes, the typed event model and non-blocking
//! broadcaster, the in-memory pending-transaction store and its state
//! machine, the chain-adapter and keystore contracts, and the operation
//! dispatcher that ties them together.
//!
//! Transport crates (`arca-mcp`, `arca-native`) depend on [`dispatch::Dispatcher`]
//! only; chain crates (`arca-evm`, `arca-svm`) implement [`adapter::ChainAdapter`];
//! `arca-keystore` implements [`keystore::Keystore`]. The host binary wires the
//! concrete pieces together at startup.

/// Chain-adapter contract and the deterministic test-mode adapter.
pub mod adapter;
/// Decimal-string to base-unit conversion helpers.
pub mod amount;
/// Non-blocking event fan-out to subscriber sessions.
pub mod broadcast;
/// Chain identifiers, per-chain settings, and hash-shape chain detection.
pub mod chain;
/// Host configuration loading (TOML + environment expansion).
pub mod config;
/// Operation dispatcher: the wallet-facing facade used by both transports.
pub mod dispatch;
/// Error taxonomy with stable wire codes.
pub mod error;
/// Typed wallet events.
pub mod event;
/// Keystore contract consumed by the dispatcher and chain adapters.
pub mod keystore;
/// Background confirmation polling for in-flight transactions.
pub mod monitor;
/// Pending-transaction table and state machine.
pub mod pending;
/// JSON-RPC endpoint pool with failover and cool-down.
pub mod rpc;
/// Unix timestamps serialized as strings.
pub mod timestamp;
/// Token identifier resolution (native symbols and contract addresses).
pub mod token;

pub use chain::ChainRef;
pub use error::HostError;
pub use event::{Event, EventKind};
pub use timestamp::UnixTimestamp;
