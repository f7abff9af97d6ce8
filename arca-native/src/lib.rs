//! Chrome Native Messaging transport for the arca wallet host.
//!
//! Frames are a little-endian u32 byte length followed by UTF-8 JSON-RPC
//! 2.0 bodies, read from standard input and written to standard output.
//! This transport carries the extension-facing method surface, including
//! the security-sensitive operations the MCP transport must never expose.

/// Length-prefixed frame codec.
pub mod framing;
/// JSON-RPC message types and error shaping.
pub mod rpc;
/// Read loop and method dispatch.
pub mod server;

pub use server::NativeTransport;
