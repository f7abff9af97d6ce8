//! MCP transport for the arca wallet host.
//!
//! Implements MCP protocol version `2024-11-05` over two coexisting HTTP
//! entry modes (streamable POST and pure SSE with a companion message
//! endpoint), backed by a startup-initialized tool/resource registry with
//! schema validation in front of the dispatcher.

/// The axum HTTP/SSE transport.
pub mod http;
/// MCP wire types.
pub mod protocol;
/// Tool/resource registry with validated dispatch.
pub mod registry;
/// Resource declarations.
pub mod resources;
/// Tool declarations.
pub mod tools;

use std::sync::Arc;

use crate::registry::Registry;

/// Builds the full registry the host exposes over MCP.
#[must_use]
pub fn default_registry() -> Arc<Registry> {
    Arc::new(Registry::new(tools::tool_specs(), resources::resource_specs()))
}
