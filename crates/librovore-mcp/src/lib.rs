//! MCP tool server for librovore.
//!
//! A thin adapter exposing the query-orchestrator entry points over the
//! Model Context Protocol. Tool results are `render_as_json()` output;
//! failures are returned as structured `ErrorResponse` payloads, never as
//! protocol errors.

/// Transport-layer error types
pub mod error;
/// Server handler and stdio transport
pub mod server;
/// Tool parameter structs and handlers
pub mod tools;

pub use error::{McpError, McpResult};
pub use server::McpServer;
