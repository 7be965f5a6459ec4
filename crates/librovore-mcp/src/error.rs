//! Error types for the MCP server layer.
//!
//! Query failures never become protocol errors: they are rendered as
//! `ErrorResponse` JSON inside successful tool results so tool-calling
//! agents receive structured, actionable failures. This error type covers
//! only the transport itself.

use thiserror::Error;

/// Errors from the MCP transport layer.
#[derive(Error, Debug)]
pub enum McpError {
    /// Engine initialization failed before the server could start.
    #[error("Engine error: {0}")]
    Engine(#[from] librovore_core::Error),

    /// The MCP protocol transport failed.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Convenience alias for MCP-layer results.
pub type McpResult<T> = std::result::Result<T, McpError>;
