//! Standalone entrypoint for the librovore MCP server over stdio.

use librovore_mcp::{McpResult, McpServer};

#[tokio::main]
async fn main() -> McpResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = librovore_core::Config::load()?;
    let server = McpServer::new(config).await?;
    server.serve_stdio().await
}
