//! MCP server implementation for librovore.

use std::sync::Arc;

use librovore_core::{Config, Librovore};
use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{
    CallToolResult, Content, Implementation, ProtocolVersion, ServerCapabilities, ServerInfo,
};
use rmcp::{ErrorData, ServerHandler, tool, tool_handler, tool_router};

use crate::error::{McpError, McpResult};
use crate::tools::{
    DetectParams, QueryContentParams, QueryInventoryParams, SurveyProcessorsParams,
    handle_detect, handle_query_content, handle_query_inventory, handle_survey_processors,
};

fn value_to_result(value: serde_json::Value) -> CallToolResult {
    CallToolResult::success(vec![Content::text(
        serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string()),
    )])
}

/// MCP server exposing the query engine as tools.
#[derive(Clone)]
pub struct McpServer {
    engine: Arc<Librovore>,
    tool_router: ToolRouter<McpServer>,
}

#[tool_router]
impl McpServer {
    /// Create a server around a freshly initialized engine.
    pub async fn new(config: Config) -> McpResult<Self> {
        let engine = Librovore::new(config).await?;
        Ok(Self::with_engine(Arc::new(engine)))
    }

    /// Create a server around an existing engine.
    #[must_use]
    pub fn with_engine(engine: Arc<Librovore>) -> Self {
        Self {
            engine,
            tool_router: Self::tool_router(),
        }
    }

    /// Serve the MCP protocol over stdio.
    pub async fn serve_stdio(&self) -> McpResult<()> {
        tracing::info!("librovore MCP server starting");

        let stdin = tokio::io::stdin();
        let stdout = tokio::io::stdout();

        let service = rmcp::serve_server(self.clone(), (stdin, stdout))
            .await
            .map_err(|e| {
                tracing::error!("server initialization error: {}", e);
                McpError::Protocol(e.to_string())
            })?;

        service.waiting().await.map_err(|e| {
            tracing::error!("server runtime error: {}", e);
            McpError::Protocol(e.to_string())
        })?;

        tracing::info!("librovore MCP server stopped");
        Ok(())
    }

    #[tool(
        name = "query_inventory",
        description = "Search a documentation site's inventory of API objects by name and metadata filters. Returns matched objects with their addresses."
    )]
    async fn query_inventory(
        &self,
        Parameters(params): Parameters<QueryInventoryParams>,
    ) -> Result<CallToolResult, ErrorData> {
        Ok(value_to_result(
            handle_query_inventory(&self.engine, params).await,
        ))
    }

    #[tool(
        name = "query_content",
        description = "Search a documentation site and extract the matched objects' documentation: signatures, descriptions, and code examples as Markdown."
    )]
    async fn query_content(
        &self,
        Parameters(params): Parameters<QueryContentParams>,
    ) -> Result<CallToolResult, ErrorData> {
        Ok(value_to_result(
            handle_query_content(&self.engine, params).await,
        ))
    }

    #[tool(
        name = "detect",
        description = "Probe a documentation source and report which inventory and structure processors recognize it, with confidence scores."
    )]
    async fn detect(
        &self,
        Parameters(params): Parameters<DetectParams>,
    ) -> Result<CallToolResult, ErrorData> {
        Ok(value_to_result(handle_detect(&self.engine, params).await))
    }

    #[tool(
        name = "survey_processors",
        description = "List every registered processor and its declared capabilities."
    )]
    async fn survey_processors(
        &self,
        Parameters(params): Parameters<SurveyProcessorsParams>,
    ) -> Result<CallToolResult, ErrorData> {
        Ok(value_to_result(handle_survey_processors(
            &self.engine,
            &params,
        )))
    }
}

#[tool_handler]
impl ServerHandler for McpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::default(),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "librovore-mcp".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Query structured documentation sites: use query_inventory to find API \
                 objects, query_content to read their documentation, detect to inspect a \
                 site, and survey_processors to list capabilities."
                    .to_string(),
            ),
        }
    }
}
