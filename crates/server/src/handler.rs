//! MCP server handler implementation.
//!
//! This module defines the main server handler that
//! routes tool calls to the appropriate implementations.
use crate::tools::fetch::fetch_impl;
use crate::tools::message::message_impl;
use crate::tools::stores::stores_impl;
use crate::tools::{StashFetchParams, StashMessageParams, StashStoresParams};

use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{
        tool::{ToolCallContext, ToolRouter},
        wrapper::Parameters,
    },
    model::{
        CallToolRequestParam, CallToolResult, Implementation, ListToolsResult, PaginatedRequestParam, ProtocolVersion,
        ServerCapabilities, ServerInfo,
    },
    service::{RequestContext, RoleServer},
    tool, tool_router,
};
use stash_client::Engine;

/// Client id under which the MCP peer talks to the worker.
pub const STDIO_CLIENT: &str = "mcp-stdio";

/// The main MCP server handler for stash.
#[derive(Clone)]
pub struct StashServer {
    engine: Engine,
    tool_router: ToolRouter<Self>,
}

/// Tool router implementation using the #[tool_router] macro.
///
/// This macro generates the routing logic that maps tool names to handler methods.
#[tool_router]
impl StashServer {
    /// Create a new server handler around a running engine.
    pub fn new(engine: Engine) -> Self {
        Self { engine, tool_router: Self::tool_router() }
    }

    /// Run a request through the caching engine.
    #[tool(
        description = "Fetch a URL through the offline cache engine. Returns status, headers, body and whether the answer came from the network, the cache or a synthesized offline notice."
    )]
    async fn stash_fetch(&self, params: Parameters<StashFetchParams>) -> Result<CallToolResult, McpError> {
        fetch_impl(&self.engine, params.0).await
    }

    /// Post a control message.
    #[tool(description = "Post a control message to the worker: SKIP_WAITING activates a waiting version, CLEAR_CACHE deletes every store of this application.")]
    async fn stash_message(&self, params: Parameters<StashMessageParams>) -> Result<CallToolResult, McpError> {
        message_impl(&self.engine, STDIO_CLIENT, params.0).await
    }

    /// List cache stores.
    #[tool(description = "Report the worker state, cache version, and every cache store with its entry count.")]
    async fn stash_stores(&self, params: Parameters<StashStoresParams>) -> Result<CallToolResult, McpError> {
        stores_impl(&self.engine, params.0).await
    }
}

impl ServerHandler for StashServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "stash".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self, _request: Option<PaginatedRequestParam>, _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, rmcp::model::ErrorData> {
        Ok(ListToolsResult { meta: None, tools: self.tool_router.list_all(), next_cursor: None })
    }

    async fn call_tool(
        &self, request: CallToolRequestParam, context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, rmcp::model::ErrorData> {
        self.tool_router
            .call(ToolCallContext::new(self, request, context))
            .await
    }
}
