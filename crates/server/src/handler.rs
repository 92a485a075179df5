//! MCP server handler implementation.
//!
//! Routes tool calls to the engine. Each tool maps to exactly one inbound
//! event a host page would otherwise deliver.
use std::sync::Arc;

use crate::tools::{
    CacheGetParams, CachePurgeParams, CheckForUpdatesParams, DismissFailedParams, FetchResourceParams,
    ListGenerationsParams, QueueStatusParams, SetConnectivityParams, SubmitWriteParams, SyncNowParams, cache, fetch,
    generations, sync, writes,
};

use offsync_engine::Engine;
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

/// The MCP server handler for offsync.
#[derive(Clone)]
pub struct OffsyncServer {
    engine: Arc<Engine>,
    tool_router: ToolRouter<Self>,
}

/// Tool router implementation using the #[tool_router] macro.
#[tool_router]
impl OffsyncServer {
    /// Create a new server handler around a shared engine.
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine, tool_router: Self::tool_router() }
    }

    #[tool(
        description = "Serve a request through the offline cache. Classifies it, applies the caching strategy, and reports the response with its source (network, cache, fallback)."
    )]
    async fn fetch_resource(&self, params: Parameters<FetchResourceParams>) -> Result<CallToolResult, McpError> {
        fetch::fetch_impl(&self.engine, params.0).await
    }

    #[tool(
        description = "Submit a user write. Applied immediately when online and authorized, otherwise queued durably for the next sync."
    )]
    async fn submit_write(&self, params: Parameters<SubmitWriteParams>) -> Result<CallToolResult, McpError> {
        writes::submit_write_impl(&self.engine, params.0).await
    }

    #[tool(description = "List pending and failed mutations, the reconciler state, and the connectivity gate.")]
    async fn queue_status(&self, params: Parameters<QueueStatusParams>) -> Result<CallToolResult, McpError> {
        writes::queue_status_impl(&self.engine, params.0).await
    }

    #[tool(description = "Remove a failed mutation after it has been shown to the user.")]
    async fn dismiss_failed(&self, params: Parameters<DismissFailedParams>) -> Result<CallToolResult, McpError> {
        writes::dismiss_failed_impl(&self.engine, params.0).await
    }

    #[tool(
        description = "Report connectivity (online) and session authorization. Restoring both starts a background sync."
    )]
    async fn set_connectivity(&self, params: Parameters<SetConnectivityParams>) -> Result<CallToolResult, McpError> {
        sync::set_connectivity_impl(&self.engine, params.0).await
    }

    #[tool(description = "Drain the mutation queue now. Skips the minimum interval but never overlaps a running sync.")]
    async fn sync_now(&self, params: Parameters<SyncNowParams>) -> Result<CallToolResult, McpError> {
        sync::sync_now_impl(&self.engine, params.0).await
    }

    #[tool(
        description = "Install and activate the configured cache generation if it is not already active. Older generations are swept."
    )]
    async fn check_for_updates(&self, params: Parameters<CheckForUpdatesParams>) -> Result<CallToolResult, McpError> {
        generations::check_for_updates_impl(&self.engine, params.0).await
    }

    #[tool(description = "List cache generations and which one serves reads.")]
    async fn list_generations(&self, params: Parameters<ListGenerationsParams>) -> Result<CallToolResult, McpError> {
        generations::list_generations_impl(&self.engine, params.0).await
    }

    #[tool(description = "Look up the active generation's cached response for a URL.")]
    async fn cache_get(&self, params: Parameters<CacheGetParams>) -> Result<CallToolResult, McpError> {
        cache::get_impl(&self.engine, params.0).await
    }

    #[tool(description = "Keep only the newest N entries of the active generation. Offline fallbacks are kept.")]
    async fn cache_purge(&self, params: Parameters<CachePurgeParams>) -> Result<CallToolResult, McpError> {
        cache::purge_impl(&self.engine, params.0).await
    }
}

impl ServerHandler for OffsyncServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "offsync".into(),
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
