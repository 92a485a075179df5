//! MCP tool implementations.
//!
//! Each tool is a thin adapter from JSON parameters to one inbound engine
//! event; results are returned as pretty-printed JSON text.

pub mod cache;
pub mod fetch;
pub mod generations;
pub mod sync;
pub mod writes;

use offsync_client::canonicalize;
use offsync_core::Error;
use offsync_engine::Engine;
use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use serde::Serialize;
use url::Url;

pub use cache::{CacheGetParams, CachePurgeParams};
pub use fetch::FetchResourceParams;
pub use generations::{CheckForUpdatesParams, ListGenerationsParams};
pub use sync::{SetConnectivityParams, SyncNowParams};
pub use writes::{DismissFailedParams, QueueStatusParams, SubmitWriteParams};

/// Serialize a tool output as a successful text result.
pub(crate) fn json_result<T: Serialize>(output: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(output)
        .map_err(|e| Error::InvalidInput(format!("Failed to serialize output: {e}")))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

/// Resolve a tool's URL argument against the app origin.
pub(crate) fn resolve_url(engine: &Engine, input: &str) -> Result<Url, Error> {
    let origin = engine
        .config()
        .app_origin_url()
        .map_err(|e| Error::InvalidUrl(e.to_string()))?;
    canonicalize(input, &origin).map_err(|e| Error::InvalidUrl(e.to_string()))
}
