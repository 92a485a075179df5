//! cache_get tool implementation.
//!
//! Looks up the active generation's entry for a request.

use offsync_core::{Error, ResourceRequest};
use offsync_engine::Engine;
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::tools::{json_result, resolve_url};

/// Parameters for the cache_get tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheGetParams {
    /// Absolute URL, or a path resolved against the app origin.
    pub url: String,

    /// HTTP method the entry was stored under (default: GET).
    #[serde(default = "default_method")]
    pub method: String,
}

fn default_method() -> String {
    "GET".into()
}

/// Output from the cache_get tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheGetOutput {
    pub generation: String,
    pub request_key: String,
    pub url: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub stored_at: String,
}

/// Implementation of the cache_get tool.
pub async fn get_impl(engine: &Engine, params: CacheGetParams) -> Result<CallToolResult, McpError> {
    let request = ResourceRequest::new(&params.method, resolve_url(engine, &params.url)?);
    let entry = engine
        .cache_get(&request)
        .await?
        .ok_or_else(|| Error::CacheMiss(request.to_string()))?;

    let output = CacheGetOutput {
        generation: entry.generation,
        request_key: entry.request_key,
        url: entry.url,
        status: entry.response.status,
        body: String::from_utf8_lossy(&entry.response.body).into_owned(),
        headers: entry.response.headers,
        stored_at: entry.stored_at,
    };
    json_result(&output)
}
