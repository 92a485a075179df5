//! cache_purge tool implementation.
//!
//! Trims the active generation to its newest entries. Fallbacks are never purged.

use offsync_core::Error;
use offsync_engine::Engine;
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::tools::json_result;

/// Parameters for the cache_purge tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CachePurgeParams {
    /// Keep only the newest N entries of the active generation.
    pub max_entries: usize,
}

/// Output from the cache_purge tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachePurgeOutput {
    /// Number of entries deleted.
    pub deleted: u64,
    pub generation: Option<String>,
}

/// Implementation of the cache_purge tool.
pub async fn purge_impl(engine: &Engine, params: CachePurgeParams) -> Result<CallToolResult, McpError> {
    let generation = engine.active_generation().await;
    if generation.is_none() {
        return Err(Error::InvalidInput("no active generation to purge".into()).into());
    }

    let deleted = engine.cache_purge(params.max_entries).await?;
    tracing::info!(deleted, max_entries = params.max_entries, "Purged cache entries");
    json_result(&CachePurgeOutput { deleted, generation })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::unreachable_engine;

    #[tokio::test]
    async fn test_purge_without_active_generation() {
        let engine = unreachable_engine().await;
        let params = CachePurgeParams { max_entries: 10 };

        let result = purge_impl(&engine, params).await;
        assert!(result.is_err());
    }
}
