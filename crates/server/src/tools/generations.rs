//! Generation lifecycle tools: check_for_updates and list_generations.

use offsync_core::GenerationInfo;
use offsync_engine::Engine;
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::json_result;

/// Parameters for the check_for_updates tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct CheckForUpdatesParams {}

/// Parameters for the list_generations tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ListGenerationsParams {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListGenerationsOutput {
    pub configured: String,
    pub active: Option<String>,
    pub generations: Vec<GenerationInfo>,
}

pub async fn check_for_updates_impl(
    engine: &Engine, _params: CheckForUpdatesParams,
) -> Result<CallToolResult, McpError> {
    json_result(&engine.check_for_updates().await?)
}

pub async fn list_generations_impl(
    engine: &Engine, _params: ListGenerationsParams,
) -> Result<CallToolResult, McpError> {
    let output = ListGenerationsOutput {
        configured: engine.config().generation_name.clone(),
        active: engine.active_generation().await,
        generations: engine.list_generations().await?,
    };
    json_result(&output)
}
