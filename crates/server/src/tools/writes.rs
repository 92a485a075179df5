//! Write-side tools: submit_write, queue_status and dismiss_failed.

use offsync_core::Error;
use offsync_engine::Engine;
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::json_result;

/// Parameters for the submit_write tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SubmitWriteParams {
    /// Remote collection the write targets, e.g. "notes".
    pub entity_type: String,

    /// JSON object sent as the mutation body.
    pub payload: serde_json::Value,

    /// Caller-chosen idempotency id. A fresh UUID is used when omitted.
    #[serde(default)]
    pub id: Option<String>,
}

/// Parameters for the queue_status tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct QueueStatusParams {}

/// Parameters for the dismiss_failed tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DismissFailedParams {
    /// Id of a mutation in the failed list.
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DismissFailedOutput {
    pub id: String,
    /// False when no failed mutation had this id.
    pub dismissed: bool,
}

pub async fn submit_write_impl(engine: &Engine, params: SubmitWriteParams) -> Result<CallToolResult, McpError> {
    let outcome = engine
        .submit_write(&params.entity_type, params.payload, params.id)
        .await?;
    json_result(&outcome)
}

pub async fn queue_status_impl(engine: &Engine, _params: QueueStatusParams) -> Result<CallToolResult, McpError> {
    json_result(&engine.queue_status().await?)
}

pub async fn dismiss_failed_impl(engine: &Engine, params: DismissFailedParams) -> Result<CallToolResult, McpError> {
    if params.id.trim().is_empty() {
        return Err(Error::InvalidInput("id cannot be empty".into()).into());
    }
    let dismissed = engine.dismiss_failed(&params.id).await?;
    json_result(&DismissFailedOutput { id: params.id, dismissed })
}
