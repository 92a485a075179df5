//! Connectivity and reconciliation tools.

use offsync_engine::{Engine, Trigger};
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::json_result;

/// Parameters for the set_connectivity tool. Omitted flags keep their value.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct SetConnectivityParams {
    /// Whether the network is reachable.
    #[serde(default)]
    pub online: Option<bool>,

    /// Whether the user session is authorized against the remote store.
    #[serde(default)]
    pub authorized: Option<bool>,
}

/// Parameters for the sync_now tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct SyncNowParams {}

pub async fn set_connectivity_impl(
    engine: &Engine, params: SetConnectivityParams,
) -> Result<CallToolResult, McpError> {
    let update = engine.set_connectivity(params.online, params.authorized);
    tracing::info!(online = update.link.online, authorized = update.link.authorized, "Connectivity reported");
    json_result(&update)
}

pub async fn sync_now_impl(engine: &Engine, _params: SyncNowParams) -> Result<CallToolResult, McpError> {
    json_result(&engine.sync(Trigger::Manual).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::{output_json, unreachable_engine};

    #[tokio::test]
    async fn test_set_connectivity_closes_gate() {
        let engine = unreachable_engine().await;
        let params = SetConnectivityParams { online: None, authorized: Some(false) };

        let output = output_json(&set_connectivity_impl(&engine, params).await.unwrap());
        assert_eq!(output["link"]["online"], true);
        assert_eq!(output["link"]["authorized"], false);
        assert_eq!(output["sync_triggered"], false);
    }

    #[tokio::test]
    async fn test_sync_now_offline() {
        let engine = unreachable_engine().await;
        engine.set_connectivity(Some(false), None);

        let output = output_json(&sync_now_impl(&engine, SyncNowParams::default()).await.unwrap());
        assert_eq!(output["status"], "offline");
    }

    #[tokio::test]
    async fn test_sync_now_empty_queue_completes() {
        let engine = unreachable_engine().await;

        let output = output_json(&sync_now_impl(&engine, SyncNowParams::default()).await.unwrap());
        assert_eq!(output["status"], "completed");
        assert_eq!(output["results"].as_array().unwrap().len(), 0);
    }
}
