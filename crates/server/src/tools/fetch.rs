//! fetch_resource tool implementation.
//!
//! Delivers one request event to the engine and reports the response together
//! with the category, strategy and source that produced it.

use std::collections::BTreeMap;

use offsync_core::{Destination, Error, ResourceRequest};
use offsync_engine::{Category, Engine, ServedFrom, Strategy};
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{json_result, resolve_url};

/// Input parameters for the fetch_resource tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FetchResourceParams {
    /// Absolute URL, or a path resolved against the app origin.
    pub url: String,

    /// HTTP method (default: GET). Anything but GET bypasses the cache.
    #[serde(default = "default_method")]
    pub method: String,

    /// Request headers, e.g. `accept` or `sec-fetch-mode`.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Declared destination: document, image, script, style, font, manifest, worker or empty.
    #[serde(default)]
    pub destination: Option<String>,

    /// Request body for non-GET requests.
    #[serde(default)]
    pub body: Option<String>,
}

fn default_method() -> String {
    "GET".into()
}

/// Output structure for the fetch_resource tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchResourceOutput {
    pub url: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    /// Body decoded as UTF-8, lossily.
    pub body: String,
    pub body_bytes: usize,
    pub category: Category,
    pub strategy: Strategy,
    pub source: ServedFrom,
}

pub async fn fetch_impl(engine: &Engine, params: FetchResourceParams) -> Result<CallToolResult, McpError> {
    let method = params.method.trim();
    if method.is_empty() {
        return Err(Error::InvalidInput("method cannot be empty".into()).into());
    }

    let url = resolve_url(engine, &params.url)?;
    let mut request = ResourceRequest::new(method, url);
    for (name, value) in &params.headers {
        request = request.with_header(name, value);
    }
    if let Some(destination) = params.destination.as_deref() {
        request = request.with_destination(destination.parse::<Destination>()?);
    }
    if let Some(body) = params.body {
        request = request.with_body(body.into_bytes());
    }

    let served = engine.handle_request(&request).await;
    tracing::debug!(
        url = %request.url,
        category = served.category.as_str(),
        source = ?served.source,
        status = served.response.status,
        "Served request"
    );

    let output = FetchResourceOutput {
        url: request.url.to_string(),
        status: served.response.status,
        body: String::from_utf8_lossy(&served.response.body).into_owned(),
        body_bytes: served.response.body.len(),
        headers: served.response.headers,
        category: served.category,
        strategy: served.strategy,
        source: served.source,
    };
    json_result(&output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::{output_json, unreachable_engine};

    fn params(url: &str) -> FetchResourceParams {
        FetchResourceParams {
            url: url.into(),
            method: default_method(),
            headers: BTreeMap::new(),
            destination: None,
            body: None,
        }
    }

    #[tokio::test]
    async fn test_fetch_empty_url() {
        let engine = unreachable_engine().await;
        assert!(fetch_impl(&engine, params("")).await.is_err());
    }

    #[tokio::test]
    async fn test_fetch_unknown_destination() {
        let engine = unreachable_engine().await;
        let params = FetchResourceParams { destination: Some("spaceship".into()), ..params("/") };
        assert!(fetch_impl(&engine, params).await.is_err());
    }

    #[tokio::test]
    async fn test_fetch_navigation_offline_gets_document_fallback() {
        let engine = unreachable_engine().await;
        let params = FetchResourceParams { destination: Some("document".into()), ..params("/") };

        let output = output_json(&fetch_impl(&engine, params).await.unwrap());
        assert_eq!(output["category"], "navigation");
        assert_eq!(output["strategy"], "network_first");
        assert_eq!(output["source"], "fallback");
        assert_eq!(output["status"], 200);
    }

    #[tokio::test]
    async fn test_fetch_post_passthrough_fails_with_503() {
        let engine = unreachable_engine().await;
        let params = FetchResourceParams { method: "POST".into(), body: Some("{}".into()), ..params("/api/items") };

        let output = output_json(&fetch_impl(&engine, params).await.unwrap());
        assert_eq!(output["strategy"], "passthrough");
        assert_eq!(output["status"], 503);
    }
}
