//! reqwest-backed remote store.
//!
//! Mutations are POSTed as JSON to `{remote_store_url}/mutations/{entity_type}`
//! with the mutation id in an `Idempotency-Key` header.

use async_trait::async_trait;
use url::Url;

use super::{ApplyOutcome, RemoteStoreClient, classify_apply_status};
use crate::fetch::{FetchClient, FetchConfig};
use offsync_core::{AppConfig, Error, PendingMutation, ResourceRequest, Response};

/// Longest response excerpt carried into a rejection reason.
const MAX_DETAIL_CHARS: usize = 200;

/// Remote store reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpRemoteStore {
    client: FetchClient,
    base: Url,
}

impl HttpRemoteStore {
    /// Create a store client for `base`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidUrl` if `base` cannot carry path segments.
    pub fn new(client: FetchClient, base: Url) -> Result<Self, Error> {
        if base.cannot_be_a_base() {
            return Err(Error::InvalidUrl(format!("remote store url cannot be a base: {base}")));
        }
        Ok(Self { client, base })
    }

    /// Build the store from application config.
    pub fn from_config(config: &AppConfig) -> Result<Self, Error> {
        let base = Url::parse(&config.remote_store_url).map_err(|e| Error::InvalidUrl(e.to_string()))?;
        Self::new(FetchClient::new(FetchConfig::from_app(config))?, base)
    }

    /// Endpoint a mutation of `entity_type` is submitted to.
    pub fn mutation_url(&self, entity_type: &str) -> Result<Url, Error> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| Error::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .push("mutations")
            .push(entity_type);
        Ok(url)
    }

    fn apply_request(&self, mutation: &PendingMutation) -> Result<ResourceRequest, Error> {
        let body = serde_json::to_vec(&mutation.payload)?;
        Ok(ResourceRequest::new("POST", self.mutation_url(&mutation.entity_type)?)
            .with_header("content-type", "application/json")
            .with_header("accept", "application/json")
            .with_header("idempotency-key", &mutation.id)
            .with_body(body))
    }
}

#[async_trait]
impl RemoteStoreClient for HttpRemoteStore {
    async fn fetch(&self, request: &ResourceRequest) -> Result<Response, Error> {
        self.client.execute(request).await
    }

    async fn apply(&self, mutation: &PendingMutation) -> ApplyOutcome {
        let request = match self.apply_request(mutation) {
            Ok(request) => request,
            Err(e) => return ApplyOutcome::Rejected(e.to_string()),
        };

        match self.client.execute(&request).await {
            Ok(response) => {
                let detail: String = String::from_utf8_lossy(&response.body)
                    .chars()
                    .take(MAX_DETAIL_CHARS)
                    .collect();
                let outcome = classify_apply_status(response.status, detail.trim());
                tracing::debug!(id = %mutation.id, status = response.status, ?outcome, "Remote apply finished");
                outcome
            }
            Err(e) => ApplyOutcome::TransientError(e.to_string()),
        }
    }
}
