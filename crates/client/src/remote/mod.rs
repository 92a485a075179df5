//! Remote store client.
//!
//! The engine reaches the authoritative store only through
//! [`RemoteStoreClient`], injected at construction time.

pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use offsync_core::{Error, PendingMutation, ResourceRequest, Response};

pub use http::HttpRemoteStore;

/// Result of presenting a mutation to the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum ApplyOutcome {
    /// The store acknowledged the write.
    Accepted,
    /// The store refused the write as invalid. Never retried.
    Rejected(String),
    /// The attempt failed in a way that may succeed later.
    TransientError(String),
}

/// Collaborator holding the authoritative data.
#[async_trait]
pub trait RemoteStoreClient: Send + Sync {
    /// Read-through fetch. Non-success statuses come back as responses.
    async fn fetch(&self, request: &ResourceRequest) -> Result<Response, Error>;

    /// Apply a mutation, presenting its id as the idempotency key.
    async fn apply(&self, mutation: &PendingMutation) -> ApplyOutcome;
}

/// Map an HTTP status from the mutation endpoint to an outcome.
///
/// Only statuses that say the payload itself is unacceptable are permanent.
/// Auth, throttling and server errors may clear up, so they are transient.
pub fn classify_apply_status(status: u16, detail: &str) -> ApplyOutcome {
    let reason = if detail.is_empty() { format!("status {status}") } else { format!("status {status}: {detail}") };
    match status {
        200..=299 => ApplyOutcome::Accepted,
        400 | 404 | 409 | 410 | 413 | 422 => ApplyOutcome::Rejected(reason),
        _ => ApplyOutcome::TransientError(reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_is_accepted() {
        assert_eq!(classify_apply_status(200, ""), ApplyOutcome::Accepted);
        assert_eq!(classify_apply_status(201, ""), ApplyOutcome::Accepted);
        assert_eq!(classify_apply_status(204, "ignored"), ApplyOutcome::Accepted);
    }

    #[test]
    fn test_invalid_payload_is_rejected() {
        for status in [400, 404, 409, 410, 413, 422] {
            assert!(
                matches!(classify_apply_status(status, ""), ApplyOutcome::Rejected(_)),
                "status {status} should be rejected"
            );
        }
    }

    #[test]
    fn test_recoverable_statuses_are_transient() {
        for status in [401, 403, 408, 429, 500, 502, 503, 504] {
            assert!(
                matches!(classify_apply_status(status, ""), ApplyOutcome::TransientError(_)),
                "status {status} should be transient"
            );
        }
    }

    #[test]
    fn test_reason_includes_detail() {
        assert_eq!(
            classify_apply_status(422, "name required"),
            ApplyOutcome::Rejected("status 422: name required".to_string())
        );
    }
}
