//! Pending write operations awaiting acknowledgement by the remote store.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Error;

/// Maximum accepted length of a mutation id.
const MAX_ID_LEN: usize = 128;

/// Maximum accepted size of a serialized payload (256KB).
const MAX_PAYLOAD_BYTES: usize = 256 * 1024;

/// Lifecycle state of a queued mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MutationStatus {
    Pending,
    InFlight,
    Failed,
    Applied,
}

impl MutationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationStatus::Pending => "pending",
            MutationStatus::InFlight => "in_flight",
            MutationStatus::Failed => "failed",
            MutationStatus::Applied => "applied",
        }
    }
}

impl fmt::Display for MutationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MutationStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MutationStatus::Pending),
            "in_flight" => Ok(MutationStatus::InFlight),
            "failed" => Ok(MutationStatus::Failed),
            "applied" => Ok(MutationStatus::Applied),
            other => Err(Error::InvalidInput(format!("unknown mutation status: {other}"))),
        }
    }
}

/// A locally-created write that has not yet been acknowledged remotely.
///
/// `id` is the idempotency key presented to the remote store. It is fixed at
/// creation and carried unchanged through every retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingMutation {
    pub id: String,
    pub entity_type: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub retry_count: u32,
    pub next_retry_at: DateTime<Utc>,
    pub status: MutationStatus,
    pub last_error: Option<String>,
}

impl PendingMutation {
    /// Create a mutation with a freshly generated id.
    pub fn new(entity_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), entity_type, payload)
    }

    /// Create a mutation with a caller-supplied id.
    pub fn with_id(id: impl Into<String>, entity_type: impl Into<String>, payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            entity_type: entity_type.into(),
            payload,
            created_at: now,
            retry_count: 0,
            next_retry_at: now,
            status: MutationStatus::Pending,
            last_error: None,
        }
    }

    /// Whether the mutation may be attempted at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_retry_at <= now
    }

    /// Check shape before anything is persisted.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidMutation` if:
    /// - `id` is empty, too long, or contains whitespace/control characters
    /// - `entity_type` is empty or not `[a-z0-9_-]`
    /// - `payload` is not a JSON object, or exceeds 256KB serialized
    pub fn validate(&self) -> Result<(), Error> {
        if self.id.is_empty() {
            return Err(Error::InvalidMutation("id must not be empty".into()));
        }
        if self.id.len() > MAX_ID_LEN {
            return Err(Error::InvalidMutation(format!("id exceeds {MAX_ID_LEN} characters")));
        }
        if self.id.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(Error::InvalidMutation("id must not contain whitespace".into()));
        }

        if self.entity_type.is_empty() {
            return Err(Error::InvalidMutation("entity_type must not be empty".into()));
        }
        if !self
            .entity_type
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
        {
            return Err(Error::InvalidMutation(format!(
                "entity_type '{}' must match [a-z0-9_-]",
                self.entity_type
            )));
        }

        if !self.payload.is_object() {
            return Err(Error::InvalidMutation("payload must be a JSON object".into()));
        }
        let size = self.payload.to_string().len();
        if size > MAX_PAYLOAD_BYTES {
            return Err(Error::InvalidMutation(format!("payload is {size} bytes, limit {MAX_PAYLOAD_BYTES}")));
        }

        Ok(())
    }
}
