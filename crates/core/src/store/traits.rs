//! Repository traits over the durable store.
//!
//! The engine only reaches cached responses and queued mutations through
//! these narrow operation sets, which keeps call sites sequential and lets
//! tests swap in other backends.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::generations::{CacheEntry, GenerationInfo};
use crate::mutation::{MutationStatus, PendingMutation};
use crate::{Error, Response};

/// Storage for named cache generations and their entries.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Create an empty generation. Returns false if it already existed.
    async fn create_generation(&self, name: &str) -> Result<bool, Error>;

    /// All generations, oldest first.
    async fn list_generations(&self) -> Result<Vec<GenerationInfo>, Error>;

    /// Name of the active generation, if any.
    async fn active_generation(&self) -> Result<Option<String>, Error>;

    /// Atomically make `name` the only active generation.
    async fn activate_generation(&self, name: &str) -> Result<(), Error>;

    /// Delete a generation and all of its entries. Returns false if absent.
    async fn delete_generation(&self, name: &str) -> Result<bool, Error>;

    /// Look up an entry in a specific generation.
    async fn get_entry(&self, generation: &str, request_key: &str) -> Result<Option<CacheEntry>, Error>;

    /// Store an entry into its generation.
    ///
    /// With `require_active`, the write is skipped unless the generation is
    /// still the active one. Returns whether a row was written.
    async fn put_entry(&self, entry: &CacheEntry, require_active: bool) -> Result<bool, Error>;

    /// Number of entries held by a generation.
    async fn count_entries(&self, generation: &str) -> Result<u64, Error>;

    /// Trim a generation to `max_entries`, oldest first.
    async fn purge_oldest_entries(&self, generation: &str, max_entries: usize) -> Result<u64, Error>;

    /// Insert or replace a fallback entry.
    async fn put_fallback(&self, kind: &str, response: &Response) -> Result<(), Error>;

    /// All seeded fallback entries.
    async fn list_fallbacks(&self) -> Result<Vec<(String, Response)>, Error>;
}

/// Crash-surviving queue of writes awaiting remote acknowledgement.
#[async_trait]
pub trait DurableQueue: Send + Sync {
    /// Validate and persist a mutation, returning its id.
    async fn enqueue(&self, mutation: PendingMutation) -> Result<String, Error>;

    /// Pending mutations in enqueue order. Corrupt rows are skipped.
    async fn list_pending(&self) -> Result<Vec<PendingMutation>, Error>;

    /// Mutations that reached `failed` and await dismissal.
    async fn list_failed(&self) -> Result<Vec<PendingMutation>, Error>;

    async fn get(&self, id: &str) -> Result<Option<PendingMutation>, Error>;

    /// Claim a pending mutation for the current run.
    async fn mark_in_flight(&self, id: &str) -> Result<(), Error>;

    /// Remove an acknowledged mutation and record its id as applied.
    async fn mark_applied(&self, id: &str) -> Result<(), Error>;

    /// Record a transient failure: bump `retry_count`, schedule the next
    /// attempt after `backoff`, and return the resulting status (`pending`,
    /// or `failed` once the retry ceiling is reached).
    async fn mark_failed_retry(&self, id: &str, backoff: Duration, error: &str) -> Result<MutationStatus, Error>;

    /// Mark a mutation permanently failed without touching `retry_count`.
    async fn mark_failed_permanent(&self, id: &str, reason: &str) -> Result<(), Error>;

    /// Revert claims left `in_flight` by an interrupted run.
    async fn release_in_flight(&self) -> Result<u64, Error>;

    /// Drop a failed mutation once the caller has acknowledged it.
    async fn discard(&self, id: &str) -> Result<bool, Error>;

    /// Record an id acknowledged outside the queue, e.g. by a direct write.
    async fn record_applied(&self, mutation: &PendingMutation) -> Result<(), Error>;

    /// Whether the remote store has already acknowledged this id.
    async fn is_applied(&self, id: &str) -> Result<bool, Error>;

    /// Forget ledger entries acknowledged before `older_than`.
    async fn prune_applied(&self, older_than: DateTime<Utc>) -> Result<u64, Error>;
}
