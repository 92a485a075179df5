//! Offline-first caching and sync engine.
//!
//! Requests are classified, then answered by a caching strategy backed by
//! versioned cache generations and pre-seeded fallbacks. Writes made while
//! disconnected go to a durable queue that the reconciler drains once the
//! connectivity gate opens.

pub mod classify;
pub mod connectivity;
pub mod engine;
pub mod fallback;
pub mod generations;
pub mod reconcile;
pub mod strategy;

#[cfg(test)]
pub(crate) mod test_support;

pub use classify::{Category, Classifier};
pub use connectivity::{Connectivity, LinkState};
pub use engine::{ConnectivityUpdate, Engine, InstallReport, QueueStatus, UpdateStatus, WriteOutcome};
pub use fallback::{FallbackKind, FallbackProvider};
pub use generations::{ActivationReport, GenerationHandle, GenerationManager, PopulateReport};
pub use reconcile::{
    MutationOutcome, ReconcileOutcome, Reconciler, RetryPolicy, RunState, SyncEvent, SyncResult, SyncRun, Trigger,
};
pub use strategy::{Served, ServedFrom, Strategy, StrategyExecutor};
