//! Sync reconciler.
//!
//! Drains the durable mutation queue against the remote store. One run at a
//! time: the run-lock is taken with a single compare-and-set and a second
//! trigger while a run is active returns immediately. Mutations are applied
//! in enqueue order and settle independently of each other.

pub mod backoff;
pub mod lock;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, broadcast};
use tokio::time::Instant;

pub use backoff::RetryPolicy;
pub use lock::{RunGuard, RunLock, RunState};

use crate::connectivity::Connectivity;
use offsync_client::{ApplyOutcome, RemoteStoreClient};
use offsync_core::{DurableQueue, Error, MutationStatus, PendingMutation};

const EVENT_CAPACITY: usize = 256;

/// What asked for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    ConnectivityRestored,
    Periodic,
    /// Host-initiated; skips the minimum interval but not the run-lock.
    Manual,
}

/// Notifications for the UI collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncEvent {
    MutationApplied {
        id: String,
        entity_type: String,
    },
    /// Published once, when the mutation enters `failed`.
    MutationFailed {
        id: String,
        entity_type: String,
        reason: String,
        retry_count: u32,
        permanent: bool,
    },
}

/// How one mutation settled within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MutationOutcome {
    Applied,
    Rejected { reason: String },
    Retrying { retry_count: u32, error: String },
    Failed { retry_count: u32, error: String },
    /// Connectivity dropped while the apply was in flight; left pending.
    Interrupted,
    StoreError { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub mutation_id: String,
    pub entity_type: String,
    #[serde(flatten)]
    pub outcome: MutationOutcome,
}

/// Record of one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRun {
    pub id: String,
    pub trigger: Trigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub results: Vec<SyncResult>,
    /// Pending mutations skipped because their backoff has not elapsed.
    pub not_due: usize,
    /// Whether the run stopped early on connectivity loss or a store failure.
    pub aborted: bool,
}

impl SyncRun {
    pub fn count(&self, matches: impl Fn(&MutationOutcome) -> bool) -> usize {
        self.results.iter().filter(|r| matches(&r.outcome)).count()
    }

    pub fn applied(&self) -> usize {
        self.count(|o| matches!(o, MutationOutcome::Applied))
    }
}

/// Result of asking for a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Completed(SyncRun),
    AlreadyRunning,
    Throttled { retry_in_ms: u64 },
    Offline,
}

/// Drains the mutation queue against the remote store.
pub struct Reconciler {
    queue: Arc<dyn DurableQueue>,
    remote: Arc<dyn RemoteStoreClient>,
    connectivity: Connectivity,
    policy: RetryPolicy,
    min_interval: Duration,
    apply_timeout: Duration,
    applied_retention: Option<Duration>,
    lock: RunLock,
    last_started: Mutex<Option<Instant>>,
    events: broadcast::Sender<SyncEvent>,
}

impl Reconciler {
    pub fn new(
        queue: Arc<dyn DurableQueue>, remote: Arc<dyn RemoteStoreClient>, connectivity: Connectivity,
        policy: RetryPolicy, min_interval: Duration, apply_timeout: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            queue,
            remote,
            connectivity,
            policy,
            min_interval,
            apply_timeout,
            applied_retention: None,
            lock: RunLock::new(),
            last_started: Mutex::new(None),
            events,
        }
    }

    /// Drop applied-ledger ids older than `retention` at the end of each run.
    pub fn with_applied_retention(mut self, retention: Duration) -> Self {
        self.applied_retention = Some(retention);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> RunState {
        self.lock.state()
    }

    /// Attempt one run.
    ///
    /// Returns without touching the queue when the gate is closed, another
    /// run holds the lock, or (for non-manual triggers) the previous run
    /// started less than the minimum interval ago.
    pub async fn run(&self, trigger: Trigger) -> Result<ReconcileOutcome, Error> {
        if !self.connectivity.is_open() {
            tracing::debug!(?trigger, "Sync skipped: offline or unauthorized");
            return Ok(ReconcileOutcome::Offline);
        }

        let Some(_guard) = self.lock.try_acquire() else {
            tracing::debug!(?trigger, "Sync skipped: run already in progress");
            return Ok(ReconcileOutcome::AlreadyRunning);
        };

        {
            let mut last = self.last_started.lock().await;
            if trigger != Trigger::Manual
                && let Some(at) = *last
                && at.elapsed() < self.min_interval
            {
                let retry_in = self.min_interval - at.elapsed().min(self.min_interval);
                tracing::debug!(?trigger, retry_in_ms = retry_in.as_millis() as u64, "Sync throttled");
                return Ok(ReconcileOutcome::Throttled { retry_in_ms: retry_in.as_millis() as u64 });
            }
            *last = Some(Instant::now());
        }

        let run = self.drain(trigger).await;

        match self.queue.release_in_flight().await {
            Ok(0) => {}
            Ok(released) => tracing::warn!(released, "Released mutations left in flight"),
            Err(e) => tracing::error!(error = %e, "Failed to release in-flight mutations"),
        }
        self.prune_ledger().await;

        run.map(ReconcileOutcome::Completed)
    }

    async fn drain(&self, trigger: Trigger) -> Result<SyncRun, Error> {
        let started_at = Utc::now();
        let (due, not_due): (Vec<_>, Vec<_>) = self
            .queue
            .list_pending()
            .await?
            .into_iter()
            .partition(|m| m.is_due(started_at));

        let mut run = SyncRun {
            id: uuid::Uuid::new_v4().to_string(),
            trigger,
            started_at,
            finished_at: started_at,
            results: Vec::with_capacity(due.len()),
            not_due: not_due.len(),
            aborted: false,
        };
        tracing::info!(run_id = %run.id, ?trigger, due = due.len(), not_due = run.not_due, "Sync run started");

        for mutation in due {
            if !self.connectivity.is_open() {
                run.aborted = true;
                break;
            }

            match self.queue.mark_in_flight(&mutation.id).await {
                Ok(()) => {}
                Err(Error::MutationNotFound(_)) => {
                    tracing::debug!(id = %mutation.id, "Mutation no longer pending, skipping");
                    continue;
                }
                Err(e) => {
                    tracing::error!(id = %mutation.id, error = %e, "Failed to claim mutation");
                    run.results.push(sync_result(&mutation, MutationOutcome::StoreError { error: e.to_string() }));
                    run.aborted = true;
                    break;
                }
            }

            let applied = tokio::select! {
                biased;
                outcome = apply_with_timeout(self.remote.as_ref(), &mutation, self.apply_timeout) => Some(outcome),
                _ = self.connectivity.closed() => None,
            };

            let Some(outcome) = applied else {
                tracing::info!(id = %mutation.id, "Connectivity lost mid-drain, aborting run");
                if let Err(e) = self.queue.release_in_flight().await {
                    tracing::error!(id = %mutation.id, error = %e, "Failed to release interrupted mutation");
                }
                run.results.push(sync_result(&mutation, MutationOutcome::Interrupted));
                run.aborted = true;
                break;
            };

            let settled = self.settle(&mutation, outcome).await;
            run.results.push(sync_result(&mutation, settled));
        }

        run.finished_at = Utc::now();
        tracing::info!(
            run_id = %run.id,
            applied = run.applied(),
            rejected = run.count(|o| matches!(o, MutationOutcome::Rejected { .. })),
            retrying = run.count(|o| matches!(o, MutationOutcome::Retrying { .. })),
            failed = run.count(|o| matches!(o, MutationOutcome::Failed { .. })),
            aborted = run.aborted,
            "Sync run finished"
        );
        Ok(run)
    }

    async fn settle(&self, mutation: &PendingMutation, outcome: ApplyOutcome) -> MutationOutcome {
        let id = &mutation.id;
        match outcome {
            ApplyOutcome::Accepted => match self.queue.mark_applied(id).await {
                Ok(()) => {
                    tracing::debug!(id = %id, "Mutation applied");
                    self.publish(SyncEvent::MutationApplied {
                        id: id.clone(),
                        entity_type: mutation.entity_type.clone(),
                    });
                    MutationOutcome::Applied
                }
                Err(e) => store_error(id, e),
            },
            ApplyOutcome::Rejected(reason) => match self.queue.mark_failed_permanent(id, &reason).await {
                Ok(()) => {
                    tracing::warn!(id = %id, reason = %reason, "Mutation rejected by remote store");
                    self.publish(SyncEvent::MutationFailed {
                        id: id.clone(),
                        entity_type: mutation.entity_type.clone(),
                        reason: reason.clone(),
                        retry_count: mutation.retry_count,
                        permanent: true,
                    });
                    MutationOutcome::Rejected { reason }
                }
                Err(e) => store_error(id, e),
            },
            ApplyOutcome::TransientError(error) => {
                let backoff = self.policy.delay(mutation.retry_count);
                let retry_count = mutation.retry_count.saturating_add(1);
                match self.queue.mark_failed_retry(id, backoff, &error).await {
                    Ok(MutationStatus::Failed) => {
                        tracing::warn!(id = %id, retry_count, error = %error, "Mutation exhausted retries");
                        self.publish(SyncEvent::MutationFailed {
                            id: id.clone(),
                            entity_type: mutation.entity_type.clone(),
                            reason: error.clone(),
                            retry_count,
                            permanent: false,
                        });
                        MutationOutcome::Failed { retry_count, error }
                    }
                    Ok(_) => {
                        tracing::warn!(
                            id = %id,
                            retry_count,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %error,
                            "Mutation will be retried"
                        );
                        MutationOutcome::Retrying { retry_count, error }
                    }
                    Err(e) => store_error(id, e),
                }
            }
        }
    }

    async fn prune_ledger(&self) {
        let Some(retention) = self.applied_retention else {
            return;
        };
        let Ok(retention) = chrono::Duration::from_std(retention) else {
            return;
        };
        let Some(cutoff) = Utc::now().checked_sub_signed(retention) else {
            return;
        };
        match self.queue.prune_applied(cutoff).await {
            Ok(0) => {}
            Ok(pruned) => tracing::debug!(pruned, "Pruned applied-mutation ledger"),
            Err(e) => tracing::error!(error = %e, "Failed to prune applied-mutation ledger"),
        }
    }

    fn publish(&self, event: SyncEvent) {
        // No subscribers is fine; failed mutations stay queryable.
        let _ = self.events.send(event);
    }
}

/// Call `apply`, treating a call that outlives `timeout` as a transient failure.
pub(crate) async fn apply_with_timeout(
    remote: &dyn RemoteStoreClient, mutation: &PendingMutation, timeout: Duration,
) -> ApplyOutcome {
    match tokio::time::timeout(timeout, remote.apply(mutation)).await {
        Ok(outcome) => outcome,
        Err(_) => ApplyOutcome::TransientError(format!("NETWORK_TIMEOUT: apply exceeded {}ms", timeout.as_millis())),
    }
}

fn sync_result(mutation: &PendingMutation, outcome: MutationOutcome) -> SyncResult {
    SyncResult { mutation_id: mutation.id.clone(), entity_type: mutation.entity_type.clone(), outcome }
}

fn store_error(id: &str, e: Error) -> MutationOutcome {
    tracing::error!(id, error = %e, "Failed to record mutation outcome");
    MutationOutcome::StoreError { error: e.to_string() }
}
