//! Engine facade.
//!
//! Wires the store, remote client, classifier, strategies and reconciler
//! together and exposes the inbound events a host delivers: install,
//! activate, requests, writes, connectivity changes and sync ticks.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::classify::Classifier;
use crate::connectivity::{Connectivity, LinkState};
use crate::fallback::FallbackProvider;
use crate::generations::{ActivationReport, GenerationHandle, GenerationManager, PopulateReport};
use crate::reconcile::{
    ReconcileOutcome, Reconciler, RetryPolicy, RunState, SyncEvent, Trigger, apply_with_timeout,
};
use crate::strategy::{Served, StrategyExecutor};
use offsync_client::{ApplyOutcome, HttpRemoteStore, RemoteStoreClient};
use offsync_core::{
    AppConfig, CacheEntry, CacheStore, DurableQueue, Error, GenerationInfo, PendingMutation, ResourceRequest,
    SqliteQueue, StoreDb,
};

/// Outcome of installing the configured generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallReport {
    pub generation: String,
    pub populate: PopulateReport,
}

/// Result of a manual update check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UpdateStatus {
    UpToDate { generation: String },
    Updated { from: Option<String>, to: String, install: PopulateReport, activation: ActivationReport },
}

/// Result of a user-initiated write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WriteOutcome {
    /// The remote store acknowledged the write.
    Applied { id: String },
    /// Persisted for the reconciler.
    Queued { id: String, reason: String },
    /// The remote store refused the write. Nothing was queued.
    Rejected { id: String, reason: String },
}

/// Queue contents and reconciler state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub pending: Vec<PendingMutation>,
    pub failed: Vec<PendingMutation>,
    pub run_state: RunState,
    pub link: LinkState,
}

/// Result of a connectivity report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivityUpdate {
    pub link: LinkState,
    /// Whether the gate opened and a background sync was started.
    pub sync_triggered: bool,
}

/// The offline caching and sync engine.
pub struct Engine {
    config: AppConfig,
    classifier: Classifier,
    queue: Arc<dyn DurableQueue>,
    generations: Arc<GenerationManager>,
    fallbacks: Arc<FallbackProvider>,
    executor: StrategyExecutor,
    reconciler: Arc<Reconciler>,
    connectivity: Connectivity,
    remote: Arc<dyn RemoteStoreClient>,
}

impl Engine {
    /// Open the durable store at `config.db_path` and talk HTTP to the remote store.
    pub async fn open(config: AppConfig) -> Result<Self, Error> {
        let db = StoreDb::open(&config.db_path).await?;
        let remote: Arc<dyn RemoteStoreClient> = Arc::new(HttpRemoteStore::from_config(&config)?);
        Self::with_parts(config, db, remote).await
    }

    /// Build an engine over an already-open store and an injected remote client.
    ///
    /// Mutations left `in_flight` by an interrupted process are returned to
    /// `pending` with their id and retry count unchanged.
    pub async fn with_parts(config: AppConfig, db: StoreDb, remote: Arc<dyn RemoteStoreClient>) -> Result<Self, Error> {
        let classifier = Classifier::from_config(&config)?;
        let store: Arc<dyn CacheStore> = Arc::new(db.clone());
        let queue: Arc<dyn DurableQueue> = Arc::new(SqliteQueue::new(db, config.max_retries));

        let recovered = queue.release_in_flight().await?;
        if recovered > 0 {
            tracing::info!(recovered, "Recovered mutations left in flight by a previous run");
        }

        let generations = Arc::new(GenerationManager::open(store.clone()).await?);
        let fallbacks = Arc::new(FallbackProvider::new(store));
        fallbacks.load().await?;

        let connectivity = Connectivity::default();
        let executor =
            StrategyExecutor::new(generations.clone(), fallbacks.clone(), remote.clone(), config.network_timeout());
        let reconciler = Arc::new(Reconciler::new(
            queue.clone(),
            remote.clone(),
            connectivity.clone(),
            RetryPolicy::from_config(&config),
            config.min_reconcile_interval(),
            config.network_timeout(),
        )
        .with_applied_retention(config.applied_retention()));

        tracing::info!(
            generation = %config.generation_name,
            active = ?generations.active().await,
            "Engine ready"
        );

        Ok(Self { config, classifier, queue, generations, fallbacks, executor, reconciler, connectivity, remote })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    /// Install: create the configured generation, seed fallbacks, pre-cache the manifest.
    pub async fn install(&self) -> Result<InstallReport, Error> {
        let handle = self.generations.create_generation(&self.config.generation_name).await?;
        self.fallbacks
            .seed(self.config.offline_document_path.as_deref())
            .await?;

        let manifest: Vec<ResourceRequest> = self
            .config
            .manifest_urls()
            .map_err(|e| Error::InvalidInput(e.to_string()))?
            .into_iter()
            .map(ResourceRequest::get)
            .collect();
        let populate = self
            .generations
            .populate(&handle, &manifest, self.remote.as_ref(), self.config.network_timeout())
            .await?;

        Ok(InstallReport { generation: handle.name, populate })
    }

    /// Activate the configured generation and sweep the rest.
    pub async fn activate(&self) -> Result<ActivationReport, Error> {
        self.generations
            .activate(&GenerationHandle::named(&self.config.generation_name))
            .await
    }

    /// Install and activate the configured generation unless it already serves reads.
    ///
    /// A failed install leaves the current generation active.
    pub async fn check_for_updates(&self) -> Result<UpdateStatus, Error> {
        let current = self.generations.active().await;
        let target = self.config.generation_name.clone();
        if current.as_deref() == Some(target.as_str()) {
            return Ok(UpdateStatus::UpToDate { generation: target });
        }

        let install = self.install().await?;
        let activation = self.activate().await?;
        tracing::info!(from = ?current, to = %target, "Cache generation updated");
        Ok(UpdateStatus::Updated { from: current, to: target, install: install.populate, activation })
    }

    /// Answer an inbound request. Never fails: errors become fallback or terminal responses.
    pub async fn handle_request(&self, request: &ResourceRequest) -> Served {
        let category = self.classifier.classify(request);
        if !request.is_get() {
            return self.executor.passthrough(request, category).await;
        }
        self.executor.execute(request, category).await
    }

    /// Submit a user write.
    ///
    /// With the gate open the write is applied directly; a transient failure
    /// or a closed gate queues it for the reconciler instead.
    pub async fn submit_write(
        &self, entity_type: &str, payload: serde_json::Value, id: Option<String>,
    ) -> Result<WriteOutcome, Error> {
        let mutation = match id {
            Some(id) => PendingMutation::with_id(id, entity_type, payload),
            None => PendingMutation::new(entity_type, payload),
        };
        mutation.validate()?;

        let id = mutation.id.clone();
        if self.queue.is_applied(&id).await? {
            tracing::debug!(id = %id, "Write already applied");
            return Ok(WriteOutcome::Applied { id });
        }
        if self.queue.get(&id).await?.is_some() {
            return Ok(WriteOutcome::Queued { id, reason: "already queued".into() });
        }

        if !self.connectivity.is_open() {
            self.queue.enqueue(mutation).await?;
            tracing::info!(id = %id, entity_type, "Queued write while offline");
            return Ok(WriteOutcome::Queued { id, reason: "offline".into() });
        }

        match apply_with_timeout(self.remote.as_ref(), &mutation, self.config.network_timeout()).await {
            ApplyOutcome::Accepted => {
                self.queue.record_applied(&mutation).await?;
                Ok(WriteOutcome::Applied { id })
            }
            ApplyOutcome::Rejected(reason) => {
                tracing::warn!(id = %id, reason = %reason, "Write rejected by remote store");
                Ok(WriteOutcome::Rejected { id, reason })
            }
            ApplyOutcome::TransientError(reason) => {
                self.queue.enqueue(mutation).await?;
                tracing::info!(id = %id, reason = %reason, "Queued write after transient failure");
                Ok(WriteOutcome::Queued { id, reason })
            }
        }
    }

    /// Report connectivity. Opening the gate starts a sync in the background.
    pub fn set_connectivity(&self, online: Option<bool>, authorized: Option<bool>) -> ConnectivityUpdate {
        let restored = self.connectivity.update(online, authorized);
        if restored {
            let reconciler = self.reconciler.clone();
            tokio::spawn(restored_sync(reconciler));
        }
        ConnectivityUpdate { link: self.connectivity.state(), sync_triggered: restored }
    }

    /// Run the reconciler now.
    pub async fn sync(&self, trigger: Trigger) -> Result<ReconcileOutcome, Error> {
        self.reconciler.run(trigger).await
    }

    /// Tick the reconciler every `periodic_sync_interval_ms` until the task is aborted.
    pub fn spawn_periodic_sync(&self) -> JoinHandle<()> {
        let reconciler = self.reconciler.clone();
        let period = self.config.periodic_sync_interval();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval.tick().await;
            loop {
                interval.tick().await;
                match reconciler.run(Trigger::Periodic).await {
                    Ok(ReconcileOutcome::Completed(run)) if !run.results.is_empty() => {
                        tracing::debug!(run_id = %run.id, "Periodic sync completed")
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = %e, "Periodic sync failed"),
                }
            }
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.reconciler.subscribe()
    }

    pub async fn queue_status(&self) -> Result<QueueStatus, Error> {
        Ok(QueueStatus {
            pending: self.queue.list_pending().await?,
            failed: self.queue.list_failed().await?,
            run_state: self.reconciler.state(),
            link: self.connectivity.state(),
        })
    }

    /// Drop a failed mutation the UI has shown to the user.
    pub async fn dismiss_failed(&self, id: &str) -> Result<bool, Error> {
        self.queue.discard(id).await
    }

    pub async fn list_generations(&self) -> Result<Vec<GenerationInfo>, Error> {
        self.generations.list_generations().await
    }

    pub async fn active_generation(&self) -> Option<String> {
        self.generations.active().await
    }

    /// Entry for `request` in the active generation.
    pub async fn cache_get(&self, request: &ResourceRequest) -> Result<Option<CacheEntry>, Error> {
        self.generations.get(request).await
    }

    /// Trim the active generation to `max_entries`. Fallbacks are untouched.
    pub async fn cache_purge(&self, max_entries: usize) -> Result<u64, Error> {
        self.generations.purge_oldest(max_entries).await
    }
}

/// Run after the gate reopens. A throttled attempt waits out the interval and tries once more.
async fn restored_sync(reconciler: Arc<Reconciler>) {
    let mut outcome = reconciler.run(Trigger::ConnectivityRestored).await;
    if let Ok(ReconcileOutcome::Throttled { retry_in_ms }) = outcome {
        tracing::debug!(retry_in_ms, "Connectivity-restored sync deferred by throttle");
        tokio::time::sleep(Duration::from_millis(retry_in_ms)).await;
        outcome = reconciler.run(Trigger::ConnectivityRestored).await;
    }
    match outcome {
        Ok(outcome) => tracing::debug!(?outcome, "Connectivity-restored sync finished"),
        Err(e) => tracing::error!(error = %e, "Connectivity-restored sync failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::ServedFrom;
    use crate::test_support::{FakeRemote, wait_until};
    use offsync_core::MutationStatus;
    use serde_json::json;
    use url::Url;

    fn config(generation: &str) -> AppConfig {
        AppConfig {
            generation_name: generation.to_string(),
            remote_api_origins: vec!["http://localhost:8080/api/".to_string()],
            min_reconcile_interval_ms: 0,
            backoff_base_ms: 1,
            backoff_max_ms: 1,
            ..AppConfig::default()
        }
    }

    fn site() -> FakeRemote {
        FakeRemote::new()
            .with_page("http://localhost:8080/", 200, "<html>home</html>")
            .with_page("http://localhost:8080/index.html", 200, "<html>index</html>")
    }

    async fn engine(config: AppConfig, remote: FakeRemote) -> (Engine, Arc<FakeRemote>) {
        let remote = Arc::new(remote);
        let db = StoreDb::open_in_memory().await.unwrap();
        let engine = Engine::with_parts(config, db, remote.clone()).await.unwrap();
        (engine, remote)
    }

    fn completed_run(outcome: ReconcileOutcome) {
        assert!(matches!(outcome, ReconcileOutcome::Completed(_)), "expected a completed run, got {outcome:?}");
    }

    fn get(url: &str) -> ResourceRequest {
        ResourceRequest::get(Url::parse(url).unwrap())
    }

    #[tokio::test]
    async fn test_install_activate_then_serve_offline() {
        let (engine, remote) = engine(config("v1"), site()).await;
        let report = engine.install().await.unwrap();
        assert_eq!(report.populate.cached.len(), 2);
        engine.activate().await.unwrap();

        remote.clear_pages();
        engine.set_connectivity(Some(false), None);
        let served = engine.handle_request(&get("http://localhost:8080/index.html")).await;
        assert_eq!(served.source, ServedFrom::Cache);
        assert_eq!(served.response.body, b"<html>index</html>".to_vec());
    }

    #[tokio::test]
    async fn test_check_for_updates_installs_once() {
        let db = StoreDb::open_in_memory().await.unwrap();
        let remote: Arc<dyn RemoteStoreClient> = Arc::new(site());

        let v1 = Engine::with_parts(config("v1"), db.clone(), remote.clone()).await.unwrap();
        let status = v1.check_for_updates().await.unwrap();
        assert!(matches!(status, UpdateStatus::Updated { from: None, ref to, .. } if to == "v1"));
        assert!(matches!(v1.check_for_updates().await.unwrap(), UpdateStatus::UpToDate { .. }));

        let v2 = Engine::with_parts(config("v2"), db, remote).await.unwrap();
        match v2.check_for_updates().await.unwrap() {
            UpdateStatus::Updated { from, to, activation, .. } => {
                assert_eq!(from.as_deref(), Some("v1"));
                assert_eq!(to, "v2");
                assert_eq!(activation.swept, vec!["v1".to_string()]);
            }
            other => panic!("unexpected {other:?}"),
        }

        let generations = v2.list_generations().await.unwrap();
        assert_eq!(generations.len(), 1);
        assert_eq!(generations[0].name, "v2");
    }

    #[tokio::test]
    async fn test_failed_install_keeps_active_generation() {
        let db = StoreDb::open_in_memory().await.unwrap();
        let v1 = Engine::with_parts(config("v1"), db.clone(), Arc::new(site())).await.unwrap();
        v1.check_for_updates().await.unwrap();

        let v2 = Engine::with_parts(config("v2"), db, Arc::new(FakeRemote::new())).await.unwrap();
        let result = v2.check_for_updates().await;
        assert!(matches!(result, Err(Error::InstallFailed(_))));
        assert_eq!(v2.active_generation().await.as_deref(), Some("v1"));

        let served = v2.handle_request(&get("http://localhost:8080/")).await;
        assert_eq!(served.source, ServedFrom::Cache);
    }

    #[tokio::test]
    async fn test_first_offline_request_gets_fallback() {
        let (engine, _) = engine(config("v1"), FakeRemote::new()).await;
        let request = get("http://localhost:8080/trails").with_header("Sec-Fetch-Mode", "navigate");
        let served = engine.handle_request(&request).await;
        assert_eq!(served.source, ServedFrom::Fallback);

        let api = engine.handle_request(&get("http://localhost:8080/api/locations")).await;
        assert_eq!(api.response.status, 503);
    }

    #[tokio::test]
    async fn test_offline_write_syncs_on_reconnect() {
        let (engine, remote) = engine(config("v1"), FakeRemote::new()).await;
        engine.set_connectivity(Some(false), None);

        let outcome = engine
            .submit_write("create-location", json!({"name": "X"}), Some("loc-17".into()))
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Queued { id: "loc-17".into(), reason: "offline".into() });
        assert_eq!(remote.applies(), 0);

        let update = engine.set_connectivity(Some(true), None);
        assert!(update.sync_triggered);

        let mut applied = false;
        for _ in 0..200 {
            let status = engine.queue_status().await.unwrap();
            if status.pending.is_empty() && status.run_state == RunState::Idle {
                applied = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(applied, "queue was not drained");
        assert_eq!(remote.applied(), vec!["loc-17"]);

        let again = engine.sync(Trigger::Manual).await.unwrap();
        assert!(matches!(again, ReconcileOutcome::Completed(run) if run.results.is_empty()));
        assert_eq!(remote.applies(), 1);
    }

    #[tokio::test]
    async fn test_reconnect_inside_throttle_window_still_drains() {
        let config = AppConfig { min_reconcile_interval_ms: 300, ..config("v1") };
        let (engine, remote) = engine(config, FakeRemote::new()).await;
        completed_run(engine.sync(Trigger::Periodic).await.unwrap());

        engine.set_connectivity(Some(false), None);
        engine.submit_write("create-location", json!({"name": "Y"}), Some("loc-18".into())).await.unwrap();
        let update = engine.set_connectivity(Some(true), None);
        assert!(update.sync_triggered);

        wait_until(|| remote.applies() == 1).await;
        assert_eq!(remote.applied(), vec!["loc-18"]);
    }

    #[tokio::test]
    async fn test_hung_direct_write_times_out_into_queue() {
        let config = AppConfig { network_timeout_ms: 100, ..config("v1") };
        let remote = FakeRemote::new().with_apply_gate(Arc::new(tokio::sync::Notify::new()));
        let (engine, _) = engine(config, remote).await;

        let outcome = engine.submit_write("comment", json!({"text": "slow"}), Some("c-9".into())).await.unwrap();
        assert!(matches!(outcome, WriteOutcome::Queued { ref id, .. } if id == "c-9"));

        let status = engine.queue_status().await.unwrap();
        assert_eq!(status.pending.len(), 1);
        assert_eq!(status.pending[0].id, "c-9");
    }

    #[tokio::test]
    async fn test_online_write_applied_directly_once() {
        let (engine, remote) = engine(config("v1"), FakeRemote::new()).await;
        let first = engine.submit_write("comment", json!({"text": "hi"}), Some("c-1".into())).await.unwrap();
        assert_eq!(first, WriteOutcome::Applied { id: "c-1".into() });

        let second = engine.submit_write("comment", json!({"text": "hi"}), Some("c-1".into())).await.unwrap();
        assert_eq!(second, WriteOutcome::Applied { id: "c-1".into() });
        assert_eq!(remote.applies(), 1);
        assert!(engine.queue_status().await.unwrap().pending.is_empty());
    }

    #[tokio::test]
    async fn test_online_write_rejected_not_queued() {
        let remote = FakeRemote::new().with_outcomes(vec![ApplyOutcome::Rejected("status 422".into())]);
        let (engine, _) = engine(config("v1"), remote).await;

        let outcome = engine.submit_write("rating", json!({"stars": 9}), None).await.unwrap();
        assert!(matches!(outcome, WriteOutcome::Rejected { .. }));
        assert!(engine.queue_status().await.unwrap().pending.is_empty());
    }

    #[tokio::test]
    async fn test_online_write_transient_is_queued() {
        let remote = FakeRemote::new().with_outcomes(vec![ApplyOutcome::TransientError("status 503".into())]);
        let (engine, _) = engine(config("v1"), remote).await;

        let outcome = engine.submit_write("rating", json!({"stars": 4}), Some("r-1".into())).await.unwrap();
        assert_eq!(outcome, WriteOutcome::Queued { id: "r-1".into(), reason: "status 503".into() });

        let status = engine.queue_status().await.unwrap();
        assert_eq!(status.pending.len(), 1);
        assert_eq!(status.pending[0].retry_count, 0);
    }

    #[tokio::test]
    async fn test_invalid_write_rejected_synchronously() {
        let (engine, remote) = engine(config("v1"), FakeRemote::new()).await;
        let result = engine.submit_write("Bad Type", json!({}), None).await;
        assert!(matches!(result, Err(Error::InvalidMutation(_))));
        let result = engine.submit_write("note", json!("not an object"), None).await;
        assert!(matches!(result, Err(Error::InvalidMutation(_))));
        assert_eq!(remote.applies(), 0);
        assert!(engine.queue_status().await.unwrap().pending.is_empty());
    }

    #[tokio::test]
    async fn test_failed_mutation_dismissed() {
        let remote = FakeRemote::new().with_outcomes(vec![ApplyOutcome::Rejected("status 400".into())]);
        let (engine, _) = engine(config("v1"), remote).await;
        engine.set_connectivity(Some(false), None);
        engine.submit_write("note", json!({"a": 1}), Some("n-1".into())).await.unwrap();
        engine.connectivity().update(Some(true), None);

        engine.sync(Trigger::Manual).await.unwrap();
        let status = engine.queue_status().await.unwrap();
        assert_eq!(status.failed.len(), 1);
        assert_eq!(status.failed[0].status, MutationStatus::Failed);

        assert!(engine.dismiss_failed("n-1").await.unwrap());
        assert!(engine.queue_status().await.unwrap().failed.is_empty());
    }

    #[tokio::test]
    async fn test_reopen_recovers_in_flight() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.sqlite");
        {
            let queue = SqliteQueue::new(StoreDb::open(&path).await.unwrap(), 5);
            queue
                .enqueue(PendingMutation::with_id("crash-1", "note", json!({})))
                .await
                .unwrap();
            queue.mark_in_flight("crash-1").await.unwrap();
        }

        let remote: Arc<dyn RemoteStoreClient> = Arc::new(FakeRemote::new());
        let engine = Engine::with_parts(config("v1"), StoreDb::open(&path).await.unwrap(), remote)
            .await
            .unwrap();
        let status = engine.queue_status().await.unwrap();
        assert_eq!(status.pending.len(), 1);
        assert_eq!(status.pending[0].id, "crash-1");
        assert_eq!(status.pending[0].status, MutationStatus::Pending);
    }

    #[tokio::test]
    async fn test_non_get_passes_through() {
        let remote = FakeRemote::new().with_page("http://localhost:8080/api/comments", 201, "created");
        let (engine, _) = engine(config("v1"), remote).await;

        let request = ResourceRequest::new("POST", Url::parse("http://localhost:8080/api/comments").unwrap())
            .with_body(b"{}".to_vec());
        let served = engine.handle_request(&request).await;
        assert_eq!(served.response.status, 201);
        assert!(engine.cache_get(&get("http://localhost:8080/api/comments")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cache_purge_keeps_fallbacks() {
        let (engine, remote) = engine(config("v1"), site()).await;
        engine.check_for_updates().await.unwrap();

        assert_eq!(engine.cache_purge(0).await.unwrap(), 2);
        remote.clear_pages();
        let served = engine
            .handle_request(&get("http://localhost:8080/").with_header("accept", "text/html"))
            .await;
        assert_eq!(served.source, ServedFrom::Fallback);
    }

    #[tokio::test]
    async fn test_periodic_sync_drains_queue() {
        let config = AppConfig { periodic_sync_interval_ms: 50, ..config("v1") };
        let (engine, remote) = engine(config, FakeRemote::new()).await;
        engine.set_connectivity(Some(false), None);
        engine.submit_write("note", json!({}), Some("p-1".into())).await.unwrap();
        engine.connectivity().update(Some(true), None);

        let handle = engine.spawn_periodic_sync();
        wait_until(|| remote.applies() == 1).await;
        handle.abort();
    }
}
