//! Cache generation lifecycle: create, populate, activate, sweep.
//!
//! The active generation name is mirrored in memory so reads resolve it
//! without a store round-trip. Activation commits in the store first and
//! only then swaps the in-memory name, after which superseded generations
//! are deleted. Readers therefore always see exactly one active generation.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use offsync_client::RemoteStoreClient;
use offsync_core::{CacheEntry, CacheStore, Error, GenerationInfo, ResourceRequest, Response};

/// Reference to a generation created by [`GenerationManager::create_generation`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationHandle {
    pub name: String,
}

impl GenerationHandle {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Per-asset outcome of populating a generation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopulateReport {
    pub generation: String,
    pub cached: Vec<String>,
    /// `(url, reason)` for every asset that could not be stored.
    pub failed: Vec<(String, String)>,
}

/// Result of activating a generation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationReport {
    pub active: String,
    pub previous: Option<String>,
    pub swept: Vec<String>,
    /// Generations whose deletion failed; retried on the next activation.
    pub sweep_failures: Vec<String>,
}

/// Owner of named cache generations.
pub struct GenerationManager {
    store: Arc<dyn CacheStore>,
    active: RwLock<Option<String>>,
}

impl GenerationManager {
    /// Load the active generation from the store.
    pub async fn open(store: Arc<dyn CacheStore>) -> Result<Self, Error> {
        let active = store.active_generation().await?;
        Ok(Self { store, active: RwLock::new(active) })
    }

    /// Name of the generation serving reads, if one has been activated.
    pub async fn active(&self) -> Option<String> {
        self.active.read().await.clone()
    }

    /// Allocate an empty generation. Idempotent on an existing name.
    pub async fn create_generation(&self, name: &str) -> Result<GenerationHandle, Error> {
        if name.trim().is_empty() {
            return Err(Error::InvalidInput("generation name must not be empty".into()));
        }
        if self.store.create_generation(name).await? {
            tracing::info!(generation = name, "Created cache generation");
        } else {
            tracing::debug!(generation = name, "Cache generation already exists");
        }
        Ok(GenerationHandle::named(name))
    }

    /// Fetch and store every manifest entry into `handle`.
    ///
    /// Entries are fetched concurrently and fail independently. Only an empty
    /// manifest, or one where nothing could be stored, is an error.
    pub async fn populate(
        &self, handle: &GenerationHandle, manifest: &[ResourceRequest], remote: &dyn RemoteStoreClient,
        timeout: Duration,
    ) -> Result<PopulateReport, Error> {
        if manifest.is_empty() {
            return Err(Error::InstallFailed("manifest is empty".into()));
        }

        let fetches = manifest.iter().map(|request| async move {
            let outcome = match tokio::time::timeout(timeout, remote.fetch(request)).await {
                Ok(Ok(response)) if response.is_success() => {
                    let entry = CacheEntry::new(&handle.name, request, response);
                    self.store.put_entry(&entry, false).await.and_then(|written| {
                        if written { Ok(()) } else { Err(Error::UnknownGeneration(handle.name.clone())) }
                    })
                }
                Ok(Ok(response)) => Err(Error::UncacheableResponse(response.status)),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(Error::Timeout(request.to_string())),
            };
            (request.url.to_string(), outcome)
        });

        let mut report = PopulateReport { generation: handle.name.clone(), ..PopulateReport::default() };
        for (url, outcome) in join_all(fetches).await {
            match outcome {
                Ok(()) => report.cached.push(url),
                Err(e) => {
                    tracing::warn!(generation = %handle.name, url = %url, error = %e, "Failed to pre-cache asset");
                    report.failed.push((url, e.to_string()));
                }
            }
        }

        if report.cached.is_empty() {
            return Err(Error::InstallFailed(format!(
                "no manifest entry could be cached ({} failed)",
                report.failed.len()
            )));
        }

        tracing::info!(
            generation = %handle.name,
            cached = report.cached.len(),
            failed = report.failed.len(),
            "Populated cache generation"
        );
        Ok(report)
    }

    /// Make `handle` the sole active generation and delete all others.
    ///
    /// Sweep failures are logged and reported, never returned as errors: the
    /// new generation already serves reads at that point.
    pub async fn activate(&self, handle: &GenerationHandle) -> Result<ActivationReport, Error> {
        // Pointer and store flag change under one guard.
        let previous = {
            let mut active = self.active.write().await;
            self.store.activate_generation(&handle.name).await?;
            active.replace(handle.name.clone())
        };

        let mut report = ActivationReport {
            active: handle.name.clone(),
            previous: previous.filter(|p| p != &handle.name),
            ..ActivationReport::default()
        };

        for generation in self.store.list_generations().await? {
            if generation.name == handle.name {
                continue;
            }
            match self.store.delete_generation(&generation.name).await {
                Ok(_) => report.swept.push(generation.name),
                Err(e) => {
                    let err = Error::GenerationActivation(format!("{}: {e}", generation.name));
                    tracing::warn!(error = %err, "Failed to delete superseded generation");
                    report.sweep_failures.push(generation.name);
                }
            }
        }

        tracing::info!(
            generation = %handle.name,
            previous = ?report.previous,
            swept = report.swept.len(),
            "Activated cache generation"
        );
        Ok(report)
    }

    /// Entry for `request` in the active generation.
    pub async fn get(&self, request: &ResourceRequest) -> Result<Option<CacheEntry>, Error> {
        let Some(generation) = self.active().await else {
            return Ok(None);
        };
        self.store.get_entry(&generation, &request.cache_key()).await
    }

    /// Store `response` into `generation` if it is still the active one.
    ///
    /// Returns false (and writes nothing) once `generation` was superseded.
    pub async fn put(&self, generation: &str, request: &ResourceRequest, response: Response) -> Result<bool, Error> {
        let entry = CacheEntry::new(generation, request, response);
        let written = self.store.put_entry(&entry, true).await?;
        if !written {
            tracing::debug!(generation, request = %request, "Skipped write to superseded generation");
        }
        Ok(written)
    }

    pub async fn delete_generation(&self, name: &str) -> Result<bool, Error> {
        self.store.delete_generation(name).await
    }

    pub async fn list_generations(&self) -> Result<Vec<GenerationInfo>, Error> {
        self.store.list_generations().await
    }

    /// Trim the active generation to `max_entries`, oldest first.
    pub async fn purge_oldest(&self, max_entries: usize) -> Result<u64, Error> {
        match self.active().await {
            Some(generation) => self.store.purge_oldest_entries(&generation, max_entries).await,
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeRemote;
    use offsync_core::StoreDb;
    use url::Url;

    fn get(url: &str) -> ResourceRequest {
        ResourceRequest::get(Url::parse(url).unwrap())
    }

    async fn manager() -> GenerationManager {
        let store: Arc<dyn CacheStore> = Arc::new(StoreDb::open_in_memory().await.unwrap());
        GenerationManager::open(store).await.unwrap()
    }

    const TIMEOUT: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn test_create_generation_idempotent() {
        let m = manager().await;
        let a = m.create_generation("v1").await.unwrap();
        let b = m.create_generation("v1").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(m.list_generations().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_populate_collects_partial_failures() {
        let m = manager().await;
        let remote = FakeRemote::new()
            .with_page("https://app.example.com/", 200, "<html>shell</html>")
            .with_page("https://app.example.com/missing.css", 404, "nope");
        let handle = m.create_generation("v1").await.unwrap();

        let manifest = vec![
            get("https://app.example.com/"),
            get("https://app.example.com/missing.css"),
            get("https://app.example.com/unreachable.js"),
        ];
        let report = m.populate(&handle, &manifest, &remote, TIMEOUT).await.unwrap();

        assert_eq!(report.cached, vec!["https://app.example.com/".to_string()]);
        assert_eq!(report.failed.len(), 2);
    }

    #[tokio::test]
    async fn test_populate_fails_when_nothing_cached() {
        let m = manager().await;
        let remote = FakeRemote::new();
        let handle = m.create_generation("v1").await.unwrap();

        let result = m.populate(&handle, &[get("https://app.example.com/")], &remote, TIMEOUT).await;
        assert!(matches!(result, Err(Error::InstallFailed(_))));

        let result = m.populate(&handle, &[], &remote, TIMEOUT).await;
        assert!(matches!(result, Err(Error::InstallFailed(_))));
    }

    #[tokio::test]
    async fn test_activate_sweeps_older_generations() {
        let m = manager().await;
        let remote = FakeRemote::new().with_page("https://app.example.com/", 200, "v");
        let manifest = [get("https://app.example.com/")];

        let v1 = m.create_generation("v1").await.unwrap();
        m.populate(&v1, &manifest, &remote, TIMEOUT).await.unwrap();
        m.activate(&v1).await.unwrap();

        let v2 = m.create_generation("v2").await.unwrap();
        m.populate(&v2, &manifest, &remote, TIMEOUT).await.unwrap();
        let report = m.activate(&v2).await.unwrap();

        assert_eq!(report.previous.as_deref(), Some("v1"));
        assert_eq!(report.swept, vec!["v1".to_string()]);

        let generations = m.list_generations().await.unwrap();
        assert_eq!(generations.len(), 1);
        assert!(generations[0].active);
        assert_eq!(m.active().await.as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn test_reads_follow_active_generation() {
        let m = manager().await;
        let request = get("https://app.example.com/app.js");

        let v1 = m.create_generation("v1").await.unwrap();
        m.activate(&v1).await.unwrap();
        m.put("v1", &request, Response::with_content_type(200, "text/javascript", "old"))
            .await
            .unwrap();
        assert_eq!(m.get(&request).await.unwrap().unwrap().response.body, b"old".to_vec());

        let v2 = m.create_generation("v2").await.unwrap();
        m.activate(&v2).await.unwrap();
        assert!(m.get(&request).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_to_superseded_generation_is_noop() {
        let m = manager().await;
        let request = get("https://app.example.com/app.js");

        let v1 = m.create_generation("v1").await.unwrap();
        m.activate(&v1).await.unwrap();
        let v2 = m.create_generation("v2").await.unwrap();
        m.activate(&v2).await.unwrap();

        let written = m
            .put("v1", &request, Response::with_content_type(200, "text/javascript", "late"))
            .await
            .unwrap();
        assert!(!written);
        assert!(m.get(&request).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_activations_agree_with_store() {
        let store: Arc<dyn CacheStore> = Arc::new(StoreDb::open_in_memory().await.unwrap());
        let m = GenerationManager::open(store.clone()).await.unwrap();
        let mut handles = Vec::new();
        for i in 0..8 {
            handles.push(m.create_generation(&format!("v{i}")).await.unwrap());
        }

        let results = futures::future::join_all(handles.iter().map(|h| m.activate(h))).await;
        assert!(results.iter().any(|r| r.is_ok()));

        let active = m.active().await;
        assert!(active.is_some());
        assert_eq!(store.active_generation().await.unwrap(), active);
        let names: Vec<String> = m.list_generations().await.unwrap().into_iter().map(|g| g.name).collect();
        assert!(names.contains(active.as_ref().unwrap()));
    }

    #[tokio::test]
    async fn test_activate_unknown_generation_keeps_current() {
        let m = manager().await;
        let v1 = m.create_generation("v1").await.unwrap();
        m.activate(&v1).await.unwrap();

        let result = m.activate(&GenerationHandle::named("ghost")).await;
        assert!(matches!(result, Err(Error::UnknownGeneration(_))));
        assert_eq!(m.active().await.as_deref(), Some("v1"));
    }
}
