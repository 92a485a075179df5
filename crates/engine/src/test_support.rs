//! Scripted remote store used by engine tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use offsync_client::{ApplyOutcome, RemoteStoreClient};
use offsync_core::{Error, PendingMutation, ResourceRequest, Response};

#[derive(Default)]
pub struct FakeRemote {
    pages: Mutex<HashMap<String, Response>>,
    outcomes: Mutex<VecDeque<ApplyOutcome>>,
    default_outcome: Mutex<Option<ApplyOutcome>>,
    fetch_gate: Option<Arc<Notify>>,
    apply_gate: Option<Arc<Notify>>,
    pub fetch_calls: AtomicUsize,
    pub apply_calls: AtomicUsize,
    pub applied_ids: Mutex<Vec<String>>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, url: &str, status: u16, body: &str) -> Self {
        self.set_page(url, status, body);
        self
    }

    /// Fetches wait for a permit on `gate` before answering.
    pub fn with_fetch_gate(mut self, gate: Arc<Notify>) -> Self {
        self.fetch_gate = Some(gate);
        self
    }

    /// Applies wait for a permit on `gate` before answering.
    pub fn with_apply_gate(mut self, gate: Arc<Notify>) -> Self {
        self.apply_gate = Some(gate);
        self
    }

    /// Outcomes returned by successive applies, then the default.
    pub fn with_outcomes(self, outcomes: Vec<ApplyOutcome>) -> Self {
        *self.outcomes.lock().unwrap() = outcomes.into();
        self
    }

    pub fn with_default_outcome(self, outcome: ApplyOutcome) -> Self {
        *self.default_outcome.lock().unwrap() = Some(outcome);
        self
    }

    pub fn set_page(&self, url: &str, status: u16, body: &str) {
        let response = Response::with_content_type(status, "text/plain", body);
        self.pages.lock().unwrap().insert(url.to_string(), response);
    }

    /// Simulate losing the network: every later fetch fails.
    pub fn clear_pages(&self) {
        self.pages.lock().unwrap().clear();
    }

    pub fn fetches(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn applies(&self) -> usize {
        self.apply_calls.load(Ordering::SeqCst)
    }

    pub fn applied(&self) -> Vec<String> {
        self.applied_ids.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteStoreClient for FakeRemote {
    async fn fetch(&self, request: &ResourceRequest) -> Result<Response, Error> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.fetch_gate {
            gate.notified().await;
        }
        let page = self.pages.lock().unwrap().get(request.url.as_str()).cloned();
        page.ok_or_else(|| Error::Network(format!("connection refused: {request}")))
    }

    async fn apply(&self, mutation: &PendingMutation) -> ApplyOutcome {
        self.apply_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.apply_gate {
            gate.notified().await;
        }
        self.applied_ids.lock().unwrap().push(mutation.id.clone());
        let scripted = self.outcomes.lock().unwrap().pop_front();
        scripted
            .or_else(|| self.default_outcome.lock().unwrap().clone())
            .unwrap_or(ApplyOutcome::Accepted)
    }
}

/// Poll `condition` until it holds, panicking after two seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
