//! Online/authorized gate.
//!
//! The host reports link and auth state; reconciliation and direct writes
//! only proceed while both are true.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Snapshot of the two flags behind the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkState {
    pub online: bool,
    pub authorized: bool,
}

impl LinkState {
    pub fn is_open(&self) -> bool {
        self.online && self.authorized
    }
}

/// Shared connectivity gate. Clones observe the same state.
#[derive(Debug, Clone)]
pub struct Connectivity {
    tx: Arc<watch::Sender<LinkState>>,
}

impl Connectivity {
    pub fn new(online: bool, authorized: bool) -> Self {
        let (tx, _rx) = watch::channel(LinkState { online, authorized });
        Self { tx: Arc::new(tx) }
    }

    pub fn state(&self) -> LinkState {
        *self.tx.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state().is_open()
    }

    /// Update either flag. Returns true when the gate went from closed to open.
    pub fn update(&self, online: Option<bool>, authorized: Option<bool>) -> bool {
        let was_open = self.is_open();
        self.tx.send_modify(|state| {
            if let Some(online) = online {
                state.online = online;
            }
            if let Some(authorized) = authorized {
                state.authorized = authorized;
            }
        });
        let now = self.state();
        tracing::debug!(online = now.online, authorized = now.authorized, "Connectivity updated");
        !was_open && now.is_open()
    }

    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.tx.subscribe()
    }

    /// Resolve once the gate is closed (immediately if it already is).
    pub async fn closed(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|state| !state.is_open()).await;
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(true, true)
    }
}
