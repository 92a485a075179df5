//! Run-lock for the sync reconciler.

use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

const IDLE: u8 = 0;
const RUNNING: u8 = 1;

/// Reconciler state as seen by the run-lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
}

/// `Idle`/`Running` state machine moved by a single compare-and-set.
#[derive(Debug, Default)]
pub struct RunLock {
    state: AtomicU8,
}

impl RunLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move `Idle -> Running`. Returns `None` when a run already holds the lock.
    pub fn try_acquire(&self) -> Option<RunGuard<'_>> {
        self.state
            .compare_exchange(IDLE, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard { lock: self })
    }

    pub fn state(&self) -> RunState {
        match self.state.load(Ordering::Acquire) {
            RUNNING => RunState::Running,
            _ => RunState::Idle,
        }
    }
}

/// Held for the duration of a run; moves the lock back to `Idle` on drop.
#[derive(Debug)]
pub struct RunGuard<'a> {
    lock: &'a RunLock,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.lock.state.store(IDLE, Ordering::Release);
    }
}
