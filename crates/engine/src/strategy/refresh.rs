//! Deduplication of background refreshes.

use std::sync::Arc;

use dashmap::DashSet;

/// Cache keys with a background refresh in flight.
#[derive(Debug, Clone, Default)]
pub struct RefreshTracker {
    in_flight: Arc<DashSet<String>>,
}

impl RefreshTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key`. Returns `None` if a refresh for it is already running.
    pub fn try_begin(&self, key: &str) -> Option<RefreshGuard> {
        if self.in_flight.insert(key.to_string()) {
            Some(RefreshGuard { key: key.to_string(), in_flight: self.in_flight.clone() })
        } else {
            None
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

/// Releases its key when dropped, including when the refresh task is cancelled.
#[derive(Debug)]
pub struct RefreshGuard {
    key: String,
    in_flight: Arc<DashSet<String>>,
}

impl Drop for RefreshGuard {
    fn drop(&mut self) {
        self.in_flight.remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_claim_rejected_until_release() {
        let tracker = RefreshTracker::new();
        let guard = tracker.try_begin("k").unwrap();
        assert!(tracker.try_begin("k").is_none());
        assert!(tracker.try_begin("other").is_some());
        assert_eq!(tracker.in_flight(), 1);

        drop(guard);
        assert_eq!(tracker.in_flight(), 0);
        assert!(tracker.try_begin("k").is_some());
    }
}
