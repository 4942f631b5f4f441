//! Metrics window for breaker outcomes
//!
//! A window is a flat set of counters scoped to one time slice and one state.
//! It is replaced wholesale at every rollover; nothing carries over except the
//! batch number, which only ever grows.

use std::sync::{PoisonError, RwLock};
use std::time::Duration;

/// Counters for the active window
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsWindow {
    /// Monotonic window id, bumped at every rollover
    pub batch: u64,
    /// Deadline on the breaker clock; `None` never expires
    pub expiry: Option<Duration>,
    /// Calls admitted into this window
    pub total_requests: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub consecutive_successes: u64,
    pub consecutive_failures: u64,
}

impl MetricsWindow {
    /// Zero every counter. Batch and expiry belong to the owner and are kept.
    pub fn reset(&mut self) {
        self.total_requests = 0;
        self.total_successes = 0;
        self.total_failures = 0;
        self.consecutive_successes = 0;
        self.consecutive_failures = 0;
    }

    /// Count an admitted call
    pub fn record_request(&mut self) {
        self.total_requests += 1;
    }

    pub fn record_success(&mut self) {
        self.total_successes += 1;
        self.consecutive_successes += 1;
        self.consecutive_failures = 0;
    }

    pub fn record_failure(&mut self) {
        self.total_failures += 1;
        self.consecutive_failures += 1;
        self.consecutive_successes = 0;
    }

    /// Whether the deadline has been reached at `now`
    pub fn is_expired(&self, now: Duration) -> bool {
        matches!(self.expiry, Some(expiry) if now >= expiry)
    }

    /// Failures over admitted requests, 0.0 for an empty window
    pub fn failure_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.total_failures as f64 / self.total_requests as f64
        }
    }

    /// Admitted calls whose outcome has not been reported yet
    pub fn in_flight(&self) -> u64 {
        self.total_requests
            .saturating_sub(self.total_successes + self.total_failures)
    }
}

/// Shared handle to a breaker's window
///
/// The state machine guards read the window through this handle while the
/// breaker mutates it. Every mutation happens while the breaker lock is held;
/// the inner lock only provides `Sync` interior mutability and is never held
/// across a call into the state machine.
#[derive(Debug, Default)]
pub(crate) struct WindowStore {
    window: RwLock<MetricsWindow>,
}

impl WindowStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Copy of the current window
    pub(crate) fn snapshot(&self) -> MetricsWindow {
        self.window
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn batch(&self) -> u64 {
        self.window
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .batch
    }

    pub(crate) fn is_expired(&self, now: Duration) -> bool {
        self.window
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_expired(now)
    }

    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut MetricsWindow) -> R) -> R {
        let mut window = self.window.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut window)
    }

    /// Start a new window with the given deadline and return its batch
    pub(crate) fn roll(&self, expiry: Option<Duration>) -> u64 {
        self.update(|window| {
            window.batch += 1;
            window.reset();
            window.expiry = expiry;
            window.batch
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_without_outcomes_leaves_zero_counters() {
        let mut window = MetricsWindow::default();
        window.reset();

        assert_eq!(window, MetricsWindow::default());
    }

    #[test]
    fn test_reset_keeps_batch_and_expiry() {
        let mut window = MetricsWindow {
            batch: 7,
            expiry: Some(Duration::from_secs(3)),
            ..Default::default()
        };
        window.record_request();
        window.record_failure();

        window.reset();

        assert_eq!(window.batch, 7);
        assert_eq!(window.expiry, Some(Duration::from_secs(3)));
        assert_eq!(window.total_requests, 0);
        assert_eq!(window.total_failures, 0);
        assert_eq!(window.consecutive_failures, 0);
    }

    #[test]
    fn test_success_and_failure_streaks_are_exclusive() {
        let mut window = MetricsWindow::default();

        window.record_request();
        window.record_success();
        window.record_request();
        window.record_success();
        assert_eq!(window.consecutive_successes, 2);
        assert_eq!(window.consecutive_failures, 0);

        window.record_request();
        window.record_failure();
        assert_eq!(window.consecutive_successes, 0);
        assert_eq!(window.consecutive_failures, 1);

        window.record_request();
        window.record_success();
        assert_eq!(window.consecutive_successes, 1);
        assert_eq!(window.consecutive_failures, 0);

        assert_eq!(window.total_requests, 4);
        assert_eq!(window.total_successes, 3);
        assert_eq!(window.total_failures, 1);
    }

    #[test]
    fn test_expiry_checks() {
        let never = MetricsWindow::default();
        assert!(!never.is_expired(Duration::from_secs(1_000_000)));

        let window = MetricsWindow {
            expiry: Some(Duration::from_secs(2)),
            ..Default::default()
        };
        assert!(!window.is_expired(Duration::from_millis(1999)));
        assert!(window.is_expired(Duration::from_secs(2)));
        assert!(window.is_expired(Duration::from_secs(3)));
    }

    #[test]
    fn test_failure_rate_and_in_flight() {
        let mut window = MetricsWindow::default();
        assert_eq!(window.failure_rate(), 0.0);

        for _ in 0..4 {
            window.record_request();
        }
        window.record_failure();
        window.record_success();

        assert_eq!(window.failure_rate(), 0.25);
        assert_eq!(window.in_flight(), 2);
    }

    #[test]
    fn test_store_roll_bumps_batch_and_clears() {
        let store = WindowStore::new();
        assert_eq!(store.batch(), 0);

        let first = store.roll(None);
        store.update(|w| {
            w.record_request();
            w.record_failure();
        });

        let second = store.roll(Some(Duration::from_secs(5)));
        let window = store.snapshot();

        assert_eq!(first, 1);
        assert_eq!(second, 2);
        assert_eq!(window.batch, 2);
        assert_eq!(window.total_requests, 0);
        assert_eq!(window.total_failures, 0);
        assert_eq!(window.expiry, Some(Duration::from_secs(5)));
        assert!(!store.is_expired(Duration::from_secs(4)));
        assert!(store.is_expired(Duration::from_secs(5)));
    }
}
