//! Metrics for the realtime layer
//!
//! - Counters only
//! - Monotonic increase
//! - Reset only when the client is constructed
//! - Thread-safe but lock-free

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Operational counters for one realtime client
///
/// # Thread Safety
///
/// All counters use atomic operations with Relaxed ordering. Counters are
/// read for reporting only, never to make decisions.
#[derive(Debug, Default)]
pub struct RealtimeMetrics {
    /// Transport channels opened (including re-subscriptions)
    channels_opened: AtomicU64,
    /// Transport channels closed
    channels_closed: AtomicU64,
    /// Transport open calls that failed
    open_failures: AtomicU64,
    /// Applied status transitions
    status_transitions: AtomicU64,
    /// Events handed to the dispatcher
    events_dispatched: AtomicU64,
    /// Listener deliveries that succeeded
    listener_deliveries: AtomicU64,
    /// Listener calls that panicked
    listener_failures: AtomicU64,
    /// Invalidation callbacks issued
    invalidations: AtomicU64,
    /// Backoff retries scheduled
    retries_scheduled: AtomicU64,
    /// Forced reconnection passes started
    forced_reconnects: AtomicU64,
}

impl RealtimeMetrics {
    /// Create a registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_channels_opened(&self) {
        self.channels_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_channels_closed(&self) {
        self.channels_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_open_failures(&self) {
        self.open_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_status_transitions(&self) {
        self.status_transitions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_events_dispatched(&self) {
        self.events_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of one fan-out
    pub fn add_deliveries(&self, delivered: u64, failed: u64) {
        self.listener_deliveries.fetch_add(delivered, Ordering::Relaxed);
        self.listener_failures.fetch_add(failed, Ordering::Relaxed);
    }

    pub fn increment_invalidations(&self) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_retries_scheduled(&self) {
        self.retries_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_forced_reconnects(&self) {
        self.forced_reconnects.fetch_add(1, Ordering::Relaxed);
    }

    /// Current counters as JSON
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.snapshot()).unwrap_or_else(|_| "{}".to_string())
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            channels_opened: self.channels_opened.load(Ordering::Relaxed),
            channels_closed: self.channels_closed.load(Ordering::Relaxed),
            open_failures: self.open_failures.load(Ordering::Relaxed),
            status_transitions: self.status_transitions.load(Ordering::Relaxed),
            events_dispatched: self.events_dispatched.load(Ordering::Relaxed),
            listener_deliveries: self.listener_deliveries.load(Ordering::Relaxed),
            listener_failures: self.listener_failures.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            retries_scheduled: self.retries_scheduled.load(Ordering::Relaxed),
            forced_reconnects: self.forced_reconnects.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of all metrics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub channels_opened: u64,
    pub channels_closed: u64,
    pub open_failures: u64,
    pub status_transitions: u64,
    pub events_dispatched: u64,
    pub listener_deliveries: u64,
    pub listener_failures: u64,
    pub invalidations: u64,
    pub retries_scheduled: u64,
    pub forced_reconnects: u64,
}
