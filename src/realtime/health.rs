//! # Connection Health
//!
//! Folds per-channel statuses into one signal the UI can trust.
//!
//! Snapshots are never mutated in place: every status transition produces a
//! new snapshot that replaces the previous one, so consumers can diff old
//! against new.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::channel::{ChannelHandle, ChannelId, ChannelStatus};

/// Aggregate classification of all live channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthLevel {
    /// No channels are registered
    Idle,
    /// Every channel is subscribed
    Connected,
    /// Some, but not all, channels are subscribed
    Partial,
    /// No channel is subscribed
    Disconnected,
}

/// Point-in-time summary of connectivity
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    pub per_channel: BTreeMap<ChannelId, ChannelStatus>,
    pub connected_count: usize,
    pub total_count: usize,
    pub is_fully_connected: bool,
    pub last_update: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthSnapshot {
    /// Snapshot of a registry with no channels
    pub fn empty() -> Self {
        recompute(std::iter::empty())
    }

    pub fn level(&self) -> HealthLevel {
        if self.total_count == 0 {
            HealthLevel::Idle
        } else if self.connected_count == self.total_count {
            HealthLevel::Connected
        } else if self.connected_count == 0 {
            HealthLevel::Disconnected
        } else {
            HealthLevel::Partial
        }
    }

    /// Fraction of channels subscribed; 1.0 when there are none
    pub fn connected_ratio(&self) -> f64 {
        if self.total_count == 0 {
            1.0
        } else {
            self.connected_count as f64 / self.total_count as f64
        }
    }

    /// Whether this snapshot warrants a user-facing alert under `policy`
    pub fn should_alert(&self, policy: &AlertPolicy) -> bool {
        match self.level() {
            HealthLevel::Idle | HealthLevel::Connected => false,
            HealthLevel::Disconnected => true,
            HealthLevel::Partial => self.connected_ratio() < policy.min_connected_ratio,
        }
    }

    pub fn status_of(&self, channel: ChannelId) -> Option<ChannelStatus> {
        self.per_channel.get(&channel).copied()
    }
}

/// Escalation threshold for partially connected states
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlertPolicy {
    /// Partial states alert once the connected fraction drops below this
    #[serde(default = "default_min_connected_ratio")]
    pub min_connected_ratio: f64,
}

fn default_min_connected_ratio() -> f64 {
    0.5
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self {
            min_connected_ratio: default_min_connected_ratio(),
        }
    }
}

/// Build a snapshot from the current handles. Pure, O(channels).
pub fn recompute<'a>(handles: impl IntoIterator<Item = &'a ChannelHandle>) -> HealthSnapshot {
    let mut per_channel = BTreeMap::new();
    let mut connected_count = 0;
    let mut latest_error: Option<(DateTime<Utc>, &str)> = None;

    for handle in handles {
        per_channel.insert(handle.id(), handle.status());

        if handle.status().is_subscribed() {
            connected_count += 1;
            continue;
        }

        if let (Some(at), Some(message)) = (handle.last_error_at(), handle.last_error()) {
            if latest_error.map_or(true, |(seen, _)| at >= seen) {
                latest_error = Some((at, message));
            }
        }
    }

    let total_count = per_channel.len();
    let is_fully_connected = connected_count == total_count;

    HealthSnapshot {
        per_channel,
        connected_count,
        total_count,
        is_fully_connected,
        last_update: Utc::now(),
        error: if is_fully_connected {
            None
        } else {
            latest_error.map(|(_, message)| message.to_string())
        },
    }
}

/// Publishes health snapshots to pollers and watchers
#[derive(Debug)]
pub struct ConnectionHealthAggregator {
    tx: watch::Sender<HealthSnapshot>,
}

impl Default for ConnectionHealthAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionHealthAggregator {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(HealthSnapshot::empty());
        Self { tx }
    }

    /// Recompute from `handles` and replace the published snapshot
    pub fn publish<'a>(
        &self,
        handles: impl IntoIterator<Item = &'a ChannelHandle>,
    ) -> HealthSnapshot {
        let snapshot = recompute(handles);
        self.tx.send_replace(snapshot.clone());
        snapshot
    }

    pub fn current(&self) -> HealthSnapshot {
        self.tx.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<HealthSnapshot> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::descriptor::SubscriptionDescriptor;

    fn handle(id: u64, status: ChannelStatus, error: Option<&str>) -> ChannelHandle {
        let mut h = ChannelHandle::new(
            ChannelId(id),
            SubscriptionDescriptor::new(format!("resource-{}", id)),
        );
        match status {
            ChannelStatus::Connecting => {}
            ChannelStatus::Subscribed => {
                h.transition(ChannelStatus::Subscribed, None);
            }
            ChannelStatus::Errored => {
                h.transition(ChannelStatus::Errored, error.map(str::to_string));
            }
            ChannelStatus::Closed => {
                h.close();
            }
        }
        h
    }

    #[test]
    fn test_empty_is_idle() {
        let snapshot = HealthSnapshot::empty();
        assert_eq!(snapshot.level(), HealthLevel::Idle);
        assert_eq!(snapshot.total_count, 0);
        assert!(snapshot.is_fully_connected);
        assert!(snapshot.error.is_none());
    }

    #[test]
    fn test_all_subscribed() {
        let handles = vec![
            handle(1, ChannelStatus::Subscribed, None),
            handle(2, ChannelStatus::Subscribed, None),
        ];

        let snapshot = recompute(&handles);
        assert_eq!(snapshot.connected_count, 2);
        assert_eq!(snapshot.total_count, 2);
        assert!(snapshot.is_fully_connected);
        assert_eq!(snapshot.level(), HealthLevel::Connected);
    }

    #[test]
    fn test_partial() {
        let handles = vec![
            handle(1, ChannelStatus::Subscribed, None),
            handle(2, ChannelStatus::Errored, Some("payments dropped")),
            handle(3, ChannelStatus::Connecting, None),
        ];

        let snapshot = recompute(&handles);
        assert_eq!(snapshot.connected_count, 1);
        assert_eq!(snapshot.total_count, 3);
        assert!(!snapshot.is_fully_connected);
        assert_eq!(snapshot.level(), HealthLevel::Partial);
        assert_eq!(snapshot.error.as_deref(), Some("payments dropped"));
        assert_eq!(snapshot.status_of(ChannelId(2)), Some(ChannelStatus::Errored));
    }

    #[test]
    fn test_disconnected_reports_error() {
        let handles = vec![
            handle(1, ChannelStatus::Errored, Some("network offline")),
            handle(2, ChannelStatus::Connecting, None),
        ];

        let snapshot = recompute(&handles);
        assert_eq!(snapshot.connected_count, 0);
        assert_eq!(snapshot.level(), HealthLevel::Disconnected);
        assert_eq!(snapshot.error.as_deref(), Some("network offline"));
    }

    #[test]
    fn test_alert_policy() {
        let policy = AlertPolicy::default();

        let mostly_up = recompute(&vec![
            handle(1, ChannelStatus::Subscribed, None),
            handle(2, ChannelStatus::Subscribed, None),
            handle(3, ChannelStatus::Errored, Some("x")),
        ]);
        assert!(!mostly_up.should_alert(&policy));

        let mostly_down = recompute(&vec![
            handle(1, ChannelStatus::Subscribed, None),
            handle(2, ChannelStatus::Errored, Some("x")),
            handle(3, ChannelStatus::Errored, Some("y")),
        ]);
        assert!(mostly_down.should_alert(&policy));

        let down = recompute(&vec![handle(1, ChannelStatus::Errored, Some("x"))]);
        assert!(down.should_alert(&policy));
    }

    #[test]
    fn test_aggregator_replaces_snapshot() {
        let aggregator = ConnectionHealthAggregator::new();
        let mut rx = aggregator.watch();

        let handles = vec![handle(1, ChannelStatus::Subscribed, None)];
        aggregator.publish(&handles);

        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().total_count, 1);
        assert_eq!(aggregator.current().connected_count, 1);
    }
}
