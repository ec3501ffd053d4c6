//! # Channel Handles
//!
//! One deduplicated transport subscription per descriptor, its lifecycle
//! state machine and the ordered set of listeners attached to it.
//!
//! ```text
//! Connecting ──▶ Subscribed ──▶ Errored ──▶ Connecting ...
//!     │                            ▲
//!     └────────────────────────────┘
//! any ──(explicit teardown)──▶ Closed
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::descriptor::SubscriptionDescriptor;
use super::event::ChangeEvent;
use super::transport::TransportChannel;

/// Lifecycle status of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    Connecting,
    Subscribed,
    Errored,
    Closed,
}

impl ChannelStatus {
    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(self, next: ChannelStatus) -> bool {
        use ChannelStatus::*;

        matches!(
            (self, next),
            (Connecting, Subscribed)
                | (Connecting, Errored)
                | (Subscribed, Errored)
                | (Errored, Connecting)
                | (Connecting | Subscribed | Errored, Closed)
        )
    }

    pub fn is_subscribed(self) -> bool {
        self == ChannelStatus::Subscribed
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChannelStatus::Connecting => "connecting",
            ChannelStatus::Subscribed => "subscribed",
            ChannelStatus::Errored => "errored",
            ChannelStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier of a channel handle, allocated in creation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch-{}", self.0)
    }
}

/// Opaque identifier returned by `subscribe`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status notification delivered to `on_status` listeners
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub channel: ChannelId,
    pub descriptor: SubscriptionDescriptor,
    pub status: ChannelStatus,
    pub error: Option<String>,
}

/// Listener for change events
pub type ChangeListener = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Listener for status updates
pub type StatusListener = Arc<dyn Fn(&StatusUpdate) + Send + Sync>;

/// A consumer's pair of callbacks attached to a channel
#[derive(Clone)]
pub(crate) struct Listener {
    pub(crate) subscription: SubscriptionId,
    pub(crate) on_change: ChangeListener,
    pub(crate) on_status: StatusListener,
    active: Arc<AtomicBool>,
}

impl Listener {
    pub(crate) fn new(
        subscription: SubscriptionId,
        on_change: ChangeListener,
        on_status: StatusListener,
    ) -> Self {
        Self {
            subscription,
            on_change,
            on_status,
            active: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Cleared by `unsubscribe`; checked right before every invocation
    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }
}

/// Result of applying a status to a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Status changed
    Applied {
        from: ChannelStatus,
        to: ChannelStatus,
    },
    /// Already in that status
    Unchanged,
    /// Not allowed by the state machine
    Rejected {
        from: ChannelStatus,
        to: ChannelStatus,
    },
}

/// Public view of a channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelInfo {
    pub id: ChannelId,
    pub descriptor: SubscriptionDescriptor,
    pub ref_count: usize,
    pub status: ChannelStatus,
    pub last_error: Option<String>,
    pub opened_at: DateTime<Utc>,
}

/// One transport subscription shared by every consumer of a descriptor.
///
/// Owned by the registry. `generation` grows each time a fresh transport
/// channel is opened so callbacks from a replaced channel can be recognized
/// and dropped.
pub struct ChannelHandle {
    id: ChannelId,
    descriptor: SubscriptionDescriptor,
    ref_count: usize,
    status: ChannelStatus,
    last_error: Option<String>,
    last_error_at: Option<DateTime<Utc>>,
    listeners: BTreeMap<u64, Listener>,
    generation: u64,
    transport: Option<Box<dyn TransportChannel>>,
    opened_at: DateTime<Utc>,
}

impl ChannelHandle {
    /// Create a handle in `Connecting` with no listeners yet
    pub(crate) fn new(id: ChannelId, descriptor: SubscriptionDescriptor) -> Self {
        Self {
            id,
            descriptor,
            ref_count: 0,
            status: ChannelStatus::Connecting,
            last_error: None,
            last_error_at: None,
            listeners: BTreeMap::new(),
            generation: 0,
            transport: None,
            opened_at: Utc::now(),
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn descriptor(&self) -> &SubscriptionDescriptor {
        &self.descriptor
    }

    pub fn ref_count(&self) -> usize {
        self.ref_count
    }

    pub fn status(&self) -> ChannelStatus {
        self.status
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn last_error_at(&self) -> Option<DateTime<Utc>> {
        self.last_error_at
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn add_listener(&mut self, seq: u64, listener: Listener) {
        self.listeners.insert(seq, listener);
        self.ref_count += 1;
    }

    /// Detach a listener. Returns false if it was not attached.
    pub(crate) fn remove_listener(&mut self, seq: u64) -> bool {
        match self.listeners.remove(&seq) {
            Some(listener) => {
                listener.deactivate();
                self.ref_count = self.ref_count.saturating_sub(1);
                true
            }
            None => false,
        }
    }

    pub(crate) fn listener(&self, seq: u64) -> Option<Listener> {
        self.listeners.get(&seq).cloned()
    }

    /// Active listeners in registration order
    pub(crate) fn listeners(&self) -> Vec<Listener> {
        self.listeners
            .values()
            .filter(|l| l.is_active())
            .cloned()
            .collect()
    }

    /// Apply a status, enforcing the state machine
    pub fn transition(&mut self, next: ChannelStatus, error: Option<String>) -> Transition {
        let from = self.status;
        if from == next {
            return Transition::Unchanged;
        }
        if !from.can_transition_to(next) {
            return Transition::Rejected { from, to: next };
        }

        self.status = next;
        match next {
            ChannelStatus::Errored => {
                self.last_error = Some(error.unwrap_or_else(|| "unknown error".to_string()));
                self.last_error_at = Some(Utc::now());
            }
            ChannelStatus::Subscribed => {
                self.last_error = None;
                self.last_error_at = None;
            }
            _ => {}
        }

        Transition::Applied { from, to: next }
    }

    /// Move an errored handle back to `Connecting` for a fresh transport
    /// channel. Returns the new generation and the replaced transport channel.
    pub(crate) fn begin_resubscribe(
        &mut self,
    ) -> Option<(u64, Option<Box<dyn TransportChannel>>)> {
        match self.transition(ChannelStatus::Connecting, None) {
            Transition::Applied { .. } => {
                self.generation += 1;
                Some((self.generation, self.transport.take()))
            }
            _ => None,
        }
    }

    /// Store the transport channel opened for `generation`.
    ///
    /// Hands the channel back if the handle moved on in the meantime.
    pub(crate) fn attach_transport(
        &mut self,
        generation: u64,
        channel: Box<dyn TransportChannel>,
    ) -> Result<(), Box<dyn TransportChannel>> {
        if generation != self.generation || self.status == ChannelStatus::Closed {
            return Err(channel);
        }
        self.transport = Some(channel);
        Ok(())
    }

    /// Detach the transport channel without changing status.
    ///
    /// Bumps the generation so late callbacks from it are ignored.
    pub(crate) fn detach_transport(&mut self) -> Option<Box<dyn TransportChannel>> {
        self.generation += 1;
        self.transport.take()
    }

    /// Terminal teardown. Returns the transport channel to close.
    pub(crate) fn close(&mut self) -> Option<Box<dyn TransportChannel>> {
        self.transition(ChannelStatus::Closed, None);
        self.detach_transport()
    }

    pub fn status_update(&self) -> StatusUpdate {
        StatusUpdate {
            channel: self.id,
            descriptor: self.descriptor.clone(),
            status: self.status,
            error: self.last_error.clone(),
        }
    }

    pub fn info(&self) -> ChannelInfo {
        ChannelInfo {
            id: self.id,
            descriptor: self.descriptor.clone(),
            ref_count: self.ref_count,
            status: self.status,
            last_error: self.last_error.clone(),
            opened_at: self.opened_at,
        }
    }
}

impl fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("id", &self.id)
            .field("descriptor", &self.descriptor)
            .field("ref_count", &self.ref_count)
            .field("status", &self.status)
            .field("last_error", &self.last_error)
            .field("generation", &self.generation)
            .field("has_transport", &self.transport.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> ChannelHandle {
        ChannelHandle::new(ChannelId(1), SubscriptionDescriptor::new("bookings"))
    }

    fn noop_listener() -> Listener {
        Listener::new(
            SubscriptionId::new(),
            Arc::new(|_: &ChangeEvent| {}),
            Arc::new(|_: &StatusUpdate| {}),
        )
    }

    #[test]
    fn test_allowed_transitions() {
        use ChannelStatus::*;

        assert!(Connecting.can_transition_to(Subscribed));
        assert!(Connecting.can_transition_to(Errored));
        assert!(Subscribed.can_transition_to(Errored));
        assert!(Errored.can_transition_to(Connecting));
        assert!(Subscribed.can_transition_to(Closed));

        assert!(!Subscribed.can_transition_to(Connecting));
        assert!(!Errored.can_transition_to(Subscribed));
        assert!(!Closed.can_transition_to(Connecting));
    }

    #[test]
    fn test_error_recorded_and_cleared() {
        let mut h = handle();

        assert_eq!(
            h.transition(ChannelStatus::Errored, Some("handshake failed".into())),
            Transition::Applied {
                from: ChannelStatus::Connecting,
                to: ChannelStatus::Errored
            }
        );
        assert_eq!(h.last_error(), Some("handshake failed"));
        assert!(h.last_error_at().is_some());

        assert!(h.begin_resubscribe().is_some());
        h.transition(ChannelStatus::Subscribed, None);
        assert!(h.last_error().is_none());
    }

    #[test]
    fn test_subscribed_cannot_reenter_connecting() {
        let mut h = handle();
        h.transition(ChannelStatus::Subscribed, None);

        assert_eq!(
            h.transition(ChannelStatus::Connecting, None),
            Transition::Rejected {
                from: ChannelStatus::Subscribed,
                to: ChannelStatus::Connecting
            }
        );
        assert!(h.begin_resubscribe().is_none());
        assert_eq!(h.status(), ChannelStatus::Subscribed);
    }

    #[test]
    fn test_duplicate_status_is_unchanged() {
        let mut h = handle();
        assert_eq!(
            h.transition(ChannelStatus::Connecting, None),
            Transition::Unchanged
        );
    }

    #[test]
    fn test_resubscribe_bumps_generation() {
        let mut h = handle();
        h.transition(ChannelStatus::Errored, Some("x".into()));

        let (generation, old) = h.begin_resubscribe().unwrap();
        assert_eq!(generation, 1);
        assert!(old.is_none());
        assert_eq!(h.status(), ChannelStatus::Connecting);
    }

    #[test]
    fn test_listener_refcount() {
        let mut h = handle();
        let first = noop_listener();
        let first_flag = first.clone();

        h.add_listener(1, first);
        h.add_listener(2, noop_listener());
        assert_eq!(h.ref_count(), 2);
        assert_eq!(h.listeners().len(), 2);

        assert!(h.remove_listener(1));
        assert!(!h.remove_listener(1));
        assert_eq!(h.ref_count(), 1);
        assert!(!first_flag.is_active());
    }

    #[test]
    fn test_close_is_terminal() {
        let mut h = handle();
        h.close();
        assert_eq!(h.status(), ChannelStatus::Closed);
        assert_eq!(
            h.transition(ChannelStatus::Connecting, None),
            Transition::Rejected {
                from: ChannelStatus::Closed,
                to: ChannelStatus::Connecting
            }
        );
    }
}
