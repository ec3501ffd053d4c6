//! # In-Memory Transport
//!
//! A transport that lives entirely in process. Tests and demos drive it by
//! emitting statuses and events onto the channels the client opened, and
//! inspect it to see how often channels were opened and closed.
//!
//! Every channel ever opened is kept, closed or not, so late callbacks from a
//! replaced channel can be simulated.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::descriptor::SubscriptionDescriptor;
use super::errors::{RealtimeError, RealtimeResult};
use super::event::ChangeEvent;
use super::transport::{
    EventCallback, RealtimeTransport, StatusCallback, TransportChannel, TransportStatus,
};

type SharedEventCallback = Arc<dyn Fn(ChangeEvent) + Send + Sync>;
type SharedStatusCallback = Arc<dyn Fn(TransportStatus) + Send + Sync>;

struct Slot {
    descriptor: SubscriptionDescriptor,
    on_event: Option<SharedEventCallback>,
    on_status: Option<SharedStatusCallback>,
    closes: usize,
}

#[derive(Default)]
struct MemoryState {
    slots: Vec<Slot>,
    fail_next: HashMap<SubscriptionDescriptor, usize>,
    auto_subscribe: bool,
}

impl MemoryState {
    /// Slot indices opened for `descriptor`, oldest first
    fn slots_for<'a>(
        &'a self,
        descriptor: &'a SubscriptionDescriptor,
    ) -> impl Iterator<Item = usize> + 'a {
        self.slots
            .iter()
            .enumerate()
            .filter(move |(_, slot)| &slot.descriptor == descriptor)
            .map(|(index, _)| index)
    }
}

/// In-process transport; clones share state
#[derive(Clone, Default)]
pub struct MemoryTransport {
    state: Arc<Mutex<MemoryState>>,
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("open_count", &self.open_count())
            .finish()
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `SUBSCRIBED` as soon as a channel's status callback is registered
    pub fn auto_subscribe(self) -> Self {
        self.lock().auto_subscribe = true;
        self
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next `count` opens for `descriptor` fail
    pub fn fail_next_opens(&self, descriptor: &SubscriptionDescriptor, count: usize) {
        *self.lock().fail_next.entry(descriptor.clone()).or_default() += count;
    }

    /// Total channels opened
    pub fn open_count(&self) -> usize {
        self.lock().slots.len()
    }

    /// Channels opened for `descriptor`
    pub fn opens_for(&self, descriptor: &SubscriptionDescriptor) -> usize {
        self.lock().slots_for(descriptor).count()
    }

    /// `close()` calls received by channels of `descriptor`
    pub fn close_count(&self, descriptor: &SubscriptionDescriptor) -> usize {
        let state = self.lock();
        state
            .slots_for(descriptor)
            .map(|index| state.slots[index].closes)
            .sum()
    }

    /// Whether the newest channel for `descriptor` is still open
    pub fn is_open(&self, descriptor: &SubscriptionDescriptor) -> bool {
        let state = self.lock();
        let newest = state.slots_for(descriptor).last();
        newest.map_or(false, |index| state.slots[index].closes == 0)
    }

    /// Channels that have not been closed
    pub fn open_channels(&self) -> usize {
        self.lock().slots.iter().filter(|s| s.closes == 0).count()
    }

    /// Report a status on the newest channel for `descriptor`.
    ///
    /// Returns false if no such channel is registered.
    pub fn emit_status(
        &self,
        descriptor: &SubscriptionDescriptor,
        status: TransportStatus,
    ) -> bool {
        let callback = {
            let state = self.lock();
            let newest = state.slots_for(descriptor).last();
            newest.and_then(|index| state.slots[index].on_status.clone())
        };
        match callback {
            Some(callback) => {
                callback(status);
                true
            }
            None => false,
        }
    }

    /// Report a status on the `nth` channel ever opened for `descriptor`,
    /// whether or not it has since been closed.
    pub fn emit_status_at(
        &self,
        descriptor: &SubscriptionDescriptor,
        nth: usize,
        status: TransportStatus,
    ) -> bool {
        let callback = {
            let state = self.lock();
            let found = state.slots_for(descriptor).nth(nth);
            found.and_then(|index| state.slots[index].on_status.clone())
        };
        match callback {
            Some(callback) => {
                callback(status);
                true
            }
            None => false,
        }
    }

    /// Deliver an event on the newest channel for `descriptor`
    pub fn emit_event(&self, descriptor: &SubscriptionDescriptor, event: ChangeEvent) -> bool {
        self.emit_event_on(descriptor, None, event)
    }

    /// Deliver an event on the `nth` channel ever opened for `descriptor`
    pub fn emit_event_at(
        &self,
        descriptor: &SubscriptionDescriptor,
        nth: usize,
        event: ChangeEvent,
    ) -> bool {
        self.emit_event_on(descriptor, Some(nth), event)
    }

    fn emit_event_on(
        &self,
        descriptor: &SubscriptionDescriptor,
        nth: Option<usize>,
        event: ChangeEvent,
    ) -> bool {
        let callback = {
            let state = self.lock();
            let mut indices = state.slots_for(descriptor);
            let index = match nth {
                Some(nth) => indices.nth(nth),
                None => indices.last(),
            };
            index.and_then(|index| state.slots[index].on_event.clone())
        };
        match callback {
            Some(callback) => {
                callback(event);
                true
            }
            None => false,
        }
    }

    /// Route an event to every open channel whose descriptor matches it,
    /// the way a server fans out a committed change. Returns the number of
    /// channels that received it.
    pub fn publish(&self, event: &ChangeEvent) -> usize {
        let callbacks: Vec<SharedEventCallback> = {
            let state = self.lock();
            state
                .slots
                .iter()
                .filter(|slot| slot.closes == 0 && slot.descriptor.matches(event))
                .filter_map(|slot| slot.on_event.clone())
                .collect()
        };

        for callback in &callbacks {
            callback(event.clone());
        }
        callbacks.len()
    }
}

impl RealtimeTransport for MemoryTransport {
    fn open_channel(
        &self,
        descriptor: &SubscriptionDescriptor,
    ) -> RealtimeResult<Box<dyn TransportChannel>> {
        let mut state = self.lock();

        if let Some(remaining) = state.fail_next.get_mut(descriptor) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(RealtimeError::TransportOpen(format!(
                    "handshake rejected for {}",
                    descriptor.channel_topic()
                )));
            }
        }

        state.slots.push(Slot {
            descriptor: descriptor.clone(),
            on_event: None,
            on_status: None,
            closes: 0,
        });

        Ok(Box::new(MemoryChannel {
            index: state.slots.len() - 1,
            state: Arc::clone(&self.state),
        }))
    }
}

/// Channel handed out by `MemoryTransport`
struct MemoryChannel {
    index: usize,
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryChannel {
    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TransportChannel for MemoryChannel {
    fn on_event(&mut self, callback: EventCallback) {
        let index = self.index;
        if let Some(slot) = self.lock().slots.get_mut(index) {
            slot.on_event = Some(Arc::from(callback));
        }
    }

    fn on_status_change(&mut self, callback: StatusCallback) {
        let callback: SharedStatusCallback = Arc::from(callback);
        let auto_subscribe = {
            let mut state = self.lock();
            let auto_subscribe = state.auto_subscribe;
            if let Some(slot) = state.slots.get_mut(self.index) {
                slot.on_status = Some(Arc::clone(&callback));
            }
            auto_subscribe
        };

        if auto_subscribe {
            callback(TransportStatus::subscribed());
        }
    }

    fn close(&mut self) {
        let index = self.index;
        if let Some(slot) = self.lock().slots.get_mut(index) {
            slot.closes += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_open_and_close_counts() {
        let transport = MemoryTransport::new();
        let descriptor = SubscriptionDescriptor::new("bookings");

        let mut channel = transport.open_channel(&descriptor).unwrap();
        assert_eq!(transport.opens_for(&descriptor), 1);
        assert!(transport.is_open(&descriptor));

        channel.close();
        assert_eq!(transport.close_count(&descriptor), 1);
        assert!(!transport.is_open(&descriptor));
        assert_eq!(transport.open_channels(), 0);
    }

    #[test]
    fn test_injected_open_failure() {
        let transport = MemoryTransport::new();
        let descriptor = SubscriptionDescriptor::new("payments");
        transport.fail_next_opens(&descriptor, 1);

        let err = transport.open_channel(&descriptor).err().unwrap();
        assert!(err.is_retryable());
        assert!(transport.open_channel(&descriptor).is_ok());
        assert_eq!(transport.opens_for(&descriptor), 1);
    }

    #[test]
    fn test_emit_status_reaches_newest_channel() {
        let transport = MemoryTransport::new();
        let descriptor = SubscriptionDescriptor::new("bookings");
        let seen = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let mut channel = transport.open_channel(&descriptor).unwrap();
            let seen = Arc::clone(&seen);
            channel.on_status_change(Box::new(move |status| {
                if status.status == "SUBSCRIBED" {
                    seen.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }

        assert!(transport.emit_status(&descriptor, TransportStatus::subscribed()));
        assert!(transport.emit_status_at(&descriptor, 0, TransportStatus::subscribed()));
        assert!(!transport.emit_status_at(&descriptor, 5, TransportStatus::subscribed()));
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_publish_routes_by_filter() {
        let transport = MemoryTransport::new();
        let b1 = SubscriptionDescriptor::where_eq("bookings", "business_id", "B1");
        let b2 = SubscriptionDescriptor::where_eq("bookings", "business_id", "B2");
        let hits = Arc::new(AtomicUsize::new(0));

        for descriptor in [&b1, &b2] {
            let mut channel = transport.open_channel(descriptor).unwrap();
            let hits = Arc::clone(&hits);
            channel.on_event(Box::new(move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            }));
        }

        let delivered =
            transport.publish(&ChangeEvent::insert("bookings", json!({"business_id": "B1"})));
        assert_eq!(delivered, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_auto_subscribe() {
        let transport = MemoryTransport::new().auto_subscribe();
        let mut channel = transport
            .open_channel(&SubscriptionDescriptor::new("bookings"))
            .unwrap();

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        channel.on_status_change(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
