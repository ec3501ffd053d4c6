//! # Subscription Registry
//!
//! Deduplicates identical descriptors onto one reference-counted channel
//! handle. The registry is plain bookkeeping: it never talks to the transport
//! and never invokes listeners. The client holds it under one lock so that
//! every create/increment/decrement/destroy is a single critical section.

use std::collections::{BTreeMap, HashMap};

use super::channel::{
    ChangeListener, ChannelHandle, ChannelId, Listener, StatusListener, SubscriptionId,
};
use super::descriptor::SubscriptionDescriptor;
use super::transport::TransportChannel;

/// Outcome of `acquire`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquired {
    /// A new handle was created; the caller must open its transport channel
    Created(ChannelId),
    /// An existing handle gained a reference
    Joined(ChannelId),
}

impl Acquired {
    pub fn channel(&self) -> ChannelId {
        match self {
            Acquired::Created(id) | Acquired::Joined(id) => *id,
        }
    }
}

/// Outcome of `release`
pub enum Released {
    /// Unknown or already released subscription id
    Unknown,
    /// Listener removed; the handle lives on for other consumers
    Detached { channel: ChannelId, remaining: usize },
    /// Last reference dropped; the handle was removed and closed
    Destroyed {
        handle: ChannelHandle,
        transport: Option<Box<dyn TransportChannel>>,
    },
}

/// Registry of live channel handles
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    /// Channel IDs by descriptor (the dedup key)
    by_descriptor: HashMap<SubscriptionDescriptor, ChannelId>,

    /// Handles by channel ID
    channels: BTreeMap<ChannelId, ChannelHandle>,

    /// Channel and listener slot by subscription ID
    by_subscription: HashMap<SubscriptionId, (ChannelId, u64)>,

    next_channel: u64,
    next_listener: u64,
}

impl SubscriptionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Find or create the handle for `descriptor` and attach a listener
    pub(crate) fn acquire(
        &mut self,
        descriptor: SubscriptionDescriptor,
        on_change: ChangeListener,
        on_status: StatusListener,
    ) -> (SubscriptionId, Acquired) {
        let subscription = SubscriptionId::new();
        let seq = self.next_listener;
        self.next_listener += 1;

        let acquired = match self.by_descriptor.get(&descriptor) {
            Some(id) => Acquired::Joined(*id),
            None => {
                self.next_channel += 1;
                let id = ChannelId(self.next_channel);
                self.by_descriptor.insert(descriptor.clone(), id);
                self.channels.insert(id, ChannelHandle::new(id, descriptor));
                Acquired::Created(id)
            }
        };

        let channel = acquired.channel();
        if let Some(handle) = self.channels.get_mut(&channel) {
            handle.add_listener(seq, Listener::new(subscription, on_change, on_status));
        }
        self.by_subscription.insert(subscription, (channel, seq));

        (subscription, acquired)
    }

    /// Detach a subscription; destroy its handle when no references remain
    pub(crate) fn release(&mut self, subscription: &SubscriptionId) -> Released {
        let Some((channel, seq)) = self.by_subscription.remove(subscription) else {
            return Released::Unknown;
        };

        let remaining = match self.channels.get_mut(&channel) {
            Some(handle) => {
                handle.remove_listener(seq);
                handle.ref_count()
            }
            None => return Released::Unknown,
        };

        if remaining > 0 {
            return Released::Detached { channel, remaining };
        }

        match self.remove(channel) {
            Some((handle, transport)) => Released::Destroyed { handle, transport },
            None => Released::Unknown,
        }
    }

    fn remove(
        &mut self,
        channel: ChannelId,
    ) -> Option<(ChannelHandle, Option<Box<dyn TransportChannel>>)> {
        let mut handle = self.channels.remove(&channel)?;
        self.by_descriptor.remove(handle.descriptor());
        let transport = handle.close();
        Some((handle, transport))
    }

    /// Remove every handle, closing each one
    pub(crate) fn drain(&mut self) -> Vec<(ChannelHandle, Option<Box<dyn TransportChannel>>)> {
        self.by_subscription.clear();
        self.by_descriptor.clear();

        std::mem::take(&mut self.channels)
            .into_values()
            .map(|mut handle| {
                let transport = handle.close();
                (handle, transport)
            })
            .collect()
    }

    /// Channel currently backing a descriptor
    pub fn lookup(&self, descriptor: &SubscriptionDescriptor) -> Option<ChannelId> {
        self.by_descriptor.get(descriptor).copied()
    }

    /// Channel a subscription is attached to
    pub fn channel_of(&self, subscription: &SubscriptionId) -> Option<ChannelId> {
        self.by_subscription.get(subscription).map(|(id, _)| *id)
    }

    /// Listener attached by a subscription
    pub(crate) fn listener(&self, subscription: &SubscriptionId) -> Option<Listener> {
        let (channel, seq) = self.by_subscription.get(subscription)?;
        self.channels.get(channel)?.listener(*seq)
    }

    pub fn get(&self, channel: ChannelId) -> Option<&ChannelHandle> {
        self.channels.get(&channel)
    }

    pub(crate) fn get_mut(&mut self, channel: ChannelId) -> Option<&mut ChannelHandle> {
        self.channels.get_mut(&channel)
    }

    /// Live handles in channel ID order
    pub fn handles(&self) -> impl Iterator<Item = &ChannelHandle> {
        self.channels.values()
    }

    pub fn channel_ids(&self) -> Vec<ChannelId> {
        self.channels.keys().copied().collect()
    }

    /// Number of live channels
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
