//! Observable events of the realtime layer
//!
//! Every log line emitted by the client carries one of these names in its
//! `event` field. Names are stable and greppable.

use std::fmt;

/// Observable realtime events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Channel lifecycle
    /// Transport channel opened for a descriptor
    ChannelOpened,
    /// Transport refused to open a channel
    ChannelOpenFailed,
    /// Channel confirmed by the transport
    ChannelSubscribed,
    /// Channel reported an error or dropped
    ChannelErrored,
    /// Channel torn down after its last consumer left
    ChannelClosed,
    /// Transport reported a transition the state machine does not allow
    TransitionRejected,
    /// Callback from a replaced transport channel was ignored
    StaleCallback,

    // Reconnection
    /// Backoff retry scheduled
    RetryScheduled,
    /// Backoff retry fired and is re-subscribing
    RetryFired,
    /// Retry budget exhausted; channel suspended
    RetryExhausted,
    /// Forced reconnection pass started
    ForceReconnectStart,
    /// Forced reconnection pass finished
    ForceReconnectComplete,

    // Network
    /// Network reported offline
    NetworkOffline,
    /// Network reported online
    NetworkOnline,

    // Dispatch
    /// A listener panicked while handling an event or status
    ListenerPanicked,
    /// The invalidation callback panicked
    InvalidationPanicked,

    // Client
    /// Operation attempted on a disposed client
    ClientDisposed,
    /// Client shutdown
    Dispose,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::ChannelOpened => "CHANNEL_OPENED",
            Event::ChannelOpenFailed => "CHANNEL_OPEN_FAILED",
            Event::ChannelSubscribed => "CHANNEL_SUBSCRIBED",
            Event::ChannelErrored => "CHANNEL_ERRORED",
            Event::ChannelClosed => "CHANNEL_CLOSED",
            Event::TransitionRejected => "TRANSITION_REJECTED",
            Event::StaleCallback => "STALE_CALLBACK",

            Event::RetryScheduled => "RETRY_SCHEDULED",
            Event::RetryFired => "RETRY_FIRED",
            Event::RetryExhausted => "RETRY_EXHAUSTED",
            Event::ForceReconnectStart => "FORCE_RECONNECT_BEGIN",
            Event::ForceReconnectComplete => "FORCE_RECONNECT_COMPLETE",

            Event::NetworkOffline => "NETWORK_OFFLINE",
            Event::NetworkOnline => "NETWORK_ONLINE",

            Event::ListenerPanicked => "LISTENER_PANICKED",
            Event::InvalidationPanicked => "INVALIDATION_PANICKED",

            Event::ClientDisposed => "CLIENT_DISPOSED",
            Event::Dispose => "DISPOSE",
        }
    }

    /// Returns true if this event indicates degraded operation
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            Event::ChannelOpenFailed
                | Event::ChannelErrored
                | Event::RetryExhausted
                | Event::NetworkOffline
                | Event::ListenerPanicked
                | Event::InvalidationPanicked
                | Event::ClientDisposed
        )
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
