//! # Transport Interface
//!
//! The only surface through which the core talks to the external pub/sub
//! provider. A transport opens one channel per descriptor; the channel reports
//! change events and lifecycle status through callbacks and can be closed.

use std::fmt;

use super::channel::ChannelStatus;
use super::descriptor::SubscriptionDescriptor;
use super::errors::RealtimeResult;
use super::event::ChangeEvent;

/// Callback receiving change events from a transport channel
pub type EventCallback = Box<dyn Fn(ChangeEvent) + Send + Sync>;

/// Callback receiving lifecycle status from a transport channel
pub type StatusCallback = Box<dyn Fn(TransportStatus) + Send + Sync>;

/// A pub/sub provider capable of opening change-notification channels
pub trait RealtimeTransport: Send + Sync {
    /// Open a channel for one descriptor.
    ///
    /// An `Err` is treated as a handshake failure: the channel is marked
    /// errored and retried with backoff.
    fn open_channel(
        &self,
        descriptor: &SubscriptionDescriptor,
    ) -> RealtimeResult<Box<dyn TransportChannel>>;
}

/// One open subscription on the transport
pub trait TransportChannel: Send {
    /// Register the change-event callback
    fn on_event(&mut self, callback: EventCallback);

    /// Register the lifecycle status callback
    fn on_status_change(&mut self, callback: StatusCallback);

    /// Tear down the subscription
    fn close(&mut self);
}

/// Raw lifecycle status as reported by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportStatus {
    /// Provider status string, e.g. `SUBSCRIBED` or `CHANNEL_ERROR`
    pub status: String,
    /// Optional provider message
    pub message: Option<String>,
}

impl TransportStatus {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            message: None,
        }
    }

    pub fn with_message(status: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            message: Some(message.into()),
        }
    }

    pub fn subscribed() -> Self {
        Self::new("SUBSCRIBED")
    }

    pub fn channel_error(message: impl Into<String>) -> Self {
        Self::with_message("CHANNEL_ERROR", message)
    }

    pub fn timed_out() -> Self {
        Self::new("TIMED_OUT")
    }

    pub fn closed() -> Self {
        Self::new("CLOSED")
    }

    /// Map onto the channel state machine.
    ///
    /// Returns the target status and, for errors, the message to record.
    /// `CLOSED` is only expected after the core closes a channel itself, which
    /// stops delivery first; a `CLOSED` that does arrive is a server-side drop.
    /// Unrecognized statuses are errors.
    pub fn classify(&self) -> (ChannelStatus, Option<String>) {
        match self.status.trim().to_ascii_uppercase().as_str() {
            "SUBSCRIBED" => (ChannelStatus::Subscribed, None),
            "CONNECTING" | "JOINING" => (ChannelStatus::Connecting, None),
            "CHANNEL_ERROR" | "ERROR" | "ERRORED" => (
                ChannelStatus::Errored,
                Some(
                    self.message
                        .clone()
                        .unwrap_or_else(|| "channel error".to_string()),
                ),
            ),
            "TIMED_OUT" => (
                ChannelStatus::Errored,
                Some(
                    self.message
                        .clone()
                        .unwrap_or_else(|| "subscription timed out".to_string()),
                ),
            ),
            "CLOSED" => (
                ChannelStatus::Errored,
                Some(
                    self.message
                        .clone()
                        .unwrap_or_else(|| "channel closed by transport".to_string()),
                ),
            ),
            other => (
                ChannelStatus::Errored,
                Some(format!("unrecognized transport status '{}'", other)),
            ),
        }
    }
}

impl fmt::Display for TransportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{} ({})", self.status, message),
            None => write!(f, "{}", self.status),
        }
    }
}
