//! booking-realtime - Realtime subscriptions and connection health
//!
//! Deduplicated change-notification channels over a pluggable transport,
//! with aggregated health, backoff reconnection and cache invalidation.

pub mod observability;
pub mod realtime;

pub use realtime::{
    ChangeEvent, HealthSnapshot, NetworkStatus, RealtimeClient, RealtimeConfig, RealtimeError,
    RealtimeResult, StatusUpdate, SubscriptionDescriptor, SubscriptionId,
};
