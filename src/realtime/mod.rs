//! # Real-Time Subscriptions
//!
//! Keeps many change-notification subscriptions alive against an external
//! pub/sub transport and turns their churn into signals an application can
//! trust.
//!
//! ## Architecture
//!
//! - **Registry**: one reference-counted channel per distinct descriptor
//! - **Health**: per-channel statuses folded into one snapshot
//! - **Reconnect**: per-channel backoff, network transitions, forced passes
//! - **Dispatcher**: isolated listener fan-out plus cache invalidation
//! - **Client**: the facade that wires the above to a transport
//!
//! ```text
//! subscribe ─▶ registry ─▶ transport.open_channel
//!                  ▲              │ status / events
//!                  │              ▼
//!              reconnect ◀── channel handle ──▶ health
//!                                 │
//!                                 ▼
//!                            dispatcher ─▶ listeners, on_invalidate
//! ```

pub mod channel;
pub mod client;
pub mod config;
pub mod descriptor;
pub mod dispatcher;
pub mod errors;
pub mod event;
pub mod health;
pub mod memory;
pub mod network;
pub mod reconnect;
pub mod registry;
pub mod transport;

pub use channel::{ChannelId, ChannelInfo, ChannelStatus, StatusUpdate, SubscriptionId};
pub use client::RealtimeClient;
pub use config::{RealtimeConfig, ReconnectConfig};
pub use descriptor::{ColumnFilter, FilterOp, SubscriptionDescriptor};
pub use dispatcher::{DispatchResult, EventDispatcher};
pub use errors::{RealtimeError, RealtimeResult};
pub use event::{ChangeEvent, ChangeKind};
pub use health::{AlertPolicy, ConnectionHealthAggregator, HealthLevel, HealthSnapshot};
pub use memory::MemoryTransport;
pub use network::NetworkStatus;
pub use reconnect::{ReconnectState, ReconnectionController, RetryDecision};
pub use registry::SubscriptionRegistry;
pub use transport::{RealtimeTransport, TransportChannel, TransportStatus};
