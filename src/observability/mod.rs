//! Observability for the realtime layer
//!
//! - Structured logging through `tracing`, with stable event names
//! - Lock-free operational counters
//!
//! The library never installs a subscriber; the embedding application (or
//! the test harness) decides where log lines go.
//!
//! # Usage
//!
//! ```ignore
//! use booking_realtime::observability::{Event, RealtimeMetrics};
//!
//! tracing::info!(event = %Event::ChannelOpened, channel = 1, "channel opened");
//!
//! let metrics = RealtimeMetrics::new();
//! metrics.increment_channels_opened();
//! ```

mod events;
mod metrics;

pub use events::Event;
pub use metrics::{MetricsSnapshot, RealtimeMetrics};
