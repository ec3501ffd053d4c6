//! # Real-Time Errors
//!
//! Error types for the real-time module.
//!
//! Transport flakiness is never surfaced through these errors: channel
//! failures travel through status listeners and the health snapshot. These
//! variants cover misuse of the client, configuration and handshake failures
//! reported by a transport implementation.

use thiserror::Error;

/// Result type for real-time operations
pub type RealtimeResult<T> = Result<T, RealtimeError>;

/// Real-time errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RealtimeError {
    // ==================
    // Lifecycle Errors
    // ==================
    /// The client was disposed and cannot be reused
    #[error("Realtime client has been disposed")]
    Disposed,

    // ==================
    // Transport Errors
    // ==================
    /// The transport refused to open a channel
    #[error("Failed to open channel: {0}")]
    TransportOpen(String),

    /// Channel not found
    #[error("Channel not found: {0}")]
    ChannelNotFound(String),

    // ==================
    // Internal Errors
    // ==================
    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RealtimeError {
    /// Stable error code for logs and metrics labels
    pub fn code(&self) -> &'static str {
        match self {
            RealtimeError::Disposed => "REALTIME_DISPOSED",
            RealtimeError::TransportOpen(_) => "REALTIME_TRANSPORT_OPEN",
            RealtimeError::ChannelNotFound(_) => "REALTIME_CHANNEL_NOT_FOUND",
            RealtimeError::ConfigError(_) => "REALTIME_CONFIG_ERROR",
            RealtimeError::Internal(_) => "REALTIME_INTERNAL",
        }
    }

    /// Whether retrying the same operation can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, RealtimeError::TransportOpen(_))
    }
}
