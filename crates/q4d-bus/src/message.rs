//! Messages exchanged with the bus and the connection state machine.

use std::fmt;

/// Delivery guarantee requested for a subscription or publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Qos {
    /// Fire and forget.
    AtMostOnce,
    /// Acknowledged by the broker.
    AtLeastOnce,
    /// Four-way handshake.
    ExactlyOnce,
}

impl Qos {
    /// Whether the publisher waits for a broker acknowledgement.
    #[must_use]
    pub const fn is_acknowledged(self) -> bool {
        !matches!(self, Self::AtMostOnce)
    }
}

/// Message received on a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Topic the message arrived on.
    pub topic: String,
    /// Raw payload.
    pub payload: Vec<u8>,
}

/// Message handed to the bus for publishing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Destination topic.
    pub topic: String,
    /// Raw payload.
    pub payload: Vec<u8>,
    /// Requested delivery guarantee.
    pub qos: Qos,
}

/// Lifecycle of the bus connection.
///
/// `Disconnected` is terminal once reached through an explicit disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and none being attempted.
    Disconnected,
    /// Initial connection in progress.
    Connecting,
    /// Session established and subscriptions applied.
    Connected,
    /// Transport lost; retrying with backoff.
    Reconnecting,
}

impl ConnectionState {
    /// Stable lowercase name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
