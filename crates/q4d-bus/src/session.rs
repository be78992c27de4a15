//! Seams between the connection supervisor and a concrete transport.

use async_trait::async_trait;

use crate::error::{ConnectError, SessionError};
use crate::message::{InboundMessage, OutboundMessage, Qos};

/// Opens transport sessions. Called once at startup and again after every
/// transport loss.
#[async_trait]
pub trait BusConnector: Send + Sync {
    /// Establish a fresh session.
    ///
    /// # Errors
    ///
    /// [`ConnectError::Rejected`] when the broker refuses the client,
    /// [`ConnectError::Unreachable`] for network failures.
    async fn connect(&self) -> Result<Box<dyn BusSession>, ConnectError>;
}

/// One live connection. Dropped on loss and replaced by a new session.
#[async_trait]
pub trait BusSession: Send {
    /// Subscribe and wait for the broker to grant the topic.
    ///
    /// # Errors
    ///
    /// [`SessionError::SubscriptionRefused`] or [`SessionError::TransportLost`].
    async fn subscribe(&mut self, topic: &str, qos: Qos) -> Result<(), SessionError>;

    /// Hand a message to the transport. Acknowledged qualities of service
    /// return once the broker confirms.
    ///
    /// # Errors
    ///
    /// [`SessionError::TransportLost`] when the connection drops.
    async fn publish(&mut self, message: &OutboundMessage) -> Result<(), SessionError>;

    /// Next message on any subscribed topic. Must be cancel safe.
    ///
    /// # Errors
    ///
    /// [`SessionError::TransportLost`] when the connection drops.
    async fn next_message(&mut self) -> Result<InboundMessage, SessionError>;

    /// Close the session cleanly.
    async fn disconnect(&mut self);
}

/// Receives inbound messages on the connection task.
///
/// Implementations must return quickly; long work belongs on another task.
pub trait MessageHandler: Send + Sync {
    /// Handle one message.
    fn on_message(&self, message: InboundMessage);
}
