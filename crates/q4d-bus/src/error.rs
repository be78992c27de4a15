//! # Design
//!
//! - Constant messages; the broker or transport detail travels in fields.
//! - `ConnectError` is the only bus failure that escapes to the process.

use std::time::Duration;

use thiserror::Error;

/// Failure to establish a bus connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    /// The broker answered and refused the credentials or client id.
    #[error("broker rejected the connection")]
    Rejected {
        /// Refusal reported by the broker.
        reason: String,
    },
    /// The broker could not be reached.
    #[error("broker unreachable")]
    Unreachable {
        /// Transport error of the last attempt.
        reason: String,
    },
}

impl ConnectError {
    pub(crate) fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }

    pub(crate) fn unreachable(reason: impl Into<String>) -> Self {
        Self::Unreachable {
            reason: reason.into(),
        }
    }

    /// Whether another attempt could succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unreachable { .. })
    }
}

/// Failure reported by a live transport session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The broker refused a subscription.
    #[error("subscription refused by broker")]
    SubscriptionRefused {
        /// Topic that was refused.
        topic: String,
    },
    /// The connection dropped.
    #[error("bus transport lost")]
    TransportLost {
        /// Transport detail.
        reason: String,
    },
}

impl SessionError {
    pub(crate) fn lost(reason: impl Into<String>) -> Self {
        Self::TransportLost {
            reason: reason.into(),
        }
    }
}

/// Failure to register a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubscribeError {
    /// The broker refused the topic.
    #[error("subscription refused by broker")]
    Refused {
        /// Topic that was refused.
        topic: String,
    },
    /// The client was shut down.
    #[error("bus client closed")]
    Closed,
}

/// Failure to publish a message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    /// The connection is down or being re-established.
    #[error("bus not connected")]
    NotConnected,
    /// The broker did not acknowledge in time.
    #[error("publish acknowledgement timed out")]
    Timeout {
        /// Destination topic.
        topic: String,
        /// Time waited.
        waited: Duration,
    },
    /// The client was shut down.
    #[error("bus client closed")]
    Closed,
}
