#![forbid(unsafe_code)]
#![warn(
    unused,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links,
    missing_docs
)]

//! Publish/subscribe bus client with supervised reconnection.
//!
//! Layout: `message.rs` (wire-neutral message types and connection states),
//! `error.rs`, `backoff.rs` (reconnect schedule), `session.rs` (transport
//! seam), `client.rs` (connection task and handle), `mqtt.rs` (rumqttc
//! transport), `memory.rs` (in-process broker).

pub mod backoff;
pub mod client;
pub mod error;
pub mod memory;
pub mod message;
pub mod mqtt;
pub mod session;

pub use backoff::ReconnectBackoff;
pub use client::{BusClient, BusHandle, BusOptions};
pub use error::{ConnectError, PublishError, SessionError, SubscribeError};
pub use memory::{AdmitMode, MemoryBroker};
pub use message::{ConnectionState, InboundMessage, OutboundMessage, Qos};
pub use mqtt::{MqttConnector, MqttSettings};
pub use session::{BusConnector, BusSession, MessageHandler};
