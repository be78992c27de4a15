//! In-process broker.
//!
//! # Design
//! - Topics match exactly; there are no wildcards.
//! - Publishes are recorded and looped back to matching subscribers.
//! - `drop_connections` severs every live session so supervisors exercise
//!   their reconnect path.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::error::{ConnectError, SessionError};
use crate::message::{InboundMessage, OutboundMessage, Qos};
use crate::session::{BusConnector, BusSession};

/// How the broker answers new connections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AdmitMode {
    /// Accept every client.
    #[default]
    Accept,
    /// Behave as if the network were down.
    Unreachable,
    /// Refuse the credentials.
    Reject,
}

/// Shareable in-memory broker; clones refer to the same broker.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Mutex<BrokerState>>,
}

#[derive(Default)]
struct BrokerState {
    mode: AdmitMode,
    next_session: u64,
    connects: usize,
    sessions: HashMap<u64, Link>,
    denied: HashSet<String>,
    subscriptions: Vec<String>,
    published: Vec<OutboundMessage>,
}

struct Link {
    topics: HashSet<String>,
    deliveries: mpsc::UnboundedSender<InboundMessage>,
}

impl BrokerState {
    fn route(&self, topic: &str, payload: &[u8]) -> usize {
        let mut delivered = 0;
        for link in self.sessions.values() {
            if !link.topics.contains(topic) {
                continue;
            }
            let message = InboundMessage {
                topic: topic.to_string(),
                payload: payload.to_vec(),
            };
            if link.deliveries.send(message).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }
}

impl MemoryBroker {
    /// Broker accepting every client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Change how future connection attempts are answered.
    pub fn set_mode(&self, mode: AdmitMode) {
        self.lock().mode = mode;
    }

    /// Refuse future subscriptions to `topic`.
    pub fn deny_topic(&self, topic: impl Into<String>) {
        self.lock().denied.insert(topic.into());
    }

    /// Deliver a message to every session subscribed to `topic`. Returns the
    /// number of sessions reached.
    pub fn deliver(&self, topic: &str, payload: impl AsRef<[u8]>) -> usize {
        self.lock().route(topic, payload.as_ref())
    }

    /// Sever every live session.
    pub fn drop_connections(&self) {
        let dropped = std::mem::take(&mut self.lock().sessions);
        debug!(sessions = dropped.len(), "Memory broker dropped connections");
    }

    /// Successful connections so far.
    #[must_use]
    pub fn connects(&self) -> usize {
        self.lock().connects
    }

    /// Live sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.lock().sessions.len()
    }

    /// Topics granted so far, in order, including repeats after reconnects.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<String> {
        self.lock().subscriptions.clone()
    }

    /// Messages published so far, in order.
    #[must_use]
    pub fn published(&self) -> Vec<OutboundMessage> {
        self.lock().published.clone()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            error!("memory broker mutex poisoned; continuing with inner state");
            poisoned.into_inner()
        })
    }
}

#[async_trait]
impl BusConnector for MemoryBroker {
    async fn connect(&self) -> Result<Box<dyn BusSession>, ConnectError> {
        let mut state = self.lock();
        match state.mode {
            AdmitMode::Accept => {}
            AdmitMode::Unreachable => {
                return Err(ConnectError::unreachable("connection refused"));
            }
            AdmitMode::Reject => {
                return Err(ConnectError::rejected("bad username or password"));
            }
        }
        let id = state.next_session;
        state.next_session += 1;
        state.connects += 1;
        let (deliveries, inbox) = mpsc::unbounded_channel();
        state.sessions.insert(
            id,
            Link {
                topics: HashSet::new(),
                deliveries,
            },
        );
        drop(state);
        Ok(Box::new(MemorySession {
            id,
            broker: self.clone(),
            inbox,
        }))
    }
}

struct MemorySession {
    id: u64,
    broker: MemoryBroker,
    inbox: mpsc::UnboundedReceiver<InboundMessage>,
}

impl MemorySession {
    fn severed() -> SessionError {
        SessionError::lost("memory broker dropped the session")
    }
}

#[async_trait]
impl BusSession for MemorySession {
    async fn subscribe(&mut self, topic: &str, _qos: Qos) -> Result<(), SessionError> {
        let mut state = self.broker.lock();
        if state.denied.contains(topic) {
            return Err(SessionError::SubscriptionRefused {
                topic: topic.to_string(),
            });
        }
        let link = state.sessions.get_mut(&self.id).ok_or_else(Self::severed)?;
        link.topics.insert(topic.to_string());
        state.subscriptions.push(topic.to_string());
        Ok(())
    }

    async fn publish(&mut self, message: &OutboundMessage) -> Result<(), SessionError> {
        let mut state = self.broker.lock();
        if !state.sessions.contains_key(&self.id) {
            return Err(Self::severed());
        }
        state.published.push(message.clone());
        state.route(&message.topic, &message.payload);
        Ok(())
    }

    async fn next_message(&mut self) -> Result<InboundMessage, SessionError> {
        self.inbox.recv().await.ok_or_else(Self::severed)
    }

    async fn disconnect(&mut self) {
        self.broker.lock().sessions.remove(&self.id);
    }
}
