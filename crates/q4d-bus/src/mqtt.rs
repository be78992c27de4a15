//! MQTT transport on `rumqttc`.
//!
//! # Design
//! - Each session owns one `rumqttc` event loop driven by a dedicated poller
//!   task; the session consumes its events from a channel so every wait is
//!   cancel safe.
//! - Reconnection is owned by the supervisor: the poller stops at the first
//!   transport error instead of letting the event loop reconnect on its own.
//! - Acknowledgements are correlated by packet id. Requests are issued one at
//!   a time, so outgoing packet ids arrive in request order.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet, QoS, SubscribeReasonCode,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{ConnectError, SessionError};
use crate::message::{InboundMessage, OutboundMessage, Qos};
use crate::session::{BusConnector, BusSession};

const REQUEST_CAPACITY: usize = 64;
const MIN_KEEP_ALIVE: Duration = Duration::from_secs(5);
const DISCONNECT_FLUSH: Duration = Duration::from_secs(1);

/// Broker address and session identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttSettings {
    /// Broker host name.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// Stable client identifier.
    pub client_id: String,
    /// Broker user.
    pub user: String,
    /// Broker password.
    pub password: String,
    /// Keep-alive interval.
    pub keep_alive: Duration,
    /// Ask the broker to keep subscriptions across reconnects.
    pub persistent_session: bool,
}

/// Opens MQTT sessions.
#[derive(Debug, Clone)]
pub struct MqttConnector {
    settings: MqttSettings,
}

impl MqttConnector {
    /// Connector for the given broker.
    #[must_use]
    pub const fn new(settings: MqttSettings) -> Self {
        Self { settings }
    }

    fn options(&self) -> MqttOptions {
        let settings = &self.settings;
        let mut options =
            MqttOptions::new(settings.client_id.clone(), settings.host.clone(), settings.port);
        options.set_keep_alive(settings.keep_alive.max(MIN_KEEP_ALIVE));
        options.set_credentials(settings.user.clone(), settings.password.clone());
        options.set_clean_session(!settings.persistent_session);
        options
    }
}

#[async_trait]
impl BusConnector for MqttConnector {
    async fn connect(&self) -> Result<Box<dyn BusSession>, ConnectError> {
        let (client, mut eventloop) = AsyncClient::new(self.options(), REQUEST_CAPACITY);
        debug!(
            host = %self.settings.host,
            port = self.settings.port,
            client_id = %self.settings.client_id,
            "Opening MQTT session"
        );
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code == ConnectReturnCode::Success {
                        info!(session_present = ack.session_present, "MQTT session open");
                        break;
                    }
                    return Err(refusal(ack.code));
                }
                Ok(_) => {}
                Err(ConnectionError::ConnectionRefused(code)) => return Err(refusal(code)),
                Err(err) => return Err(ConnectError::unreachable(err.to_string())),
            }
        }

        let (events_tx, events) = mpsc::unbounded_channel();
        let poller = tokio::spawn(poll_events(eventloop, events_tx));
        Ok(Box::new(MqttSession {
            client,
            events,
            poller,
            inbound: VecDeque::new(),
            sends: VecDeque::new(),
            subscribes: VecDeque::new(),
            issued: HashMap::new(),
            acked: HashSet::new(),
            granted: HashMap::new(),
            next_request: 0,
        }))
    }
}

fn refusal(code: ConnectReturnCode) -> ConnectError {
    match code {
        ConnectReturnCode::ServiceUnavailable => {
            ConnectError::unreachable("broker service unavailable")
        }
        other => ConnectError::rejected(format!("{other:?}")),
    }
}

const fn to_wire(qos: Qos) -> QoS {
    match qos {
        Qos::AtMostOnce => QoS::AtMostOnce,
        Qos::AtLeastOnce => QoS::AtLeastOnce,
        Qos::ExactlyOnce => QoS::ExactlyOnce,
    }
}

enum PollEvent {
    Inbound(InboundMessage),
    PublishSent(u16),
    SubscribeSent(u16),
    Acked(u16),
    SubAck { pkid: u16, granted: bool },
    Lost(String),
}

async fn poll_events(mut eventloop: EventLoop, events: mpsc::UnboundedSender<PollEvent>) {
    loop {
        let event = match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => PollEvent::Inbound(InboundMessage {
                topic: publish.topic,
                payload: publish.payload.to_vec(),
            }),
            Ok(Event::Incoming(Packet::PubAck(ack))) => PollEvent::Acked(ack.pkid),
            Ok(Event::Incoming(Packet::PubComp(comp))) => PollEvent::Acked(comp.pkid),
            Ok(Event::Incoming(Packet::SubAck(ack))) => PollEvent::SubAck {
                pkid: ack.pkid,
                granted: ack
                    .return_codes
                    .iter()
                    .all(|code| !matches!(code, SubscribeReasonCode::Failure)),
            },
            Ok(Event::Incoming(Packet::Disconnect)) => {
                PollEvent::Lost("broker closed the session".to_string())
            }
            Ok(Event::Outgoing(Outgoing::Publish(pkid))) => PollEvent::PublishSent(pkid),
            Ok(Event::Outgoing(Outgoing::Subscribe(pkid))) => PollEvent::SubscribeSent(pkid),
            Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
            Ok(_) => continue,
            Err(err) => PollEvent::Lost(err.to_string()),
        };
        let lost = matches!(event, PollEvent::Lost(_));
        if events.send(event).is_err() || lost {
            break;
        }
    }
}

struct MqttSession {
    client: AsyncClient,
    events: mpsc::UnboundedReceiver<PollEvent>,
    poller: JoinHandle<()>,
    inbound: VecDeque<InboundMessage>,
    /// Publishes waiting for their outgoing packet id; `None` for QoS 0.
    sends: VecDeque<Option<u64>>,
    subscribes: VecDeque<u64>,
    issued: HashMap<u64, u16>,
    acked: HashSet<u16>,
    granted: HashMap<u16, bool>,
    next_request: u64,
}

impl MqttSession {
    fn request_id(&mut self) -> u64 {
        self.next_request += 1;
        self.next_request
    }

    /// Wait for one transport event and fold it into the session state.
    async fn pump(&mut self) -> Result<(), SessionError> {
        let event = self
            .events
            .recv()
            .await
            .ok_or_else(|| SessionError::lost("mqtt poller stopped"))?;
        match event {
            PollEvent::Inbound(message) => self.inbound.push_back(message),
            PollEvent::PublishSent(pkid) => {
                if let Some(Some(request)) = self.sends.pop_front() {
                    self.track(request, pkid);
                    self.acked.remove(&pkid);
                }
            }
            PollEvent::SubscribeSent(pkid) => {
                if let Some(request) = self.subscribes.pop_front() {
                    self.track(request, pkid);
                    self.granted.remove(&pkid);
                }
            }
            PollEvent::Acked(pkid) => {
                self.acked.insert(pkid);
            }
            PollEvent::SubAck { pkid, granted } => {
                self.granted.insert(pkid, granted);
            }
            PollEvent::Lost(reason) => return Err(SessionError::lost(reason)),
        }
        Ok(())
    }

    // Packet ids are recycled; a stale mapping from an abandoned request
    // must not match the new one.
    fn track(&mut self, request: u64, pkid: u16) {
        self.issued.retain(|_, issued| *issued != pkid);
        self.issued.insert(request, pkid);
    }
}

#[async_trait]
impl BusSession for MqttSession {
    async fn subscribe(&mut self, topic: &str, qos: Qos) -> Result<(), SessionError> {
        self.client
            .subscribe(topic, to_wire(qos))
            .await
            .map_err(|err| SessionError::lost(err.to_string()))?;
        let request = self.request_id();
        self.subscribes.push_back(request);
        loop {
            if let Some(pkid) = self.issued.get(&request).copied() {
                if let Some(granted) = self.granted.remove(&pkid) {
                    self.issued.remove(&request);
                    if granted {
                        debug!(topic, pkid, "Subscription granted");
                        return Ok(());
                    }
                    return Err(SessionError::SubscriptionRefused {
                        topic: topic.to_string(),
                    });
                }
            }
            self.pump().await?;
        }
    }

    async fn publish(&mut self, message: &OutboundMessage) -> Result<(), SessionError> {
        self.client
            .publish(
                message.topic.clone(),
                to_wire(message.qos),
                false,
                message.payload.clone(),
            )
            .await
            .map_err(|err| SessionError::lost(err.to_string()))?;
        if !message.qos.is_acknowledged() {
            self.sends.push_back(None);
            return Ok(());
        }
        let request = self.request_id();
        self.sends.push_back(Some(request));
        loop {
            if let Some(pkid) = self.issued.get(&request).copied() {
                if self.acked.remove(&pkid) {
                    self.issued.remove(&request);
                    debug!(topic = %message.topic, pkid, "Publish acknowledged");
                    return Ok(());
                }
            }
            self.pump().await?;
        }
    }

    async fn next_message(&mut self) -> Result<InboundMessage, SessionError> {
        loop {
            if let Some(message) = self.inbound.pop_front() {
                return Ok(message);
            }
            self.pump().await?;
        }
    }

    async fn disconnect(&mut self) {
        if let Err(err) = self.client.disconnect().await {
            warn!(error = %err, "MQTT disconnect request failed");
        }
        if tokio::time::timeout(DISCONNECT_FLUSH, &mut self.poller)
            .await
            .is_err()
        {
            self.poller.abort();
        }
    }
}

impl Drop for MqttSession {
    fn drop(&mut self) {
        self.poller.abort();
    }
}
