//! Connection supervisor and the handle callers hold.
//!
//! # Design
//! - One task owns the session, the subscription list and the state machine;
//!   handles talk to it over a command channel.
//! - Inbound messages are handed to the [`MessageHandler`] on that task.
//! - After a transport loss the task reconnects with backoff and re-applies
//!   every recorded subscription before it reads inbound traffic again and
//!   before the state reports `Connected`.
//! - Only an explicit disconnect, or every handle being dropped, ends the
//!   task.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use q4d_telemetry::Metrics;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backoff::ReconnectBackoff;
use crate::error::{ConnectError, PublishError, SessionError, SubscribeError};
use crate::message::{ConnectionState, OutboundMessage, Qos};
use crate::session::{BusConnector, BusSession, MessageHandler};

const COMMAND_CAPACITY: usize = 64;

/// Supervisor tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BusOptions {
    /// Extra attempts after the first failed startup connect.
    pub startup_retries: u32,
    /// How long acknowledged publishes wait for the broker.
    pub publish_timeout: Duration,
    /// Delay schedule between attempts.
    pub backoff: ReconnectBackoff,
}

impl Default for BusOptions {
    fn default() -> Self {
        Self {
            startup_retries: 3,
            publish_timeout: Duration::from_secs(10),
            backoff: ReconnectBackoff::default(),
        }
    }
}

/// Entry point for establishing a supervised bus connection.
pub struct BusClient;

impl BusClient {
    /// Connect, then hand the session to a supervising task.
    ///
    /// Network failures are retried `startup_retries` times on the backoff
    /// schedule. A broker rejection fails at once.
    ///
    /// # Errors
    ///
    /// Returns the last [`ConnectError`] when no session could be opened.
    pub async fn connect(
        options: BusOptions,
        connector: Arc<dyn BusConnector>,
        handler: Arc<dyn MessageHandler>,
        metrics: Metrics,
    ) -> Result<BusHandle, ConnectError> {
        let (state, state_rx) = watch::channel(ConnectionState::Disconnected);
        transition(&state, ConnectionState::Connecting);

        let session = match open_with_retries(&options, connector.as_ref()).await {
            Ok(session) => session,
            Err(err) => {
                transition(&state, ConnectionState::Disconnected);
                return Err(err);
            }
        };
        transition(&state, ConnectionState::Connected);

        let (commands, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let supervisor = Supervisor {
            options,
            connector,
            handler,
            metrics,
            state,
            commands: command_rx,
            topics: Vec::new(),
        };
        let task = tokio::spawn(supervisor.run(session));
        Ok(BusHandle {
            commands,
            state: state_rx,
            task: Arc::new(Mutex::new(Some(task))),
        })
    }
}

async fn open_with_retries(
    options: &BusOptions,
    connector: &dyn BusConnector,
) -> Result<Box<dyn BusSession>, ConnectError> {
    let mut attempt = 0;
    loop {
        match connector.connect().await {
            Ok(session) => return Ok(session),
            Err(err) if err.is_retryable() && attempt < options.startup_retries => {
                let delay = options.backoff.delay(attempt);
                warn!(
                    attempt = attempt + 1,
                    retries = options.startup_retries,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "Bus connect failed; retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                error!(attempts = attempt + 1, error = %err, "Bus connect failed");
                return Err(err);
            }
        }
    }
}

fn transition(state: &watch::Sender<ConnectionState>, next: ConnectionState) {
    let previous = state.send_replace(next);
    if previous != next {
        info!(from = %previous, to = %next, "Bus connection state changed");
    }
}

/// Cloneable handle to a supervised connection.
#[derive(Clone)]
pub struct BusHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ConnectionState>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl BusHandle {
    /// Subscribe to `topic`. The subscription is re-applied after every
    /// reconnect. While reconnecting it is recorded and applied on the next
    /// session.
    ///
    /// # Errors
    ///
    /// [`SubscribeError::Refused`] when the broker refuses the topic,
    /// [`SubscribeError::Closed`] after disconnect.
    pub async fn subscribe(&self, topic: impl Into<String>, qos: Qos) -> Result<(), SubscribeError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Subscribe {
                topic: topic.into(),
                qos,
                reply,
            })
            .await
            .map_err(|_| SubscribeError::Closed)?;
        response.await.map_err(|_| SubscribeError::Closed)?
    }

    /// Publish a message.
    ///
    /// [`Qos::AtMostOnce`] returns once the connection task has the message.
    /// Acknowledged qualities of service wait for the broker up to the
    /// configured publish timeout.
    ///
    /// # Errors
    ///
    /// [`PublishError::NotConnected`] unless the state is `Connected`,
    /// [`PublishError::Timeout`] when the broker stays silent,
    /// [`PublishError::Closed`] after disconnect.
    pub async fn publish(
        &self,
        topic: impl Into<String>,
        payload: impl Into<Vec<u8>>,
        qos: Qos,
    ) -> Result<(), PublishError> {
        match self.state() {
            ConnectionState::Connected => {}
            ConnectionState::Disconnected if self.commands.is_closed() => {
                return Err(PublishError::Closed);
            }
            _ => return Err(PublishError::NotConnected),
        }
        let message = OutboundMessage {
            topic: topic.into(),
            payload: payload.into(),
            qos,
        };
        if !qos.is_acknowledged() {
            return self
                .commands
                .send(Command::Publish {
                    message,
                    reply: None,
                })
                .await
                .map_err(|_| PublishError::Closed);
        }
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Publish {
                message,
                reply: Some(reply),
            })
            .await
            .map_err(|_| PublishError::Closed)?;
        response.await.map_err(|_| PublishError::Closed)?
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver observing every state change.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Close the session and stop the supervisor. Idempotent.
    pub async fn disconnect(&self) {
        let (reply, done) = oneshot::channel();
        if self
            .commands
            .send(Command::Disconnect { reply })
            .await
            .is_ok()
        {
            let _ = done.await;
        }
        let task = self
            .task
            .lock()
            .unwrap_or_else(|poisoned| {
                error!("bus task mutex poisoned; continuing with inner state");
                poisoned.into_inner()
            })
            .take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                error!(error = %err, "Bus supervisor task failed");
            }
        }
    }
}

enum Command {
    Subscribe {
        topic: String,
        qos: Qos,
        reply: oneshot::Sender<Result<(), SubscribeError>>,
    },
    Publish {
        message: OutboundMessage,
        reply: Option<oneshot::Sender<Result<(), PublishError>>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
}

/// Raised inside the supervisor when a disconnect was requested.
struct Stop(Option<oneshot::Sender<()>>);

struct Supervisor {
    options: BusOptions,
    connector: Arc<dyn BusConnector>,
    handler: Arc<dyn MessageHandler>,
    metrics: Metrics,
    state: watch::Sender<ConnectionState>,
    commands: mpsc::Receiver<Command>,
    topics: Vec<(String, Qos)>,
}

impl Supervisor {
    async fn run(mut self, mut session: Box<dyn BusSession>) {
        let stop = loop {
            let reason = match self.serve(session.as_mut()).await {
                Ok(reason) => reason,
                Err(stop) => {
                    session.disconnect().await;
                    break stop;
                }
            };
            warn!(reason = %reason, "Bus transport lost");
            drop(session);
            transition(&self.state, ConnectionState::Reconnecting);
            match self.reconnect().await {
                Ok(next) => {
                    session = next;
                    transition(&self.state, ConnectionState::Connected);
                }
                Err(stop) => break stop,
            }
        };
        transition(&self.state, ConnectionState::Disconnected);
        if let Some(reply) = stop.0 {
            let _ = reply.send(());
        }
    }

    /// Serve one session until the transport drops (`Ok(reason)`) or a stop
    /// is requested.
    async fn serve(&mut self, session: &mut dyn BusSession) -> Result<String, Stop> {
        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    if let Err(lost) = self.execute(session, command).await? {
                        return Ok(lost);
                    }
                }
                inbound = session.next_message() => match inbound {
                    Ok(message) => {
                        debug!(topic = %message.topic, bytes = message.payload.len(), "Bus message received");
                        self.handler.on_message(message);
                    }
                    Err(err) => return Ok(describe(&err)),
                },
            }
        }
    }

    /// Run one command against a live session. The inner `Err` carries a
    /// transport loss.
    async fn execute(
        &mut self,
        session: &mut dyn BusSession,
        command: Option<Command>,
    ) -> Result<Result<(), String>, Stop> {
        match command {
            None => Err(Stop(None)),
            Some(Command::Disconnect { reply }) => Err(Stop(Some(reply))),
            Some(Command::Subscribe { topic, qos, reply }) => {
                let outcome = match session.subscribe(&topic, qos).await {
                    Ok(()) => {
                        info!(topic = %topic, "Subscribed");
                        self.record(topic, qos);
                        Ok(())
                    }
                    Err(SessionError::SubscriptionRefused { topic }) => {
                        error!(topic = %topic, "Broker refused subscription");
                        let _ = reply.send(Err(SubscribeError::Refused { topic }));
                        return Ok(Ok(()));
                    }
                    Err(err) => {
                        self.record(topic, qos);
                        Err(describe(&err))
                    }
                };
                let _ = reply.send(Ok(()));
                Ok(outcome)
            }
            Some(Command::Publish { message, reply }) => {
                let waited = self.options.publish_timeout;
                let (result, outcome) =
                    match tokio::time::timeout(waited, session.publish(&message)).await {
                        Ok(Ok(())) => (Ok(()), Ok(())),
                        Ok(Err(err)) => (Err(PublishError::NotConnected), Err(describe(&err))),
                        Err(_) => (
                            Err(PublishError::Timeout {
                                topic: message.topic.clone(),
                                waited,
                            }),
                            Ok(()),
                        ),
                    };
                if let Err(err) = &result {
                    warn!(topic = %message.topic, error = %err, "Bus publish failed");
                }
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
                Ok(outcome)
            }
        }
    }

    fn record(&mut self, topic: String, qos: Qos) {
        if let Some(entry) = self.topics.iter_mut().find(|(known, _)| *known == topic) {
            entry.1 = qos;
        } else {
            self.topics.push((topic, qos));
        }
    }

    /// Retry until a session is open and resubscribed.
    async fn reconnect(&mut self) -> Result<Box<dyn BusSession>, Stop> {
        let connector = Arc::clone(&self.connector);
        let mut attempt = 0_u32;
        loop {
            let delay = self.options.backoff.delay(attempt);
            debug!(
                attempt = attempt + 1,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Waiting before reconnect"
            );
            let sleep = tokio::time::sleep(delay);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    () = &mut sleep => break,
                    command = self.commands.recv() => self.while_offline(command)?,
                }
            }

            let connect = connector.connect();
            tokio::pin!(connect);
            let opened = loop {
                tokio::select! {
                    opened = &mut connect => break opened,
                    command = self.commands.recv() => self.while_offline(command)?,
                }
            };
            match opened {
                Ok(mut session) => match resubscribe(&self.topics, session.as_mut()).await {
                    Ok(()) => {
                        self.metrics.inc_bus_reconnect();
                        info!(attempts = attempt + 1, topics = self.topics.len(), "Bus reconnected");
                        return Ok(session);
                    }
                    Err(reason) => warn!(reason = %reason, "Transport lost while resubscribing"),
                },
                Err(err) => warn!(attempt = attempt + 1, error = %err, "Bus reconnect failed"),
            }
            attempt = attempt.saturating_add(1);
        }
    }

    /// Answer commands that arrive while no session is open.
    fn while_offline(&mut self, command: Option<Command>) -> Result<(), Stop> {
        match command {
            None => Err(Stop(None)),
            Some(Command::Disconnect { reply }) => Err(Stop(Some(reply))),
            Some(Command::Subscribe { topic, qos, reply }) => {
                debug!(topic = %topic, "Subscription recorded until reconnect");
                self.record(topic, qos);
                let _ = reply.send(Ok(()));
                Ok(())
            }
            Some(Command::Publish { message, reply }) => {
                warn!(topic = %message.topic, "Bus publish dropped while reconnecting");
                if let Some(reply) = reply {
                    let _ = reply.send(Err(PublishError::NotConnected));
                }
                Ok(())
            }
        }
    }
}

async fn resubscribe(topics: &[(String, Qos)], session: &mut dyn BusSession) -> Result<(), String> {
    for (topic, qos) in topics {
        match session.subscribe(topic, *qos).await {
            Ok(()) => debug!(topic = %topic, "Resubscribed"),
            Err(SessionError::SubscriptionRefused { topic }) => {
                error!(topic = %topic, "Broker refused subscription after reconnect");
            }
            Err(err) => return Err(describe(&err)),
        }
    }
    Ok(())
}

fn describe(err: &SessionError) -> String {
    match err {
        SessionError::TransportLost { reason } => reason.clone(),
        SessionError::SubscriptionRefused { topic } => format!("subscription to {topic} refused"),
    }
}
