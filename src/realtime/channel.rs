use std::error::Error as _;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, instrument, trace, warn};

use super::message::{InboundMessage, OutboundMessage, SubscriptionStatus};
use super::transport::{RealtimeLink, RealtimeTransport};
use crate::config::ChannelConfig;
use crate::error::ChannelError;
use crate::events::{ChannelCloseReason, DisconnectOrigin, EventBus, EventKind, EventPayload};

/// Sends channel subscription requests on behalf of the connection controller.
#[async_trait]
pub trait ChannelSubscriptions: fmt::Debug + Send + Sync {
    async fn request_subscribe(&self, channel_id: &str) -> Result<(), ChannelError>;

    async fn request_unsubscribe(&self, channel_id: &str) -> Result<(), ChannelError>;
}

struct Command {
    message: OutboundMessage,
    reply: oneshot::Sender<Result<(), ChannelError>>,
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

impl Command {
    fn reject(self) {
        if self.reply.send(Err(ChannelError::Closed)).is_err() {
            trace!("caller stopped waiting for rejected command");
        }
    }
}

/// Background task owning the push link.
///
/// The task opens the link, dispatches inbound messages to the event bus,
/// sends heartbeat pings and reconnects with exponential backoff whenever the
/// link drops. Attempts are unbounded; the counter resets after every
/// successful open.
pub struct RealtimeChannel {
    config: ChannelConfig,
    transport: Arc<dyn RealtimeTransport>,
    bus: Arc<EventBus>,
    commands: mpsc::Receiver<Command>,
    connected: watch::Sender<bool>,
    cancel: CancellationToken,
}

impl RealtimeChannel {
    /// Starts the channel task on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    #[must_use]
    pub fn spawn(
        config: ChannelConfig,
        transport: Arc<dyn RealtimeTransport>,
        bus: Arc<EventBus>,
    ) -> RealtimeHandle {
        let (commands_tx, commands_rx) = mpsc::channel(config.command_capacity());
        let (connected_tx, connected_rx) = watch::channel(false);
        let cancel = CancellationToken::new();
        let span = info_span!("realtime_channel", url = config.url());

        let channel = Self {
            config,
            transport,
            bus,
            commands: commands_rx,
            connected: connected_tx,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(channel.run().instrument(span));

        RealtimeHandle {
            commands: commands_tx,
            connected: connected_rx,
            cancel,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }

    async fn run(mut self) {
        let backoff = self.config.backoff();
        let mut attempt = 0u32;

        loop {
            let opened = tokio::select! {
                () = self.cancel.cancelled() => break,
                opened = self.transport.open(self.config.url()) => opened,
            };

            match opened {
                Ok(mut link) => {
                    attempt = 0;
                    info!("realtime channel connected");
                    self.connected.send_replace(true);
                    self.bus.emit(
                        EventKind::ChannelConnected,
                        EventPayload::ChannelConnected {
                            url: self.config.url().to_string(),
                        },
                    );

                    let reason = self.run_link(link.as_mut()).await;
                    link.close().await;
                    self.connected.send_replace(false);
                    info!(%reason, "realtime channel disconnected");
                    let shutting_down = reason == ChannelCloseReason::Shutdown;
                    self.bus.emit(
                        EventKind::ChannelDisconnected,
                        EventPayload::ChannelClosed { reason },
                    );
                    if shutting_down {
                        break;
                    }
                }
                Err(error) => {
                    let message = describe(&error);
                    warn!(attempt, %message, "failed to open realtime channel");
                    self.bus.emit(
                        EventKind::ChannelError,
                        EventPayload::ChannelFailure { message },
                    );
                }
            }

            let delay = backoff.delay_for(attempt);
            attempt = attempt.saturating_add(1);
            debug!(
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "reconnecting after backoff"
            );
            if !self.wait_out(delay).await {
                break;
            }
        }

        self.connected.send_replace(false);
        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            command.reject();
        }
        debug!("realtime channel stopped");
    }

    /// Sleeps through a backoff delay, rejecting commands meanwhile.
    ///
    /// Returns `false` when the channel should stop instead of reconnecting.
    async fn wait_out(&mut self, delay: Duration) -> bool {
        let pause = sleep(delay);
        tokio::pin!(pause);
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return false,
                () = &mut pause => return true,
                command = self.commands.recv() => match command {
                    Some(command) => {
                        debug!(message = ?command.message, "rejecting command while disconnected");
                        command.reject();
                    }
                    None => return false,
                },
            }
        }
    }

    async fn run_link(&mut self, link: &mut dyn RealtimeLink) -> ChannelCloseReason {
        let period = self.config.heartbeat_interval();
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut missed = 0u32;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return ChannelCloseReason::Shutdown,
                inbound = link.next_text() => match inbound {
                    None => return ChannelCloseReason::RemoteClosed,
                    Some(Err(error)) => {
                        return ChannelCloseReason::TransportError { message: describe(&error) };
                    }
                    Some(Ok(text)) => {
                        missed = 0;
                        if let Some(reply) = self.dispatch(&text)
                            && let Err(error) = send_message(link, &reply).await
                        {
                            return ChannelCloseReason::TransportError { message: describe(&error) };
                        }
                    }
                },
                _ = heartbeat.tick() => {
                    if let Some(limit) = self.config.max_missed_pongs()
                        && missed >= limit
                    {
                        warn!(missed, "heartbeat went unanswered, dropping link");
                        return ChannelCloseReason::MissedPongs { missed };
                    }
                    if let Err(error) = send_message(link, &OutboundMessage::Ping).await {
                        return ChannelCloseReason::TransportError { message: describe(&error) };
                    }
                    missed += 1;
                    trace!(missed, "sent heartbeat ping");
                },
                command = self.commands.recv() => match command {
                    None => return ChannelCloseReason::Shutdown,
                    Some(Command { message, reply }) => {
                        let result = send_message(link, &message).await;
                        let failure = result.as_ref().err().map(describe);
                        if reply.send(result).is_err() {
                            trace!(?message, "caller stopped waiting for command result");
                        }
                        if let Some(message) = failure {
                            return ChannelCloseReason::TransportError { message };
                        }
                    }
                },
            }
        }
    }

    /// Publishes one inbound frame to the bus and returns a reply to send, if any.
    fn dispatch(&self, text: &str) -> Option<OutboundMessage> {
        let message = match serde_json::from_str::<InboundMessage>(text) {
            Ok(message) => message,
            Err(error) => {
                warn!(%error, "dropping malformed realtime message");
                return None;
            }
        };

        match message {
            InboundMessage::Notification { channel_id, value } => {
                trace!(%channel_id, "notification received");
                self.bus.emit(
                    EventKind::NotificationReceived,
                    EventPayload::Notification { channel_id, value },
                );
            }
            InboundMessage::Subscription { channel_id, status } => {
                debug!(%channel_id, ?status, "subscription confirmed");
                self.bus.emit(
                    EventKind::SubscriptionChanged,
                    EventPayload::Subscription {
                        channel_id,
                        subscribed: status == SubscriptionStatus::Subscribed,
                    },
                );
            }
            InboundMessage::ConnectionState {
                connected,
                state,
                address,
            } => {
                if InboundMessage::reports_disconnect(connected, state.as_deref()) {
                    info!(?address, "backend reports peripheral disconnected");
                    self.bus.emit(
                        EventKind::Disconnected,
                        EventPayload::Disconnected {
                            address,
                            origin: DisconnectOrigin::Remote,
                        },
                    );
                } else {
                    debug!(?connected, ?state, ?address, "connection state push");
                }
            }
            InboundMessage::Ping => return Some(OutboundMessage::Pong),
            InboundMessage::Pong => trace!("heartbeat answered"),
            InboundMessage::Error { message } => {
                warn!(%message, "backend reported a channel error");
                self.bus.emit(
                    EventKind::ChannelError,
                    EventPayload::ChannelFailure { message },
                );
            }
            InboundMessage::AdapterReset => {
                info!("backend adapter was reset");
                self.bus.emit(EventKind::AdapterReset, EventPayload::Empty);
            }
            InboundMessage::Unknown => {
                let kind = serde_json::from_str::<Value>(text)
                    .ok()
                    .and_then(|value| value.get("type").and_then(Value::as_str).map(str::to_owned));
                debug!(?kind, "ignoring unknown realtime message type");
            }
        }
        None
    }
}

async fn send_message(
    link: &mut dyn RealtimeLink,
    message: &OutboundMessage,
) -> Result<(), ChannelError> {
    let text = serde_json::to_string(message)?;
    link.send_text(text).await
}

/// Renders an error with its source chain.
fn describe(error: &ChannelError) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Cloneable control surface of a running [`RealtimeChannel`].
#[derive(Debug, Clone)]
pub struct RealtimeHandle {
    commands: mpsc::Sender<Command>,
    connected: watch::Receiver<bool>,
    cancel: CancellationToken,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl RealtimeHandle {
    /// Whether the link is currently open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Waits until the link is open.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Closed`] when the channel stopped first.
    pub async fn wait_until_connected(&self) -> Result<(), ChannelError> {
        let mut connected = self.connected.clone();
        connected
            .wait_for(|connected| *connected)
            .await
            .map(|_| ())
            .map_err(|_closed| ChannelError::Closed)
    }

    /// Sends one outbound message over the open link.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Closed`] while the link is down, or the
    /// transport error when the send fails.
    #[instrument(skip(self), level = "debug")]
    pub async fn send(&self, message: OutboundMessage) -> Result<(), ChannelError> {
        if !self.is_connected() {
            return Err(ChannelError::Closed);
        }
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command { message, reply })
            .await
            .map_err(|_closed| ChannelError::Closed)?;
        response.await.unwrap_or(Err(ChannelError::Closed))
    }

    /// Requests notifications for `channel_id`.
    ///
    /// # Errors
    ///
    /// Same as [`RealtimeHandle::send`].
    pub async fn subscribe(&self, channel_id: &str) -> Result<(), ChannelError> {
        self.send(OutboundMessage::SubscribeToCharacteristic {
            channel_id: channel_id.to_string(),
        })
        .await
    }

    /// Requests that notifications for `channel_id` stop.
    ///
    /// # Errors
    ///
    /// Same as [`RealtimeHandle::send`].
    pub async fn unsubscribe(&self, channel_id: &str) -> Result<(), ChannelError> {
        self.send(OutboundMessage::UnsubscribeFromCharacteristic {
            channel_id: channel_id.to_string(),
        })
        .await
    }

    /// Stops the channel and waits for its task to finish.
    ///
    /// An open link is closed and reported with a `shutdown` reason.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task
            && let Err(error) = task.await
        {
            warn!(%error, "realtime channel task failed");
        }
    }
}

#[async_trait]
impl ChannelSubscriptions for RealtimeHandle {
    async fn request_subscribe(&self, channel_id: &str) -> Result<(), ChannelError> {
        self.subscribe(channel_id).await
    }

    async fn request_unsubscribe(&self, channel_id: &str) -> Result<(), ChannelError> {
        self.unsubscribe(channel_id).await
    }
}
