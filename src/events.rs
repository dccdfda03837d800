use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};

use futures::Stream;
use serde::Serialize;
use serde_with::SerializeDisplay;
use strum_macros::{Display, EnumIter};
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{error, trace, warn};

use crate::error::FailureReason;
use crate::utils::serialize_rfc3339;

/// Closed set of event types broadcast through an [`EventBus`].
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, EnumIter, Display, SerializeDisplay)]
#[strum(serialize_all = "kebab-case")]
pub enum EventKind {
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
    ConnectionError,
    ScanStarted,
    ScanCompleted,
    ScanError,
    NotificationReceived,
    SubscriptionChanged,
    AdapterReset,
    DevicePaired,
    PairingError,
    /// The realtime channel opened a link to the backend.
    ChannelConnected,
    /// The realtime channel lost its link. Distinct from [`EventKind::Disconnected`].
    ChannelDisconnected,
    /// The backend reported an error over the realtime channel, or a link attempt failed.
    ChannelError,
}

/// Which side ended a peripheral connection.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, derive_more::Display)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectOrigin {
    /// The local controller issued the disconnect.
    #[display("local")]
    Local,
    /// The backend pushed an unsolicited disconnect.
    #[display("remote")]
    Remote,
}

/// Why the realtime channel dropped its link.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, derive_more::Display)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ChannelCloseReason {
    #[display("remote closed the link")]
    RemoteClosed,
    #[display("transport error: {message}")]
    TransportError { message: String },
    #[display("{missed} heartbeat pings went unanswered")]
    MissedPongs { missed: u32 },
    #[display("channel shut down")]
    Shutdown,
}

/// Type-specific event data.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventPayload {
    Empty,
    Peripheral {
        address: String,
        display_name: String,
    },
    Connected {
        address: String,
        display_name: String,
        services: Vec<String>,
    },
    Disconnected {
        address: Option<String>,
        origin: DisconnectOrigin,
    },
    Failure {
        address: Option<String>,
        message: String,
        reason: FailureReason,
    },
    ScanStarted {
        duration_secs: u64,
        active: bool,
    },
    ScanCompleted {
        count: usize,
        from_cache: bool,
    },
    Notification {
        channel_id: String,
        value: serde_json::Value,
    },
    Subscription {
        channel_id: String,
        subscribed: bool,
    },
    ChannelConnected {
        url: String,
    },
    ChannelClosed {
        #[serde(flatten)]
        reason: ChannelCloseReason,
    },
    ChannelFailure {
        message: String,
    },
}

/// One immutable emission from an [`EventBus`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    kind: EventKind,
    payload: EventPayload,
    #[serde(serialize_with = "serialize_rfc3339")]
    timestamp: OffsetDateTime,
    sequence: u64,
}

impl Event {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    #[must_use]
    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    /// Emission time assigned by the bus.
    #[must_use]
    pub fn timestamp(&self) -> OffsetDateTime {
        self.timestamp
    }

    /// Per-bus emission counter, strictly increasing.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

/// Handle returned by [`EventBus::subscribe`] used to unsubscribe later.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct SubscriptionToken(u64);

type Handler = Arc<dyn Fn(&Event) -> anyhow::Result<()> + Send + Sync>;

struct Subscriber {
    token: SubscriptionToken,
    filter: Option<EventKind>,
    handler: Handler,
}

#[derive(Default)]
struct BusState {
    next_token: u64,
    next_sequence: u64,
    last_timestamp: Option<OffsetDateTime>,
    subscribers: Vec<Subscriber>,
}

/// In-process publish/subscribe bus.
///
/// Delivery is synchronous and follows subscription order. A handler that
/// returns an error or panics is logged and skipped; later handlers still
/// receive the event. Events are not retained, so late subscribers never see
/// earlier emissions.
#[derive(Default)]
pub struct EventBus {
    state: Mutex<BusState>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("EventBus")
            .field("subscribers", &state.subscribers.len())
            .field("next_sequence", &state.next_sequence)
            .finish()
    }
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for one event kind.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionToken
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.insert(Some(kind), Arc::new(handler))
    }

    /// Registers a handler for every event kind.
    pub fn subscribe_all<F>(&self, handler: F) -> SubscriptionToken
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.insert(None, Arc::new(handler))
    }

    /// Removes a handler. Returns `false` when the token was already removed.
    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        let mut state = self.lock();
        let before = state.subscribers.len();
        state
            .subscribers
            .retain(|subscriber| subscriber.token != token);
        state.subscribers.len() != before
    }

    /// Removes handlers registered for `kind`, or every handler when `None`.
    ///
    /// Catch-all handlers are only removed by `clear(None)`.
    pub fn clear(&self, kind: Option<EventKind>) {
        let mut state = self.lock();
        match kind {
            Some(kind) => state
                .subscribers
                .retain(|subscriber| subscriber.filter != Some(kind)),
            None => state.subscribers.clear(),
        }
    }

    /// Number of handlers that would receive an event of `kind`.
    #[must_use]
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.lock()
            .subscribers
            .iter()
            .filter(|subscriber| subscriber.filter.is_none_or(|filter| filter == kind))
            .count()
    }

    /// Stamps and delivers one event, returning the emitted value.
    pub fn emit(&self, kind: EventKind, payload: EventPayload) -> Event {
        let (event, handlers) = {
            let mut state = self.lock();
            let now = OffsetDateTime::now_utc();
            let timestamp = match state.last_timestamp {
                Some(last) if last > now => last,
                _ => now,
            };
            state.last_timestamp = Some(timestamp);
            let sequence = state.next_sequence;
            state.next_sequence += 1;

            let handlers = state
                .subscribers
                .iter()
                .filter(|subscriber| subscriber.filter.is_none_or(|filter| filter == kind))
                .map(|subscriber| (subscriber.token, Arc::clone(&subscriber.handler)))
                .collect::<Vec<_>>();

            let event = Event {
                kind,
                payload,
                timestamp,
                sequence,
            };
            (event, handlers)
        };

        trace!(%kind, sequence = event.sequence, handlers = handlers.len(), "emitting event");
        for (token, handler) in handlers {
            deliver(&event, token, &handler);
        }
        event
    }

    /// Subscribes a channel-backed stream of events.
    ///
    /// The subscription is removed when the stream is dropped.
    #[must_use]
    pub fn stream(self: &Arc<Self>, kind: Option<EventKind>) -> EventStream {
        let (sender, receiver) = mpsc::unbounded_channel();
        let forward = move |event: &Event| {
            sender
                .send(event.clone())
                .map_err(|_closed| anyhow::anyhow!("event stream receiver was dropped"))
        };
        let token = match kind {
            Some(kind) => self.subscribe(kind, forward),
            None => self.subscribe_all(forward),
        };

        EventStream {
            bus: Arc::downgrade(self),
            token,
            inner: UnboundedReceiverStream::new(receiver),
        }
    }

    fn insert(&self, filter: Option<EventKind>, handler: Handler) -> SubscriptionToken {
        let mut state = self.lock();
        let token = SubscriptionToken(state.next_token);
        state.next_token += 1;
        state.subscribers.push(Subscriber {
            token,
            filter,
            handler,
        });
        token
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn deliver(event: &Event, token: SubscriptionToken, handler: &Handler) {
    match panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
        Ok(Ok(())) => {}
        Ok(Err(error)) => {
            warn!(
                kind = %event.kind,
                subscriber = token.0,
                error = format!("{error:#}"),
                "event handler failed"
            );
        }
        Err(panic_payload) => {
            error!(
                kind = %event.kind,
                subscriber = token.0,
                panic = panic_message(panic_payload.as_ref()),
                "event handler panicked"
            );
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "<non-string panic payload>"
    }
}

/// Stream of bus events created by [`EventBus::stream`].
#[derive(Debug)]
pub struct EventStream {
    bus: Weak<EventBus>,
    token: SubscriptionToken,
    inner: UnboundedReceiverStream<Event>,
}

impl Stream for EventStream {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.token);
        }
    }
}
