use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bon::Builder;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::context::SessionContext;
use super::state::{ConnectedPeripheral, ConnectionState};
use crate::api::{ConnectParams, DeviceApi, UNKNOWN_DEVICE_NAME};
use crate::error::{ApiError, ChannelError, FailureReason, SessionError};
use crate::events::{DisconnectOrigin, EventKind, EventPayload, SubscriptionToken};
use crate::realtime::ChannelSubscriptions;

const RECONCILABLE_DISCONNECT_PHRASES: [&str; 2] = ["already disconnected", "not connected"];
const PAIRED_STATUS: &str = "paired";

/// Per-call connect settings. Unset fields fall back to session defaults.
#[derive(Debug, Clone, Copy, Default, Builder)]
pub struct ConnectOptions {
    /// Deadline for the connect request.
    timeout: Option<Duration>,
    /// Ask the backend to reconnect automatically. Defaults to the persisted preference.
    auto_reconnect: Option<bool>,
    /// Backend-side retry count.
    #[builder(default)]
    retry_count: u32,
    /// Probe the peripheral before connecting.
    probe: Option<bool>,
}

/// How a local disconnect settled.
///
/// Local state always ends up `Disconnected`; the outcome records whether the
/// backend agreed.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DisconnectOutcome {
    /// The backend confirmed the disconnect.
    Confirmed,
    /// The backend failed in a way that means the link is already gone.
    Reconciled { reason: String },
    /// The backend failed for another reason; local state was forced anyway.
    Forced { message: String },
}

impl DisconnectOutcome {
    /// Whether the disconnect counts as successful.
    #[must_use]
    pub fn acknowledged(&self) -> bool {
        !matches!(self, Self::Forced { .. })
    }
}

/// Drives connect, disconnect and pair against the device backend.
#[derive(Debug, Clone)]
pub struct ConnectionController {
    context: SessionContext,
    api: Arc<dyn DeviceApi>,
    channel: Option<Arc<dyn ChannelSubscriptions>>,
}

impl ConnectionController {
    #[must_use]
    pub fn new(context: SessionContext, api: Arc<dyn DeviceApi>) -> Self {
        Self {
            context,
            api,
            channel: None,
        }
    }

    /// Routes channel subscribe and unsubscribe requests through `channel`.
    #[must_use]
    pub fn with_channel(mut self, channel: Arc<dyn ChannelSubscriptions>) -> Self {
        self.channel = Some(channel);
        self
    }

    #[must_use]
    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    /// Connects to `address`.
    ///
    /// A second call while a connect is in flight is rejected without any state
    /// change or event. On success the session becomes `Connected`, the
    /// connection is recorded in history and `connected` is emitted. On failure
    /// `connection-error` is emitted and the session returns to
    /// `Disconnected` (`Failed` when the backend answered with garbage).
    /// Dropping the future before it settles also returns the session to
    /// `Disconnected`. The availability probe shares the connect deadline.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::ConnectInFlight`], [`SessionError::InvalidState`]
    /// when the session is not idle, or [`SessionError::Api`] when the backend
    /// request fails or times out.
    #[instrument(skip(self, options), level = "info", fields(address = %address))]
    pub async fn connect(
        &self,
        address: &str,
        display_name: &str,
        options: ConnectOptions,
    ) -> Result<ConnectedPeripheral, SessionError> {
        let state = self.context.state();
        let Some(_in_flight) = state.try_begin_connect() else {
            warn!("connect rejected, another connect is in flight");
            return Err(SessionError::ConnectInFlight);
        };
        if let Err(current) = state.begin_connecting() {
            warn!(state = %current, "connect rejected in current state");
            return Err(SessionError::InvalidState { state: current });
        }
        let _settle = state.settle_on_drop(ConnectionState::Connecting);

        let bus = self.context.bus();
        bus.emit(
            EventKind::Connecting,
            EventPayload::Peripheral {
                address: address.to_string(),
                display_name: display_name.to_string(),
            },
        );

        let config = self.context.config();
        let budget = options.timeout.unwrap_or(config.connect_timeout());
        let deadline = Instant::now() + budget;
        if options.probe.unwrap_or(config.probe_before_connect()) {
            let probe_deadline = deadline.min(Instant::now() + config.probe_timeout());
            if let Err(error) =
                with_deadline_at(probe_deadline, config.probe_timeout(), self.api.probe(address))
                    .await
            {
                warn!(error = %error.user_message(), "availability probe failed, connecting anyway");
            }
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        let params = ConnectParams::new(
            u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX),
            options
                .auto_reconnect
                .unwrap_or_else(|| self.context.preferences().auto_reconnect()),
            options.retry_count,
        );
        match with_deadline_at(deadline, budget, self.api.connect(address, params)).await {
            Ok(response) => {
                let peripheral = ConnectedPeripheral::new(
                    address,
                    display_name,
                    OffsetDateTime::now_utc(),
                    response.services,
                );
                state.mark_connected(peripheral.clone());
                self.context
                    .history()
                    .record_connection(address, display_name);
                self.context.preferences().set_last_connected_device(address);
                bus.emit(
                    EventKind::Connected,
                    EventPayload::Connected {
                        address: address.to_string(),
                        display_name: display_name.to_string(),
                        services: peripheral.services().to_vec(),
                    },
                );
                info!(status = %response.status, "connected");
                Ok(peripheral)
            }
            Err(error) => {
                let reason = error.reason();
                if reason == FailureReason::Malformed {
                    state.mark_failed();
                } else {
                    state.mark_disconnected();
                }
                let message = error.user_message();
                warn!(%reason, %message, "connect failed");
                bus.emit(
                    EventKind::ConnectionError,
                    EventPayload::Failure {
                        address: Some(address.to_string()),
                        message,
                        reason,
                    },
                );
                Err(error.into())
            }
        }
    }

    /// Reconnects to the most recently connected peripheral.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NoPreviousDevice`] when nothing was connected
    /// before, otherwise the same errors as [`ConnectionController::connect`].
    pub async fn reconnect_last(
        &self,
        options: ConnectOptions,
    ) -> Result<ConnectedPeripheral, SessionError> {
        let address = self
            .context
            .preferences()
            .last_connected_device()
            .ok_or(SessionError::NoPreviousDevice)?;
        let display_name = self.context.history().find(&address).map_or_else(
            || UNKNOWN_DEVICE_NAME.to_string(),
            |entry| entry.display_name().to_string(),
        );
        self.connect(&address, &display_name, options).await
    }

    /// Disconnects the current peripheral.
    ///
    /// Active subscriptions are released one by one first; failures there are
    /// logged only. The session always ends `Disconnected` and emits
    /// `disconnected`, whatever the backend answers.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotConnected`] when no peripheral is connected.
    #[instrument(skip(self), level = "info")]
    pub async fn disconnect(&self) -> Result<DisconnectOutcome, SessionError> {
        let state = self.context.state();
        let (peripheral, channels) = state.begin_disconnecting().map_err(|current| {
            debug!(state = %current, "disconnect ignored, nothing connected");
            SessionError::NotConnected
        })?;
        let _settle = state.settle_on_drop(ConnectionState::Disconnecting);

        let bus = self.context.bus();
        bus.emit(
            EventKind::Disconnecting,
            EventPayload::Peripheral {
                address: peripheral.address().to_string(),
                display_name: peripheral.display_name().to_string(),
            },
        );

        for channel_id in &channels {
            let result = match &self.channel {
                Some(channel) => channel.request_unsubscribe(channel_id).await,
                None => Err(ChannelError::Closed),
            };
            if let Err(error) = result {
                warn!(%channel_id, %error, "failed to unsubscribe before disconnecting");
            }
        }

        let deadline = self.context.config().disconnect_timeout();
        let outcome = match with_deadline(deadline, self.api.disconnect()).await {
            Ok(_response) => DisconnectOutcome::Confirmed,
            Err(error) if is_reconcilable(&error) => {
                info!(error = %error.user_message(), "backend already dropped the link");
                DisconnectOutcome::Reconciled {
                    reason: error.user_message(),
                }
            }
            Err(error) => {
                let message = error.user_message();
                warn!(%message, "disconnect failed, forcing local state");
                bus.emit(
                    EventKind::ConnectionError,
                    EventPayload::Failure {
                        address: Some(peripheral.address().to_string()),
                        message: message.clone(),
                        reason: error.reason(),
                    },
                );
                DisconnectOutcome::Forced { message }
            }
        };

        state.mark_disconnected();
        bus.emit(
            EventKind::Disconnected,
            EventPayload::Disconnected {
                address: Some(peripheral.address().to_string()),
                origin: DisconnectOrigin::Local,
            },
        );
        Ok(outcome)
    }

    /// Pairs with `address`. Never changes the connection state.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::PairingRejected`] when the backend answers with a
    /// status other than `paired`, or [`SessionError::Api`] when the request
    /// fails or times out.
    #[instrument(skip(self), level = "info")]
    pub async fn pair(&self, address: &str, display_name: &str) -> Result<(), SessionError> {
        let bus = self.context.bus();
        let deadline = self.context.config().pair_timeout();
        let error = match with_deadline(deadline, self.api.pair(address)).await {
            Ok(response) if response.status == PAIRED_STATUS => {
                bus.emit(
                    EventKind::DevicePaired,
                    EventPayload::Peripheral {
                        address: address.to_string(),
                        display_name: display_name.to_string(),
                    },
                );
                info!("paired");
                return Ok(());
            }
            Ok(response) => SessionError::PairingRejected {
                status: response.status,
            },
            Err(error) => SessionError::Api(error),
        };

        let message = match &error {
            SessionError::Api(api_error) => api_error.user_message(),
            other => other.to_string(),
        };
        warn!(%message, "pairing failed");
        bus.emit(
            EventKind::PairingError,
            EventPayload::Failure {
                address: Some(address.to_string()),
                message,
                reason: error.reason(),
            },
        );
        Err(error)
    }

    /// Requests push notifications for `channel_id`.
    ///
    /// The subscription set changes only once the backend confirms.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotConnected`] without a connected peripheral, or
    /// [`SessionError::Channel`] when the request cannot be sent.
    #[instrument(skip(self), level = "debug")]
    pub async fn subscribe(&self, channel_id: &str) -> Result<(), SessionError> {
        let channel = self.connected_channel()?;
        channel.request_subscribe(channel_id).await?;
        Ok(())
    }

    /// Requests that push notifications for `channel_id` stop.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotConnected`] without a connected peripheral, or
    /// [`SessionError::Channel`] when the request cannot be sent.
    #[instrument(skip(self), level = "debug")]
    pub async fn unsubscribe(&self, channel_id: &str) -> Result<(), SessionError> {
        let channel = self.connected_channel()?;
        channel.request_unsubscribe(channel_id).await?;
        Ok(())
    }

    /// Applies server-pushed changes to session state.
    ///
    /// Remote disconnects and confirmed subscription changes arrive through the
    /// event bus from the realtime channel.
    pub fn track_remote_events(&self) -> Vec<SubscriptionToken> {
        let bus = self.context.bus();

        let state = Arc::clone(self.context.state());
        let disconnects = bus.subscribe(EventKind::Disconnected, move |event| {
            if let EventPayload::Disconnected {
                origin: DisconnectOrigin::Remote,
                address,
            } = event.payload()
            {
                match state.mark_remote_disconnect() {
                    Some(peripheral) => {
                        info!(address = peripheral.address(), "peripheral disconnected remotely");
                    }
                    None => debug!(?address, "remote disconnect while not connected"),
                }
            }
            Ok(())
        });

        let state = Arc::clone(self.context.state());
        let subscriptions = bus.subscribe(EventKind::SubscriptionChanged, move |event| {
            let EventPayload::Subscription {
                channel_id,
                subscribed,
            } = event.payload()
            else {
                anyhow::bail!("subscription event without subscription payload");
            };
            let changed = if *subscribed {
                state.add_subscription(channel_id)
            } else {
                state.remove_subscription(channel_id)
            };
            debug!(%channel_id, subscribed, changed, "applied subscription confirmation");
            Ok(())
        });

        vec![disconnects, subscriptions]
    }

    fn connected_channel(&self) -> Result<&Arc<dyn ChannelSubscriptions>, SessionError> {
        if self.context.state().connection_state() != ConnectionState::Connected {
            return Err(SessionError::NotConnected);
        }
        self.channel
            .as_ref()
            .ok_or(SessionError::Channel(ChannelError::Closed))
    }
}

/// Runs `request` with a deadline; dropping the future cancels it.
pub(crate) async fn with_deadline<T, F>(deadline: Duration, request: F) -> Result<T, ApiError>
where
    F: Future<Output = Result<T, ApiError>>,
{
    with_deadline_at(Instant::now() + deadline, deadline, request).await
}

/// Like [`with_deadline`], but against an absolute instant shared by several requests.
async fn with_deadline_at<T, F>(deadline: Instant, budget: Duration, request: F) -> Result<T, ApiError>
where
    F: Future<Output = Result<T, ApiError>>,
{
    tokio::time::timeout_at(deadline, request)
        .await
        .unwrap_or(Err(ApiError::Timeout { after: budget }))
}

fn is_reconcilable(error: &ApiError) -> bool {
    if matches!(error, ApiError::Timeout { .. }) {
        return true;
    }
    let message = error.user_message().to_lowercase();
    RECONCILABLE_DISCONNECT_PHRASES
        .iter()
        .any(|phrase| message.contains(phrase))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("Device already disconnected", true)]
    #[case("DEVICE NOT CONNECTED", true)]
    #[case("peripheral is not connected to adapter", true)]
    #[case("adapter powered off", false)]
    fn remote_messages_are_matched_case_insensitively(#[case] message: &str, #[case] expected: bool) {
        let error = ApiError::Remote {
            status: 400,
            message: message.to_string(),
        };
        assert_eq!(expected, is_reconcilable(&error));
    }

    #[test]
    fn timeouts_are_reconcilable() {
        let error = ApiError::Timeout {
            after: Duration::from_secs(10),
        };
        assert!(is_reconcilable(&error));
    }

    #[test]
    fn only_forced_outcomes_are_unacknowledged() {
        assert!(DisconnectOutcome::Confirmed.acknowledged());
        assert!(
            DisconnectOutcome::Reconciled {
                reason: "gone".into()
            }
            .acknowledged()
        );
        assert!(
            !DisconnectOutcome::Forced {
                message: "boom".into()
            }
            .acknowledged()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn with_deadline_turns_elapsed_requests_into_timeouts() {
        let result: Result<(), ApiError> =
            with_deadline(Duration::from_secs(2), std::future::pending()).await;
        assert!(matches!(result, Err(ApiError::Timeout { after }) if after == Duration::from_secs(2)));
    }
}
