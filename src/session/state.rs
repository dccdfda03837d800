use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use time::OffsetDateTime;
use tracing::{error, trace, warn};

use crate::api::DiscoveredPeripheral;
use crate::utils::serialize_rfc3339;

/// Lifecycle of the single managed connection.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Hash, Serialize, derive_more::Display)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    #[display("disconnected")]
    Disconnected,
    #[display("connecting")]
    Connecting,
    #[display("connected")]
    Connected,
    #[display("disconnecting")]
    Disconnecting,
    /// Unrecoverable connect failure. Re-enterable like `Disconnected`.
    #[display("failed")]
    Failed,
}

impl ConnectionState {
    /// Whether a new connect may start from this state.
    #[must_use]
    pub fn is_idle(self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed)
    }
}

/// The peripheral currently connected.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct ConnectedPeripheral {
    address: String,
    display_name: String,
    #[serde(serialize_with = "serialize_rfc3339")]
    connected_at: OffsetDateTime,
    services: Vec<String>,
}

impl ConnectedPeripheral {
    #[must_use]
    pub fn new(
        address: impl Into<String>,
        display_name: impl Into<String>,
        connected_at: OffsetDateTime,
        services: Vec<String>,
    ) -> Self {
        Self {
            address: address.into(),
            display_name: display_name.into(),
            connected_at,
            services,
        }
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    #[must_use]
    pub fn connected_at(&self) -> OffsetDateTime {
        self.connected_at
    }

    /// Services reported by the backend on connect.
    #[must_use]
    pub fn services(&self) -> &[String] {
        &self.services
    }
}

/// Point-in-time copy of [`SessionState`].
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub connection_state: ConnectionState,
    pub connected_peripheral: Option<ConnectedPeripheral>,
    /// Confirmed subscriptions in confirmation order.
    pub subscribed_channels: Vec<String>,
    /// Results of the last completed scan in discovery order.
    pub last_scan_results: Vec<DiscoveredPeripheral>,
    pub connect_in_flight: bool,
    pub scan_in_flight: bool,
}

#[derive(Debug, Default)]
struct StateInner {
    connection_state: ConnectionState,
    connected_peripheral: Option<ConnectedPeripheral>,
    subscribed_channels: Vec<String>,
    last_scan_results: Vec<DiscoveredPeripheral>,
}

impl StateInner {
    fn check_invariants(&self) {
        let connected = self.connection_state == ConnectionState::Connected;
        if self.connected_peripheral.is_some() != connected {
            error!(
                state = %self.connection_state,
                has_peripheral = self.connected_peripheral.is_some(),
                "session invariant violated: peripheral presence does not match state"
            );
        }
        if !self.subscribed_channels.is_empty() && !connected {
            error!(
                state = %self.connection_state,
                subscriptions = self.subscribed_channels.len(),
                "session invariant violated: subscriptions outside connected state"
            );
        }
    }
}

/// Shared, single source of truth for the session lifecycle.
///
/// Readers take [`SessionState::snapshot`]. Transitions are crate-private and
/// driven by the connection controller and scanner only.
#[derive(Debug, Default)]
pub struct SessionState {
    inner: Mutex<StateInner>,
    connect_in_flight: AtomicBool,
    scan_in_flight: AtomicBool,
}

/// Releases a single-flight flag when dropped.
#[derive(Debug)]
pub(crate) struct FlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Resets a transient state to `Disconnected` if it is still current when dropped.
///
/// Covers operations whose future is dropped before they settle the session.
#[derive(Debug)]
pub(crate) struct TransientStateGuard<'a> {
    state: &'a SessionState,
    transient: ConnectionState,
}

impl Drop for TransientStateGuard<'_> {
    fn drop(&mut self) {
        let transient = self.transient;
        let reset = self.state.transition(|inner| {
            if inner.connection_state != transient {
                return false;
            }
            inner.connection_state = ConnectionState::Disconnected;
            inner.connected_peripheral = None;
            inner.subscribed_channels.clear();
            true
        });
        if reset {
            warn!(state = %transient, "operation abandoned, session reset to disconnected");
        }
    }
}

fn try_acquire(flag: &AtomicBool) -> Option<FlightGuard<'_>> {
    flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .ok()
        .map(|_previous| FlightGuard { flag })
}

impl SessionState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        let inner = self.lock();
        SessionSnapshot {
            connection_state: inner.connection_state,
            connected_peripheral: inner.connected_peripheral.clone(),
            subscribed_channels: inner.subscribed_channels.clone(),
            last_scan_results: inner.last_scan_results.clone(),
            connect_in_flight: self.connect_in_flight.load(Ordering::Acquire),
            scan_in_flight: self.scan_in_flight.load(Ordering::Acquire),
        }
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.lock().connection_state
    }

    #[must_use]
    pub fn connected_peripheral(&self) -> Option<ConnectedPeripheral> {
        self.lock().connected_peripheral.clone()
    }

    #[must_use]
    pub fn subscribed_channels(&self) -> Vec<String> {
        self.lock().subscribed_channels.clone()
    }

    #[must_use]
    pub fn last_scan_results(&self) -> Vec<DiscoveredPeripheral> {
        self.lock().last_scan_results.clone()
    }

    pub(crate) fn try_begin_connect(&self) -> Option<FlightGuard<'_>> {
        try_acquire(&self.connect_in_flight)
    }

    pub(crate) fn try_begin_scan(&self) -> Option<FlightGuard<'_>> {
        try_acquire(&self.scan_in_flight)
    }

    /// Moves an idle session to `Connecting`, or returns the blocking state.
    pub(crate) fn begin_connecting(&self) -> Result<(), ConnectionState> {
        self.transition(|inner| {
            if !inner.connection_state.is_idle() {
                return Err(inner.connection_state);
            }
            inner.connection_state = ConnectionState::Connecting;
            Ok(())
        })
    }

    /// Guards `transient` until the current operation settles the session.
    pub(crate) fn settle_on_drop(&self, transient: ConnectionState) -> TransientStateGuard<'_> {
        TransientStateGuard {
            state: self,
            transient,
        }
    }

    pub(crate) fn mark_connected(&self, peripheral: ConnectedPeripheral) {
        self.transition(|inner| {
            inner.connection_state = ConnectionState::Connected;
            inner.connected_peripheral = Some(peripheral);
            inner.subscribed_channels.clear();
        });
    }

    pub(crate) fn mark_failed(&self) {
        self.transition(|inner| {
            inner.connection_state = ConnectionState::Failed;
            inner.connected_peripheral = None;
            inner.subscribed_channels.clear();
        });
    }

    /// Moves a connected session to `Disconnecting`.
    ///
    /// Returns the released peripheral and the subscriptions that were active.
    pub(crate) fn begin_disconnecting(
        &self,
    ) -> Result<(ConnectedPeripheral, Vec<String>), ConnectionState> {
        self.transition(|inner| {
            if inner.connection_state != ConnectionState::Connected {
                return Err(inner.connection_state);
            }
            let Some(peripheral) = inner.connected_peripheral.take() else {
                return Err(inner.connection_state);
            };
            inner.connection_state = ConnectionState::Disconnecting;
            Ok((peripheral, std::mem::take(&mut inner.subscribed_channels)))
        })
    }

    pub(crate) fn mark_disconnected(&self) {
        self.transition(|inner| {
            inner.connection_state = ConnectionState::Disconnected;
            inner.connected_peripheral = None;
            inner.subscribed_channels.clear();
        });
    }

    /// Applies a remote disconnect if the session still believes it is connected.
    pub(crate) fn mark_remote_disconnect(&self) -> Option<ConnectedPeripheral> {
        self.transition(|inner| {
            if inner.connection_state != ConnectionState::Connected {
                return None;
            }
            inner.connection_state = ConnectionState::Disconnected;
            inner.subscribed_channels.clear();
            inner.connected_peripheral.take()
        })
    }

    /// Records a confirmed subscription. Ignored unless connected.
    pub(crate) fn add_subscription(&self, channel_id: &str) -> bool {
        self.transition(|inner| {
            if inner.connection_state != ConnectionState::Connected
                || inner.subscribed_channels.iter().any(|id| id == channel_id)
            {
                return false;
            }
            inner.subscribed_channels.push(channel_id.to_string());
            true
        })
    }

    pub(crate) fn remove_subscription(&self, channel_id: &str) -> bool {
        self.transition(|inner| {
            let before = inner.subscribed_channels.len();
            inner.subscribed_channels.retain(|id| id != channel_id);
            inner.subscribed_channels.len() != before
        })
    }

    pub(crate) fn replace_scan_results(&self, results: Vec<DiscoveredPeripheral>) {
        self.transition(|inner| inner.last_scan_results = results);
    }

    pub(crate) fn clear_scan_results(&self) {
        self.transition(|inner| inner.last_scan_results.clear());
    }

    fn transition<R>(&self, apply: impl FnOnce(&mut StateInner) -> R) -> R {
        let mut inner = self.lock();
        let before = inner.connection_state;
        let result = apply(&mut inner);
        if before != inner.connection_state {
            trace!(from = %before, to = %inner.connection_state, "session state transition");
        }
        inner.check_invariants();
        result
    }

    fn lock(&self) -> MutexGuard<'_, StateInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
