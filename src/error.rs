use std::time::Duration;

use thiserror::Error;

use crate::session::ConnectionState;

/// Coarse classification of a failed remote operation.
///
/// Carried in error events so consumers can tell a timed-out request apart
/// from a backend rejection without parsing messages.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, serde::Serialize, derive_more::Display)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The request exceeded its deadline and was cancelled.
    #[display("timeout")]
    Timeout,
    /// The backend could not be reached.
    #[display("transport")]
    Transport,
    /// The backend answered with a non-success status.
    #[display("remote")]
    Remote,
    /// The backend answered with a body that could not be decoded.
    #[display("malformed")]
    Malformed,
    /// The backend answered successfully but declined the request.
    #[display("rejected")]
    Rejected,
    /// The operation could not start in the current session state.
    #[display("state")]
    State,
}

/// Errors returned by the backend REST client.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request timed out after {}", humantime::format_duration(*after))]
    Timeout { after: Duration },
    #[error("backend request failed")]
    Transport(#[from] reqwest::Error),
    #[error("{message}")]
    Remote { status: u16, message: String },
    #[error("backend response could not be decoded")]
    Malformed(#[from] serde_json::Error),
    #[error("invalid backend base URL `{url}`")]
    InvalidBaseUrl { url: String },
}

impl ApiError {
    /// Classifies this error for event payloads.
    #[must_use]
    pub fn reason(&self) -> FailureReason {
        match self {
            Self::Timeout { .. } => FailureReason::Timeout,
            Self::Transport(_) | Self::InvalidBaseUrl { .. } => FailureReason::Transport,
            Self::Remote { .. } => FailureReason::Remote,
            Self::Malformed(_) => FailureReason::Malformed,
        }
    }

    /// Returns the human-readable message surfaced to the user.
    ///
    /// Remote errors carry the message extracted from the response body; other
    /// variants render their display text including the source chain.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Remote { message, .. } => message.clone(),
            Self::Transport(source) => format!("{self}: {source}"),
            Self::Malformed(source) => format!("{self}: {source}"),
            Self::Timeout { .. } | Self::InvalidBaseUrl { .. } => self.to_string(),
        }
    }
}

/// Errors returned by session-level operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("a connect operation is already in flight")]
    ConnectInFlight,
    #[error("a scan is already in flight")]
    ScanInFlight,
    #[error("operation is not allowed while the session is {state}")]
    InvalidState { state: ConnectionState },
    #[error("no peripheral is connected")]
    NotConnected,
    #[error("no previously connected peripheral is recorded")]
    NoPreviousDevice,
    #[error("pairing was not accepted (status `{status}`)")]
    PairingRejected { status: String },
    #[error("realtime channel request failed")]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Api(#[from] ApiError),
}

impl SessionError {
    /// Classifies this error for event payloads.
    #[must_use]
    pub fn reason(&self) -> FailureReason {
        match self {
            Self::Api(error) => error.reason(),
            Self::Channel(_) => FailureReason::Transport,
            Self::PairingRejected { .. } => FailureReason::Rejected,
            Self::ConnectInFlight
            | Self::ScanInFlight
            | Self::InvalidState { .. }
            | Self::NotConnected
            | Self::NoPreviousDevice => FailureReason::State,
        }
    }
}

/// Errors returned by the realtime push channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("failed to open realtime channel")]
    Connect(#[source] Box<tokio_tungstenite::tungstenite::Error>),
    #[error("failed to send realtime message")]
    Send(#[source] Box<tokio_tungstenite::tungstenite::Error>),
    #[error("failed to receive realtime message")]
    Receive(#[source] Box<tokio_tungstenite::tungstenite::Error>),
    #[error("realtime channel is closed")]
    Closed,
    #[error("failed to encode realtime message")]
    Encode(#[from] serde_json::Error),
    #[error("{message}")]
    Scripted { message: String },
}

/// Errors returned by the persistent key-value store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read or write `{path}`")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("persisted value for `{key}` could not be parsed")]
    Parse {
        key: String,
        source: serde_json::Error,
    },
    #[error("failed to encode value for `{key}`")]
    Encode {
        key: String,
        source: serde_json::Error,
    },
}

/// Errors returned when parsing fake backend fixtures.
#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("the fake scan fixture is empty")]
    EmptyFixture,
    #[error("fixture records must contain one to four pipe-delimited fields")]
    InvalidRecordFieldCount,
    #[error("failed to parse signal strength")]
    InvalidSignalStrength(#[from] std::num::ParseIntError),
    #[error("fake notification fixture must be `channel=value` pairs")]
    InvalidNotification,
}

/// Errors returned when validating runtime backend options.
#[derive(Debug, Error)]
pub(crate) enum CliConfigError {
    #[error("`connect` needs an address or `--last`")]
    MissingConnectTarget,
}

/// Errors returned by telemetry initialisation.
#[derive(Debug, Error)]
pub(crate) enum TelemetryError {
    #[error("failed to install tracing subscriber")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}
