use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Subscription status pushed by the backend.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum SubscriptionStatus {
    Subscribed,
    Unsubscribed,
}

/// Inbound `{type, ...}` envelope.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum InboundMessage {
    Notification {
        #[serde(rename = "channelId", alias = "channel_id", alias = "characteristic")]
        channel_id: String,
        #[serde(default)]
        value: Value,
    },
    Subscription {
        #[serde(rename = "channelId", alias = "channel_id", alias = "characteristic")]
        channel_id: String,
        status: SubscriptionStatus,
    },
    ConnectionState {
        #[serde(default)]
        connected: Option<bool>,
        #[serde(default)]
        state: Option<String>,
        #[serde(default)]
        address: Option<String>,
    },
    Ping,
    Pong,
    Error {
        #[serde(default, alias = "detail")]
        message: String,
    },
    AdapterReset,
    #[serde(other)]
    Unknown,
}

impl InboundMessage {
    /// Whether a `connection_state` push reports that the peripheral is gone.
    pub(crate) fn reports_disconnect(connected: Option<bool>, state: Option<&str>) -> bool {
        connected == Some(false)
            || state.is_some_and(|state| state.eq_ignore_ascii_case("disconnected"))
    }
}

/// Outbound `{action, data}` envelope.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "data", rename_all = "snake_case")]
pub enum OutboundMessage {
    SubscribeToCharacteristic {
        #[serde(rename = "channelId")]
        channel_id: String,
    },
    UnsubscribeFromCharacteristic {
        #[serde(rename = "channelId")]
        channel_id: String,
    },
    Ping,
    Pong,
}
