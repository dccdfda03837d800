use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::time::{Instant, sleep_until};
use tracing::debug;

use super::message::OutboundMessage;
use super::transport::{RealtimeLink, RealtimeTransport};
use crate::error::{ChannelError, FixtureError};

/// One scripted inbound frame.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FakeFrame {
    delay: Duration,
    text: String,
}

impl FakeFrame {
    /// A frame delivered as soon as it is read.
    #[must_use]
    pub fn now(text: impl Into<String>) -> Self {
        Self::after(Duration::ZERO, text)
    }

    /// A frame delivered `delay` after the previous one.
    #[must_use]
    pub fn after(delay: Duration, text: impl Into<String>) -> Self {
        Self {
            delay,
            text: text.into(),
        }
    }
}

/// Scripted behaviour of one open attempt.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum FakeLink {
    /// Fail the attempt.
    Refuse,
    /// Accept, deliver the frames, then close or stay open.
    Accept { frames: Vec<FakeFrame>, stay_open: bool },
}

impl FakeLink {
    #[must_use]
    pub fn refuse() -> Self {
        Self::Refuse
    }

    /// Accepts, delivers `frames`, then closes.
    #[must_use]
    pub fn closing(frames: Vec<FakeFrame>) -> Self {
        Self::Accept {
            frames,
            stay_open: false,
        }
    }

    /// Accepts, delivers `frames`, then stays open until closed locally.
    #[must_use]
    pub fn open(frames: Vec<FakeFrame>) -> Self {
        Self::Accept {
            frames,
            stay_open: true,
        }
    }
}

/// Notification frames parsed from `channel=value,...`.
///
/// Values that parse as JSON are sent as JSON, anything else as a string.
#[derive(Debug, Clone, derive_more::Into)]
pub struct NotificationFixture {
    frames: Vec<FakeFrame>,
}

impl FromStr for NotificationFixture {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let frames = value
            .split(',')
            .map(str::trim)
            .filter(|pair| !pair.is_empty())
            .map(|pair| {
                let (channel_id, raw_value) =
                    pair.split_once('=').ok_or(FixtureError::InvalidNotification)?;
                let channel_id = channel_id.trim();
                if channel_id.is_empty() {
                    return Err(FixtureError::InvalidNotification);
                }
                let value = serde_json::from_str::<Value>(raw_value.trim())
                    .unwrap_or_else(|_error| Value::from(raw_value.trim()));
                let text = json!({
                    "type": "notification",
                    "channelId": channel_id,
                    "value": value,
                });
                Ok(FakeFrame::now(text.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { frames })
    }
}

#[derive(Debug, Default)]
struct FakeWire {
    links: VecDeque<FakeLink>,
    open_attempts: Vec<Instant>,
    sent: Vec<String>,
}

/// In-process [`RealtimeTransport`] replaying scripted links.
///
/// Links are consumed in order and the last one repeats. With no script every
/// attempt opens a silent link that stays open.
#[derive(Debug, Clone, Default)]
pub struct FakeTransport {
    wire: Arc<Mutex<FakeWire>>,
    answer_pings: bool,
    confirm_subscriptions: bool,
}

impl FakeTransport {
    #[must_use]
    pub fn new(links: Vec<FakeLink>) -> Self {
        Self {
            wire: Arc::new(Mutex::new(FakeWire {
                links: links.into(),
                ..FakeWire::default()
            })),
            answer_pings: false,
            confirm_subscriptions: false,
        }
    }

    /// Answers every outbound ping with a pong.
    #[must_use]
    pub fn with_ping_replies(mut self) -> Self {
        self.answer_pings = true;
        self
    }

    /// Confirms every subscribe and unsubscribe request.
    #[must_use]
    pub fn with_subscription_confirmations(mut self) -> Self {
        self.confirm_subscriptions = true;
        self
    }

    /// Times at which open was attempted.
    #[must_use]
    pub fn open_attempts(&self) -> Vec<Instant> {
        self.lock().open_attempts.clone()
    }

    /// Outbound frames sent on any link, in order.
    #[must_use]
    pub fn sent_messages(&self) -> Vec<String> {
        self.lock().sent.clone()
    }

    fn lock(&self) -> MutexGuard<'_, FakeWire> {
        self.wire.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl RealtimeTransport for FakeTransport {
    async fn open(&self, url: &str) -> Result<Box<dyn RealtimeLink>, ChannelError> {
        let link = {
            let mut wire = self.lock();
            wire.open_attempts.push(Instant::now());
            if wire.links.len() > 1 {
                wire.links.pop_front()
            } else {
                wire.links.front().cloned()
            }
        };
        debug!(url, ?link, "fake realtime open");

        match link.unwrap_or_else(|| FakeLink::open(Vec::new())) {
            FakeLink::Refuse => Err(ChannelError::Scripted {
                message: format!("connection to {url} refused"),
            }),
            FakeLink::Accept { frames, stay_open } => Ok(Box::new(FakeConnection {
                wire: Arc::clone(&self.wire),
                pending: frames.into(),
                replies: VecDeque::new(),
                next_due: None,
                stay_open,
                closed: false,
                answer_pings: self.answer_pings,
                confirm_subscriptions: self.confirm_subscriptions,
            })),
        }
    }
}

struct FakeConnection {
    wire: Arc<Mutex<FakeWire>>,
    pending: VecDeque<FakeFrame>,
    replies: VecDeque<String>,
    next_due: Option<Instant>,
    stay_open: bool,
    closed: bool,
    answer_pings: bool,
    confirm_subscriptions: bool,
}

impl FakeConnection {
    fn reply_to(&self, text: &str) -> Option<String> {
        let message = serde_json::from_str::<OutboundMessage>(text).ok()?;
        let reply = match message {
            OutboundMessage::Ping if self.answer_pings => json!({"type": "pong"}),
            OutboundMessage::SubscribeToCharacteristic { channel_id } if self.confirm_subscriptions => {
                json!({"type": "subscription", "channelId": channel_id, "status": "subscribed"})
            }
            OutboundMessage::UnsubscribeFromCharacteristic { channel_id }
                if self.confirm_subscriptions =>
            {
                json!({"type": "subscription", "channelId": channel_id, "status": "unsubscribed"})
            }
            _ => return None,
        };
        Some(reply.to_string())
    }
}

#[async_trait]
impl RealtimeLink for FakeConnection {
    async fn send_text(&mut self, text: String) -> Result<(), ChannelError> {
        if self.closed {
            return Err(ChannelError::Closed);
        }
        if let Some(reply) = self.reply_to(&text) {
            self.replies.push_back(reply);
        }
        self.wire
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sent
            .push(text);
        Ok(())
    }

    async fn next_text(&mut self) -> Option<Result<String, ChannelError>> {
        if self.closed {
            return None;
        }
        if let Some(reply) = self.replies.pop_front() {
            return Some(Ok(reply));
        }
        if let Some(frame) = self.pending.front() {
            let due = *self.next_due.get_or_insert_with(|| Instant::now() + frame.delay);
            sleep_until(due).await;
            self.next_due = None;
            return self.pending.pop_front().map(|frame| Ok(frame.text));
        }
        if self.stay_open {
            std::future::pending::<()>().await;
        }
        None
    }

    async fn close(&mut self) {
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use super::*;

    impl std::fmt::Debug for dyn RealtimeLink {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("RealtimeLink")
        }
    }

    #[test]
    fn notification_fixture_builds_notification_frames() {
        let fixture: NotificationFixture = "heart-rate=72, battery=\"low\", label=hello"
            .parse()
            .expect("fixture should parse");
        let frames: Vec<FakeFrame> = fixture.into();

        let values = frames
            .iter()
            .map(|frame| {
                serde_json::from_str::<Value>(&frame.text).expect("frame should be JSON")["value"]
                    .clone()
            })
            .collect::<Vec<_>>();
        assert_eq!(vec![json!(72), json!("low"), json!("hello")], values);
    }

    #[test]
    fn notification_fixture_rejects_missing_separator() {
        assert_matches!(
            "heart-rate".parse::<NotificationFixture>(),
            Err(FixtureError::InvalidNotification)
        );
    }

    #[tokio::test]
    async fn links_replay_in_order_and_last_repeats() {
        let transport = FakeTransport::new(vec![
            FakeLink::refuse(),
            FakeLink::closing(vec![FakeFrame::now(r#"{"type":"ping"}"#)]),
        ]);

        assert_matches!(transport.open("ws://fake").await, Err(ChannelError::Scripted { .. }));
        for _ in 0..2 {
            let mut link = transport
                .open("ws://fake")
                .await
                .expect("scripted link should open");
            assert_eq!(
                Some(r#"{"type":"ping"}"#.to_string()),
                link.next_text().await.transpose().expect("frame should be ok")
            );
            assert!(link.next_text().await.is_none());
        }
        assert_eq!(3, transport.open_attempts().len());
    }

    #[tokio::test]
    async fn confirmations_are_queued_ahead_of_scripted_frames() {
        let transport = FakeTransport::new(vec![FakeLink::open(Vec::new())])
            .with_ping_replies()
            .with_subscription_confirmations();
        let mut link = transport
            .open("ws://fake")
            .await
            .expect("scripted link should open");

        link.send_text(r#"{"action":"subscribe_to_characteristic","data":{"channelId":"2a37"}}"#.into())
            .await
            .expect("send should succeed");
        link.send_text(r#"{"action":"ping"}"#.into())
            .await
            .expect("send should succeed");

        let first = link.next_text().await.transpose().expect("frame should be ok");
        let second = link.next_text().await.transpose().expect("frame should be ok");
        assert_eq!(
            Some(json!({"type": "subscription", "channelId": "2a37", "status": "subscribed"})),
            first.map(|text| serde_json::from_str::<Value>(&text).expect("reply should be JSON"))
        );
        assert_eq!(Some(r#"{"type":"pong"}"#.to_string()), second);
        assert_eq!(2, transport.sent_messages().len());
    }
}
