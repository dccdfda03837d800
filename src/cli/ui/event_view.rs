use std::fmt::{self, Display, Formatter};

use serde_json::Value;

use crate::events::{Event, EventKind};

use super::painter::Painter;

/// Renders one bus event as a single line.
pub(crate) struct EventLineView<'a> {
    index: usize,
    event: &'a Event,
    painter: &'a Painter,
}

impl<'a> EventLineView<'a> {
    pub(crate) fn new(index: usize, event: &'a Event, painter: &'a Painter) -> Self {
        Self {
            index,
            event,
            painter,
        }
    }

    fn kind_label(&self) -> String {
        let kind = self.event.kind();
        let label = kind.to_string();
        match kind {
            EventKind::ConnectionError
            | EventKind::ScanError
            | EventKind::PairingError
            | EventKind::ChannelError => self.painter.failure(label),
            EventKind::Disconnected | EventKind::ChannelDisconnected | EventKind::AdapterReset => {
                self.painter.warning(label)
            }
            EventKind::Connected | EventKind::ChannelConnected | EventKind::DevicePaired => {
                self.painter.success(label)
            }
            _ => self.painter.value(label),
        }
    }
}

impl Display for EventLineView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let index_label = self.painter.muted(format!("[{:04}]", self.index));
        write!(f, "{index_label} {}", self.kind_label())?;

        let fields = match serde_json::to_value(self.event.payload()) {
            Ok(Value::Object(fields)) => fields,
            _ => return Ok(()),
        };
        for (name, value) in fields {
            let rendered = match value {
                Value::String(text) => text,
                Value::Null => continue,
                other => other.to_string(),
            };
            write!(f, " {}", self.painter.muted(format!("{name}={rendered}")))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::events::{ChannelCloseReason, EventBus, EventPayload};

    #[test]
    fn notification_line_lists_payload_fields() {
        let bus = EventBus::new();
        let event = bus.emit(
            EventKind::NotificationReceived,
            EventPayload::Notification {
                channel_id: "2a37".into(),
                value: json!(72),
            },
        );

        assert_eq!(
            "[0001] notification-received channel_id=2a37 value=72",
            EventLineView::new(1, &event, &Painter::new(false)).to_string()
        );
    }

    #[test]
    fn empty_payload_renders_kind_only() {
        let bus = EventBus::new();
        let event = bus.emit(EventKind::AdapterReset, EventPayload::Empty);

        assert_eq!(
            "[0003] adapter-reset",
            EventLineView::new(3, &event, &Painter::new(false)).to_string()
        );
    }

    #[test]
    fn close_reason_fields_are_flattened() {
        let bus = EventBus::new();
        let closed = bus.emit(
            EventKind::ChannelDisconnected,
            EventPayload::ChannelClosed {
                reason: ChannelCloseReason::MissedPongs { missed: 3 },
            },
        );

        assert_eq!(
            "[0002] channel-disconnected missed=3 reason=missed_pongs",
            EventLineView::new(2, &closed, &Painter::new(false)).to_string()
        );
    }
}
