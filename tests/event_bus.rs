use std::sync::{Arc, Mutex};

use futures::StreamExt;
use pretty_assertions::assert_eq;

use devsession::{ChannelCloseReason, DisconnectOrigin, EventBus, EventKind, EventPayload};

#[test]
fn handler_failures_are_isolated_across_kinds() {
    let bus = EventBus::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    for label in ["first", "last"] {
        let sink = Arc::clone(&log);
        bus.subscribe_all(move |event| {
            sink.lock()
                .expect("recorder lock")
                .push(format!("{label}:{}", event.kind()));
            Ok(())
        });
        if label == "first" {
            bus.subscribe(EventKind::AdapterReset, |_event| {
                anyhow::bail!("handler rejected the event")
            });
        }
    }

    bus.emit(EventKind::AdapterReset, EventPayload::Empty);
    bus.emit(
        EventKind::ScanStarted,
        EventPayload::ScanStarted {
            duration_secs: 5,
            active: true,
        },
    );

    assert_eq!(
        vec![
            "first:adapter-reset",
            "last:adapter-reset",
            "first:scan-started",
            "last:scan-started",
        ],
        log.lock().expect("recorder lock").clone()
    );
}

#[tokio::test]
async fn streams_see_only_events_emitted_after_subscribing() {
    let bus = Arc::new(EventBus::new());
    bus.emit(EventKind::DevicePaired, EventPayload::Empty);

    let mut paired = bus.stream(Some(EventKind::DevicePaired));
    bus.emit(EventKind::AdapterReset, EventPayload::Empty);
    let expected = bus.emit(EventKind::DevicePaired, EventPayload::Empty);

    assert_eq!(Some(expected), paired.next().await);
    drop(paired);
    assert_eq!(0, bus.subscriber_count(EventKind::DevicePaired));
}

#[test]
fn payloads_serialise_to_flat_objects() -> anyhow::Result<()> {
    let payloads = vec![
        EventPayload::Empty,
        EventPayload::Disconnected {
            address: Some("AA:BB".to_string()),
            origin: DisconnectOrigin::Remote,
        },
        EventPayload::ChannelClosed {
            reason: ChannelCloseReason::MissedPongs { missed: 3 },
        },
    ];

    let rendered = payloads
        .iter()
        .map(serde_json::to_string)
        .collect::<Result<Vec<_>, _>>()?
        .join("\n");

    insta::assert_snapshot!(rendered, @r#"
    null
    {"address":"AA:BB","origin":"remote"}
    {"reason":"missed_pongs","missed":3}
    "#);
    Ok(())
}
