use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use futures::StreamExt;
use pretty_assertions::assert_eq;

use devsession::{
    ApiError, ChannelConfig, ConnectOptions, ConnectionState, DeviceSessionManager,
    DisconnectOrigin, DisconnectOutcome, EventBus, EventKind, EventPayload, FakeApiConfig,
    FakeDeviceApi, FakeFrame, FakeLink, FakeOutcome, FakeTransport, MemoryStore, SessionConfig,
    SessionError,
};

fn session(config: FakeApiConfig) -> (DeviceSessionManager, Arc<FakeDeviceApi>) {
    let api = Arc::new(FakeDeviceApi::new(config));
    let manager = DeviceSessionManager::new(
        Arc::clone(&api) as _,
        Arc::new(MemoryStore::new()),
        SessionConfig::default(),
    );
    (manager, api)
}

fn record_kinds(bus: &EventBus) -> Arc<Mutex<Vec<EventKind>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    bus.subscribe_all(move |event| {
        sink.lock().expect("recorder lock").push(event.kind());
        Ok(())
    });
    seen
}

fn kinds(seen: &Mutex<Vec<EventKind>>) -> Vec<EventKind> {
    seen.lock().expect("recorder lock").clone()
}

fn channel_config() -> ChannelConfig {
    ChannelConfig::builder().url("ws://fake/ws").build()
}

#[tokio::test(start_paused = true)]
async fn connect_records_history_and_emits_lifecycle_events() -> anyhow::Result<()> {
    let (manager, api) = session(FakeApiConfig::builder().build());
    let seen = record_kinds(manager.bus());

    let peripheral = manager
        .controller()
        .connect("AA:BB", "Widget", ConnectOptions::default())
        .await?;

    assert_eq!("AA:BB", peripheral.address());
    assert_eq!("Widget", peripheral.display_name());
    assert_eq!(
        vec![EventKind::Connecting, EventKind::Connected],
        kinds(&seen)
    );
    let snapshot = manager.snapshot();
    assert_eq!(ConnectionState::Connected, snapshot.connection_state);
    assert_eq!(Some(peripheral), snapshot.connected_peripheral);
    assert_eq!(
        vec![("AA:BB", "Widget")],
        manager
            .history()
            .list()
            .iter()
            .map(|entry| (entry.address(), entry.display_name()))
            .collect::<Vec<_>>()
    );
    assert_eq!(
        Some("AA:BB".to_string()),
        manager.preferences().last_connected_device()
    );

    let requests = api.connect_requests();
    assert_eq!(1, requests.len());
    let (address, params) = &requests[0];
    assert_eq!("AA:BB", address);
    assert_eq!(15_000, params.timeout_ms());
    assert!(!params.auto_reconnect());
    assert_eq!(1, api.probe_calls());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn second_connect_while_in_flight_is_rejected_without_events() {
    let (manager, api) = session(
        FakeApiConfig::builder()
            .latency(Duration::from_secs(1))
            .build(),
    );
    let seen = record_kinds(manager.bus());
    let controller = manager.controller();

    let (first, second) = tokio::join!(
        controller.connect("AA:BB", "Widget", ConnectOptions::default()),
        controller.connect("CC:DD", "Other", ConnectOptions::default()),
    );

    assert!(first.is_ok());
    assert_matches!(second, Err(SessionError::ConnectInFlight));
    assert_eq!(
        vec![EventKind::Connecting, EventKind::Connected],
        kinds(&seen)
    );
    assert_eq!(1, api.connect_calls());
    assert!(!manager.snapshot().connect_in_flight);
}

#[tokio::test]
async fn connect_while_connected_is_an_invalid_state() -> anyhow::Result<()> {
    let (manager, api) = session(FakeApiConfig::builder().build());
    manager
        .controller()
        .connect("AA:BB", "Widget", ConnectOptions::default())
        .await?;
    let seen = record_kinds(manager.bus());

    let result = manager
        .controller()
        .connect("CC:DD", "Other", ConnectOptions::default())
        .await;

    assert_matches!(
        result,
        Err(SessionError::InvalidState {
            state: ConnectionState::Connected
        })
    );
    assert!(kinds(&seen).is_empty());
    assert_eq!(1, api.connect_calls());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn connect_timeout_returns_session_to_disconnected() {
    let (manager, _api) = session(
        FakeApiConfig::builder()
            .connect(vec![FakeOutcome::Hang])
            .build(),
    );
    let seen = record_kinds(manager.bus());

    let result = manager
        .controller()
        .connect(
            "AA:BB",
            "Widget",
            ConnectOptions::builder()
                .timeout(Duration::from_secs(2))
                .build(),
        )
        .await;

    assert_matches!(result, Err(SessionError::Api(ApiError::Timeout { after })) if after == Duration::from_secs(2));
    assert_eq!(
        vec![EventKind::Connecting, EventKind::ConnectionError],
        kinds(&seen)
    );
    assert_eq!(ConnectionState::Disconnected, manager.snapshot().connection_state);
    assert!(manager.history().list().is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancelled_connect_leaves_a_retryable_session() -> anyhow::Result<()> {
    let (manager, api) = session(
        FakeApiConfig::builder()
            .connect(vec![FakeOutcome::Hang, FakeOutcome::Succeed])
            .build(),
    );
    let controller = manager.controller();

    let cancelled = tokio::time::timeout(
        Duration::from_secs(1),
        controller.connect("AA:BB", "Widget", ConnectOptions::default()),
    )
    .await;
    assert!(cancelled.is_err());
    let snapshot = manager.snapshot();
    assert_eq!(ConnectionState::Disconnected, snapshot.connection_state);
    assert!(!snapshot.connect_in_flight);

    controller
        .connect("AA:BB", "Widget", ConnectOptions::default())
        .await?;
    assert_eq!(ConnectionState::Connected, manager.snapshot().connection_state);
    assert_eq!(2, api.connect_calls());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn slow_probe_counts_against_the_connect_deadline() {
    let (manager, api) = session(
        FakeApiConfig::builder()
            .probe(vec![FakeOutcome::Hang])
            .connect(vec![FakeOutcome::Hang])
            .build(),
    );
    let started = tokio::time::Instant::now();

    let result = manager
        .controller()
        .connect(
            "AA:BB",
            "Widget",
            ConnectOptions::builder()
                .timeout(Duration::from_secs(15))
                .build(),
        )
        .await;

    assert_matches!(result, Err(SessionError::Api(ApiError::Timeout { after })) if after == Duration::from_secs(15));
    assert_eq!(Duration::from_secs(15), started.elapsed());
    assert_eq!(1, api.probe_calls());
    let (_address, params) = api
        .connect_requests()
        .pop()
        .expect("connect should still be requested after the probe gave up");
    assert_eq!(12_000, params.timeout_ms());
}

#[tokio::test]
async fn malformed_connect_response_leaves_a_retryable_failed_session() -> anyhow::Result<()> {
    let (manager, _api) = session(
        FakeApiConfig::builder()
            .connect(vec![FakeOutcome::Malformed, FakeOutcome::Succeed])
            .build(),
    );
    let controller = manager.controller();

    let first = controller
        .connect("AA:BB", "Widget", ConnectOptions::default())
        .await;
    assert_matches!(first, Err(SessionError::Api(ApiError::Malformed(_))));
    assert_eq!(ConnectionState::Failed, manager.snapshot().connection_state);

    controller
        .connect("AA:BB", "Widget", ConnectOptions::default())
        .await?;
    assert_eq!(ConnectionState::Connected, manager.snapshot().connection_state);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn connect_options_override_session_defaults() -> anyhow::Result<()> {
    let (manager, api) = session(FakeApiConfig::builder().build());
    manager.preferences().set_auto_reconnect(true);

    manager
        .controller()
        .connect(
            "AA:BB",
            "Widget",
            ConnectOptions::builder()
                .timeout(Duration::from_secs(3))
                .retry_count(2)
                .probe(false)
                .build(),
        )
        .await?;

    let (_address, params) = api
        .connect_requests()
        .pop()
        .expect("connect should have been requested");
    assert_eq!(3_000, params.timeout_ms());
    assert!(params.auto_reconnect());
    assert_eq!(2, params.retry_count());
    assert_eq!(0, api.probe_calls());
    Ok(())
}

#[tokio::test]
async fn reconnect_last_uses_the_remembered_peripheral() -> anyhow::Result<()> {
    let (manager, api) = session(FakeApiConfig::builder().build());
    let controller = manager.controller();

    assert_matches!(
        controller.reconnect_last(ConnectOptions::default()).await,
        Err(SessionError::NoPreviousDevice)
    );

    controller
        .connect("AA:BB", "Widget", ConnectOptions::default())
        .await?;
    controller.disconnect().await?;
    let peripheral = controller.reconnect_last(ConnectOptions::default()).await?;

    assert_eq!("AA:BB", peripheral.address());
    assert_eq!("Widget", peripheral.display_name());
    assert_eq!(2, api.connect_calls());
    Ok(())
}

#[tokio::test]
async fn disconnect_confirmed_by_backend() -> anyhow::Result<()> {
    let (manager, _api) = session(FakeApiConfig::builder().build());
    manager
        .controller()
        .connect("AA:BB", "Widget", ConnectOptions::default())
        .await?;
    let seen = record_kinds(manager.bus());

    let outcome = manager.controller().disconnect().await?;

    assert_eq!(DisconnectOutcome::Confirmed, outcome);
    assert_eq!(
        vec![EventKind::Disconnecting, EventKind::Disconnected],
        kinds(&seen)
    );
    let snapshot = manager.snapshot();
    assert_eq!(ConnectionState::Disconnected, snapshot.connection_state);
    assert_eq!(None, snapshot.connected_peripheral);
    Ok(())
}

#[tokio::test]
async fn already_disconnected_error_is_reconciled() -> anyhow::Result<()> {
    let (manager, _api) = session(
        FakeApiConfig::builder()
            .disconnect(vec![FakeOutcome::fail(
                400,
                r#"{"detail": "Device already disconnected"}"#,
            )])
            .build(),
    );
    manager
        .controller()
        .connect("AA:BB", "Widget", ConnectOptions::default())
        .await?;
    let seen = record_kinds(manager.bus());

    let outcome = manager.controller().disconnect().await?;

    assert_eq!(
        DisconnectOutcome::Reconciled {
            reason: "Device already disconnected".to_string()
        },
        outcome
    );
    assert!(outcome.acknowledged());
    assert_eq!(
        vec![EventKind::Disconnecting, EventKind::Disconnected],
        kinds(&seen)
    );
    assert_eq!(ConnectionState::Disconnected, manager.snapshot().connection_state);
    Ok(())
}

#[tokio::test]
async fn other_disconnect_failures_force_local_state() -> anyhow::Result<()> {
    let (manager, _api) = session(
        FakeApiConfig::builder()
            .disconnect(vec![FakeOutcome::fail(500, "adapter powered off")])
            .build(),
    );
    manager
        .controller()
        .connect("AA:BB", "Widget", ConnectOptions::default())
        .await?;
    let mut events = manager.bus().stream(None);

    let outcome = manager.controller().disconnect().await?;

    assert_eq!(
        DisconnectOutcome::Forced {
            message: "adapter powered off".to_string()
        },
        outcome
    );
    assert!(!outcome.acknowledged());
    let mut observed = Vec::new();
    for _ in 0..3 {
        let event = events.next().await.expect("bus should stay open");
        observed.push(event.kind());
    }
    assert_eq!(
        vec![
            EventKind::Disconnecting,
            EventKind::ConnectionError,
            EventKind::Disconnected
        ],
        observed
    );
    assert_eq!(ConnectionState::Disconnected, manager.snapshot().connection_state);
    Ok(())
}

#[tokio::test]
async fn disconnect_without_connection_is_rejected() {
    let (manager, api) = session(FakeApiConfig::builder().build());

    assert_matches!(
        manager.controller().disconnect().await,
        Err(SessionError::NotConnected)
    );
    assert_eq!(0, api.disconnect_calls());
}

#[tokio::test]
async fn pairing_emits_paired_without_touching_connection_state() -> anyhow::Result<()> {
    let (manager, _api) = session(FakeApiConfig::builder().build());
    let mut paired = manager.bus().stream(Some(EventKind::DevicePaired));

    manager.controller().pair("AA:BB", "Widget").await?;

    let event = paired.next().await.expect("bus should stay open");
    assert_eq!(
        &EventPayload::Peripheral {
            address: "AA:BB".to_string(),
            display_name: "Widget".to_string()
        },
        event.payload()
    );
    assert_eq!(ConnectionState::Disconnected, manager.snapshot().connection_state);
    Ok(())
}

#[tokio::test]
async fn unexpected_pair_status_is_a_pairing_error() {
    let (manager, _api) = session(FakeApiConfig::builder().pair_status("pending".into()).build());
    let seen = record_kinds(manager.bus());

    let result = manager.controller().pair("AA:BB", "Widget").await;

    assert_matches!(result, Err(SessionError::PairingRejected { status }) if status == "pending");
    assert_eq!(vec![EventKind::PairingError], kinds(&seen));
}

#[tokio::test]
async fn subscriptions_require_a_connected_peripheral() {
    let (manager, _api) = session(FakeApiConfig::builder().build());

    assert_matches!(
        manager.controller().subscribe("2a37").await,
        Err(SessionError::NotConnected)
    );
}

#[tokio::test]
async fn subscription_set_changes_only_after_confirmation() -> anyhow::Result<()> {
    let (mut manager, _api) = session(FakeApiConfig::builder().build());
    let transport = FakeTransport::default().with_subscription_confirmations();
    manager
        .controller()
        .connect("AA:BB", "Widget", ConnectOptions::default())
        .await?;
    let mut changes = manager.bus().stream(Some(EventKind::SubscriptionChanged));
    let realtime = manager
        .attach_realtime(channel_config(), Arc::new(transport.clone()))
        .await;
    realtime.wait_until_connected().await?;

    manager.controller().subscribe("2a37").await?;
    let change = changes.next().await.expect("bus should stay open");

    assert_eq!(
        &EventPayload::Subscription {
            channel_id: "2a37".to_string(),
            subscribed: true
        },
        change.payload()
    );
    assert_eq!(vec!["2a37".to_string()], manager.snapshot().subscribed_channels);

    manager.controller().disconnect().await?;
    assert_eq!(
        vec![
            r#"{"action":"subscribe_to_characteristic","data":{"channelId":"2a37"}}"#.to_string(),
            r#"{"action":"unsubscribe_from_characteristic","data":{"channelId":"2a37"}}"#
                .to_string(),
        ],
        transport.sent_messages()
    );
    assert!(manager.snapshot().subscribed_channels.is_empty());

    manager.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn unconfirmed_subscription_is_not_recorded() -> anyhow::Result<()> {
    let (mut manager, _api) = session(FakeApiConfig::builder().build());
    manager
        .controller()
        .connect("AA:BB", "Widget", ConnectOptions::default())
        .await?;
    let realtime = manager
        .attach_realtime(channel_config(), Arc::new(FakeTransport::default()))
        .await;
    realtime.wait_until_connected().await?;

    manager.controller().subscribe("2a37").await?;

    assert!(manager.snapshot().subscribed_channels.is_empty());
    manager.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn remote_disconnect_push_ends_the_session() -> anyhow::Result<()> {
    let (mut manager, _api) = session(FakeApiConfig::builder().build());
    manager
        .controller()
        .connect("AA:BB", "Widget", ConnectOptions::default())
        .await?;
    let mut disconnects = manager.bus().stream(Some(EventKind::Disconnected));
    let transport = FakeTransport::new(vec![FakeLink::open(vec![FakeFrame::now(
        r#"{"type": "connection_state", "connected": false, "address": "AA:BB"}"#,
    )])]);

    manager.attach_realtime(channel_config(), Arc::new(transport)).await;
    let event = disconnects.next().await.expect("bus should stay open");

    assert_eq!(
        &EventPayload::Disconnected {
            address: Some("AA:BB".to_string()),
            origin: DisconnectOrigin::Remote
        },
        event.payload()
    );
    let snapshot = manager.snapshot();
    assert_eq!(ConnectionState::Disconnected, snapshot.connection_state);
    assert_eq!(None, snapshot.connected_peripheral);

    manager.shutdown().await;
    Ok(())
}
