use std::sync::Arc;

use pretty_assertions::assert_eq;
use tempfile::TempDir;
use time::macros::datetime;

use devsession::{HistoryStore, JsonFileStore, KeyValueStore, MemoryStore, Preferences};

fn addresses(history: &HistoryStore) -> Vec<String> {
    history
        .list()
        .iter()
        .map(|entry| entry.address().to_string())
        .collect()
}

#[test]
fn history_keeps_the_five_most_recent_peripherals() {
    let history = HistoryStore::new(Arc::new(MemoryStore::new()), 5);

    for address in ["A", "B", "C", "D", "E", "F"] {
        history.record_connection(address, &format!("Device {address}"));
    }

    assert_eq!(vec!["F", "E", "D", "C", "B"], addresses(&history));
}

#[test]
fn reconnecting_moves_the_entry_to_the_front() {
    let history = HistoryStore::new(Arc::new(MemoryStore::new()), 5);

    history.record_connection_at("A", "Old name", datetime!(2024-01-01 10:00 UTC));
    history.record_connection_at("B", "Scale", datetime!(2024-01-01 11:00 UTC));
    let entries = history.record_connection_at("A", "Widget", datetime!(2024-01-01 12:00 UTC));

    assert_eq!(
        vec![
            ("A", "Widget", datetime!(2024-01-01 12:00 UTC)),
            ("B", "Scale", datetime!(2024-01-01 11:00 UTC)),
        ],
        entries
            .iter()
            .map(|entry| (entry.address(), entry.display_name(), entry.last_connected()))
            .collect::<Vec<_>>()
    );
    assert_eq!(entries, history.list());
}

#[test]
fn history_survives_reopening_the_file_store() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("store.json");
    {
        let store = Arc::new(JsonFileStore::open(&path)?);
        let history = HistoryStore::new(store.clone(), 5);
        history.record_connection_at("AA:BB", "Widget", datetime!(2024-03-05 08:30 UTC));
        Preferences::new(store).set_auto_reconnect(true);
    }

    let store = Arc::new(JsonFileStore::open(&path)?);
    let history = HistoryStore::new(store.clone(), 5);
    let entry = history.find("AA:BB").expect("entry should persist");

    assert_eq!("Widget", entry.display_name());
    assert_eq!(datetime!(2024-03-05 08:30 UTC), entry.last_connected());
    assert!(Preferences::new(store).auto_reconnect());
    Ok(())
}

#[test]
fn history_uses_the_shared_record_format() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let history = HistoryStore::new(store.clone(), 5);

    history.record_connection_at("AA:BB", "Widget", datetime!(2024-03-05 08:30 UTC));

    let raw = store.get("connection_history")?.expect("history should be stored");
    insta::assert_snapshot!(raw, @r#"[{"id":"AA:BB","name":"Widget","lastConnected":"2024-03-05T08:30:00Z"}]"#);
    Ok(())
}

#[test]
fn unreadable_history_is_treated_as_empty() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    store.set("connection_history", "{not json")?;
    let history = HistoryStore::new(store, 5);

    assert!(history.list().is_empty());
    history.record_connection("AA:BB", "Widget");
    assert_eq!(vec!["AA:BB"], addresses(&history));
    Ok(())
}

#[test]
fn clearing_history_keeps_preferences() {
    let store = Arc::new(MemoryStore::new());
    let history = HistoryStore::new(store.clone(), 5);
    let preferences = Preferences::new(store);
    history.record_connection("AA:BB", "Widget");
    preferences.set_last_connected_device("AA:BB");

    history.clear();

    assert!(history.list().is_empty());
    assert_eq!(Some("AA:BB".to_string()), preferences.last_connected_device());
}
