use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, instrument, warn};

use super::kv::KeyValueStore;
use crate::error::StoreError;
use crate::utils::{format_rfc3339, parse_rfc3339, serialize_rfc3339};

pub(crate) const CONNECTION_HISTORY_KEY: &str = "connection_history";

/// A previously connected peripheral.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct ConnectionHistoryEntry {
    address: String,
    display_name: String,
    #[serde(serialize_with = "serialize_rfc3339")]
    last_connected: OffsetDateTime,
}

impl ConnectionHistoryEntry {
    #[must_use]
    pub fn new(
        address: impl Into<String>,
        display_name: impl Into<String>,
        last_connected: OffsetDateTime,
    ) -> Self {
        Self {
            address: address.into(),
            display_name: display_name.into(),
            last_connected,
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
    pub fn last_connected(&self) -> OffsetDateTime {
        self.last_connected
    }
}

/// On-disk record shape: `{id, name, lastConnected}`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedEntry {
    id: String,
    name: String,
    last_connected: String,
}

impl From<&ConnectionHistoryEntry> for PersistedEntry {
    fn from(entry: &ConnectionHistoryEntry) -> Self {
        Self {
            id: entry.address.clone(),
            name: entry.display_name.clone(),
            last_connected: format_rfc3339(entry.last_connected),
        }
    }
}

/// Bounded most-recent-first record of connected peripherals.
///
/// Storage and parse failures never surface to callers; they are logged and
/// the history is treated as empty.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    store: Arc<dyn KeyValueStore>,
    limit: usize,
}

impl HistoryStore {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, limit: usize) -> Self {
        Self { store, limit }
    }

    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Records a connection made now and returns the updated history.
    pub fn record_connection(&self, address: &str, display_name: &str) -> Vec<ConnectionHistoryEntry> {
        self.record_connection_at(address, display_name, OffsetDateTime::now_utc())
    }

    /// Records a connection at an explicit time and returns the updated history.
    ///
    /// The entry is inserted first, any older entry with the same address is
    /// removed, and the list is truncated to the configured limit.
    #[instrument(skip(self), level = "debug")]
    pub fn record_connection_at(
        &self,
        address: &str,
        display_name: &str,
        connected_at: OffsetDateTime,
    ) -> Vec<ConnectionHistoryEntry> {
        let mut entries = self.list();
        entries.retain(|entry| entry.address != address);
        entries.insert(
            0,
            ConnectionHistoryEntry::new(address, display_name, connected_at),
        );
        entries.truncate(self.limit);

        if let Err(error) = self.save(&entries) {
            warn!(%error, "failed to persist connection history");
        }
        entries
    }

    /// Returns the persisted history, most recent first.
    #[must_use]
    pub fn list(&self) -> Vec<ConnectionHistoryEntry> {
        match self.load() {
            Ok(entries) => entries,
            Err(error) => {
                warn!(%error, "connection history is unreadable, treating as empty");
                Vec::new()
            }
        }
    }

    /// Returns the most recent entry for `address`.
    #[must_use]
    pub fn find(&self, address: &str) -> Option<ConnectionHistoryEntry> {
        self.list()
            .into_iter()
            .find(|entry| entry.address == address)
    }

    /// Removes all history entries.
    pub fn clear(&self) {
        if let Err(error) = self.store.remove(CONNECTION_HISTORY_KEY) {
            warn!(%error, "failed to clear connection history");
        }
    }

    fn load(&self) -> Result<Vec<ConnectionHistoryEntry>, StoreError> {
        let Some(raw) = self.store.get(CONNECTION_HISTORY_KEY)? else {
            return Ok(Vec::new());
        };
        let persisted: Vec<PersistedEntry> =
            serde_json::from_str(&raw).map_err(|source| StoreError::Parse {
                key: CONNECTION_HISTORY_KEY.to_string(),
                source,
            })?;

        let entries = persisted
            .into_iter()
            .filter_map(|entry| match parse_rfc3339(&entry.last_connected) {
                Some(last_connected) => Some(ConnectionHistoryEntry {
                    address: entry.id,
                    display_name: entry.name,
                    last_connected,
                }),
                None => {
                    debug!(address = %entry.id, "dropping history entry with invalid timestamp");
                    None
                }
            })
            .take(self.limit)
            .collect();
        Ok(entries)
    }

    fn save(&self, entries: &[ConnectionHistoryEntry]) -> Result<(), StoreError> {
        let persisted = entries.iter().map(PersistedEntry::from).collect::<Vec<_>>();
        let raw = serde_json::to_string(&persisted).map_err(|source| StoreError::Encode {
            key: CONNECTION_HISTORY_KEY.to_string(),
            source,
        })?;
        self.store.set(CONNECTION_HISTORY_KEY, &raw)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use time::macros::datetime;

    use super::*;
    use crate::store::MemoryStore;

    fn history() -> (Arc<MemoryStore>, HistoryStore) {
        let store = Arc::new(MemoryStore::new());
        let history = HistoryStore::new(store.clone(), 5);
        (store, history)
    }

    #[test]
    fn persisted_shape_uses_id_name_and_iso_timestamp() {
        let (store, history) = history();
        history.record_connection_at("AA:BB", "Widget", datetime!(2026-03-01 12:00:00 UTC));

        let raw = store
            .get(CONNECTION_HISTORY_KEY)
            .expect("read should succeed")
            .expect("history should be persisted");
        assert_eq!(
            r#"[{"id":"AA:BB","name":"Widget","lastConnected":"2026-03-01T12:00:00Z"}]"#,
            raw
        );
    }

    #[test]
    fn unparseable_history_is_treated_as_empty() {
        let (store, history) = history();
        store
            .set(CONNECTION_HISTORY_KEY, "not json")
            .expect("write should succeed");

        assert!(history.list().is_empty());

        let entries = history.record_connection("AA:BB", "Widget");
        assert_eq!(1, entries.len());
    }

    #[test]
    fn clear_removes_everything() {
        let (_store, history) = history();
        history.record_connection("AA:BB", "Widget");
        history.clear();
        assert!(history.list().is_empty());
    }

    #[test]
    fn find_returns_matching_entry() {
        let (_store, history) = history();
        history.record_connection("AA:BB", "Widget");
        history.record_connection("CC:DD", "Gadget");

        let found = history.find("AA:BB").expect("entry should exist");
        assert_eq!("Widget", found.display_name());
        assert_eq!(None, history.find("EE:FF"));
    }
}
