use std::sync::Arc;

use time::OffsetDateTime;
use tracing::warn;

use super::kv::KeyValueStore;
use crate::utils::epoch_millis;

pub(crate) const AUTO_RECONNECT_KEY: &str = "auto_reconnect";
pub(crate) const LAST_CONNECTED_DEVICE_KEY: &str = "last_connected_device";
pub(crate) const SCAN_CACHE_TIMESTAMP_KEY: &str = "scan_cache_timestamp";

/// Small persisted settings shared across sessions.
///
/// Reads fall back to defaults and writes are best effort; failures are logged.
#[derive(Debug, Clone)]
pub struct Preferences {
    store: Arc<dyn KeyValueStore>,
}

impl Preferences {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Whether connects request backend-side auto-reconnect. Defaults to `false`.
    #[must_use]
    pub fn auto_reconnect(&self) -> bool {
        self.read(AUTO_RECONNECT_KEY)
            .is_some_and(|value| value.trim().eq_ignore_ascii_case("true"))
    }

    pub fn set_auto_reconnect(&self, enabled: bool) {
        self.write(AUTO_RECONNECT_KEY, if enabled { "true" } else { "false" });
    }

    /// Address of the most recently connected peripheral.
    #[must_use]
    pub fn last_connected_device(&self) -> Option<String> {
        self.read(LAST_CONNECTED_DEVICE_KEY)
            .filter(|value| !value.is_empty())
    }

    pub fn set_last_connected_device(&self, address: &str) {
        self.write(LAST_CONNECTED_DEVICE_KEY, address);
    }

    /// Completion time of the last successful remote scan.
    #[must_use]
    pub fn scan_cache_timestamp(&self) -> Option<OffsetDateTime> {
        let raw = self.read(SCAN_CACHE_TIMESTAMP_KEY)?;
        let millis = match raw.trim().parse::<i64>() {
            Ok(millis) => millis,
            Err(error) => {
                warn!(%error, raw = raw.as_str(), "ignoring unparseable scan cache timestamp");
                return None;
            }
        };
        OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000).ok()
    }

    pub fn set_scan_cache_timestamp(&self, timestamp: OffsetDateTime) {
        self.write(SCAN_CACHE_TIMESTAMP_KEY, &epoch_millis(timestamp).to_string());
    }

    pub fn clear_scan_cache_timestamp(&self) {
        if let Err(error) = self.store.remove(SCAN_CACHE_TIMESTAMP_KEY) {
            warn!(%error, "failed to clear scan cache timestamp");
        }
    }

    fn read(&self, key: &str) -> Option<String> {
        match self.store.get(key) {
            Ok(value) => value,
            Err(error) => {
                warn!(key, %error, "failed to read preference");
                None
            }
        }
    }

    fn write(&self, key: &str, value: &str) {
        if let Err(error) = self.store.set(key, value) {
            warn!(key, %error, "failed to persist preference");
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use time::macros::datetime;

    use super::*;
    use crate::store::MemoryStore;

    fn preferences() -> (Arc<MemoryStore>, Preferences) {
        let store = Arc::new(MemoryStore::new());
        (store.clone(), Preferences::new(store))
    }

    #[rstest]
    #[case("true", true)]
    #[case("TRUE", true)]
    #[case("false", false)]
    #[case("yes", false)]
    fn auto_reconnect_reads_boolean_strings(#[case] raw: &str, #[case] expected: bool) {
        let (store, preferences) = preferences();
        store
            .set(AUTO_RECONNECT_KEY, raw)
            .expect("write should succeed");
        assert_eq!(expected, preferences.auto_reconnect());
    }

    #[test]
    fn auto_reconnect_defaults_off_and_persists_as_string() {
        let (store, preferences) = preferences();
        assert!(!preferences.auto_reconnect());

        preferences.set_auto_reconnect(true);
        assert_eq!(
            Some("true".to_string()),
            store.get(AUTO_RECONNECT_KEY).expect("read should succeed")
        );
    }

    #[test]
    fn scan_cache_timestamp_is_stored_as_epoch_millis() {
        let (store, preferences) = preferences();
        let at = datetime!(2026-03-01 12:00:00.250 UTC);

        preferences.set_scan_cache_timestamp(at);

        assert_eq!(
            Some("1772366400250".to_string()),
            store
                .get(SCAN_CACHE_TIMESTAMP_KEY)
                .expect("read should succeed")
        );
        assert_eq!(Some(at), preferences.scan_cache_timestamp());
    }

    #[test]
    fn last_connected_device_round_trips() {
        let (_store, preferences) = preferences();
        assert_eq!(None, preferences.last_connected_device());
        preferences.set_last_connected_device("AA:BB");
        assert_eq!(Some("AA:BB".to_string()), preferences.last_connected_device());
    }
}
