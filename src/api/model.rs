use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

pub(crate) const UNKNOWN_DEVICE_NAME: &str = "Unknown Device";

const NAME_KEYS: [&str; 2] = ["name", "displayName"];
const SIGNAL_KEYS: [&str; 2] = ["rssi", "signalStrength"];
const SERVICE_KEYS: [&str; 3] = ["services", "advertisedServices", "uuids"];

/// Body of `POST /scan`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanParams {
    duration_seconds: u64,
    active: bool,
}

impl ScanParams {
    #[must_use]
    pub fn new(duration_seconds: u64, active: bool) -> Self {
        Self {
            duration_seconds,
            active,
        }
    }

    #[must_use]
    pub fn duration_seconds(&self) -> u64 {
        self.duration_seconds
    }

    #[must_use]
    pub fn active(&self) -> bool {
        self.active
    }
}

/// Body of `POST /connect/{address}`.
///
/// `timeout` is expressed in milliseconds.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    #[serde(rename = "timeout")]
    timeout_ms: u64,
    auto_reconnect: bool,
    retry_count: u32,
}

impl ConnectParams {
    #[must_use]
    pub fn new(timeout_ms: u64, auto_reconnect: bool, retry_count: u32) -> Self {
        Self {
            timeout_ms,
            auto_reconnect,
            retry_count,
        }
    }

    #[must_use]
    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    #[must_use]
    pub fn auto_reconnect(&self) -> bool {
        self.auto_reconnect
    }

    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }
}

/// Response of `POST /scan`. Entries stay raw until the scanner validates them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResponse {
    pub devices: Vec<Value>,
}

/// Response of `POST /connect/{address}`.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct ConnectResponse {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub services: Vec<String>,
}

/// Response of endpoints that only report a status string.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    #[serde(default)]
    pub status: String,
}

/// A peripheral reported by a scan.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct DiscoveredPeripheral {
    address: String,
    display_name: String,
    signal_strength: Option<i16>,
    advertised_services: Vec<String>,
}

impl DiscoveredPeripheral {
    #[must_use]
    pub fn new(
        address: impl Into<String>,
        display_name: Option<String>,
        signal_strength: Option<i16>,
        advertised_services: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            address: address.into(),
            display_name: display_name
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| UNKNOWN_DEVICE_NAME.to_string()),
            signal_strength,
            advertised_services: dedup_preserving_order(advertised_services),
        }
    }

    /// Builds a peripheral from one raw scan entry.
    ///
    /// Returns `None` when the entry is not an object or has no address.
    pub(crate) fn from_wire(entry: &Value) -> Option<Self> {
        let Some(object) = entry.as_object() else {
            warn!(%entry, "dropping scan entry that is not an object");
            return None;
        };
        let Some(address) = object
            .get("address")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|address| !address.is_empty())
        else {
            warn!(%entry, "dropping scan entry without an address");
            return None;
        };

        let display_name = first_present(object, &NAME_KEYS)
            .and_then(Value::as_str)
            .map(str::to_string);
        let signal_strength = first_present(object, &SIGNAL_KEYS).and_then(signal_from_wire);
        let services = first_present(object, &SERVICE_KEYS)
            .and_then(Value::as_array)
            .map(|values| {
                values
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        Some(Self::new(address, display_name, signal_strength, services))
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Display name, `"Unknown Device"` when the backend reported none.
    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Signal strength in dBm; larger is stronger.
    #[must_use]
    pub fn signal_strength(&self) -> Option<i16> {
        self.signal_strength
    }

    #[must_use]
    pub fn advertised_services(&self) -> &[String] {
        &self.advertised_services
    }
}

/// Sorts peripherals strongest signal first; unknown strength sorts last.
///
/// The sort is stable, so equal strengths keep discovery order.
pub fn sort_by_signal_strength(peripherals: &mut [DiscoveredPeripheral]) {
    peripherals.sort_by_key(|peripheral| {
        std::cmp::Reverse(peripheral.signal_strength.map_or(i32::MIN, i32::from))
    });
}

fn first_present<'a>(object: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .find_map(|key| object.get(*key).filter(|value| !value.is_null()))
}

fn signal_from_wire(value: &Value) -> Option<i16> {
    let raw = value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|float| float.is_finite())
            .map(|float| float.round() as i64)
    })?;
    i16::try_from(raw).ok()
}

fn dedup_preserving_order(values: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = Vec::new();
    for value in values {
        if !seen.contains(&value) {
            seen.push(value);
        }
    }
    seen
}
