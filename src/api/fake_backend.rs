use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bon::Builder;
use serde_json::{Map, Value};
use tokio::time::sleep;
use tracing::debug;

use super::device_api::DeviceApi;
use super::http_backend::extract_error_message;
use super::model::{ConnectParams, ConnectResponse, ScanParams, ScanResponse, StatusResponse};
use crate::error::{ApiError, FixtureError};

const DEFAULT_SERVICES: [&str; 2] = [
    "0000180d-0000-1000-8000-00805f9b34fb",
    "0000180f-0000-1000-8000-00805f9b34fb",
];

/// Parsed fake scan fixture records: `address|name|rssi|service,service;...`.
///
/// Only the address is required; `-` marks a missing field.
#[derive(Debug, Clone, derive_more::Into)]
pub struct ScanFixture {
    devices: Vec<Value>,
}

impl FromStr for ScanFixture {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let devices = parse_scan_fixture(value)?;
        Ok(Self { devices })
    }
}

/// Scripted result of one fake backend call.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub enum FakeOutcome {
    /// Answer with the configured success payload.
    #[default]
    Succeed,
    /// Answer with a non-success status and a raw body.
    Fail { status: u16, body: String },
    /// Answer with a body that cannot be decoded.
    Malformed,
    /// Never answer.
    Hang,
}

impl FakeOutcome {
    /// Shorthand for [`FakeOutcome::Fail`].
    #[must_use]
    pub fn fail(status: u16, body: impl Into<String>) -> Self {
        Self::Fail {
            status,
            body: body.into(),
        }
    }
}

/// Settings for constructing a fake device backend.
///
/// Each operation replays its outcome list in order; the last outcome repeats
/// once the list is exhausted, and an empty list always succeeds.
#[derive(Debug, Clone, Builder)]
pub struct FakeApiConfig {
    #[builder(default)]
    devices: Vec<Value>,
    #[builder(default)]
    scan: Vec<FakeOutcome>,
    #[builder(default)]
    probe: Vec<FakeOutcome>,
    #[builder(default)]
    connect: Vec<FakeOutcome>,
    #[builder(default)]
    disconnect: Vec<FakeOutcome>,
    #[builder(default)]
    pair: Vec<FakeOutcome>,
    #[builder(default = DEFAULT_SERVICES.map(String::from).to_vec())]
    services: Vec<String>,
    #[builder(default = String::from("paired"))]
    pair_status: String,
    /// Delay applied before every answer.
    #[builder(default)]
    latency: Duration,
}

#[derive(Debug, Default)]
struct Script {
    outcomes: Mutex<VecDeque<FakeOutcome>>,
    calls: AtomicUsize,
}

impl Script {
    fn new(outcomes: Vec<FakeOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            calls: AtomicUsize::new(0),
        }
    }

    fn next(&self) -> FakeOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut outcomes = self.outcomes.lock().unwrap_or_else(PoisonError::into_inner);
        if outcomes.len() > 1 {
            outcomes.pop_front().unwrap_or_default()
        } else {
            outcomes.front().cloned().unwrap_or_default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Fake backend used in tests and offline runs.
#[derive(Debug)]
pub struct FakeDeviceApi {
    devices: Vec<Value>,
    services: Vec<String>,
    pair_status: String,
    latency: Duration,
    scan: Script,
    probe: Script,
    connect: Script,
    disconnect: Script,
    pair: Script,
    connect_requests: Mutex<Vec<(String, ConnectParams)>>,
}

impl FakeDeviceApi {
    /// Creates a fake backend from explicit settings.
    #[must_use]
    pub fn new(config: FakeApiConfig) -> Self {
        let FakeApiConfig {
            devices,
            scan,
            probe,
            connect,
            disconnect,
            pair,
            services,
            pair_status,
            latency,
        } = config;

        Self {
            devices,
            services,
            pair_status,
            latency,
            scan: Script::new(scan),
            probe: Script::new(probe),
            connect: Script::new(connect),
            disconnect: Script::new(disconnect),
            pair: Script::new(pair),
            connect_requests: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn scan_calls(&self) -> usize {
        self.scan.calls()
    }

    #[must_use]
    pub fn probe_calls(&self) -> usize {
        self.probe.calls()
    }

    #[must_use]
    pub fn connect_calls(&self) -> usize {
        self.connect.calls()
    }

    #[must_use]
    pub fn disconnect_calls(&self) -> usize {
        self.disconnect.calls()
    }

    #[must_use]
    pub fn pair_calls(&self) -> usize {
        self.pair.calls()
    }

    /// Returns every connect request received so far.
    #[must_use]
    pub fn connect_requests(&self) -> Vec<(String, ConnectParams)> {
        self.requests().clone()
    }

    fn requests(&self) -> MutexGuard<'_, Vec<(String, ConnectParams)>> {
        self.connect_requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    async fn answer<T>(&self, script: &Script, success: impl FnOnce() -> T) -> Result<T, ApiError> {
        let outcome = script.next();
        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }
        debug!(?outcome, "fake backend answering");

        match outcome {
            FakeOutcome::Succeed => Ok(success()),
            FakeOutcome::Fail { status, body } => {
                let status_code = reqwest::StatusCode::from_u16(status)
                    .unwrap_or(reqwest::StatusCode::INTERNAL_SERVER_ERROR);
                Err(ApiError::Remote {
                    status,
                    message: extract_error_message(status_code, &body),
                })
            }
            FakeOutcome::Malformed => Err(ApiError::Malformed(
                <serde_json::Error as serde::de::Error>::custom("fake backend returned garbage"),
            )),
            FakeOutcome::Hang => std::future::pending().await,
        }
    }
}

#[async_trait]
impl DeviceApi for FakeDeviceApi {
    async fn scan(&self, params: ScanParams) -> Result<ScanResponse, ApiError> {
        debug!(?params, "fake scan");
        self.answer(&self.scan, || ScanResponse {
            devices: self.devices.clone(),
        })
        .await
    }

    async fn probe(&self, address: &str) -> Result<(), ApiError> {
        debug!(address, "fake probe");
        self.answer(&self.probe, || ()).await
    }

    async fn connect(
        &self,
        address: &str,
        params: ConnectParams,
    ) -> Result<ConnectResponse, ApiError> {
        self.requests().push((address.to_string(), params));
        self.answer(&self.connect, || ConnectResponse {
            status: "connected".to_string(),
            services: self.services.clone(),
        })
        .await
    }

    async fn disconnect(&self) -> Result<StatusResponse, ApiError> {
        self.answer(&self.disconnect, || StatusResponse {
            status: "disconnected".to_string(),
        })
        .await
    }

    async fn pair(&self, address: &str) -> Result<StatusResponse, ApiError> {
        debug!(address, "fake pair");
        self.answer(&self.pair, || StatusResponse {
            status: self.pair_status.clone(),
        })
        .await
    }
}

fn parse_scan_fixture(raw_fixture: &str) -> Result<Vec<Value>, FixtureError> {
    if raw_fixture.trim().is_empty() {
        return Err(FixtureError::EmptyFixture);
    }

    raw_fixture
        .split(';')
        .filter(|record| !record.trim().is_empty())
        .map(parse_scan_record)
        .collect()
}

fn parse_scan_record(raw_record: &str) -> Result<Value, FixtureError> {
    let fields: Vec<&str> = raw_record.split('|').map(str::trim).collect();
    if fields.is_empty() || fields.len() > 4 {
        return Err(FixtureError::InvalidRecordFieldCount);
    }
    let present = |index: usize| {
        fields
            .get(index)
            .copied()
            .filter(|field| !field.is_empty() && *field != "-")
    };

    let mut record = Map::new();
    if let Some(address) = present(0) {
        record.insert("address".into(), Value::from(address));
    }
    if let Some(name) = present(1) {
        record.insert("name".into(), Value::from(name));
    }
    if let Some(rssi) = present(2) {
        record.insert("rssi".into(), Value::from(rssi.parse::<i16>()?));
    }
    if let Some(services) = present(3) {
        let services = services
            .split(',')
            .map(str::trim)
            .filter(|service| !service.is_empty())
            .map(Value::from)
            .collect::<Vec<_>>();
        record.insert("services".into(), Value::Array(services));
    }

    Ok(Value::Object(record))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    #[rstest]
    #[case("AA:BB|Widget|-42", json!([{"address": "AA:BB", "name": "Widget", "rssi": -42}]))]
    #[case("AA:BB", json!([{"address": "AA:BB"}]))]
    #[case("-|NoAddress", json!([{"name": "NoAddress"}]))]
    #[case(
        "AA:BB|-|-|180d,180f;CC:DD|Gadget|-70",
        json!([
            {"address": "AA:BB", "services": ["180d", "180f"]},
            {"address": "CC:DD", "name": "Gadget", "rssi": -70}
        ])
    )]
    fn parse_scan_fixture_builds_wire_entries(#[case] fixture: &str, #[case] expected: Value) {
        let devices = parse_scan_fixture(fixture).expect("fixture should parse");
        assert_eq!(expected, Value::Array(devices));
    }

    #[test]
    fn parse_scan_fixture_rejects_too_many_fields() {
        assert_matches!(
            parse_scan_fixture("a|b|1|c|d"),
            Err(FixtureError::InvalidRecordFieldCount)
        );
    }

    #[test]
    fn parse_scan_fixture_rejects_bad_signal() {
        assert_matches!(
            parse_scan_fixture("AA:BB|Widget|loud"),
            Err(FixtureError::InvalidSignalStrength(_))
        );
    }

    #[tokio::test]
    async fn scripted_outcomes_replay_then_repeat_last() {
        let api = FakeDeviceApi::new(
            FakeApiConfig::builder()
                .disconnect(vec![
                    FakeOutcome::fail(500, r#"{"detail": "busy"}"#),
                    FakeOutcome::Succeed,
                ])
                .build(),
        );

        assert_matches!(
            api.disconnect().await,
            Err(ApiError::Remote { status: 500, message }) if message == "busy"
        );
        assert_matches!(api.disconnect().await, Ok(_));
        assert_matches!(api.disconnect().await, Ok(_));
        assert_eq!(3, api.disconnect_calls());
    }

    #[tokio::test]
    async fn connect_records_requests() {
        let api = FakeDeviceApi::new(FakeApiConfig::builder().build());
        let params = ConnectParams::new(15_000, false, 0);

        let response = api
            .connect("AA:BB", params)
            .await
            .expect("fake connect should succeed");

        assert_eq!("connected", response.status);
        assert_eq!(vec![("AA:BB".to_string(), params)], api.connect_requests());
    }
}
