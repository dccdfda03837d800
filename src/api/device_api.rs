use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::fake_backend::{FakeApiConfig, FakeDeviceApi};
use super::http_backend::HttpDeviceApi;
use super::model::{ConnectParams, ConnectResponse, ScanParams, ScanResponse, StatusResponse};
use crate::error::ApiError;

/// Runtime backend selection.
#[derive(Debug)]
pub(crate) enum ApiBackend {
    Http { base_url: String },
    Fake(FakeApiConfig),
}

/// Builds an injected device API client for the selected backend.
pub(crate) fn device_api_from_backend(backend: ApiBackend) -> Result<Arc<dyn DeviceApi>, ApiError> {
    let api: Arc<dyn DeviceApi> = match backend {
        ApiBackend::Http { base_url } => Arc::new(HttpDeviceApi::new(&base_url)?),
        ApiBackend::Fake(config) => {
            info!("using fake device backend");
            Arc::new(FakeDeviceApi::new(config))
        }
    };

    Ok(api)
}

/// Remote operations exposed by the device backend.
///
/// Implementations do not apply deadlines; callers wrap each future in a
/// timeout and drop it to cancel the request.
#[async_trait]
pub trait DeviceApi: fmt::Debug + Send + Sync {
    /// Runs a discovery scan.
    async fn scan(&self, params: ScanParams) -> Result<ScanResponse, ApiError>;

    /// Checks that the backend knows about `address`.
    async fn probe(&self, address: &str) -> Result<(), ApiError>;

    /// Opens a connection to `address`.
    async fn connect(&self, address: &str, params: ConnectParams)
    -> Result<ConnectResponse, ApiError>;

    /// Closes the current connection.
    async fn disconnect(&self) -> Result<StatusResponse, ApiError>;

    /// Pairs with `address`.
    async fn pair(&self, address: &str) -> Result<StatusResponse, ApiError>;
}
