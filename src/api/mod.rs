mod device_api;
mod fake_backend;
mod http_backend;
mod model;

pub use self::device_api::DeviceApi;
pub(crate) use self::device_api::{ApiBackend, device_api_from_backend};
pub use self::fake_backend::{FakeApiConfig, FakeDeviceApi, FakeOutcome, ScanFixture};
pub use self::http_backend::HttpDeviceApi;
pub(crate) use self::model::UNKNOWN_DEVICE_NAME;
pub use self::model::{
    ConnectParams, ConnectResponse, DiscoveredPeripheral, ScanParams, ScanResponse,
    StatusResponse, sort_by_signal_strength,
};
