mod api;
mod app;
mod backoff;
mod cli;
mod config;
mod error;
mod events;
mod realtime;
mod session;
mod store;
mod telemetry;
mod terminal;
mod utils;

pub use api::{
    ConnectParams, ConnectResponse, DeviceApi, DiscoveredPeripheral, FakeApiConfig, FakeDeviceApi,
    FakeOutcome, HttpDeviceApi, ScanFixture, ScanParams, ScanResponse, StatusResponse,
    sort_by_signal_strength,
};
pub use app::{
    Backend, SessionHandler, fake_backend, real_backend, run, run_with_clients,
    run_with_clients_and_log_level, run_with_log_level,
};
pub use backoff::Backoff;
pub use cli::{
    Args, Command, ConnectArgs, FakeArgs, HistoryArgs, LogLevel, OutputFormat, PairArgs, ScanArgs,
    SettingsArgs, Toggle, WatchArgs,
};
pub use config::{ChannelConfig, SessionConfig};
pub use error::{ApiError, ChannelError, FailureReason, FixtureError, SessionError, StoreError};
pub use events::{
    ChannelCloseReason, DisconnectOrigin, Event, EventBus, EventKind, EventPayload, EventStream,
    SubscriptionToken,
};
pub use realtime::{
    ChannelSubscriptions, FakeFrame, FakeLink, FakeTransport, NotificationFixture,
    OutboundMessage, RealtimeChannel, RealtimeHandle, RealtimeLink, RealtimeTransport,
    WebSocketTransport,
};
pub use session::{
    ConnectOptions, ConnectedPeripheral, ConnectionController, ConnectionState,
    DeviceSessionManager, DisconnectOutcome, ScanRequest, Scanner, SessionContext,
    SessionSnapshot, SessionState,
};
pub use store::{
    ConnectionHistoryEntry, HistoryStore, JsonFileStore, KeyValueStore, MemoryStore, Preferences,
    default_store_path,
};
pub use terminal::TerminalClient;
