mod context;
mod controller;
mod manager;
mod scanner;
mod state;

pub use context::SessionContext;
pub use controller::{ConnectOptions, ConnectionController, DisconnectOutcome};
pub use manager::DeviceSessionManager;
pub use scanner::{ScanRequest, Scanner};
pub use state::{ConnectedPeripheral, ConnectionState, SessionSnapshot, SessionState};
