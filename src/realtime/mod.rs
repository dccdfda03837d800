mod channel;
mod fake_transport;
mod message;
mod transport;

pub use channel::{ChannelSubscriptions, RealtimeChannel, RealtimeHandle};
pub use fake_transport::{FakeFrame, FakeLink, FakeTransport, NotificationFixture};
pub use message::OutboundMessage;
pub use transport::{RealtimeLink, RealtimeTransport, WebSocketTransport};
