use std::sync::Arc;

use tracing::{debug, info};

use super::context::SessionContext;
use super::controller::ConnectionController;
use super::scanner::Scanner;
use super::state::SessionSnapshot;
use crate::api::DeviceApi;
use crate::config::{ChannelConfig, SessionConfig};
use crate::events::{EventBus, SubscriptionToken};
use crate::realtime::{RealtimeChannel, RealtimeHandle, RealtimeTransport};
use crate::store::{HistoryStore, KeyValueStore, Preferences};

/// One device session: shared state, controller, scanner and an optional
/// realtime channel, all publishing to the same event bus.
#[derive(Debug)]
pub struct DeviceSessionManager {
    context: SessionContext,
    controller: ConnectionController,
    scanner: Scanner,
    realtime: Option<RealtimeHandle>,
    tracker: Vec<SubscriptionToken>,
}

impl DeviceSessionManager {
    /// Wires a new session against `api`, persisting through `store`.
    #[must_use]
    pub fn new(api: Arc<dyn DeviceApi>, store: Arc<dyn KeyValueStore>, config: SessionConfig) -> Self {
        let context = SessionContext::new(store, config);
        let controller = ConnectionController::new(context.clone(), Arc::clone(&api));
        let scanner = Scanner::new(context.clone(), api);
        let tracker = controller.track_remote_events();

        Self {
            context,
            controller,
            scanner,
            realtime: None,
            tracker,
        }
    }

    /// Starts the realtime channel and routes subscriptions through it.
    ///
    /// A previously attached channel is shut down first.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub async fn attach_realtime(
        &mut self,
        config: ChannelConfig,
        transport: Arc<dyn RealtimeTransport>,
    ) -> RealtimeHandle {
        if let Some(previous) = self.realtime.take() {
            debug!("replacing attached realtime channel");
            previous.shutdown().await;
        }
        info!(url = config.url(), "attaching realtime channel");
        let handle = RealtimeChannel::spawn(config, transport, Arc::clone(self.context.bus()));
        self.controller = self.controller.clone().with_channel(Arc::new(handle.clone()));
        self.realtime = Some(handle.clone());
        handle
    }

    #[must_use]
    pub fn controller(&self) -> &ConnectionController {
        &self.controller
    }

    #[must_use]
    pub fn scanner(&self) -> &Scanner {
        &self.scanner
    }

    #[must_use]
    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    #[must_use]
    pub fn bus(&self) -> &Arc<EventBus> {
        self.context.bus()
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.context.state().snapshot()
    }

    #[must_use]
    pub fn history(&self) -> &HistoryStore {
        self.context.history()
    }

    #[must_use]
    pub fn preferences(&self) -> &Preferences {
        self.context.preferences()
    }

    #[must_use]
    pub fn realtime(&self) -> Option<&RealtimeHandle> {
        self.realtime.as_ref()
    }

    /// Stops the realtime channel and removes the remote-event handlers.
    pub async fn shutdown(&mut self) {
        if let Some(handle) = self.realtime.take() {
            handle.shutdown().await;
        }
        let bus = self.context.bus();
        for token in self.tracker.drain(..) {
            bus.unsubscribe(token);
        }
        debug!("session manager shut down");
    }
}
