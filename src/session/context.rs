use std::sync::Arc;

use super::state::SessionState;
use crate::config::SessionConfig;
use crate::events::EventBus;
use crate::store::{HistoryStore, KeyValueStore, Preferences};

/// Shared collaborators handed to every session component at construction.
#[derive(Debug, Clone)]
pub struct SessionContext {
    state: Arc<SessionState>,
    bus: Arc<EventBus>,
    history: HistoryStore,
    preferences: Preferences,
    config: Arc<SessionConfig>,
}

impl SessionContext {
    /// Creates a fresh context with its own state and event bus.
    ///
    /// ```
    /// use std::sync::Arc;
    ///
    /// let context = devsession::SessionContext::new(
    ///     Arc::new(devsession::MemoryStore::new()),
    ///     devsession::SessionConfig::default(),
    /// );
    /// assert_eq!(5, context.history().limit());
    /// ```
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, config: SessionConfig) -> Self {
        Self {
            state: Arc::new(SessionState::new()),
            bus: Arc::new(EventBus::new()),
            history: HistoryStore::new(Arc::clone(&store), config.history_limit()),
            preferences: Preferences::new(store),
            config: Arc::new(config),
        }
    }

    #[must_use]
    pub fn state(&self) -> &Arc<SessionState> {
        &self.state
    }

    #[must_use]
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    #[must_use]
    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    #[must_use]
    pub fn preferences(&self) -> &Preferences {
        &self.preferences
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}
