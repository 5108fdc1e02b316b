use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::{cache::ControlCache, session::SessionConfig, session::SessionEvent, store::SharedStore};

/// State shared by the loop, the writers and the session handle.
pub(crate) struct SessionContext {
    pub(crate) id: Uuid,
    pub(crate) config: SessionConfig,
    pub(crate) store: Arc<dyn SharedStore>,
    cache: Mutex<ControlCache>,
    pub(crate) events: broadcast::Sender<SessionEvent>,
}

impl SessionContext {
    pub(crate) fn new(store: Arc<dyn SharedStore>, config: SessionConfig) -> Self {
        let (events, _) = broadcast::channel(256);
        let cache = ControlCache::new(config.initial_controls.clone());
        Self {
            id: Uuid::new_v4(),
            config,
            store,
            cache: Mutex::new(cache),
            events,
        }
    }

    /// Cache guards are never held across an await point.
    pub(crate) fn cache(&self) -> MutexGuard<'_, ControlCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}
