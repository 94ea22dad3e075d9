//! Event handlers and the per-type registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::HandlerError;
use crate::event::QueuedEvent;

/// Reacts to one kind of event.
///
/// Handlers run at least once per event and must tolerate duplicates.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Returns the name of this handler, for logs.
    fn name(&self) -> &'static str;

    async fn handle(&self, event: &QueuedEvent) -> Result<(), HandlerError>;
}

/// Maps event type names to the handler that processes them.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `event_type`, replacing any previous one.
    pub fn register_processor(
        &mut self,
        event_type: impl Into<String>,
        handler: Arc<dyn EventHandler>,
    ) -> &mut Self {
        let event_type = event_type.into();
        if let Some(previous) = self.handlers.insert(event_type.clone(), handler) {
            tracing::warn!(
                event_type = %event_type,
                replaced = previous.name(),
                "Handler replaced"
            );
        }
        self
    }

    pub fn get(&self, event_type: &str) -> Option<&Arc<dyn EventHandler>> {
        self.handlers.get(event_type)
    }

    pub fn contains(&self, event_type: &str) -> bool {
        self.handlers.contains_key(event_type)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<_> = self.handlers.keys().collect();
        types.sort();
        f.debug_struct("HandlerRegistry")
            .field("event_types", &types)
            .finish()
    }
}
