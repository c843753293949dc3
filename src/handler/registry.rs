//! Tag → handler dispatch table

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::{AppProtocolHandler, ProtocolType};
use crate::error::HandlerError;

/// One handler per [`ProtocolType`]
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<ProtocolType, Arc<dyn AppProtocolHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `tag`; a taken tag is an error
    pub fn register(
        &self,
        tag: ProtocolType,
        handler: Arc<dyn AppProtocolHandler>,
    ) -> Result<(), HandlerError> {
        let mut handlers = self.handlers.write();
        if handlers.contains_key(&tag) {
            return Err(HandlerError::AlreadyRegistered(tag.to_string()));
        }
        tracing::debug!(tag = %tag, handler = handler.name(), "Protocol handler registered");
        handlers.insert(tag, handler);
        Ok(())
    }

    /// Register `handler` under all of its tags, or none of them
    pub fn register_all(&self, handler: Arc<dyn AppProtocolHandler>) -> Result<(), HandlerError> {
        let mut handlers = self.handlers.write();
        let tags = handler.protocol_types();
        if let Some(taken) = tags.iter().find(|tag| handlers.contains_key(*tag)) {
            return Err(HandlerError::AlreadyRegistered(taken.to_string()));
        }
        for tag in tags {
            tracing::debug!(tag = %tag, handler = handler.name(), "Protocol handler registered");
            handlers.insert(*tag, Arc::clone(&handler));
        }
        Ok(())
    }

    pub fn unregister(&self, tag: ProtocolType) -> Option<Arc<dyn AppProtocolHandler>> {
        let removed = self.handlers.write().remove(&tag);
        if let Some(handler) = &removed {
            tracing::debug!(tag = %tag, handler = handler.name(), "Protocol handler unregistered");
        }
        removed
    }

    pub fn get(&self, tag: ProtocolType) -> Option<Arc<dyn AppProtocolHandler>> {
        self.handlers.read().get(&tag).cloned()
    }

    pub fn contains(&self, tag: ProtocolType) -> bool {
        self.handlers.read().contains_key(&tag)
    }

    /// Remove every handler, returning how many tags were registered
    pub fn unregister_all(&self) -> usize {
        let drained: Vec<_> = self.handlers.write().drain().collect();
        for (tag, handler) in &drained {
            tracing::debug!(tag = %tag, handler = handler.name(), "Protocol handler unregistered");
        }
        drained.len()
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }
}
