//! Stream lifecycle manager
//!
//! Protocol handlers open and close inbound streams here. Registration and
//! removal are reported synchronously to the [`StreamListener`] (the
//! application), outside of any internal lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use super::error::RegistryError;
use super::stream::{InboundStream, StreamType};

/// Broadcast capacity used by [`StreamsManager::new`]
pub const DEFAULT_BROADCAST_CAPACITY: usize = 1024;

/// Receives stream lifecycle events
pub trait StreamListener: Send + Sync {
    fn on_stream_registered(&self, stream: &Arc<InboundStream>);

    fn on_stream_unregistered(&self, _stream: &Arc<InboundStream>) {}
}

/// Owns the set of live inbound streams
pub struct StreamsManager {
    next_id: AtomicU32,
    streams: RwLock<HashMap<u32, Arc<InboundStream>>>,
    listener: RwLock<Option<Weak<dyn StreamListener>>>,
    broadcast_capacity: usize,
}

impl StreamsManager {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BROADCAST_CAPACITY)
    }

    /// Manager whose streams buffer up to `broadcast_capacity` frames per
    /// slow subscriber
    pub fn with_capacity(broadcast_capacity: usize) -> Self {
        Self {
            next_id: AtomicU32::new(1),
            streams: RwLock::new(HashMap::new()),
            listener: RwLock::new(None),
            broadcast_capacity,
        }
    }

    /// Install the listener; it is held weakly so the application can drop
    pub fn set_listener(&self, listener: Weak<dyn StreamListener>) {
        *self.listener.write() = Some(listener);
    }

    pub fn clear_listener(&self) {
        self.listener.write().take();
    }

    fn listener(&self) -> Option<Arc<dyn StreamListener>> {
        self.listener.read().as_ref().and_then(Weak::upgrade)
    }

    /// Create and register a stream, then notify the listener
    ///
    /// Live inbound names are unique per application.
    pub fn open(
        &self,
        stream_type: StreamType,
        app: &str,
        name: &str,
    ) -> Result<Arc<InboundStream>, RegistryError> {
        let stream = {
            let mut streams = self.streams.write();
            if stream_type.is_forwardable()
                && streams
                    .values()
                    .any(|s| s.stream_type().is_forwardable() && s.app() == app && s.name() == name)
            {
                return Err(RegistryError::NameInUse {
                    app: app.to_string(),
                    name: name.to_string(),
                });
            }

            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let stream = Arc::new(InboundStream::new(
                id,
                stream_type,
                app,
                name,
                self.broadcast_capacity,
            ));
            streams.insert(id, Arc::clone(&stream));
            stream
        };

        tracing::info!(
            stream_id = stream.id(),
            stream_type = %stream_type,
            app = app,
            name = name,
            "Stream registered"
        );

        if let Some(listener) = self.listener() {
            listener.on_stream_registered(&stream);
        }
        Ok(stream)
    }

    /// Remove a stream, close its channel and notify the listener
    pub fn close(&self, id: u32) -> Result<Arc<InboundStream>, RegistryError> {
        let stream = self
            .streams
            .write()
            .remove(&id)
            .ok_or(RegistryError::StreamNotFound(id))?;
        stream.close();

        tracing::info!(
            stream_id = id,
            name = stream.name(),
            frames = stream.frame_count(),
            "Stream unregistered"
        );

        if let Some(listener) = self.listener() {
            listener.on_stream_unregistered(&stream);
        }
        Ok(stream)
    }

    pub fn get(&self, id: u32) -> Option<Arc<InboundStream>> {
        self.streams.read().get(&id).cloned()
    }

    pub fn find_by_name(&self, app: &str, name: &str) -> Option<Arc<InboundStream>> {
        self.streams
            .read()
            .values()
            .find(|s| s.app() == app && s.name() == name)
            .cloned()
    }

    /// All streams of one type
    pub fn find_by_type(&self, stream_type: StreamType) -> Vec<Arc<InboundStream>> {
        let mut found: Vec<_> = self
            .streams
            .read()
            .values()
            .filter(|s| s.stream_type() == stream_type)
            .cloned()
            .collect();
        found.sort_by_key(|s| s.id());
        found
    }

    pub fn len(&self) -> usize {
        self.streams.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.read().is_empty()
    }
}

impl Default for StreamsManager {
    fn default() -> Self {
        Self::new()
    }
}
