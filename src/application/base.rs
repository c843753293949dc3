//! Default stream lifecycle handling shared by applications

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::registry::{InboundStream, StreamType};

/// What an application remembers about a stream it was told about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalledStream {
    pub stream_type: StreamType,
    pub app: String,
    pub name: String,
}

/// Bookkeeping of the streams an application has been signalled about
#[derive(Debug)]
pub struct BaseApplication {
    name: String,
    streams: Mutex<HashMap<u32, SignalledStream>>,
}

impl BaseApplication {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            streams: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn on_stream_registered(&self, stream: &Arc<InboundStream>) {
        let previous = self.streams.lock().insert(
            stream.id(),
            SignalledStream {
                stream_type: stream.stream_type(),
                app: stream.app().to_string(),
                name: stream.name().to_string(),
            },
        );
        if previous.is_some() {
            tracing::warn!(
                application = %self.name,
                stream_id = stream.id(),
                "Stream signalled twice"
            );
        }
        tracing::debug!(
            application = %self.name,
            stream_id = stream.id(),
            stream_type = %stream.stream_type(),
            name = stream.name(),
            "Stream signalled"
        );
    }

    pub fn on_stream_unregistered(&self, stream: &Arc<InboundStream>) {
        if self.streams.lock().remove(&stream.id()).is_some() {
            tracing::debug!(
                application = %self.name,
                stream_id = stream.id(),
                name = stream.name(),
                "Stream gone"
            );
        }
    }

    pub fn stream(&self, id: u32) -> Option<SignalledStream> {
        self.streams.lock().get(&id).cloned()
    }

    /// Number of live streams this application knows about
    pub fn stream_count(&self) -> usize {
        self.streams.lock().len()
    }
}
