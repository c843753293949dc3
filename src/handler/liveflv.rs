//! Live FLV over TCP handler

use std::sync::Arc;

use super::{AppProtocolHandler, ProtocolType};
use crate::registry::{StreamType, StreamsManager};

const TAGS: &[ProtocolType] = &[ProtocolType::InboundLiveFlv];

/// Streams received as raw FLV byte streams; forwarding only, no outbound side
pub struct LiveFlvAppHandler {
    streams: Arc<StreamsManager>,
}

impl LiveFlvAppHandler {
    pub fn new(streams: Arc<StreamsManager>) -> Self {
        Self { streams }
    }
}

impl AppProtocolHandler for LiveFlvAppHandler {
    fn name(&self) -> &'static str {
        "liveflv"
    }

    fn protocol_types(&self) -> &'static [ProtocolType] {
        TAGS
    }

    fn streams(&self) -> &Arc<StreamsManager> {
        &self.streams
    }

    fn inbound_stream_type(&self) -> StreamType {
        StreamType::InNetLiveFlv
    }
}
