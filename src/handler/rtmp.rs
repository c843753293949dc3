//! RTMP handler: inbound publish sessions and outbound pushes

use std::sync::Arc;

use super::push::{PushError, PushHandle};
use super::{AppProtocolHandler, ProtocolType};
use crate::application::config::ForwardParams;
use crate::client::{OutboundConfig, OutboundConnectionManager};
use crate::registry::{InboundStream, StreamType, StreamsManager};

const TAGS: &[ProtocolType] = &[ProtocolType::InboundRtmp, ProtocolType::OutboundRtmp];

pub struct RtmpAppHandler {
    streams: Arc<StreamsManager>,
    outbound: OutboundConnectionManager,
}

impl RtmpAppHandler {
    pub fn new(streams: Arc<StreamsManager>, config: OutboundConfig) -> Self {
        Self {
            streams,
            outbound: OutboundConnectionManager::new(config),
        }
    }

    pub fn outbound(&self) -> &OutboundConnectionManager {
        &self.outbound
    }
}

impl AppProtocolHandler for RtmpAppHandler {
    fn name(&self) -> &'static str {
        "rtmp"
    }

    fn protocol_types(&self) -> &'static [ProtocolType] {
        TAGS
    }

    fn streams(&self) -> &Arc<StreamsManager> {
        &self.streams
    }

    fn inbound_stream_type(&self) -> StreamType {
        StreamType::InNetRtmp
    }

    fn push_local_stream(
        &self,
        stream: &Arc<InboundStream>,
        params: &ForwardParams,
    ) -> Result<PushHandle, PushError> {
        self.outbound.push(stream, params)
    }

    fn shutdown(&self) {
        self.outbound.shutdown();
    }
}
