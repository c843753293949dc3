//! RTP/RTCP and RTSP handlers
//!
//! RTSP negotiates the session and RTP/RTCP carry the media; streams from
//! either side are typed [`StreamType::InNetRtp`]. Neither handler publishes
//! outbound.

use std::sync::Arc;

use super::{AppProtocolHandler, ProtocolType};
use crate::registry::{StreamType, StreamsManager};

const RTP_TAGS: &[ProtocolType] = &[ProtocolType::InboundRtp, ProtocolType::Rtcp];
const RTSP_TAGS: &[ProtocolType] = &[ProtocolType::Rtsp];

pub struct RtpAppHandler {
    streams: Arc<StreamsManager>,
}

impl RtpAppHandler {
    pub fn new(streams: Arc<StreamsManager>) -> Self {
        Self { streams }
    }
}

impl AppProtocolHandler for RtpAppHandler {
    fn name(&self) -> &'static str {
        "rtp"
    }

    fn protocol_types(&self) -> &'static [ProtocolType] {
        RTP_TAGS
    }

    fn streams(&self) -> &Arc<StreamsManager> {
        &self.streams
    }

    fn inbound_stream_type(&self) -> StreamType {
        StreamType::InNetRtp
    }
}

pub struct RtspAppHandler {
    streams: Arc<StreamsManager>,
}

impl RtspAppHandler {
    pub fn new(streams: Arc<StreamsManager>) -> Self {
        Self { streams }
    }
}

impl AppProtocolHandler for RtspAppHandler {
    fn name(&self) -> &'static str {
        "rtsp"
    }

    fn protocol_types(&self) -> &'static [ProtocolType] {
        RTSP_TAGS
    }

    fn streams(&self) -> &Arc<StreamsManager> {
        &self.streams
    }

    fn inbound_stream_type(&self) -> StreamType {
        StreamType::InNetRtp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::config::{TargetDescriptor, TargetUri};
    use crate::handler::PushError;

    #[test]
    fn test_no_outbound_support() {
        let streams = Arc::new(StreamsManager::new());
        let handler = RtpAppHandler::new(Arc::clone(&streams));
        let stream = handler.open_stream("live", "cam1").unwrap();
        assert_eq!(stream.stream_type(), StreamType::InNetRtp);

        let descriptor = TargetDescriptor::new(TargetUri::parse("t", "rtmp://h/live").unwrap());
        let params = descriptor.forward_params("t", "cam1");
        assert_eq!(
            handler.push_local_stream(&stream, &params).unwrap_err(),
            PushError::Unsupported("rtp".into())
        );
    }

    #[test]
    fn test_rtsp_shares_stream_type() {
        let handler = RtspAppHandler::new(Arc::new(StreamsManager::new()));
        assert_eq!(handler.protocol_types(), RTSP_TAGS);
        assert_eq!(handler.inbound_stream_type(), StreamType::InNetRtp);
    }
}
