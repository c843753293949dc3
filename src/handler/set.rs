//! Capability table of the handlers compiled into this build

use std::sync::Arc;

use super::AppProtocolHandler;
use crate::client::OutboundConfig;
use crate::registry::StreamsManager;

/// Optional handler per protocol family
///
/// Families whose cargo feature is off stay `None`; forwarding to them
/// reports `PushError::Unsupported`.
#[derive(Clone, Default)]
pub struct HandlerSet {
    pub rtmp: Option<Arc<dyn AppProtocolHandler>>,
    pub live_flv: Option<Arc<dyn AppProtocolHandler>>,
    pub rtp: Option<Arc<dyn AppProtocolHandler>>,
    pub rtsp: Option<Arc<dyn AppProtocolHandler>>,
}

impl HandlerSet {
    /// No handlers at all
    pub fn empty() -> Self {
        Self::default()
    }

    /// Every handler enabled by cargo features
    #[allow(unused_variables)]
    pub fn compiled_in(streams: &Arc<StreamsManager>, outbound: &OutboundConfig) -> Self {
        #[allow(unused_mut)]
        let mut set = Self::empty();

        #[cfg(feature = "rtmp")]
        {
            set.rtmp = Some(Arc::new(super::rtmp::RtmpAppHandler::new(
                Arc::clone(streams),
                outbound.clone(),
            )));
        }
        #[cfg(feature = "liveflv")]
        {
            set.live_flv = Some(Arc::new(super::liveflv::LiveFlvAppHandler::new(Arc::clone(
                streams,
            ))));
        }
        #[cfg(feature = "rtp")]
        {
            set.rtp = Some(Arc::new(super::rtp::RtpAppHandler::new(Arc::clone(streams))));
            set.rtsp = Some(Arc::new(super::rtp::RtspAppHandler::new(Arc::clone(streams))));
        }

        set
    }

    /// Present handlers in a fixed order
    pub fn handlers(&self) -> impl Iterator<Item = &Arc<dyn AppProtocolHandler>> {
        [&self.rtmp, &self.live_flv, &self.rtp, &self.rtsp]
            .into_iter()
            .flatten()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers().next().is_none()
    }
}
