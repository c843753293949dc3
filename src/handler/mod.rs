//! Protocol handlers
//!
//! One handler per protocol family. Each registers against one or more
//! [`ProtocolType`] tags in the [`HandlerRegistry`]; sessions accepted on a
//! tag are served by the handler registered for it. Handlers open and close
//! inbound streams in the shared [`StreamsManager`]; the RTMP handler is also
//! the outbound side and implements [`AppProtocolHandler::push_local_stream`].

use std::fmt;
use std::sync::Arc;

use crate::application::config::ForwardParams;
use crate::registry::{InboundStream, RegistryError, StreamType, StreamsManager};

pub mod push;
pub mod registry;
pub mod set;

#[cfg(feature = "liveflv")]
pub mod liveflv;
#[cfg(feature = "rtmp")]
pub mod rtmp;
#[cfg(feature = "rtp")]
pub mod rtp;

pub use push::{PushCompleter, PushError, PushHandle, PushOutcome};
pub use registry::HandlerRegistry;
pub use set::HandlerSet;

/// Dispatch tag for a protocol direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolType {
    InboundRtmp,
    OutboundRtmp,
    InboundLiveFlv,
    InboundRtp,
    Rtcp,
    Rtsp,
}

impl ProtocolType {
    /// Outbound tag serving a target URI scheme
    pub fn outbound_for_scheme(scheme: &str) -> Option<Self> {
        if scheme.starts_with("rtmp") {
            Some(ProtocolType::OutboundRtmp)
        } else {
            None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProtocolType::InboundRtmp => "inboundRtmp",
            ProtocolType::OutboundRtmp => "outboundRtmp",
            ProtocolType::InboundLiveFlv => "inboundLiveFlv",
            ProtocolType::InboundRtp => "inboundRtp",
            ProtocolType::Rtcp => "rtcp",
            ProtocolType::Rtsp => "rtsp",
        }
    }
}

impl fmt::Display for ProtocolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A protocol family's view of the stream lifecycle
pub trait AppProtocolHandler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Tags this handler registers under
    fn protocol_types(&self) -> &'static [ProtocolType];

    fn streams(&self) -> &Arc<StreamsManager>;

    /// Type given to streams this handler receives
    fn inbound_stream_type(&self) -> StreamType;

    /// Register a newly published inbound stream
    fn open_stream(&self, app: &str, name: &str) -> Result<Arc<InboundStream>, RegistryError> {
        self.streams().open(self.inbound_stream_type(), app, name)
    }

    fn close_stream(&self, id: u32) -> Result<Arc<InboundStream>, RegistryError> {
        self.streams().close(id)
    }

    /// Start publishing `stream` to a remote target
    ///
    /// Must not block. `Err` means the request could not be started locally;
    /// the remote result arrives on the returned handle.
    fn push_local_stream(
        &self,
        _stream: &Arc<InboundStream>,
        _params: &ForwardParams,
    ) -> Result<PushHandle, PushError> {
        Err(PushError::Unsupported(self.name().to_string()))
    }

    /// Release outbound resources
    fn shutdown(&self) {}
}

#[cfg(test)]
pub(crate) mod mock {
    //! Recording handler for forwarding tests

    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::*;

    pub struct MockHandler {
        streams: Arc<StreamsManager>,
        pub push_calls: AtomicUsize,
        pub shutdown_calls: AtomicUsize,
        pub pushed: Mutex<Vec<ForwardParams>>,
        /// Results handed out in order; `Ok` once exhausted
        pub results: Mutex<VecDeque<Result<PushOutcome, PushError>>>,
        next_request: AtomicU64,
    }

    impl MockHandler {
        pub fn new(streams: Arc<StreamsManager>) -> Self {
            Self {
                streams,
                push_calls: AtomicUsize::new(0),
                shutdown_calls: AtomicUsize::new(0),
                pushed: Mutex::new(Vec::new()),
                results: Mutex::new(VecDeque::new()),
                next_request: AtomicU64::new(1),
            }
        }

        pub fn fail_next(&self, error: PushError) {
            self.results.lock().push_back(Err(error));
        }

        pub fn succeed_next(&self) {
            self.results.lock().push_back(Ok(PushOutcome::Published {
                target_stream_name: String::new(),
                message_stream_id: 1,
            }));
        }

        pub fn calls(&self) -> usize {
            self.push_calls.load(Ordering::SeqCst)
        }

        pub fn pushed_names(&self) -> Vec<String> {
            self.pushed
                .lock()
                .iter()
                .map(|p| p.target_stream_name.clone())
                .collect()
        }
    }

    impl AppProtocolHandler for MockHandler {
        fn name(&self) -> &'static str {
            "mock"
        }

        fn protocol_types(&self) -> &'static [ProtocolType] {
            &[ProtocolType::InboundRtmp, ProtocolType::OutboundRtmp]
        }

        fn streams(&self) -> &Arc<StreamsManager> {
            &self.streams
        }

        fn inbound_stream_type(&self) -> StreamType {
            StreamType::InNetRtmp
        }

        fn push_local_stream(
            &self,
            _stream: &Arc<InboundStream>,
            params: &ForwardParams,
        ) -> Result<PushHandle, PushError> {
            self.push_calls.fetch_add(1, Ordering::SeqCst);
            self.pushed.lock().push(params.clone());
            let request_id = self.next_request.fetch_add(1, Ordering::Relaxed);

            let result = self.results.lock().pop_front();
            match result {
                Some(Err(e)) => Err(e),
                Some(Ok(PushOutcome::Published {
                    message_stream_id, ..
                })) => Ok(PushHandle::ready(
                    request_id,
                    PushOutcome::Published {
                        target_stream_name: params.target_stream_name.clone(),
                        message_stream_id,
                    },
                )),
                Some(Ok(outcome)) => Ok(PushHandle::ready(request_id, outcome)),
                None => Ok(PushHandle::ready(
                    request_id,
                    PushOutcome::Published {
                        target_stream_name: params.target_stream_name.clone(),
                        message_stream_id: 1,
                    },
                )),
            }
        }

        fn shutdown(&self) {
            self.shutdown_calls.fetch_add(1, Ordering::SeqCst);
        }
    }
}
