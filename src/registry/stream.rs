//! Inbound streams
//!
//! An [`InboundStream`] is owned by the protocol session that receives it.
//! Everyone else (the registry, the application, outbound forwarders) holds a
//! shared reference and only reads from it or subscribes to its frames.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::{broadcast, Notify};

use super::frame::{BroadcastFrame, FrameType};

/// Origin and transport of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamType {
    /// Live FLV over a raw TCP connection
    InNetLiveFlv,
    /// RTMP publish
    InNetRtmp,
    /// RTP (RTSP announce or raw)
    InNetRtp,
    /// MP4 file source
    InFileMp4,
    /// FLV file source
    InFileFlv,
    /// Stream we are publishing to a remote server
    OutNetRtmp,
}

impl StreamType {
    /// Live network ingest is the only kind that gets forwarded
    pub fn is_forwardable(self) -> bool {
        matches!(
            self,
            StreamType::InNetLiveFlv | StreamType::InNetRtmp | StreamType::InNetRtp
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StreamType::InNetLiveFlv => "INLFLV",
            StreamType::InNetRtmp => "INR",
            StreamType::InNetRtp => "INP",
            StreamType::InFileMp4 => "IFM",
            StreamType::InFileFlv => "IFF",
            StreamType::OutNetRtmp => "ONR",
        }
    }
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Default)]
struct FrameCache {
    metadata: Option<BroadcastFrame>,
    video_header: Option<BroadcastFrame>,
    audio_header: Option<BroadcastFrame>,
}

/// A live stream received from a publisher
#[derive(Debug)]
pub struct InboundStream {
    id: u32,
    stream_type: StreamType,
    name: String,
    app: String,
    /// Taken on close so subscribers observe `RecvError::Closed`
    tx: Mutex<Option<broadcast::Sender<BroadcastFrame>>>,
    cache: Mutex<FrameCache>,
    teardown: AtomicBool,
    teardown_notify: Notify,
    frames: AtomicU64,
    bytes: AtomicU64,
}

impl InboundStream {
    pub fn new(
        id: u32,
        stream_type: StreamType,
        app: impl Into<String>,
        name: impl Into<String>,
        capacity: usize,
    ) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            id,
            stream_type,
            name: name.into(),
            app: app.into(),
            tx: Mutex::new(Some(tx)),
            cache: Mutex::new(FrameCache::default()),
            teardown: AtomicBool::new(false),
            teardown_notify: Notify::new(),
            frames: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn stream_type(&self) -> StreamType {
        self.stream_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn app(&self) -> &str {
        &self.app
    }

    pub fn is_closed(&self) -> bool {
        self.tx.lock().is_none()
    }

    /// Frames pushed so far
    pub fn frame_count(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Payload bytes pushed so far
    pub fn byte_count(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    /// Subscribe to live frames
    ///
    /// Returns the receiver plus the frames a new subscriber needs before the
    /// live ones: metadata, then video and audio sequence headers. On a
    /// closed stream the receiver reports `Closed` immediately.
    pub fn subscribe(&self) -> (broadcast::Receiver<BroadcastFrame>, Vec<BroadcastFrame>) {
        let rx = match self.tx.lock().as_ref() {
            Some(tx) => tx.subscribe(),
            None => {
                let (tx, rx) = broadcast::channel(1);
                drop(tx);
                rx
            }
        };

        let cache = self.cache.lock();
        let catchup = [&cache.metadata, &cache.video_header, &cache.audio_header]
            .into_iter()
            .flatten()
            .cloned()
            .collect();
        (rx, catchup)
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx
            .lock()
            .as_ref()
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    /// Cache headers and fan the frame out
    ///
    /// Returns the number of subscribers that received it.
    pub fn push_frame(&self, frame: BroadcastFrame) -> usize {
        {
            let mut cache = self.cache.lock();
            match frame.frame_type {
                FrameType::Metadata => cache.metadata = Some(frame.clone()),
                FrameType::Video if frame.is_header => cache.video_header = Some(frame.clone()),
                FrameType::Audio if frame.is_header => cache.audio_header = Some(frame.clone()),
                _ => {}
            }
        }

        self.frames.fetch_add(1, Ordering::Relaxed);
        self.bytes
            .fetch_add(frame.data.len() as u64, Ordering::Relaxed);

        match self.tx.lock().as_ref() {
            Some(tx) => tx.send(frame).unwrap_or(0),
            None => 0,
        }
    }

    /// Close the broadcast channel; subscribers drain and then see `Closed`
    pub(crate) fn close(&self) {
        self.tx.lock().take();
    }

    /// Ask the owning session to tear this stream down
    pub fn request_teardown(&self) {
        if !self.teardown.swap(true, Ordering::AcqRel) {
            tracing::debug!(stream_id = self.id, name = %self.name, "Teardown requested");
        }
        self.teardown_notify.notify_waiters();
        // Covers a session that has not started waiting yet
        self.teardown_notify.notify_one();
    }

    pub fn is_teardown_requested(&self) -> bool {
        self.teardown.load(Ordering::Acquire)
    }

    /// Resolves once teardown has been requested
    pub async fn teardown_requested(&self) {
        loop {
            let notified = self.teardown_notify.notified();
            if self.is_teardown_requested() {
                return;
            }
            notified.await;
        }
    }
}
