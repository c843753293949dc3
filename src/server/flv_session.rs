//! Live FLV ingest over plain TCP
//!
//! The publisher writes an FLV file header followed by tags. The stream name
//! comes from a `streamName` property in the first tag when that tag is
//! script data, otherwise it is `flv_<session id>`.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;

use crate::amf::AmfValue;
use crate::error::Result;
use crate::handler::AppProtocolHandler;
use crate::media::flv::{FlvStreamReader, FlvTag, FlvTagType};
use crate::registry::{BroadcastFrame, InboundStream};

use super::config::ServerConfig;

const READ_CAPACITY: usize = 64 * 1024;

/// Serve one live FLV publisher until EOF or teardown
pub async fn run_flv_session<S>(
    id: u64,
    mut io: S,
    handler: Arc<dyn AppProtocolHandler>,
    config: ServerConfig,
) -> Result<()>
where
    S: AsyncRead + Unpin,
{
    let mut reader = FlvStreamReader::new();
    let mut buf = BytesMut::with_capacity(READ_CAPACITY);

    // Nothing is opened until the first tag tells us the name
    let first = loop {
        if let Some(tag) = reader.next_tag(&mut buf)? {
            break tag;
        }
        if !read_more(&mut io, &mut buf, &config).await? {
            tracing::debug!(session_id = id, "FLV publisher left before the first tag");
            return Ok(());
        }
    };

    let name = stream_name(&first).unwrap_or_else(|| format!("flv_{}", id));
    let stream = handler.open_stream(&config.live_flv_app, &name)?;
    tracing::info!(
        session_id = id,
        stream_id = stream.id(),
        app = %config.live_flv_app,
        name = %name,
        "Live FLV publish started"
    );

    let result = pump(&mut io, &mut reader, &mut buf, &stream, first, &config).await;
    if let Err(e) = handler.close_stream(stream.id()) {
        tracing::debug!(session_id = id, error = %e, "Stream already closed");
    }
    result
}

async fn pump<S>(
    io: &mut S,
    reader: &mut FlvStreamReader,
    buf: &mut BytesMut,
    stream: &Arc<InboundStream>,
    first: FlvTag,
    config: &ServerConfig,
) -> Result<()>
where
    S: AsyncRead + Unpin,
{
    stream.push_frame(BroadcastFrame::from_flv_tag(&first));

    loop {
        while let Some(tag) = reader.next_tag(buf)? {
            stream.push_frame(BroadcastFrame::from_flv_tag(&tag));
        }

        tokio::select! {
            more = read_more(io, buf, config) => {
                if !more? {
                    tracing::debug!(stream_id = stream.id(), "FLV publisher disconnected");
                    return Ok(());
                }
            }
            _ = stream.teardown_requested() => {
                tracing::info!(
                    stream_id = stream.id(),
                    "Stream torn down, disconnecting publisher"
                );
                return Ok(());
            }
        }
    }
}

/// Returns false on EOF
async fn read_more<S>(io: &mut S, buf: &mut BytesMut, config: &ServerConfig) -> Result<bool>
where
    S: AsyncRead + Unpin,
{
    if buf.capacity() - buf.len() < 4096 {
        buf.reserve(READ_CAPACITY);
    }
    let n = timeout(config.idle_timeout, io.read_buf(buf)).await??;
    Ok(n > 0)
}

/// `streamName` from an `onMetaData` script tag
fn stream_name(tag: &FlvTag) -> Option<String> {
    if tag.tag_type != FlvTagType::Script {
        return None;
    }
    let values = BroadcastFrame::from_flv_tag(tag).metadata_values()?;
    values
        .iter()
        .filter_map(AmfValue::as_object)
        .find_map(|props| props.get("streamName"))
        .and_then(AmfValue::as_str)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}
