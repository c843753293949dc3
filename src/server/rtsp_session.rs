//! RTSP ingest session (publisher side, RECORD)
//!
//! ```text
//! OPTIONS  → 200, Public
//! ANNOUNCE → 200, remembers the stream path
//! SETUP    → 200 for interleaved TCP transports, 461 otherwise
//! RECORD   → open InNetRtp stream, 200
//! $ frames → RTP/RTCP over the control connection
//! TEARDOWN / EOF → close stream
//! ```
//!
//! The stream path is `/<app>/<name>`; a single segment is a name in
//! [`DEFAULT_RTSP_APP`]. RTP payloads are not depacketized.

use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use url::Url;

use crate::error::{ProtocolError, Result};
use crate::handler::AppProtocolHandler;
use crate::registry::InboundStream;

use super::config::ServerConfig;

/// Application used when the stream path has a single segment
pub const DEFAULT_RTSP_APP: &str = "live";

const READ_CAPACITY: usize = 16 * 1024;
const MAX_HEADER_LEN: usize = 16 * 1024;
const MAX_BODY_LEN: usize = 64 * 1024;
const PUBLIC_METHODS: &str = "OPTIONS, ANNOUNCE, SETUP, RECORD, TEARDOWN";

/// One parsed RTSP request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtspRequest {
    pub method: String,
    pub uri: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl RtspRequest {
    /// Header value, case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// What the publisher sent next on the control connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtspInput {
    Request(RtspRequest),
    /// `$` channel length payload
    Interleaved { channel: u8, payload: Bytes },
}

/// Take one complete request or interleaved frame off the front of `buf`
pub fn parse_input(buf: &mut BytesMut) -> Result<Option<RtspInput>> {
    if buf.is_empty() {
        return Ok(None);
    }

    if buf[0] == b'$' {
        if buf.len() < 4 {
            return Ok(None);
        }
        let len = usize::from(u16::from_be_bytes([buf[2], buf[3]]));
        if buf.len() < 4 + len {
            return Ok(None);
        }
        let channel = buf[1];
        buf.advance(4);
        let payload = buf.split_to(len).freeze();
        return Ok(Some(RtspInput::Interleaved { channel, payload }));
    }

    let Some(header_end) = find_header_end(buf) else {
        if buf.len() > MAX_HEADER_LEN {
            return Err(ProtocolError::MessageTooLarge(buf.len() as u32).into());
        }
        return Ok(None);
    };

    let head = std::str::from_utf8(&buf[..header_end])
        .map_err(|_| invalid("request head is not UTF-8"))?;
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let (method, uri, version) = match (parts.next(), parts.next(), parts.next()) {
        (Some(m), Some(u), Some(v)) => (m.to_string(), u.to_string(), v),
        _ => return Err(invalid(&format!("bad request line `{}`", request_line))),
    };
    if !version.starts_with("RTSP/") {
        return Err(invalid(&format!("unsupported version `{}`", version)));
    }

    let mut headers = Vec::new();
    for line in lines.filter(|l| !l.is_empty()) {
        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| invalid(&format!("bad header `{}`", line)))?;
        headers.push((key.trim().to_string(), value.trim().to_string()));
    }

    let content_length = match headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case("Content-Length"))
    {
        Some((_, value)) => value
            .parse::<usize>()
            .map_err(|_| invalid(&format!("bad Content-Length `{}`", value)))?,
        None => 0,
    };
    if content_length > MAX_BODY_LEN {
        return Err(ProtocolError::MessageTooLarge(content_length as u32).into());
    }

    let body_start = header_end + 4;
    if buf.len() < body_start + content_length {
        return Ok(None);
    }
    buf.advance(body_start);
    let body = buf.split_to(content_length).freeze();

    Ok(Some(RtspInput::Request(RtspRequest {
        method,
        uri,
        headers,
        body,
    })))
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn invalid(msg: &str) -> crate::error::Error {
    ProtocolError::InvalidCommand(format!("RTSP: {}", msg)).into()
}

/// `(app, name)` from a request URI
pub fn stream_path(uri: &str) -> Option<(String, String)> {
    let path = match Url::parse(uri) {
        Ok(url) => url.path().to_string(),
        Err(_) => uri.to_string(),
    };
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    match segments.as_slice() {
        [] => None,
        [name] => Some((DEFAULT_RTSP_APP.to_string(), (*name).to_string())),
        [app, rest @ ..] => Some(((*app).to_string(), rest.join("/"))),
    }
}

struct RtspSession<'a, S> {
    id: u64,
    io: S,
    handler: &'a Arc<dyn AppProtocolHandler>,
    config: &'a ServerConfig,
    announced: Option<(String, String)>,
    stream: Option<Arc<InboundStream>>,
    rtp_packets: u64,
}

/// Serve one RTSP publisher until TEARDOWN, EOF or stream teardown
pub async fn run_rtsp_session<S>(
    id: u64,
    io: S,
    handler: Arc<dyn AppProtocolHandler>,
    config: ServerConfig,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut session = RtspSession {
        id,
        io,
        handler: &handler,
        config: &config,
        announced: None,
        stream: None,
        rtp_packets: 0,
    };
    let result = session.serve().await;
    session.close();
    result
}

impl<S> RtspSession<'_, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    async fn serve(&mut self) -> Result<()> {
        let mut buf = BytesMut::with_capacity(READ_CAPACITY);

        loop {
            while let Some(input) = parse_input(&mut buf)? {
                match input {
                    RtspInput::Interleaved { channel, payload } => {
                        self.rtp_packets += 1;
                        tracing::trace!(
                            session_id = self.id,
                            channel = channel,
                            len = payload.len(),
                            "Interleaved packet"
                        );
                    }
                    RtspInput::Request(request) => {
                        if !self.handle_request(request).await? {
                            return Ok(());
                        }
                    }
                }
            }

            let stream = self.stream.clone();
            let torn_down = async move {
                match stream {
                    Some(stream) => stream.teardown_requested().await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                read = timeout(self.config.idle_timeout, self.io.read_buf(&mut buf)) => {
                    if read?? == 0 {
                        tracing::debug!(session_id = self.id, "RTSP publisher disconnected");
                        return Ok(());
                    }
                }
                _ = torn_down => {
                    tracing::info!(
                        session_id = self.id,
                        "Stream torn down, disconnecting publisher"
                    );
                    return Ok(());
                }
            }
        }
    }

    /// Returns false when the session should end
    async fn handle_request(&mut self, request: RtspRequest) -> Result<bool> {
        let cseq = request.header("CSeq").unwrap_or("0").to_string();
        tracing::debug!(
            session_id = self.id,
            method = %request.method,
            uri = %request.uri,
            cseq = %cseq,
            "RTSP request"
        );

        match request.method.as_str() {
            "OPTIONS" => {
                let public = format!("Public: {}\r\n", PUBLIC_METHODS);
                self.respond(200, "OK", &cseq, &public).await?;
            }
            "ANNOUNCE" => match stream_path(&request.uri) {
                Some(path) => {
                    self.announced = Some(path);
                    self.respond(200, "OK", &cseq, "").await?;
                }
                None => self.respond(400, "Bad Request", &cseq, "").await?,
            },
            "SETUP" => {
                let transport = request.header("Transport").unwrap_or_default().to_string();
                if transport.contains("interleaved=") {
                    let extra = format!(
                        "Transport: {}\r\nSession: {}\r\n",
                        transport,
                        self.session_header()
                    );
                    self.respond(200, "OK", &cseq, &extra).await?;
                } else {
                    self.respond(461, "Unsupported Transport", &cseq, "").await?;
                }
            }
            "RECORD" => self.record(&request.uri, &cseq).await?,
            "TEARDOWN" => {
                let extra = format!("Session: {}\r\n", self.session_header());
                self.respond(200, "OK", &cseq, &extra).await?;
                return Ok(false);
            }
            _ => self.respond(501, "Not Implemented", &cseq, "").await?,
        }
        Ok(true)
    }

    async fn record(&mut self, uri: &str, cseq: &str) -> Result<()> {
        if self.stream.is_some() {
            return self.respond(455, "Method Not Valid in This State", cseq, "").await;
        }
        let Some((app, name)) = self.announced.clone().or_else(|| stream_path(uri)) else {
            return self.respond(400, "Bad Request", cseq, "").await;
        };

        match self.handler.open_stream(&app, &name) {
            Ok(stream) => {
                tracing::info!(
                    session_id = self.id,
                    stream_id = stream.id(),
                    app = %app,
                    name = %name,
                    "RTSP record started"
                );
                self.stream = Some(stream);
                let extra = format!("Session: {}\r\n", self.session_header());
                self.respond(200, "OK", cseq, &extra).await
            }
            Err(e) => {
                tracing::warn!(
                    session_id = self.id,
                    app = %app,
                    name = %name,
                    error = %e,
                    "Record rejected"
                );
                self.respond(403, "Forbidden", cseq, "").await
            }
        }
    }

    async fn respond(&mut self, code: u16, reason: &str, cseq: &str, extra: &str) -> Result<()> {
        let response = format!(
            "RTSP/1.0 {} {}\r\nCSeq: {}\r\n{}\r\n",
            code, reason, cseq, extra
        );
        self.io.write_all(response.as_bytes()).await?;
        self.io.flush().await?;
        Ok(())
    }

    fn session_header(&self) -> String {
        format!("{:08X}", self.id)
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            tracing::debug!(
                session_id = self.id,
                stream_id = stream.id(),
                rtp_packets = self.rtp_packets,
                "Closing RTSP stream"
            );
            if let Err(e) = self.handler.close_stream(stream.id()) {
                tracing::debug!(session_id = self.id, error = %e, "Stream already closed");
            }
        }
    }
}

#[cfg(all(test, feature = "rtp"))]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    use super::*;
    use crate::handler::rtp::RtspAppHandler;
    use crate::registry::{StreamType, StreamsManager};

    fn session(
        streams: &Arc<StreamsManager>,
    ) -> (DuplexStream, tokio::task::JoinHandle<Result<()>>) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let handler: Arc<dyn AppProtocolHandler> =
            Arc::new(RtspAppHandler::new(Arc::clone(streams)));
        let task = tokio::spawn(run_rtsp_session(3, b, handler, ServerConfig::default()));
        (a, task)
    }

    async fn request(client: &mut DuplexStream, text: &str) -> String {
        client.write_all(text.as_bytes()).await.unwrap();
        let mut response = Vec::new();
        let mut byte = [0u8; 1];
        while !response.ends_with(b"\r\n\r\n") {
            let n = tokio::time::timeout(Duration::from_secs(5), client.read(&mut byte))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(n, 1, "connection closed mid-response");
            response.push(byte[0]);
        }
        String::from_utf8(response).unwrap()
    }

    async fn start_record(client: &mut DuplexStream) {
        let sdp = "v=0\r\nm=video 0 RTP/AVP 96\r\n";
        let announce = format!(
            "ANNOUNCE rtsp://127.0.0.1/live/cam1 RTSP/1.0\r\nCSeq: 1\r\n\
             Content-Type: application/sdp\r\nContent-Length: {}\r\n\r\n{}",
            sdp.len(),
            sdp
        );
        assert!(request(client, &announce).await.starts_with("RTSP/1.0 200 OK"));

        let setup = request(
            client,
            "SETUP rtsp://127.0.0.1/live/cam1/trackID=0 RTSP/1.0\r\nCSeq: 2\r\n\
             Transport: RTP/AVP/TCP;unicast;interleaved=0-1;mode=record\r\n\r\n",
        )
        .await;
        assert!(setup.starts_with("RTSP/1.0 200 OK"));
        assert!(setup.contains("interleaved=0-1"));

        let record = request(
            client,
            "RECORD rtsp://127.0.0.1/live/cam1 RTSP/1.0\r\nCSeq: 3\r\nSession: 00000003\r\n\r\n",
        )
        .await;
        assert!(record.starts_with("RTSP/1.0 200 OK"));
        assert!(record.contains("CSeq: 3"));
    }

    #[test]
    fn test_parse_request_with_body() {
        let mut buf = BytesMut::from(
            &b"ANNOUNCE rtsp://h/live/cam1 RTSP/1.0\r\nCSeq: 7\r\n\
               Content-Length: 3\r\n\r\nv=0$"[..],
        );
        let Some(RtspInput::Request(request)) = parse_input(&mut buf).unwrap() else {
            panic!("expected a request");
        };
        assert_eq!(request.method, "ANNOUNCE");
        assert_eq!(request.header("cseq"), Some("7"));
        assert_eq!(&request.body[..], b"v=0");
        assert_eq!(&buf[..], b"$");

        // Partial interleaved header
        assert_eq!(parse_input(&mut buf).unwrap(), None);
        buf.extend_from_slice(&[1, 0, 2, 0xAA, 0xBB]);
        assert_eq!(
            parse_input(&mut buf).unwrap(),
            Some(RtspInput::Interleaved {
                channel: 1,
                payload: Bytes::from_static(&[0xAA, 0xBB]),
            })
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let mut buf = BytesMut::from(&b"HELLO\r\n\r\n"[..]);
        assert!(parse_input(&mut buf).is_err());

        let mut buf = BytesMut::from(&vec![b'A'; MAX_HEADER_LEN + 1][..]);
        assert!(parse_input(&mut buf).is_err());
    }

    #[test]
    fn test_stream_path() {
        assert_eq!(
            stream_path("rtsp://h:554/live/cam1"),
            Some(("live".into(), "cam1".into()))
        );
        assert_eq!(
            stream_path("rtsp://h/cam1"),
            Some((DEFAULT_RTSP_APP.into(), "cam1".into()))
        );
        assert_eq!(
            stream_path("rtsp://h/app/a/b"),
            Some(("app".into(), "a/b".into()))
        );
        assert_eq!(stream_path("rtsp://h/"), None);
    }

    #[tokio::test]
    async fn test_record_then_teardown() {
        let streams = Arc::new(StreamsManager::new());
        let (mut client, task) = session(&streams);

        let options = request(
            &mut client,
            "OPTIONS rtsp://127.0.0.1/ RTSP/1.0\r\nCSeq: 0\r\n\r\n",
        )
        .await;
        assert!(options.contains("Public: OPTIONS, ANNOUNCE, SETUP, RECORD, TEARDOWN"));

        start_record(&mut client).await;
        let stream = streams.find_by_name("live", "cam1").unwrap();
        assert_eq!(stream.stream_type(), StreamType::InNetRtp);

        client.write_all(&[b'$', 0, 0, 2, 0x80, 0x60]).await.unwrap();
        let teardown = request(
            &mut client,
            "TEARDOWN rtsp://127.0.0.1/live/cam1 RTSP/1.0\r\nCSeq: 4\r\n\r\n",
        )
        .await;
        assert!(teardown.starts_with("RTSP/1.0 200 OK"));

        task.await.unwrap().unwrap();
        assert!(streams.is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_closes_stream() {
        let streams = Arc::new(StreamsManager::new());
        let (mut client, task) = session(&streams);
        start_record(&mut client).await;
        assert_eq!(streams.len(), 1);

        drop(client);
        task.await.unwrap().unwrap();
        assert!(streams.is_empty());
    }

    #[tokio::test]
    async fn test_teardown_request_disconnects() {
        let streams = Arc::new(StreamsManager::new());
        let (mut client, task) = session(&streams);
        start_record(&mut client).await;

        streams.find_by_name("live", "cam1").unwrap().request_teardown();
        task.await.unwrap().unwrap();
        assert!(streams.is_empty());

        let mut buf = [0u8; 1];
        assert_eq!(client.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_udp_transport_refused() {
        let streams = Arc::new(StreamsManager::new());
        let (mut client, _task) = session(&streams);
        let setup = request(
            &mut client,
            "SETUP rtsp://127.0.0.1/live/cam1 RTSP/1.0\r\nCSeq: 2\r\n\
             Transport: RTP/AVP;unicast;client_port=5000-5001\r\n\r\n",
        )
        .await;
        assert!(setup.starts_with("RTSP/1.0 461 Unsupported Transport"));
        assert!(streams.is_empty());
    }
}
