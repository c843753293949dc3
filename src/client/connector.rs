//! Outbound RTMP connection task
//!
//! One task per connection. It connects, runs the client handshake and
//! `connect`, then publishes every [`PushRequest`] it is given:
//!
//! ```text
//! releaseStream(name) → FCPublish(name) → createStream → _result(id)
//!     → publish(name, "live") on id → onStatus NetStream.Publish.Start
//! ```
//!
//! Published streams get a forwarder task that copies frames from the inbound
//! broadcast channel into this task's media queue. When the inbound stream
//! closes, the forwarder reports it and the stream is deleted on the server.
//! The task exits once it has nothing left to publish.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::time::Duration;

use bytes::BytesMut;
use tokio::net::{lookup_host, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};

use crate::amf::AmfValue;
use crate::application::config::ForwardParams;
use crate::error::{Error, ProtocolError, Result};
use crate::handler::push::{PushCompleter, PushOutcome};
use crate::protocol::constants::*;
use crate::protocol::handshake::{self, HandshakeRole};
use crate::protocol::message::{Command, ConnectParams, RtmpMessage};
use crate::protocol::transport::RtmpTransport;
use crate::registry::BroadcastFrame;

use super::config::OutboundConfig;

/// Connections are shared per (host, port, app)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub host: String,
    pub port: u16,
    pub app: String,
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.host, self.port, self.app)
    }
}

/// Everything one push needs, copied out of the inbound stream
#[derive(Debug)]
pub struct PushRequest {
    pub request_id: u64,
    /// Id of the inbound stream, for logging only
    pub source_stream_id: u32,
    pub params: ForwardParams,
    pub frames: broadcast::Receiver<BroadcastFrame>,
    /// Metadata and sequence headers to send before live frames
    pub catchup: Vec<BroadcastFrame>,
    pub completer: PushCompleter,
}

impl PushRequest {
    fn fail(self, reason: &str) {
        tracing::warn!(
            request_id = self.request_id,
            stream_id = self.source_stream_id,
            target = %self.params.target_uri,
            reason = reason,
            "Push failed"
        );
        self.completer.fail(reason);
    }
}

#[derive(Debug)]
pub(crate) enum ConnectionCommand {
    Publish(PushRequest),
    Shutdown,
}

/// How to identify ourselves on `connect`
#[derive(Debug, Clone)]
pub(crate) struct ConnectTarget {
    pub key: ConnectionKey,
    pub tc_url: String,
    pub flash_ver: String,
}

enum MediaEvent {
    Frame {
        message_stream_id: u32,
        frame: BroadcastFrame,
    },
    Ended {
        message_stream_id: u32,
    },
}

struct Pending {
    request: PushRequest,
    deadline: Instant,
}

struct Active {
    source_stream_id: u32,
    target_stream_name: String,
    forwarder: JoinHandle<()>,
}

/// Connection task entry point
pub(crate) async fn run_connection(
    id: u64,
    target: ConnectTarget,
    config: OutboundConfig,
    first: PushRequest,
    mut commands: mpsc::UnboundedReceiver<ConnectionCommand>,
) {
    tracing::debug!(connection = id, server = %target.key, "Opening outbound connection");

    let reason = match establish(&target, &config).await {
        Ok(transport) => {
            tracing::info!(
                connection = id,
                server = %target.key,
                "Outbound connection established"
            );
            let mut connection = OutboundConnection::new(id, config, transport);
            let result = connection.run(first, &mut commands).await;
            let reason = match &result {
                Ok(()) => "outbound connection closed".to_string(),
                Err(e) => e.to_string(),
            };
            connection.fail_all(&reason);
            match result {
                Ok(()) => {
                    tracing::debug!(
                        connection = id,
                        server = %target.key,
                        "Outbound connection idle, closing"
                    );
                    None
                }
                Err(e) => {
                    tracing::warn!(
                        connection = id,
                        server = %target.key,
                        error = %e,
                        "Outbound connection lost"
                    );
                    Some(reason)
                }
            }
        }
        Err(e) => {
            tracing::warn!(
                connection = id,
                server = %target.key,
                error = %e,
                "Outbound connect failed"
            );
            let reason = format!("connect to {} failed: {}", target.key, e);
            first.fail(&reason);
            Some(reason)
        }
    };

    // Requests that raced with shutdown never reach the server
    commands.close();
    let reason = reason.unwrap_or_else(|| "outbound connection closed".to_string());
    while let Ok(command) = commands.try_recv() {
        if let ConnectionCommand::Publish(request) = command {
            request.fail(&reason);
        }
    }
}

async fn establish(
    target: &ConnectTarget,
    config: &OutboundConfig,
) -> Result<RtmpTransport<TcpStream>> {
    let (socket, leftover) = timeout(config.connect_timeout, async {
        let addr = lookup_host((target.key.host.as_str(), target.key.port))
            .await?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no address for {}", target.key.host),
                )
            })?;
        let mut socket = TcpStream::connect(addr).await?;
        socket.set_nodelay(config.tcp_nodelay)?;

        let mut leftover = BytesMut::new();
        handshake::perform(&mut socket, HandshakeRole::Client, &mut leftover).await?;
        Ok::<_, Error>((socket, leftover))
    })
    .await??;

    let mut transport = RtmpTransport::new(socket, leftover);
    transport.set_chunk_size(config.chunk_size).await?;

    let params = ConnectParams {
        app: target.key.app.clone(),
        flash_ver: Some(target.flash_ver.clone()),
        tc_url: Some(target.tc_url.clone()),
        page_url: None,
        object_encoding: 0.0,
    };
    transport
        .send(&RtmpMessage::command(0, &Command::connect(1.0, &params)))
        .await?;

    timeout(config.command_timeout, await_connect_result(&mut transport)).await??;
    transport.flush().await?;
    Ok(transport)
}

async fn await_connect_result(transport: &mut RtmpTransport<TcpStream>) -> Result<()> {
    loop {
        let msg = transport.read_message().await?.ok_or_else(|| {
            Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "server closed the connection during connect",
            ))
        })?;
        if !matches!(msg.msg_type, MSG_COMMAND_AMF0 | MSG_COMMAND_AMF3) {
            continue;
        }

        let command = Command::decode(&msg)?;
        match command.name.as_str() {
            CMD_RESULT if command.transaction_id == 1.0 => {
                return match command.status_code() {
                    Some(NC_CONNECT_REJECTED) => Err(ProtocolError::Rejected(
                        NC_CONNECT_REJECTED.to_string(),
                    )
                    .into()),
                    _ => Ok(()),
                };
            }
            CMD_ERROR if command.transaction_id == 1.0 => {
                let code = command.status_code().unwrap_or("connect refused");
                return Err(ProtocolError::Rejected(code.to_string()).into());
            }
            other => tracing::trace!(command = other, "Ignoring command before connect result"),
        }
    }
}

struct OutboundConnection {
    id: u64,
    config: OutboundConfig,
    transport: RtmpTransport<TcpStream>,
    next_txn: f64,
    /// Waiting for the createStream result, by transaction id
    creating: HashMap<u64, Pending>,
    /// Waiting for Publish.Start, by message stream id
    publishing: HashMap<u32, Pending>,
    active: HashMap<u32, Active>,
    media_tx: mpsc::Sender<MediaEvent>,
    media_rx: mpsc::Receiver<MediaEvent>,
}

impl OutboundConnection {
    fn new(id: u64, config: OutboundConfig, transport: RtmpTransport<TcpStream>) -> Self {
        let (media_tx, media_rx) = mpsc::channel(config.forward_queue.max(1));
        Self {
            id,
            config,
            transport,
            next_txn: 2.0,
            creating: HashMap::new(),
            publishing: HashMap::new(),
            active: HashMap::new(),
            media_tx,
            media_rx,
        }
    }

    fn is_idle(&self) -> bool {
        self.creating.is_empty() && self.publishing.is_empty() && self.active.is_empty()
    }

    fn txn(&mut self) -> f64 {
        let txn = self.next_txn;
        self.next_txn += 1.0;
        txn
    }

    async fn run(
        &mut self,
        first: PushRequest,
        commands: &mut mpsc::UnboundedReceiver<ConnectionCommand>,
    ) -> Result<()> {
        self.start_publish(first).await?;

        let mut commands_open = true;
        let mut ticker = interval(Duration::from_millis(500));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if self.is_idle() {
                if !commands_open {
                    return Ok(());
                }
                // Stop taking new work; whatever is already queued still runs
                commands.close();
            }

            tokio::select! {
                command = commands.recv(), if commands_open => match command {
                    Some(ConnectionCommand::Publish(request)) => self.start_publish(request).await?,
                    Some(ConnectionCommand::Shutdown) => {
                        tracing::debug!(connection = self.id, "Outbound connection shutting down");
                        return Ok(());
                    }
                    None => commands_open = false,
                },
                msg = self.transport.read_message() => match msg? {
                    Some(msg) => {
                        self.handle_message(msg).await?;
                        self.transport.flush().await?;
                    }
                    None => {
                        return Err(Error::Io(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "server closed the connection",
                        )));
                    }
                },
                Some(event) = self.media_rx.recv() => self.handle_media(event).await?,
                _ = ticker.tick() => self.expire_pending(),
            }
        }
    }

    async fn start_publish(&mut self, request: PushRequest) -> Result<()> {
        let name = request.params.target_stream_name.clone();
        tracing::debug!(
            connection = self.id,
            request_id = request.request_id,
            stream_id = request.source_stream_id,
            target_stream = %name,
            "Starting publish"
        );

        let release = self.txn();
        let fc_publish = self.txn();
        let create = self.txn();
        self.creating.insert(
            create as u64,
            Pending {
                request,
                deadline: Instant::now() + self.config.command_timeout,
            },
        );

        self.send_command(0, &Command::release_stream(release, &name)).await?;
        self.send_command(0, &Command::fc_publish(fc_publish, &name)).await?;
        self.send_command(0, &Command::create_stream(create)).await
    }

    async fn send_command(&mut self, stream_id: u32, command: &Command) -> Result<()> {
        self.transport
            .send(&RtmpMessage::command(stream_id, command))
            .await
    }

    async fn handle_message(&mut self, msg: RtmpMessage) -> Result<()> {
        if !matches!(msg.msg_type, MSG_COMMAND_AMF0 | MSG_COMMAND_AMF3) {
            return Ok(());
        }
        match Command::decode(&msg) {
            Ok(command) => self.handle_command(msg.stream_id, command).await,
            Err(e) => {
                tracing::debug!(
                    connection = self.id,
                    error = %e,
                    "Undecodable command from server"
                );
                Ok(())
            }
        }
    }

    async fn handle_command(&mut self, stream_id: u32, command: Command) -> Result<()> {
        match command.name.as_str() {
            CMD_RESULT => {
                let Some(pending) = self.creating.remove(&(command.transaction_id as u64)) else {
                    return Ok(());
                };
                let Some(message_stream_id) = command.first_number_arg().map(|id| id as u32)
                else {
                    pending.request.fail("createStream result without a stream id");
                    return Ok(());
                };

                let name = pending.request.params.target_stream_name.clone();
                self.publishing.insert(
                    message_stream_id,
                    Pending {
                        request: pending.request,
                        deadline: Instant::now() + self.config.command_timeout,
                    },
                );
                self.send_command(message_stream_id, &Command::publish(&name, "live"))
                    .await
            }
            CMD_ERROR => {
                if let Some(pending) = self.creating.remove(&(command.transaction_id as u64)) {
                    let code = command.status_code().unwrap_or("createStream refused");
                    pending.request.fail(code);
                }
                Ok(())
            }
            CMD_ON_STATUS => self.handle_status(stream_id, &command).await,
            other => {
                tracing::trace!(connection = self.id, command = other, "Ignoring server command");
                Ok(())
            }
        }
    }

    async fn handle_status(&mut self, stream_id: u32, command: &Command) -> Result<()> {
        let code = command.status_code().unwrap_or_default();
        let level = command.status_level().unwrap_or_default();

        if !self.publishing.contains_key(&stream_id) {
            if level == "error" && self.active.contains_key(&stream_id) {
                tracing::warn!(
                    connection = self.id,
                    message_stream_id = stream_id,
                    code = code,
                    "Server reported error on published stream"
                );
            }
            return Ok(());
        }

        if code == NS_PUBLISH_START {
            if let Some(pending) = self.publishing.remove(&stream_id) {
                self.activate(stream_id, pending.request);
            }
        } else if level == "error" {
            if let Some(pending) = self.publishing.remove(&stream_id) {
                pending.request.fail(code);
            }
            self.send_command(0, &Command::delete_stream(stream_id)).await?;
        }
        Ok(())
    }

    fn activate(&mut self, message_stream_id: u32, request: PushRequest) {
        let PushRequest {
            request_id,
            source_stream_id,
            params,
            frames,
            catchup,
            completer,
        } = request;

        let forwarder = tokio::spawn(forward_frames(
            message_stream_id,
            catchup,
            frames,
            self.media_tx.clone(),
        ));

        tracing::info!(
            connection = self.id,
            request_id = request_id,
            stream_id = source_stream_id,
            message_stream_id = message_stream_id,
            target = %params.target_uri,
            target_stream = %params.target_stream_name,
            "Publishing to target"
        );

        completer.complete(PushOutcome::Published {
            target_stream_name: params.target_stream_name.clone(),
            message_stream_id,
        });
        self.active.insert(
            message_stream_id,
            Active {
                source_stream_id,
                target_stream_name: params.target_stream_name,
                forwarder,
            },
        );
    }

    async fn handle_media(&mut self, event: MediaEvent) -> Result<()> {
        match event {
            MediaEvent::Frame {
                message_stream_id,
                frame,
            } => {
                if self.active.contains_key(&message_stream_id) {
                    self.transport
                        .send(&frame.to_message(message_stream_id))
                        .await?;
                }
                Ok(())
            }
            MediaEvent::Ended { message_stream_id } => {
                let Some(active) = self.active.remove(&message_stream_id) else {
                    return Ok(());
                };
                tracing::info!(
                    connection = self.id,
                    stream_id = active.source_stream_id,
                    message_stream_id = message_stream_id,
                    "Inbound stream ended, unpublishing"
                );
                let txn = self.txn();
                let unpublish = Command::new(CMD_FC_UNPUBLISH, txn, AmfValue::Null)
                    .arg(active.target_stream_name.as_str());
                self.send_command(0, &unpublish).await?;
                self.send_command(0, &Command::delete_stream(message_stream_id))
                    .await
            }
        }
    }

    fn expire_pending(&mut self) {
        let now = Instant::now();

        let expired: Vec<u64> = self
            .creating
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(txn, _)| *txn)
            .collect();
        for txn in expired {
            if let Some(pending) = self.creating.remove(&txn) {
                pending.request.fail("timed out waiting for createStream result");
            }
        }

        let expired: Vec<u32> = self
            .publishing
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some(pending) = self.publishing.remove(&id) {
                pending.request.fail("timed out waiting for NetStream.Publish.Start");
            }
        }
    }

    fn fail_all(&mut self, reason: &str) {
        for (_, pending) in self.creating.drain() {
            pending.request.fail(reason);
        }
        for (_, pending) in self.publishing.drain() {
            pending.request.fail(reason);
        }
        for (_, active) in self.active.drain() {
            active.forwarder.abort();
        }
    }
}

async fn forward_frames(
    message_stream_id: u32,
    catchup: Vec<BroadcastFrame>,
    mut frames: broadcast::Receiver<BroadcastFrame>,
    media_tx: mpsc::Sender<MediaEvent>,
) {
    for frame in catchup {
        let event = MediaEvent::Frame {
            message_stream_id,
            frame,
        };
        if media_tx.send(event).await.is_err() {
            return;
        }
    }

    loop {
        match frames.recv().await {
            Ok(frame) => {
                let event = MediaEvent::Frame {
                    message_stream_id,
                    frame,
                };
                if media_tx.send(event).await.is_err() {
                    return;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(
                    message_stream_id = message_stream_id,
                    skipped = skipped,
                    "Forwarder fell behind, frames dropped"
                );
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }

    let _ = media_tx.send(MediaEvent::Ended { message_stream_id }).await;
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;
    use tokio::net::TcpListener;

    use super::*;
    use crate::application::config::{TargetDescriptor, TargetUri};
    use crate::handler::push::PushHandle;
    use crate::protocol::message::status_info;
    use crate::registry::{InboundStream, StreamType, StreamsManager};

    const WAIT: Duration = Duration::from_secs(5);

    struct Harness {
        listener: TcpListener,
        streams: Arc<StreamsManager>,
        source: Arc<InboundStream>,
        handle: PushHandle,
        // Keeps the command channel open so the task never goes idle early
        _commands: mpsc::UnboundedSender<ConnectionCommand>,
    }

    async fn start(config: OutboundConfig, user_agent: &str) -> Harness {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let streams = Arc::new(StreamsManager::new());
        let source = streams.open(StreamType::InNetRtmp, "live", "cam1").unwrap();

        let uri = TargetUri::parse("mirror", &format!("rtmp://127.0.0.1:{}/live", port)).unwrap();
        let mut descriptor = TargetDescriptor::new(uri.clone());
        descriptor.target_stream_name = Some("backup".into());
        descriptor.emulate_user_agent = user_agent.into();
        let params = descriptor.forward_params("mirror", source.name());

        let (frames, catchup) = source.subscribe();
        let (handle, completer) = PushHandle::pending(1);
        let request = PushRequest {
            request_id: 1,
            source_stream_id: source.id(),
            params,
            frames,
            catchup,
            completer,
        };
        let target = ConnectTarget {
            key: ConnectionKey {
                host: uri.host.clone(),
                port: uri.port,
                app: uri.app.clone(),
            },
            tc_url: uri.tc_url(),
            flash_ver: user_agent.into(),
        };

        let (commands, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_connection(1, target, config, request, rx));

        Harness {
            listener,
            streams,
            source,
            handle,
            _commands: commands,
        }
    }

    async fn accept(listener: &TcpListener) -> RtmpTransport<TcpStream> {
        let (mut socket, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
        let mut leftover = BytesMut::new();
        handshake::perform(&mut socket, HandshakeRole::Server, &mut leftover)
            .await
            .unwrap();
        RtmpTransport::new(socket, leftover)
    }

    async fn next_message(server: &mut RtmpTransport<TcpStream>) -> RtmpMessage {
        timeout(WAIT, server.read_message())
            .await
            .unwrap()
            .unwrap()
            .unwrap()
    }

    async fn expect_command(server: &mut RtmpTransport<TcpStream>, name: &str) -> (u32, Command) {
        loop {
            let msg = next_message(server).await;
            if msg.msg_type == MSG_COMMAND_AMF0 {
                let command = Command::decode(&msg).unwrap();
                assert_eq!(command.name, name);
                return (msg.stream_id, command);
            }
        }
    }

    async fn accept_connect(server: &mut RtmpTransport<TcpStream>) -> ConnectParams {
        let (_, connect) = expect_command(server, CMD_CONNECT).await;
        let reply = Command::result(
            connect.transaction_id,
            AmfValue::Null,
            status_info("status", NC_CONNECT_SUCCESS, "Connection succeeded"),
        );
        server.send(&RtmpMessage::command(0, &reply)).await.unwrap();
        ConnectParams::from_amf(&connect.command_object)
    }

    /// Runs releaseStream, FCPublish and createStream; returns the createStream transaction
    async fn expect_publish_prelude(server: &mut RtmpTransport<TcpStream>) -> f64 {
        let (_, release) = expect_command(server, CMD_RELEASE_STREAM).await;
        assert_eq!(release.first_string_arg(), Some("backup"));
        let (_, fc_publish) = expect_command(server, CMD_FC_PUBLISH).await;
        assert_eq!(fc_publish.first_string_arg(), Some("backup"));
        let (_, create) = expect_command(server, CMD_CREATE_STREAM).await;
        create.transaction_id
    }

    async fn publish_started(server: &mut RtmpTransport<TcpStream>) -> u32 {
        let txn = expect_publish_prelude(server).await;
        let reply = Command::result(txn, AmfValue::Null, AmfValue::from(1.0));
        server.send(&RtmpMessage::command(0, &reply)).await.unwrap();

        let (stream_id, publish) = expect_command(server, CMD_PUBLISH).await;
        assert_eq!(stream_id, 1);
        assert_eq!(publish.first_string_arg(), Some("backup"));

        let status = Command::on_status("status", NS_PUBLISH_START, "Publishing");
        server
            .send(&RtmpMessage::command(stream_id, &status))
            .await
            .unwrap();
        stream_id
    }

    async fn outcome(handle: PushHandle) -> PushOutcome {
        timeout(WAIT, handle.outcome()).await.unwrap()
    }

    #[tokio::test]
    async fn test_connect_identifies_with_user_agent() {
        let h = start(OutboundConfig::default(), "FMLE/3.0 (compatible; relay)").await;
        let mut server = accept(&h.listener).await;

        let params = accept_connect(&mut server).await;
        let port = h.listener.local_addr().unwrap().port();
        assert_eq!(params.app, "live");
        assert_eq!(params.flash_ver.as_deref(), Some("FMLE/3.0 (compatible; relay)"));
        assert_eq!(
            params.tc_url,
            Some(format!("rtmp://127.0.0.1:{}/live", port))
        );

        let stream_id = publish_started(&mut server).await;
        assert_eq!(
            outcome(h.handle).await,
            PushOutcome::Published {
                target_stream_name: "backup".into(),
                message_stream_id: stream_id,
            }
        );
    }

    #[tokio::test]
    async fn test_frames_forwarded_then_unpublished_on_close() {
        let h = start(OutboundConfig::default(), "FMLE/3.0").await;
        let mut server = accept(&h.listener).await;
        accept_connect(&mut server).await;
        let stream_id = publish_started(&mut server).await;
        assert!(outcome(h.handle).await.is_published());

        h.source.push_frame(BroadcastFrame::video(
            40,
            Bytes::from_static(&[0x27, 0x01, 0x00, 0x00, 0x00, 0x11]),
            false,
            false,
        ));
        let media = loop {
            let msg = next_message(&mut server).await;
            if msg.msg_type == MSG_VIDEO {
                break msg;
            }
        };
        assert_eq!(media.stream_id, stream_id);
        assert_eq!(media.timestamp, 40);
        assert_eq!(&media.payload[..], &[0x27, 0x01, 0x00, 0x00, 0x00, 0x11]);

        h.streams.close(h.source.id()).unwrap();

        let (_, unpublish) = expect_command(&mut server, CMD_FC_UNPUBLISH).await;
        assert_eq!(unpublish.first_string_arg(), Some("backup"));
        let (_, delete) = expect_command(&mut server, CMD_DELETE_STREAM).await;
        assert_eq!(delete.first_number_arg(), Some(f64::from(stream_id)));
    }

    #[tokio::test]
    async fn test_create_stream_error_fails_push() {
        let h = start(OutboundConfig::default(), "FMLE/3.0").await;
        let mut server = accept(&h.listener).await;
        accept_connect(&mut server).await;

        let txn = expect_publish_prelude(&mut server).await;
        let reply = Command::error(txn, status_info("error", "NetStream.Failed", "No streams"));
        server.send(&RtmpMessage::command(0, &reply)).await.unwrap();

        assert_eq!(
            outcome(h.handle).await,
            PushOutcome::Failed("NetStream.Failed".into())
        );
    }

    #[tokio::test]
    async fn test_publish_error_status_fails_push() {
        let h = start(OutboundConfig::default(), "FMLE/3.0").await;
        let mut server = accept(&h.listener).await;
        accept_connect(&mut server).await;

        let txn = expect_publish_prelude(&mut server).await;
        let reply = Command::result(txn, AmfValue::Null, AmfValue::from(1.0));
        server.send(&RtmpMessage::command(0, &reply)).await.unwrap();
        let (stream_id, _) = expect_command(&mut server, CMD_PUBLISH).await;

        let status = Command::on_status("error", NS_PUBLISH_BAD_NAME, "Name in use");
        server
            .send(&RtmpMessage::command(stream_id, &status))
            .await
            .unwrap();

        assert_eq!(
            outcome(h.handle).await,
            PushOutcome::Failed(NS_PUBLISH_BAD_NAME.into())
        );
        let (_, delete) = expect_command(&mut server, CMD_DELETE_STREAM).await;
        assert_eq!(delete.first_number_arg(), Some(f64::from(stream_id)));
    }

    #[tokio::test]
    async fn test_unanswered_create_stream_expires() {
        let config = OutboundConfig::default().command_timeout(Duration::from_millis(300));
        let h = start(config, "FMLE/3.0").await;
        let mut server = accept(&h.listener).await;
        accept_connect(&mut server).await;
        expect_publish_prelude(&mut server).await;

        match outcome(h.handle).await {
            PushOutcome::Failed(reason) => assert!(reason.contains("timed out"), "{}", reason),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rejected_connect_fails_push() {
        let h = start(OutboundConfig::default(), "FMLE/3.0").await;
        let mut server = accept(&h.listener).await;

        let (_, connect) = expect_command(&mut server, CMD_CONNECT).await;
        let reply = Command::error(
            connect.transaction_id,
            status_info("error", NC_CONNECT_REJECTED, "Go away"),
        );
        server.send(&RtmpMessage::command(0, &reply)).await.unwrap();

        match outcome(h.handle).await {
            PushOutcome::Failed(reason) => {
                assert!(reason.contains(NC_CONNECT_REJECTED), "{}", reason)
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }
}
