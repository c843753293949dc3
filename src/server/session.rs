//! RTMP ingest session
//!
//! Serves one publishing client:
//!
//! ```text
//! handshake → connect → WindowAck, PeerBandwidth, SetChunkSize, _result
//!           → createStream → _result(id)
//!           → publish(name) → open stream, onStatus NetStream.Publish.Start
//!           → audio / video / @setDataFrame → frames
//!           → deleteStream / FCUnpublish / EOF → close stream
//! ```
//!
//! A teardown request on a published stream ends the session.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::{AbortHandle, JoinSet};
use tokio::time::timeout;

use crate::amf::AmfValue;
use crate::error::{ProtocolError, Result};
use crate::handler::AppProtocolHandler;
use crate::protocol::constants::*;
use crate::protocol::handshake::{self, HandshakeRole};
use crate::protocol::message::{status_info, Command, ConnectParams, PublishParams, RtmpMessage};
use crate::protocol::transport::RtmpTransport;
use crate::registry::{BroadcastFrame, InboundStream};

use super::config::ServerConfig;

struct Published {
    stream: Arc<InboundStream>,
    teardown_watch: AbortHandle,
}

pub struct RtmpSession<S> {
    id: u64,
    handler: Arc<dyn AppProtocolHandler>,
    config: ServerConfig,
    transport: RtmpTransport<S>,
    app: Option<String>,
    next_stream_id: u32,
    /// Keyed by message stream id
    published: HashMap<u32, Published>,
    teardown_watches: JoinSet<u32>,
}

impl<S> RtmpSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Run the server side of the handshake and wrap the connection
    pub async fn accept(
        id: u64,
        mut io: S,
        handler: Arc<dyn AppProtocolHandler>,
        config: ServerConfig,
    ) -> Result<Self> {
        let mut leftover = BytesMut::new();
        timeout(
            config.handshake_timeout,
            handshake::perform(&mut io, HandshakeRole::Server, &mut leftover),
        )
        .await??;
        tracing::trace!(session_id = id, "Handshake complete");

        Ok(Self {
            id,
            handler,
            config,
            transport: RtmpTransport::new(io, leftover),
            app: None,
            next_stream_id: 1,
            published: HashMap::new(),
            teardown_watches: JoinSet::new(),
        })
    }

    /// Serve the client until it disconnects or a stream is torn down
    pub async fn run(mut self) -> Result<()> {
        let result = self.serve().await;
        self.close_all();
        result
    }

    async fn serve(&mut self) -> Result<()> {
        loop {
            tokio::select! {
                read = timeout(self.config.idle_timeout, self.transport.read_message()) => {
                    let msg = match read?? {
                        Some(msg) => msg,
                        None => {
                            tracing::debug!(session_id = self.id, "Client disconnected");
                            return Ok(());
                        }
                    };
                    self.handle_message(msg).await?;
                    self.transport.flush().await?;
                }
                Some(joined) = self.teardown_watches.join_next(),
                    if !self.teardown_watches.is_empty() =>
                {
                    if let Ok(stream_id) = joined {
                        if let Some(published) = self.published.get(&stream_id) {
                            tracing::info!(
                                session_id = self.id,
                                stream_id = published.stream.id(),
                                name = published.stream.name(),
                                "Stream torn down, disconnecting publisher"
                            );
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    async fn handle_message(&mut self, msg: RtmpMessage) -> Result<()> {
        match msg.msg_type {
            MSG_COMMAND_AMF0 | MSG_COMMAND_AMF3 => {
                let command = Command::decode(&msg)?;
                self.handle_command(msg.stream_id, command).await
            }
            MSG_AUDIO | MSG_VIDEO | MSG_DATA_AMF0 => {
                if let Some(published) = self.published.get(&msg.stream_id) {
                    if let Some(frame) = BroadcastFrame::from_message(&msg) {
                        published.stream.push_frame(frame);
                    }
                }
                Ok(())
            }
            other => {
                tracing::trace!(session_id = self.id, msg_type = other, "Ignoring message");
                Ok(())
            }
        }
    }

    async fn handle_command(&mut self, msg_stream_id: u32, command: Command) -> Result<()> {
        tracing::trace!(session_id = self.id, command = %command.name, "Command");
        match command.name.as_str() {
            CMD_CONNECT => self.on_connect(&command).await,
            CMD_CREATE_STREAM => {
                let stream_id = self.next_stream_id;
                self.next_stream_id += 1;
                self.reply(
                    0,
                    &Command::result(
                        command.transaction_id,
                        AmfValue::Null,
                        AmfValue::Number(f64::from(stream_id)),
                    ),
                )
                .await
            }
            CMD_RELEASE_STREAM | CMD_FC_PUBLISH => {
                if command.transaction_id > 0.0 {
                    let txn = command.transaction_id;
                    let result = Command::result(txn, AmfValue::Null, AmfValue::Undefined);
                    self.reply(0, &result).await?;
                }
                Ok(())
            }
            CMD_PUBLISH => self.on_publish(msg_stream_id, &command).await,
            CMD_FC_UNPUBLISH => {
                let name = command.first_string_arg().unwrap_or_default();
                let found = self
                    .published
                    .iter()
                    .find(|(_, p)| p.stream.name() == name)
                    .map(|(id, _)| *id);
                if let Some(id) = found {
                    self.unpublish(id);
                }
                Ok(())
            }
            CMD_DELETE_STREAM | CMD_CLOSE_STREAM => {
                let id = command
                    .first_number_arg()
                    .map(|n| n as u32)
                    .unwrap_or(msg_stream_id);
                self.unpublish(id);
                Ok(())
            }
            _ => {
                tracing::trace!(session_id = self.id, command = %command.name, "Unhandled command");
                Ok(())
            }
        }
    }

    async fn on_connect(&mut self, command: &Command) -> Result<()> {
        let params = ConnectParams::from_amf(&command.command_object);
        let app = params.app.trim_matches('/').to_string();
        tracing::debug!(
            session_id = self.id,
            app = %app,
            flash_ver = params.flash_ver.as_deref().unwrap_or(""),
            "Client connect"
        );

        self.transport
            .send(&RtmpMessage::window_ack_size(self.config.window_ack_size))
            .await?;
        self.transport
            .send(&RtmpMessage::set_peer_bandwidth(self.config.peer_bandwidth))
            .await?;
        self.transport.set_chunk_size(self.config.chunk_size).await?;

        let properties = AmfValue::object([
            ("fmsVer", AmfValue::from("FMS/3,0,1,123")),
            ("capabilities", AmfValue::Number(31.0)),
        ]);
        let mut info = status_info("status", NC_CONNECT_SUCCESS, "Connection succeeded.");
        if let AmfValue::Object(props) = &mut info {
            props.insert(
                "objectEncoding".into(),
                AmfValue::Number(params.object_encoding),
            );
        }
        self.reply(0, &Command::result(command.transaction_id, properties, info))
            .await?;

        self.app = Some(app);
        Ok(())
    }

    async fn on_publish(&mut self, msg_stream_id: u32, command: &Command) -> Result<()> {
        let app = self
            .app
            .clone()
            .ok_or_else(|| ProtocolError::UnexpectedMessage("publish before connect".into()))?;
        let params = PublishParams::from_command(command, msg_stream_id)
            .ok_or_else(|| ProtocolError::InvalidCommand("publish without stream name".into()))?;

        if self.published.contains_key(&msg_stream_id) {
            return Err(ProtocolError::UnexpectedMessage(format!(
                "stream {} already publishing",
                msg_stream_id
            ))
            .into());
        }

        match self.handler.open_stream(&app, &params.stream_key) {
            Ok(stream) => {
                tracing::info!(
                    session_id = self.id,
                    stream_id = stream.id(),
                    app = %app,
                    name = %params.stream_key,
                    publish_type = %params.publish_type,
                    "Publish started"
                );
                let watched = Arc::clone(&stream);
                let teardown_watch = self.teardown_watches.spawn(async move {
                    watched.teardown_requested().await;
                    msg_stream_id
                });
                self.published.insert(
                    msg_stream_id,
                    Published {
                        stream,
                        teardown_watch,
                    },
                );
                self.reply(
                    msg_stream_id,
                    &Command::on_status("status", NS_PUBLISH_START, "Publishing started."),
                )
                .await
            }
            Err(e) => {
                tracing::warn!(
                    session_id = self.id,
                    app = %app,
                    name = %params.stream_key,
                    error = %e,
                    "Publish rejected"
                );
                self.reply(
                    msg_stream_id,
                    &Command::on_status("error", NS_PUBLISH_BAD_NAME, &e.to_string()),
                )
                .await
            }
        }
    }

    fn unpublish(&mut self, msg_stream_id: u32) {
        if let Some(published) = self.published.remove(&msg_stream_id) {
            published.teardown_watch.abort();
            if let Err(e) = self.handler.close_stream(published.stream.id()) {
                tracing::debug!(session_id = self.id, error = %e, "Stream already closed");
            }
        }
    }

    fn close_all(&mut self) {
        let ids: Vec<u32> = self.published.keys().copied().collect();
        for id in ids {
            self.unpublish(id);
        }
        self.teardown_watches.abort_all();
    }

    async fn reply(&mut self, msg_stream_id: u32, command: &Command) -> Result<()> {
        self.transport
            .send(&RtmpMessage::command(msg_stream_id, command))
            .await
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}
