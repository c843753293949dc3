//! Outbound connection manager
//!
//! Maps (host, port, app) to live outbound connection tasks. RTMP multiplexes
//! message streams, so several inbound streams going to the same server
//! application share one connection when reuse is enabled.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::application::config::{ForwardParams, TargetUri};
use crate::handler::push::{PushError, PushHandle};
use crate::registry::InboundStream;

use super::config::OutboundConfig;
use super::connector::{self, ConnectTarget, ConnectionCommand, ConnectionKey, PushRequest};

struct ConnectionEntry {
    id: u64,
    commands: mpsc::UnboundedSender<ConnectionCommand>,
}

/// Owns the outbound RTMP connections of one handler
pub struct OutboundConnectionManager {
    config: OutboundConfig,
    connections: Mutex<HashMap<ConnectionKey, ConnectionEntry>>,
    next_request: AtomicU64,
    next_connection: AtomicU64,
}

impl OutboundConnectionManager {
    pub fn new(config: OutboundConfig) -> Self {
        Self {
            config,
            connections: Mutex::new(HashMap::new()),
            next_request: AtomicU64::new(1),
            next_connection: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &OutboundConfig {
        &self.config
    }

    /// Start publishing `stream` to the target in `params`
    ///
    /// Never blocks: the request is handed to a connection task and the
    /// returned handle resolves when the server answers.
    pub fn push(
        &self,
        stream: &Arc<InboundStream>,
        params: &ForwardParams,
    ) -> Result<PushHandle, PushError> {
        let uri = &params.target_uri;
        // Only plain RTMP over TCP; tunnelled and encrypted variants have no transport
        if uri.scheme != "rtmp" {
            return Err(PushError::Unsupported(uri.scheme.clone()));
        }
        if params.target_stream_name.is_empty() {
            return Err(PushError::InvalidTarget(format!(
                "empty target stream name for {}",
                uri
            )));
        }
        let runtime = Handle::try_current().map_err(|_| PushError::NoRuntime)?;

        let (frames, catchup) = stream.subscribe();
        let request_id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let (handle, completer) = PushHandle::pending(request_id);
        let request = PushRequest {
            request_id,
            source_stream_id: stream.id(),
            params: params.clone(),
            frames,
            catchup,
            completer,
        };

        let key = connection_key(uri);
        let mut connections = self.connections.lock();
        connections.retain(|_, entry| !entry.commands.is_closed());

        let request = if self.config.reuse_connections {
            match connections.get(&key) {
                Some(entry) => match entry.commands.send(ConnectionCommand::Publish(request)) {
                    Ok(()) => {
                        tracing::debug!(
                            connection = entry.id,
                            request_id = request_id,
                            server = %key,
                            "Reusing outbound connection"
                        );
                        return Ok(handle);
                    }
                    Err(mpsc::error::SendError(ConnectionCommand::Publish(request))) => request,
                    Err(_) => {
                        return Err(PushError::ConnectionUnavailable(key.to_string()));
                    }
                },
                None => request,
            }
        } else {
            request
        };

        let id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let target = ConnectTarget {
            key: key.clone(),
            tc_url: uri.tc_url(),
            flash_ver: params.emulate_user_agent.clone(),
        };
        runtime.spawn(connector::run_connection(
            id,
            target,
            self.config.clone(),
            request,
            rx,
        ));

        if self.config.reuse_connections {
            connections.insert(key, ConnectionEntry { id, commands: tx });
        } else {
            // Without reuse the task only ever serves its first request
            drop(tx);
        }
        Ok(handle)
    }

    /// Number of connections still accepting requests
    pub fn connection_count(&self) -> usize {
        let mut connections = self.connections.lock();
        connections.retain(|_, entry| !entry.commands.is_closed());
        connections.len()
    }

    /// Ask every connection task to stop
    pub fn shutdown(&self) {
        let drained: Vec<_> = self.connections.lock().drain().collect();
        for (key, entry) in drained {
            tracing::debug!(connection = entry.id, server = %key, "Closing outbound connection");
            let _ = entry.commands.send(ConnectionCommand::Shutdown);
        }
    }
}

impl Drop for OutboundConnectionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn connection_key(uri: &TargetUri) -> ConnectionKey {
    ConnectionKey {
        host: uri.host.to_ascii_lowercase(),
        port: uri.port,
        app: uri.app.clone(),
    }
}
