//! Relay server listener
//!
//! One TCP accept loop per protocol tag. Accepted connections are served by
//! whichever handler is registered for the listener's tag at that moment.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;

use crate::error::Result;
use crate::handler::{HandlerRegistry, ProtocolType};
use crate::server::config::ServerConfig;
use crate::server::flv_session::run_flv_session;
use crate::server::rtsp_session::run_rtsp_session;
use crate::server::session::RtmpSession;
use crate::stats::ServerStats;

/// A bound listener and the tag it serves
pub struct BoundListener {
    pub tag: ProtocolType,
    pub listener: TcpListener,
}

impl BoundListener {
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

struct Shared {
    config: ServerConfig,
    registry: Arc<HandlerRegistry>,
    stats: Arc<ServerStats>,
    next_session_id: AtomicU64,
    connection_semaphore: Option<Arc<Semaphore>>,
}

/// Inbound side of the relay
pub struct RelayServer {
    shared: Arc<Shared>,
}

impl RelayServer {
    pub fn new(config: ServerConfig, registry: Arc<HandlerRegistry>) -> Self {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        Self {
            shared: Arc::new(Shared {
                config,
                registry,
                stats: Arc::new(ServerStats::new()),
                next_session_id: AtomicU64::new(1),
                connection_semaphore,
            }),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    pub fn stats(&self) -> &Arc<ServerStats> {
        &self.shared.stats
    }

    /// Bind every configured listener
    pub async fn bind(&self) -> Result<Vec<BoundListener>> {
        let mut bound = Vec::new();
        for (tag, addr) in self.shared.config.listeners() {
            let listener = TcpListener::bind(addr).await?;
            tracing::info!(tag = %tag, addr = %listener.local_addr()?, "Listening");
            bound.push(BoundListener { tag, listener });
        }
        Ok(bound)
    }

    /// Run the server until the process ends
    pub async fn run(&self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Bind, then serve until `shutdown` resolves
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let listeners = self.bind().await?;
        self.serve_until(listeners, shutdown).await;
        Ok(())
    }

    /// Serve already bound listeners until `shutdown` resolves
    ///
    /// Accept loops stop on shutdown; sessions already running finish on
    /// their own.
    pub async fn serve_until<F>(&self, listeners: Vec<BoundListener>, shutdown: F)
    where
        F: std::future::Future<Output = ()>,
    {
        let mut accept_loops = JoinSet::new();
        for bound in listeners {
            accept_loops.spawn(accept_loop(Arc::clone(&self.shared), bound));
        }

        shutdown.await;
        tracing::info!("Shutdown signal received");
        accept_loops.shutdown().await;
    }
}

async fn accept_loop(shared: Arc<Shared>, bound: BoundListener) {
    loop {
        match bound.listener.accept().await {
            Ok((socket, peer_addr)) => handle_connection(&shared, bound.tag, socket, peer_addr),
            Err(e) => {
                tracing::error!(tag = %bound.tag, error = %e, "Failed to accept connection");
            }
        }
    }
}

fn handle_connection(
    shared: &Arc<Shared>,
    tag: ProtocolType,
    socket: TcpStream,
    peer_addr: SocketAddr,
) {
    let permit: Option<OwnedSemaphorePermit> = match &shared.connection_semaphore {
        Some(sem) => match Arc::clone(sem).try_acquire_owned() {
            Ok(permit) => Some(permit),
            Err(_) => {
                shared.stats.connection_rejected();
                tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                return;
            }
        },
        None => None,
    };

    let Some(handler) = shared.registry.get(tag) else {
        shared.stats.connection_rejected();
        tracing::warn!(tag = %tag, peer = %peer_addr, "No handler registered for listener");
        return;
    };

    if shared.config.tcp_nodelay {
        if let Err(e) = socket.set_nodelay(true) {
            tracing::error!(error = %e, "Failed to configure socket");
            return;
        }
    }

    let session_id = shared.next_session_id.fetch_add(1, Ordering::Relaxed);
    tracing::debug!(
        session_id = session_id,
        tag = %tag,
        peer = %peer_addr,
        handler = handler.name(),
        "New connection"
    );

    let config = shared.config.clone();
    let stats = Arc::clone(&shared.stats);
    stats.connection_opened();

    tokio::spawn(async move {
        let _permit = permit;
        let result = match tag {
            ProtocolType::InboundRtmp => {
                match RtmpSession::accept(session_id, socket, handler, config).await {
                    Ok(session) => session.run().await,
                    Err(e) => Err(e),
                }
            }
            ProtocolType::InboundLiveFlv => {
                run_flv_session(session_id, socket, handler, config).await
            }
            ProtocolType::Rtsp => run_rtsp_session(session_id, socket, handler, config).await,
            other => {
                tracing::warn!(session_id = session_id, tag = %other, "Tag has no TCP session");
                Ok(())
            }
        };

        if let Err(e) = result {
            tracing::debug!(session_id = session_id, error = %e, "Connection error");
        }
        stats.connection_closed();
        tracing::debug!(session_id = session_id, "Connection closed");
    });
}
