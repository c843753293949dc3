//! Outbound push requests and their completion
//!
//! `push_local_stream` returns synchronously with either a local failure
//! ([`PushError`]) or a [`PushHandle`]. The remote outcome arrives later on the
//! handle once the outbound connection has published (or failed to).

use std::fmt;

use tokio::sync::oneshot;

/// Local reasons a push could not even be started
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushError {
    /// No outbound handler for this protocol
    Unsupported(String),
    /// Called outside of a Tokio runtime
    NoRuntime,
    /// The outbound connection task is gone
    ConnectionUnavailable(String),
    /// Target parameters cannot be used
    InvalidTarget(String),
}

impl fmt::Display for PushError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PushError::Unsupported(proto) => write!(f, "no outbound support for {}", proto),
            PushError::NoRuntime => write!(f, "no async runtime available"),
            PushError::ConnectionUnavailable(reason) => {
                write!(f, "outbound connection unavailable: {}", reason)
            }
            PushError::InvalidTarget(reason) => write!(f, "invalid target: {}", reason),
        }
    }
}

impl std::error::Error for PushError {}

/// Remote result of a push
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// The target answered `NetStream.Publish.Start`
    Published {
        target_stream_name: String,
        message_stream_id: u32,
    },
    Failed(String),
}

impl PushOutcome {
    pub fn is_published(&self) -> bool {
        matches!(self, PushOutcome::Published { .. })
    }
}

/// Pending remote result of one push
#[derive(Debug)]
pub struct PushHandle {
    request_id: u64,
    completion: oneshot::Receiver<PushOutcome>,
}

impl PushHandle {
    /// A handle plus the completer the connection task resolves it with
    pub fn pending(request_id: u64) -> (Self, PushCompleter) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                request_id,
                completion: rx,
            },
            PushCompleter {
                request_id,
                tx: Some(tx),
            },
        )
    }

    /// A handle that is already resolved
    pub fn ready(request_id: u64, outcome: PushOutcome) -> Self {
        let (handle, completer) = Self::pending(request_id);
        completer.complete(outcome);
        handle
    }

    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    /// Wait for the remote outcome
    ///
    /// A completer dropped without answering counts as a failure.
    pub async fn outcome(self) -> PushOutcome {
        self.completion
            .await
            .unwrap_or_else(|_| PushOutcome::Failed("outbound connection dropped".into()))
    }

    /// Outcome if it has already arrived
    pub fn try_outcome(&mut self) -> Option<PushOutcome> {
        match self.completion.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => {
                Some(PushOutcome::Failed("outbound connection dropped".into()))
            }
        }
    }
}

/// Resolves a [`PushHandle`]
#[derive(Debug)]
pub struct PushCompleter {
    request_id: u64,
    tx: Option<oneshot::Sender<PushOutcome>>,
}

impl PushCompleter {
    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    pub fn complete(mut self, outcome: PushOutcome) {
        if let Some(tx) = self.tx.take() {
            // Receiver gone means nobody waits for the outcome
            let _ = tx.send(outcome);
        }
    }

    pub fn fail(self, reason: impl Into<String>) {
        self.complete(PushOutcome::Failed(reason.into()));
    }
}
