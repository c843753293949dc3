//! Relay counters

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Forwarding counters of one application
///
/// Updated from the registration callback and from completion watchers.
#[derive(Debug, Default)]
pub struct RelayStats {
    streams_seen: AtomicU64,
    streams_ignored: AtomicU64,
    targets_filtered: AtomicU64,
    pushes_requested: AtomicU64,
    pushes_failed: AtomicU64,
    published_remote: AtomicU64,
    rejected_remote: AtomicU64,
    passes_aborted: AtomicU64,
}

/// Point-in-time copy of [`RelayStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStatsSnapshot {
    /// Streams the application was told about
    pub streams_seen: u64,
    /// Streams of a type that is never forwarded
    pub streams_ignored: u64,
    /// Targets skipped by the name filter
    pub targets_filtered: u64,
    /// Pushes handed to an outbound handler
    pub pushes_requested: u64,
    /// Pushes that failed locally
    pub pushes_failed: u64,
    /// Pushes the target accepted
    pub published_remote: u64,
    /// Pushes that failed after being started
    pub rejected_remote: u64,
    /// Forwarding passes stopped by `abortOnConnectError`
    pub passes_aborted: u64,
}

impl RelayStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn stream_seen(&self) {
        self.streams_seen.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn stream_ignored(&self) {
        self.streams_ignored.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn target_filtered(&self) {
        self.targets_filtered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn push_requested(&self) {
        self.pushes_requested.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn push_failed(&self) {
        self.pushes_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn published(&self) {
        self.published_remote.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn rejected(&self) {
        self.rejected_remote.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn pass_aborted(&self) {
        self.passes_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RelayStatsSnapshot {
        RelayStatsSnapshot {
            streams_seen: self.streams_seen.load(Ordering::Relaxed),
            streams_ignored: self.streams_ignored.load(Ordering::Relaxed),
            targets_filtered: self.targets_filtered.load(Ordering::Relaxed),
            pushes_requested: self.pushes_requested.load(Ordering::Relaxed),
            pushes_failed: self.pushes_failed.load(Ordering::Relaxed),
            published_remote: self.published_remote.load(Ordering::Relaxed),
            rejected_remote: self.rejected_remote.load(Ordering::Relaxed),
            passes_aborted: self.passes_aborted.load(Ordering::Relaxed),
        }
    }
}

/// Listener-wide connection counters
#[derive(Debug)]
pub struct ServerStats {
    started_at: Instant,
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    rejected_connections: AtomicU64,
}

impl ServerStats {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            total_connections: AtomicU64::new(0),
            active_connections: AtomicU64::new(0),
            rejected_connections: AtomicU64::new(0),
        }
    }

    pub(crate) fn connection_opened(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn connection_rejected(&self) {
        self.rejected_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_connections(&self) -> u64 {
        self.total_connections.load(Ordering::Relaxed)
    }

    pub fn active_connections(&self) -> u64 {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub fn rejected_connections(&self) -> u64 {
        self.rejected_connections.load(Ordering::Relaxed)
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

impl Default for ServerStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_stats_new() {
        let stats = RelayStats::new();
        assert_eq!(stats.snapshot(), RelayStatsSnapshot::default());
    }

    #[test]
    fn test_relay_stats_counts() {
        let stats = RelayStats::new();
        stats.stream_seen();
        stats.stream_seen();
        stats.stream_ignored();
        stats.target_filtered();
        stats.push_requested();
        stats.push_failed();
        stats.published();
        stats.rejected();
        stats.pass_aborted();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.streams_seen, 2);
        assert_eq!(snapshot.streams_ignored, 1);
        assert_eq!(snapshot.targets_filtered, 1);
        assert_eq!(snapshot.pushes_requested, 1);
        assert_eq!(snapshot.pushes_failed, 1);
        assert_eq!(snapshot.published_remote, 1);
        assert_eq!(snapshot.rejected_remote, 1);
        assert_eq!(snapshot.passes_aborted, 1);
    }

    #[test]
    fn test_server_stats_connections() {
        let stats = ServerStats::new();
        stats.connection_opened();
        stats.connection_opened();
        stats.connection_closed();
        stats.connection_rejected();

        assert_eq!(stats.total_connections(), 2);
        assert_eq!(stats.active_connections(), 1);
        assert_eq!(stats.rejected_connections(), 1);
    }
}
