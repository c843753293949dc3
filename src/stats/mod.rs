//! Statistics

pub mod metrics;

pub use metrics::{RelayStats, RelayStatsSnapshot, ServerStats};
