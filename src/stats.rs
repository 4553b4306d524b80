use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
};

use crate::LatencyHistogram;

/// Immutable snapshot of backup requests usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackupRequestsStrategyStats {
    /// Number of backup requests allowed by the strategy.
    pub allowed: u64,
    /// Number of allowed backup requests that completed before the original.
    pub successful: u64,
    /// Smallest backup delay handed out, in nanoseconds.
    pub min_delay_nanos: u64,
    /// Largest backup delay handed out, in nanoseconds.
    pub max_delay_nanos: u64,
    /// Mean backup delay handed out, in nanoseconds.
    pub avg_delay_nanos: u64,
}

/// Source of [`BackupRequestsStrategyStats`].
pub trait BackupRequestsStrategyStatsProvider: Send + Sync {
    /// Returns the statistics accumulated since the provider was created.
    fn stats(&self) -> BackupRequestsStrategyStats;

    /// Returns the statistics accumulated since the previous call and starts
    /// a new interval.
    fn diff_stats(&self) -> BackupRequestsStrategyStats;
}

/// Receiver of backup requests statistics, typically bridging to a metrics
/// exporter.
///
/// Implementations are called from request threads and from the latency
/// notification task, so they should return quickly.
pub trait BackupRequestsStrategyStatsConsumer: Send + Sync {
    /// A strategy started serving `operation` of `service`.
    fn add_stats_provider(
        &self,
        service: &str,
        operation: &str,
        provider: Arc<dyn BackupRequestsStrategyStatsProvider>,
    );

    /// A strategy stopped serving `operation` of `service`.
    fn remove_stats_provider(
        &self,
        service: &str,
        operation: &str,
        provider: Arc<dyn BackupRequestsStrategyStatsProvider>,
    );

    /// Latencies recorded for `operation` of `service`, with or without the
    /// effect of backup requests.
    fn latency_update(
        &self,
        service: &str,
        operation: &str,
        latencies: LatencyHistogram,
        with_backup: bool,
    );
}

/// Calls `f` with `consumer`. A panicking consumer is logged and otherwise
/// ignored, so it can not unwind into the request path.
pub(crate) fn notify_consumer<F>(consumer: &dyn BackupRequestsStrategyStatsConsumer, f: F)
where
    F: FnOnce(&dyn BackupRequestsStrategyStatsConsumer),
{
    if catch_unwind(AssertUnwindSafe(|| f(consumer))).is_err() {
        tracing::error!("backup requests stats consumer panicked");
    }
}
