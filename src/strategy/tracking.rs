use std::sync::atomic::{AtomicU64, Ordering::*};

use parking_lot::Mutex;

use crate::{
    BackupRequestsStrategy, BackupRequestsStrategyStats, BackupRequestsStrategyStatsProvider,
    BoundedCostBackupRequestsStrategy, LatencyBounds, LatencyMetric, Result, DEFAULT_MAX_SAMPLES,
};

/// Running min, max and mean of backup delays.
#[derive(Debug, Clone, Copy, Default)]
struct DelayAccumulator {
    min: u64,
    max: u64,
    sum: u64,
    count: u64,
}

impl DelayAccumulator {
    fn record(&mut self, delay: u64) {
        match (self.sum.checked_add(delay), self.count.checked_add(1)) {
            (Some(sum), Some(count)) => {
                if self.count == 0 {
                    self.min = delay;
                    self.max = delay;
                } else {
                    self.min = self.min.min(delay);
                    self.max = self.max.max(delay);
                }
                self.sum = sum;
                self.count = count;
            }
            // Start over rather than report a wrapped mean.
            _ => *self = DelayAccumulator {
                min: delay,
                max: delay,
                sum: delay,
                count: 1,
            },
        }
    }

    fn avg(&self) -> u64 {
        if self.count == 0 {
            0
        } else {
            self.sum / self.count
        }
    }
}

#[derive(Debug, Default)]
struct Delays {
    total: DelayAccumulator,
    interval: DelayAccumulator,
    reported_allowed: u64,
    reported_successful: u64,
}

/// A strategy decorator collecting backup requests statistics.
///
/// Every call is forwarded to the wrapped strategy. On top of that the
/// decorator counts allowed and successful backups, tracks the backup delays
/// it hands out, and owns the latency metrics a client records into.
///
/// Counters are plain atomics on the request path. Delay tracking takes a
/// short lock, only when a delay is handed out.
pub struct TrackingBackupRequestsStrategy<S = BoundedCostBackupRequestsStrategy> {
    delegate: S,
    allowed: AtomicU64,
    successful: AtomicU64,
    delays: Mutex<Delays>,
    latency_with_backup: LatencyMetric,
    latency_without_backup: LatencyMetric,
}

impl<S: BackupRequestsStrategy> TrackingBackupRequestsStrategy<S> {
    /// Wraps `delegate`, with latency metrics using default bounds.
    pub fn new(delegate: S) -> Self {
        Self {
            delegate,
            allowed: AtomicU64::new(0),
            successful: AtomicU64::new(0),
            delays: Mutex::new(Delays::default()),
            latency_with_backup: LatencyMetric::default(),
            latency_without_backup: LatencyMetric::default(),
        }
    }

    /// Wraps `delegate`, with latency metrics clipping to `bounds`.
    pub fn with_bounds(delegate: S, bounds: LatencyBounds) -> Result<Self> {
        Self::with_metrics(delegate, bounds, DEFAULT_MAX_SAMPLES)
    }

    /// Wraps `delegate`, with latency metrics clipping to `bounds` and
    /// rotating their buffers every `capacity` samples.
    pub fn with_metrics(delegate: S, bounds: LatencyBounds, capacity: u64) -> Result<Self> {
        Ok(Self {
            latency_with_backup: LatencyMetric::new(bounds, capacity)?,
            latency_without_backup: LatencyMetric::new(bounds, capacity)?,
            ..Self::new(delegate)
        })
    }

    /// Returns the wrapped strategy.
    pub fn delegate(&self) -> &S {
        &self.delegate
    }

    /// Reports that an allowed backup request completed first.
    pub fn backup_request_success(&self) {
        self.successful.fetch_add(1, Relaxed);
    }

    /// Latencies as experienced by callers, backups included.
    pub fn latency_with_backup(&self) -> &LatencyMetric {
        &self.latency_with_backup
    }

    /// Latencies of original requests only.
    pub fn latency_without_backup(&self) -> &LatencyMetric {
        &self.latency_without_backup
    }

    /// Returns the statistics accumulated since creation.
    pub fn stats(&self) -> BackupRequestsStrategyStats {
        let delays = self.delays.lock();
        BackupRequestsStrategyStats {
            allowed: self.allowed.load(Relaxed),
            successful: self.successful.load(Relaxed),
            min_delay_nanos: delays.total.min,
            max_delay_nanos: delays.total.max,
            avg_delay_nanos: delays.total.avg(),
        }
    }

    /// Returns the statistics accumulated since the previous call and starts
    /// a new interval.
    pub fn diff_stats(&self) -> BackupRequestsStrategyStats {
        let mut delays = self.delays.lock();
        let allowed = self.allowed.load(Relaxed);
        let successful = self.successful.load(Relaxed);
        let interval = std::mem::take(&mut delays.interval);

        // Counters may wrap, differences stay correct.
        let stats = BackupRequestsStrategyStats {
            allowed: allowed.wrapping_sub(delays.reported_allowed),
            successful: successful.wrapping_sub(delays.reported_successful),
            min_delay_nanos: interval.min,
            max_delay_nanos: interval.max,
            avg_delay_nanos: interval.avg(),
        };
        delays.reported_allowed = allowed;
        delays.reported_successful = successful;
        stats
    }
}

impl<S: BackupRequestsStrategy> BackupRequestsStrategy for TrackingBackupRequestsStrategy<S> {
    fn time_until_backup_request_nanos(&self) -> Option<u64> {
        let delay = self.delegate.time_until_backup_request_nanos();
        if let Some(delay) = delay {
            let mut delays = self.delays.lock();
            delays.total.record(delay);
            delays.interval.record(delay);
        }
        delay
    }

    fn is_backup_request_allowed(&self) -> bool {
        let allowed = self.delegate.is_backup_request_allowed();
        if allowed {
            self.allowed.fetch_add(1, Relaxed);
        }
        allowed
    }

    fn record_completion(&self, response_time_nanos: u64) {
        self.delegate.record_completion(response_time_nanos)
    }
}

impl<S: BackupRequestsStrategy> BackupRequestsStrategyStatsProvider
    for TrackingBackupRequestsStrategy<S>
{
    fn stats(&self) -> BackupRequestsStrategyStats {
        TrackingBackupRequestsStrategy::stats(self)
    }

    fn diff_stats(&self) -> BackupRequestsStrategyStats {
        TrackingBackupRequestsStrategy::diff_stats(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;
    use std::sync::atomic::AtomicBool;

    /// A strategy answering whatever the test sets.
    #[derive(Default)]
    struct MockStrategy {
        delay: Mutex<Option<u64>>,
        allowed: AtomicBool,
        completions: AtomicU64,
    }

    impl MockStrategy {
        fn new(delay: Option<u64>, allowed: bool) -> Self {
            Self {
                delay: Mutex::new(delay),
                allowed: AtomicBool::new(allowed),
                completions: AtomicU64::new(0),
            }
        }
    }

    impl BackupRequestsStrategy for MockStrategy {
        fn time_until_backup_request_nanos(&self) -> Option<u64> {
            *self.delay.lock()
        }

        fn is_backup_request_allowed(&self) -> bool {
            self.allowed.load(SeqCst)
        }

        fn record_completion(&self, _response_time_nanos: u64) {
            self.completions.fetch_add(1, SeqCst);
        }
    }

    #[test]
    fn test_delegates() {
        let tracking = TrackingBackupRequestsStrategy::new(MockStrategy::new(Some(10), true));
        assert_eq!(Some(10), tracking.time_until_backup_request_nanos());
        assert!(tracking.is_backup_request_allowed());
        tracking.record_completion(5);
        assert_eq!(1, tracking.delegate().completions.load(SeqCst));
    }

    #[test]
    fn test_stats() {
        let tracking = TrackingBackupRequestsStrategy::new(MockStrategy::new(None, false));
        assert_eq!(BackupRequestsStrategyStats::default(), tracking.stats());

        // Neither absent delays nor denials are counted.
        assert_eq!(None, tracking.time_until_backup_request_nanos());
        assert!(!tracking.is_backup_request_allowed());
        assert_eq!(BackupRequestsStrategyStats::default(), tracking.stats());

        for delay in [10, 30, 20] {
            *tracking.delegate().delay.lock() = Some(delay);
            tracking.time_until_backup_request_nanos();
        }
        tracking.delegate().allowed.store(true, SeqCst);
        tracking.is_backup_request_allowed();
        tracking.is_backup_request_allowed();
        tracking.backup_request_success();

        let expected = BackupRequestsStrategyStats {
            allowed: 2,
            successful: 1,
            min_delay_nanos: 10,
            max_delay_nanos: 30,
            avg_delay_nanos: 20,
        };
        assert_eq!(expected, tracking.stats());
        assert_eq!(expected, tracking.stats());
    }

    #[test]
    fn test_diff_stats_reset() {
        let tracking = TrackingBackupRequestsStrategy::new(MockStrategy::new(Some(7), true));
        tracking.time_until_backup_request_nanos();
        tracking.is_backup_request_allowed();

        let diff = tracking.diff_stats();
        assert_eq!(1, diff.allowed);
        assert_eq!(7, diff.avg_delay_nanos);

        assert_eq!(BackupRequestsStrategyStats::default(), tracking.diff_stats());
        assert_eq!(BackupRequestsStrategyStats::default(), tracking.diff_stats());
        assert_eq!(1, tracking.stats().allowed);
    }

    #[test]
    fn test_stats_equal_sum_of_diffs() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let tracking = TrackingBackupRequestsStrategy::new(MockStrategy::default());
        let mut diffs = Vec::new();

        for _ in 0..10_000 {
            match rng.gen_range(0..4) {
                0 => {
                    *tracking.delegate().delay.lock() = Some(rng.gen_range(1..1_000_000));
                    tracking.time_until_backup_request_nanos();
                }
                1 => {
                    tracking
                        .delegate()
                        .allowed
                        .store(rng.gen_bool(0.5), SeqCst);
                    tracking.is_backup_request_allowed();
                }
                2 => tracking.backup_request_success(),
                _ => {
                    if rng.gen_bool(0.05) {
                        diffs.push(tracking.diff_stats());
                    }
                }
            }
        }
        diffs.push(tracking.diff_stats());

        let stats = tracking.stats();
        assert_eq!(stats.allowed, diffs.iter().map(|d| d.allowed).sum::<u64>());
        assert_eq!(stats.successful, diffs.iter().map(|d| d.successful).sum::<u64>());

        let active = diffs.iter().filter(|d| d.max_delay_nanos > 0);
        assert_eq!(
            Some(stats.min_delay_nanos),
            active.clone().map(|d| d.min_delay_nanos).min()
        );
        assert_eq!(Some(stats.max_delay_nanos), active.map(|d| d.max_delay_nanos).max());
        assert!(stats.avg_delay_nanos >= stats.min_delay_nanos);
        assert!(stats.avg_delay_nanos <= stats.max_delay_nanos);
    }

    #[test]
    fn test_delay_sum_overflow_starts_over() {
        let huge = u64::MAX / 2 + 1;
        let tracking = TrackingBackupRequestsStrategy::new(MockStrategy::new(Some(huge), false));
        for _ in 0..3 {
            tracking.time_until_backup_request_nanos();
        }

        let stats = tracking.stats();
        assert_eq!(huge, stats.avg_delay_nanos);
        assert_eq!(huge, stats.min_delay_nanos);
        assert_eq!(huge, stats.max_delay_nanos);
        assert_eq!(huge, tracking.diff_stats().avg_delay_nanos);

        *tracking.delegate().delay.lock() = Some(10);
        tracking.time_until_backup_request_nanos();
        assert_eq!(10, tracking.diff_stats().avg_delay_nanos);
    }
}
