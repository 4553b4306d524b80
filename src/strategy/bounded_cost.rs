use std::sync::atomic::{AtomicU64, Ordering::*};

use parking_lot::Mutex;

use crate::{BackupRequestsStrategy, BoundedCostConfig, Error, LatencyBounds, LatencyHistogram, Result};

/// Smallest accepted `historyLength` and `requiredHistoryLength`. Fewer
/// samples make the tail percentile estimate unstable.
pub const MIN_HISTORY_LENGTH: i64 = 100;

/// Fixed-point scale of the token bucket, one token.
const TOKEN: u64 = 1_000_000;

/// Number of completions between two threshold refreshes.
const REFRESH_PERIOD: u64 = 16;

/// Threshold value meaning "not enough history yet". Real thresholds are
/// sanitized, so they are never below the lower bound of at least 1ns.
const NO_THRESHOLD: u64 = 0;

/// A strategy keeping backup requests at a target percentage of traffic.
///
/// Two mechanisms work together:
///
/// - The backup delay is the `(100 - percent)`-th percentile of the last
///   `history_length` completion latencies, so in steady state only about
///   `percent`% of requests run long enough to become backup candidates.
/// - A token bucket holding at most `max_burst` tokens gains `percent / 100`
///   token per completion and loses one per allowed backup, capping bursts of
///   backups when latencies suddenly degrade.
///
/// The delay is never lower than `min_backup_delay_nanos`.
///
/// # Examples
///
/// ```
/// use backup_requests::{BackupRequestsStrategy, BoundedCostBackupRequestsStrategy};
///
/// let strategy = BoundedCostBackupRequestsStrategy::new(5.0, 64, 1024, 128, 5_000_000)
///     .expect("valid configuration");
///
/// // Not enough history yet.
/// assert_eq!(None, strategy.time_until_backup_request_nanos());
/// ```
pub struct BoundedCostBackupRequestsStrategy {
    percent: f64,
    max_burst: u64,
    required_history_length: u64,
    min_backup_delay_nanos: u64,
    bounds: LatencyBounds,
    history: Box<[AtomicU64]>,
    recorded: AtomicU64,
    threshold: AtomicU64,
    tokens: AtomicU64,
    refill: u64,
    refresh: Mutex<Refresh>,
}

/// Scratch space of the threshold refresh, reused across refreshes.
struct Refresh {
    latencies: LatencyHistogram,
    // Completion count of the last stored threshold.
    stamp: u64,
}

impl Refresh {
    fn new(bounds: LatencyBounds) -> Result<Self> {
        Ok(Self {
            latencies: LatencyHistogram::new(bounds)?,
            stamp: 0,
        })
    }
}

impl std::fmt::Debug for BoundedCostBackupRequestsStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedCostBackupRequestsStrategy")
            .field("percent", &self.percent)
            .field("max_burst", &self.max_burst)
            .field("history_length", &self.history.len())
            .field("required_history_length", &self.required_history_length)
            .field("min_backup_delay_nanos", &self.min_backup_delay_nanos)
            .field("bounds", &self.bounds)
            .finish_non_exhaustive()
    }
}

impl BoundedCostBackupRequestsStrategy {
    /// Creates a new strategy.
    ///
    /// # Parameters
    ///
    /// - `percent`: Target share of requests receiving a backup, in the
    ///   `(0, 100)` range.
    /// - `max_burst`: Capacity of the token bucket, greater than 0.
    /// - `history_length`: Number of recent latencies the delay is estimated
    ///   from, at least [`MIN_HISTORY_LENGTH`].
    /// - `required_history_length`: Number of latencies that must be observed
    ///   before any delay is returned, in `[MIN_HISTORY_LENGTH, history_length]`.
    /// - `min_backup_delay_nanos`: Floor of the returned delay, not negative.
    ///
    /// # Returns
    ///
    /// A configuration error describing the first invalid parameter.
    pub fn new(
        percent: f64,
        max_burst: i64,
        history_length: i64,
        required_history_length: i64,
        min_backup_delay_nanos: i64,
    ) -> Result<Self> {
        if !(percent > 0.0 && percent < 100.0) {
            return Err(Error::InvalidPercent { percent });
        }
        if max_burst <= 0 {
            return Err(Error::InvalidMaxBurst { max_burst });
        }
        if history_length < MIN_HISTORY_LENGTH {
            return Err(Error::InvalidHistoryLength {
                history_length,
                min: MIN_HISTORY_LENGTH,
            });
        }
        if required_history_length < MIN_HISTORY_LENGTH || required_history_length > history_length
        {
            return Err(Error::InvalidRequiredHistoryLength {
                required_history_length,
                min: MIN_HISTORY_LENGTH,
                history_length,
            });
        }
        if min_backup_delay_nanos < 0 {
            return Err(Error::InvalidMinBackupDelay {
                nanos: min_backup_delay_nanos,
            });
        }

        let history = (0..history_length)
            .map(|_| AtomicU64::new(NO_THRESHOLD))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        let bounds = LatencyBounds::default();
        Ok(Self {
            percent,
            max_burst: max_burst as u64,
            required_history_length: required_history_length as u64,
            min_backup_delay_nanos: min_backup_delay_nanos as u64,
            bounds,
            history,
            recorded: AtomicU64::new(0),
            threshold: AtomicU64::new(NO_THRESHOLD),
            tokens: AtomicU64::new(0),
            refill: ((percent / 100.0 * TOKEN as f64).round() as u64).max(1),
            refresh: Mutex::new(Refresh::new(bounds)?),
        })
    }

    /// Creates a strategy from its external configuration.
    pub fn from_config(config: &BoundedCostConfig) -> Result<Self> {
        let min_backup_delay_nanos = config
            .min_backup_delay_ms
            .checked_mul(1_000_000)
            .ok_or(Error::InvalidMinBackupDelay {
                nanos: config.min_backup_delay_ms.saturating_mul(1_000_000),
            })?;
        Self::new(
            config.cost,
            config.max_burst,
            config.history_length,
            config.required_history_length,
            min_backup_delay_nanos,
        )
    }

    /// Sets the range latencies are clipped to.
    pub fn with_bounds(self, bounds: LatencyBounds) -> Result<Self> {
        Ok(Self {
            bounds,
            refresh: Mutex::new(Refresh::new(bounds)?),
            ..self
        })
    }

    /// Returns the target share of requests receiving a backup, in percent.
    pub fn percent(&self) -> f64 {
        self.percent
    }

    /// Returns the capacity of the token bucket.
    pub fn max_burst(&self) -> u64 {
        self.max_burst
    }

    /// Returns the number of latencies the delay is estimated from.
    pub fn history_length(&self) -> usize {
        self.history.len()
    }

    /// Returns the number of latencies required before a delay is returned.
    pub fn required_history_length(&self) -> u64 {
        self.required_history_length
    }

    /// Returns the floor of the backup delay.
    pub fn min_backup_delay_nanos(&self) -> u64 {
        self.min_backup_delay_nanos
    }

    /// Returns the range latencies are clipped to.
    pub fn bounds(&self) -> LatencyBounds {
        self.bounds
    }

    fn refill_tokens(&self) {
        let capacity = self.max_burst.saturating_mul(TOKEN);
        let _ = self
            .tokens
            .fetch_update(AcqRel, Acquire, |tokens| {
                Some(tokens.saturating_add(self.refill).min(capacity))
            });
    }

    // Skipped when another completion is refreshing: the next period
    // catches up.
    fn refresh_threshold(&self, recorded: u64) {
        let Some(mut refresh) = self.refresh.try_lock() else {
            return;
        };
        // A refresh started earlier may get the lock later.
        if recorded <= refresh.stamp {
            return;
        }
        let Refresh { latencies, stamp } = &mut *refresh;
        latencies.clear();
        let len = recorded.min(self.history.len() as u64) as usize;
        for slot in &self.history[..len] {
            // A slot may be reserved but not written yet.
            let value = slot.load(Relaxed);
            if value != NO_THRESHOLD {
                latencies.record(value);
            }
        }
        if let Some(threshold) = latencies.percentile(100.0 - self.percent) {
            self.threshold.store(threshold, Relaxed);
            *stamp = recorded;
        }
    }
}

impl BackupRequestsStrategy for BoundedCostBackupRequestsStrategy {
    fn time_until_backup_request_nanos(&self) -> Option<u64> {
        match self.threshold.load(Relaxed) {
            NO_THRESHOLD => None,
            threshold => Some(
                self.bounds
                    .sanitize(threshold.max(self.min_backup_delay_nanos)),
            ),
        }
    }

    fn is_backup_request_allowed(&self) -> bool {
        self.tokens
            .fetch_update(AcqRel, Acquire, |tokens| tokens.checked_sub(TOKEN))
            .is_ok()
    }

    fn record_completion(&self, response_time_nanos: u64) {
        let value = self.bounds.sanitize(response_time_nanos);
        let index = self.recorded.fetch_add(1, SeqCst);
        self.history[(index % self.history.len() as u64) as usize].store(value, Relaxed);

        self.refill_tokens();

        let recorded = index + 1;
        if recorded == self.required_history_length
            || (recorded > self.required_history_length && recorded % REFRESH_PERIOD == 0)
        {
            self.refresh_threshold(recorded);
        }
    }
}
