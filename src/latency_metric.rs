//! A non-blocking, double-buffered latency histogram.
//!
//! Writers record into the current buffer. A harvest installs a fresh buffer
//! with a single atomic exchange and hands the retired one to the caller, so
//! a slow consumer never holds up writers.
//!
//! A sample recorded while a swap is in progress lands either in the retiring
//! buffer or in the fresh one. It is counted exactly once, but it may be
//! reported one harvest later than the wall clock would suggest. This is an
//! accepted approximation for a statistical metric.

use std::sync::{
    atomic::{AtomicU64, Ordering::*},
    Arc,
};

use arc_swap::ArcSwap;
use histogram::AtomicHistogram;

use crate::{bounds::GROUPING_POWER, Error, LatencyBounds, LatencyHistogram, Result};

/// Default number of samples a single buffer accepts before it is rotated,
/// the ceiling of a 16-bit counter.
pub const DEFAULT_MAX_SAMPLES: u64 = i16::MAX as u64;

struct Buffer {
    histogram: AtomicHistogram,
    recorded: AtomicU64,
    capacity: u64,
}

impl Buffer {
    fn new(bounds: &LatencyBounds, capacity: u64) -> Result<Self> {
        Ok(Self {
            histogram: AtomicHistogram::new(GROUPING_POWER, bounds.max_value_power())?,
            recorded: AtomicU64::new(0),
            capacity,
        })
    }

    /// Records `value` unless the buffer is full.
    fn try_record(&self, value: u64) -> bool {
        let reserved = self
            .recorded
            .fetch_update(AcqRel, Acquire, |n| (n < self.capacity).then_some(n + 1))
            .is_ok();
        if reserved {
            let res = self.histogram.increment(value);
            debug_assert!(res.is_ok(), "sanitized latency out of histogram range");
        }
        reserved
    }
}

/// A latency histogram that can be harvested while it is being written to.
///
/// # Examples
///
/// ```
/// use backup_requests::LatencyMetric;
///
/// let metric = LatencyMetric::default();
/// metric.record(5_000_000, |_overflow| {})?;
///
/// let mut count = 0;
/// metric.harvest(|snapshot| count = snapshot.count())?;
/// assert_eq!(1, count);
/// # Ok::<(), backup_requests::Error>(())
/// ```
pub struct LatencyMetric {
    current: ArcSwap<Buffer>,
    bounds: LatencyBounds,
    capacity: u64,
}

impl Default for LatencyMetric {
    fn default() -> Self {
        Self::new(LatencyBounds::default(), DEFAULT_MAX_SAMPLES).expect("histogram")
    }
}

impl LatencyMetric {
    /// Creates a metric clipping latencies to `bounds`, rotating buffers
    /// after `capacity` samples.
    pub fn new(bounds: LatencyBounds, capacity: u64) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::InvalidCapacity);
        }
        Ok(Self {
            current: ArcSwap::from_pointee(Buffer::new(&bounds, capacity)?),
            bounds,
            capacity,
        })
    }

    /// Returns the bounds latencies are clipped to.
    pub fn bounds(&self) -> LatencyBounds {
        self.bounds
    }

    /// Records a latency in nanoseconds.
    ///
    /// Never blocks. If the current buffer is full it is retired and passed
    /// to `on_overflow`, and the sample is recorded in the fresh buffer. Under
    /// heavy contention a single call may retire, and report, more than one
    /// buffer.
    pub fn record<F>(&self, nanos: u64, mut on_overflow: F) -> Result<()>
    where
        F: FnMut(LatencyHistogram),
    {
        let value = self.bounds.sanitize(nanos);
        loop {
            let buffer = self.current.load_full();
            if buffer.try_record(value) {
                return Ok(());
            }
            // Only the writer that wins the exchange reports the full buffer,
            // the others retry against the buffer it installed.
            if let Some(retired) = self.retire(buffer)? {
                tracing::debug!(count = retired.count(), "latency buffer full, rotated");
                on_overflow(retired);
            }
        }
    }

    /// Swaps the current buffer for an empty one and passes the retired
    /// buffer to `on_result`.
    ///
    /// Writers are never blocked by `on_result`, however long it runs.
    pub fn harvest<F>(&self, on_result: F) -> Result<()>
    where
        F: FnOnce(LatencyHistogram),
    {
        loop {
            let buffer = self.current.load_full();
            if let Some(retired) = self.retire(buffer)? {
                on_result(retired);
                return Ok(());
            }
        }
    }

    /// Replaces `expected` with a fresh buffer. Returns its contents once
    /// writers still holding it are done, or `None` if another thread
    /// replaced it first.
    fn retire(&self, expected: Arc<Buffer>) -> Result<Option<LatencyHistogram>> {
        let fresh = Arc::new(Buffer::new(&self.bounds, self.capacity)?);
        let previous = self.current.compare_and_swap(&expected, fresh);
        if !Arc::ptr_eq(&*previous, &expected) {
            return Ok(None);
        }
        drop(previous);

        // The exchange is done, so new samples go to the fresh buffer. Wait
        // for writers that loaded the retired buffer before the exchange.
        let mut retired = expected;
        let buffer = loop {
            match Arc::try_unwrap(retired) {
                Ok(buffer) => break buffer,
                Err(shared) => {
                    retired = shared;
                    std::thread::yield_now();
                }
            }
        };

        let snapshot = buffer.histogram.snapshot();
        let latencies = LatencyHistogram::from_snapshot(&snapshot, self.bounds)?;
        debug_assert_eq!(buffer.recorded.load(Acquire), latencies.count());
        Ok(Some(latencies))
    }
}
