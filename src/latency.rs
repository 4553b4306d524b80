use histogram::{Histogram, Snapshot};

use crate::{bounds::GROUPING_POWER, LatencyBounds, Result};

/// A latency distribution recorded in nanoseconds.
///
/// Values are clipped to the configured [`LatencyBounds`] before they are
/// recorded. Instances handed out by [`LatencyMetric`](crate::LatencyMetric)
/// are owned snapshots: nothing else writes to them once harvested.
pub struct LatencyHistogram {
    histogram: Histogram,
    bounds: LatencyBounds,
    count: u64,
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new(LatencyBounds::default()).expect("histogram")
    }
}

impl std::fmt::Debug for LatencyHistogram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LatencyHistogram")
            .field("bounds", &self.bounds)
            .field("count", &self.count)
            .field("p50", &self.percentile(50.0))
            .field("p99", &self.percentile(99.0))
            .finish()
    }
}

impl LatencyHistogram {
    /// Creates an empty histogram for latencies within `bounds`.
    pub fn new(bounds: LatencyBounds) -> Result<Self> {
        Ok(Self {
            histogram: Histogram::new(GROUPING_POWER, bounds.max_value_power())?,
            bounds,
            count: 0,
        })
    }

    /// Rebuilds a histogram from a snapshot of a buffer configured with the
    /// same bounds.
    pub(crate) fn from_snapshot(snapshot: &Snapshot, bounds: LatencyBounds) -> Result<Self> {
        let mut latencies = Self::new(bounds)?;
        for bucket in snapshot.into_iter().filter(|bucket| bucket.count() > 0) {
            latencies.histogram.add(bucket.start(), bucket.count())?;
            latencies.count += bucket.count();
        }
        Ok(latencies)
    }

    /// Forgets every recorded latency, keeping the allocation.
    pub(crate) fn clear(&mut self) {
        self.histogram.as_mut_slice().fill(0);
        self.count = 0;
    }

    /// Records a single latency.
    pub fn record(&mut self, nanos: u64) {
        let value = self.bounds.sanitize(nanos);
        // Sanitized values always fit the histogram range.
        if self.histogram.increment(value).is_ok() {
            self.count += 1;
        }
    }

    /// Returns the number of recorded latencies.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Returns `true` if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Returns the bounds latencies were clipped to.
    pub fn bounds(&self) -> LatencyBounds {
        self.bounds
    }

    /// Returns the upper edge of the bucket holding the given percentile,
    /// expressed in the `[0.0, 100.0]` range, or `None` when empty.
    pub fn percentile(&self, percentile: f64) -> Option<u64> {
        if self.count == 0 {
            return None;
        }
        self.histogram
            .percentile(percentile)
            .ok()
            .map(|bucket| self.bounds.sanitize(bucket.end()))
    }

    /// Returns the underlying histogram.
    pub fn histogram(&self) -> &Histogram {
        &self.histogram
    }
}
