use crate::{Error, Result};

/// Default lower latency bound: one microsecond.
pub const DEFAULT_LOW_NANOS: u64 = 1_000;

/// Default upper latency bound: one hundred seconds.
pub const DEFAULT_HIGH_NANOS: u64 = 100_000_000_000;

/// Grouping power shared by every histogram built from bounds, giving a
/// relative bucket error below 1%.
pub(crate) const GROUPING_POWER: u8 = 7;

/// The range every latency is clipped to before it is stored or returned.
///
/// Bounds are passed to each strategy and metric explicitly so that
/// differently configured instances can coexist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencyBounds {
    low: u64,
    high: u64,
}

impl Default for LatencyBounds {
    fn default() -> Self {
        Self {
            low: DEFAULT_LOW_NANOS,
            high: DEFAULT_HIGH_NANOS,
        }
    }
}

impl LatencyBounds {
    /// Creates bounds clipping latencies to `[low, high]` nanoseconds.
    ///
    /// Fails unless `0 < low < high`.
    pub fn new(low: u64, high: u64) -> Result<Self> {
        if low == 0 || low >= high {
            return Err(Error::InvalidBounds { low, high });
        }
        Ok(Self { low, high })
    }

    /// Returns the lower bound in nanoseconds.
    pub fn low(&self) -> u64 {
        self.low
    }

    /// Returns the upper bound in nanoseconds.
    pub fn high(&self) -> u64 {
        self.high
    }

    /// Clamps `nanos` to `[low, high]`.
    #[inline]
    pub fn sanitize(&self, nanos: u64) -> u64 {
        nanos.clamp(self.low, self.high)
    }

    /// Smallest histogram max value power able to hold `high`.
    pub(crate) fn max_value_power(&self) -> u8 {
        let bits = (u64::BITS - self.high.leading_zeros()) as u8;
        bits.max(GROUPING_POWER + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_clamps() {
        let bounds = LatencyBounds::new(10, 1_000).unwrap();
        assert_eq!(10, bounds.sanitize(0));
        assert_eq!(500, bounds.sanitize(500));
        assert_eq!(1_000, bounds.sanitize(u64::MAX));
    }

    #[test]
    fn test_invalid_bounds() {
        assert!(LatencyBounds::new(0, 10).is_err());
        assert!(LatencyBounds::new(10, 10).is_err());
        assert!(LatencyBounds::new(11, 10).is_err());
    }

    #[test]
    fn test_max_value_power_holds_high() {
        let bounds = LatencyBounds::default();
        let power = bounds.max_value_power();
        assert!(bounds.high() < 1u64 << power);
        assert_eq!(8, LatencyBounds::new(1, 2).unwrap().max_value_power());
    }
}
