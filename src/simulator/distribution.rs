use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

use crate::{Error, Result};

/// Generator of response times.
pub trait ResponseTimeDistribution {
    /// Returns the next response time, in nanoseconds.
    fn response_time_nanos(&mut self) -> u64;

    /// Rewinds the generator to its first sample.
    fn restart(&mut self);
}

fn nanos(duration: Duration) -> u64 {
    duration.as_nanos().try_into().unwrap_or(u64::MAX)
}

/// Normally distributed response times, clamped to `[min, max]`.
#[derive(Debug, Clone)]
pub struct GaussianResponseTimeDistribution {
    normal: Normal<f64>,
    min: u64,
    max: u64,
    seed: u64,
    rng: ChaCha8Rng,
}

impl GaussianResponseTimeDistribution {
    /// Creates the distribution.
    pub fn new(
        mean: Duration,
        std_dev: Duration,
        min: Duration,
        max: Duration,
        seed: u64,
    ) -> Result<Self> {
        if min > max {
            return Err(Error::InvalidDistribution {
                reason: format!("min {min:?} is greater than max {max:?}"),
            });
        }
        let normal = Normal::new(nanos(mean) as f64, nanos(std_dev) as f64).map_err(|err| {
            Error::InvalidDistribution {
                reason: err.to_string(),
            }
        })?;
        Ok(Self {
            normal,
            min: nanos(min),
            max: nanos(max),
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
        })
    }
}

impl ResponseTimeDistribution for GaussianResponseTimeDistribution {
    fn response_time_nanos(&mut self) -> u64 {
        let sample = self.normal.sample(&mut self.rng).round();
        // Negative samples saturate to 0 before clamping.
        (sample as u64).clamp(self.min, self.max)
    }

    fn restart(&mut self) {
        self.rng = ChaCha8Rng::seed_from_u64(self.seed);
    }
}

/// The same response time, every time.
#[derive(Debug, Clone, Copy)]
pub struct ConstantResponseTimeDistribution {
    nanos: u64,
}

impl ConstantResponseTimeDistribution {
    /// Creates the distribution.
    pub fn new(response_time: Duration) -> Self {
        Self {
            nanos: nanos(response_time),
        }
    }
}

impl ResponseTimeDistribution for ConstantResponseTimeDistribution {
    fn response_time_nanos(&mut self) -> u64 {
        self.nanos
    }

    fn restart(&mut self) {}
}

/// A baseline distribution occasionally replaced by a much slower one, to
/// model rare hiccups such as GC pauses.
#[derive(Debug, Clone)]
pub struct HiccupResponseTimeDistribution<B, H> {
    baseline: B,
    hiccup: H,
    probability: f64,
    seed: u64,
    rng: ChaCha8Rng,
}

impl<B, H> HiccupResponseTimeDistribution<B, H>
where
    B: ResponseTimeDistribution,
    H: ResponseTimeDistribution,
{
    /// Samples `hiccup` with the given probability and `baseline` otherwise.
    pub fn new(baseline: B, hiccup: H, probability: f64, seed: u64) -> Result<Self> {
        if !(0.0..=1.0).contains(&probability) {
            return Err(Error::InvalidDistribution {
                reason: format!("hiccup probability must be in [0, 1], was {probability}"),
            });
        }
        Ok(Self {
            baseline,
            hiccup,
            probability,
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
        })
    }
}

impl<B, H> ResponseTimeDistribution for HiccupResponseTimeDistribution<B, H>
where
    B: ResponseTimeDistribution,
    H: ResponseTimeDistribution,
{
    fn response_time_nanos(&mut self) -> u64 {
        if self.rng.gen_bool(self.probability) {
            self.hiccup.response_time_nanos()
        } else {
            self.baseline.response_time_nanos()
        }
    }

    fn restart(&mut self) {
        self.rng = ChaCha8Rng::seed_from_u64(self.seed);
        self.baseline.restart();
        self.hiccup.restart();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: u64 = 1_000_000;

    #[test]
    fn test_gaussian_clamped() {
        let mut distribution = GaussianResponseTimeDistribution::new(
            Duration::from_millis(100),
            Duration::from_millis(50),
            Duration::from_millis(20),
            Duration::from_millis(150),
            1,
        )
        .unwrap();
        let samples: Vec<_> = (0..10_000).map(|_| distribution.response_time_nanos()).collect();
        assert!(samples.iter().all(|s| (20 * MS..=150 * MS).contains(s)));
        assert!(samples.contains(&(20 * MS)));
        assert!(samples.contains(&(150 * MS)));
    }

    #[test]
    fn test_hiccup_frequency() {
        let mut distribution = HiccupResponseTimeDistribution::new(
            ConstantResponseTimeDistribution::new(Duration::from_millis(1)),
            ConstantResponseTimeDistribution::new(Duration::from_secs(1)),
            0.02,
            5,
        )
        .unwrap();
        let hiccups = (0..100_000)
            .filter(|_| distribution.response_time_nanos() == 1_000 * MS)
            .count();
        assert!((1_500..2_500).contains(&hiccups), "hiccups = {hiccups}");
    }

    #[test]
    fn test_restart_replays() {
        let gaussian = GaussianResponseTimeDistribution::new(
            Duration::from_millis(10),
            Duration::from_millis(2),
            Duration::from_millis(1),
            Duration::from_millis(100),
            9,
        )
        .unwrap();
        let mut distribution = HiccupResponseTimeDistribution::new(
            gaussian.clone(),
            ConstantResponseTimeDistribution::new(Duration::from_secs(1)),
            0.1,
            11,
        )
        .unwrap();
        let first: Vec<_> = (0..100).map(|_| distribution.response_time_nanos()).collect();
        distribution.restart();
        let second: Vec<_> = (0..100).map(|_| distribution.response_time_nanos()).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_invalid_parameters() {
        let ms = Duration::from_millis;
        assert!(GaussianResponseTimeDistribution::new(ms(10), ms(1), ms(20), ms(5), 1).is_err());
        assert!(HiccupResponseTimeDistribution::new(
            ConstantResponseTimeDistribution::new(ms(1)),
            ConstantResponseTimeDistribution::new(ms(2)),
            1.5,
            1,
        )
        .is_err());
    }
}
