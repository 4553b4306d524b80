use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Exp};

use crate::{Error, Result};

/// Generator of gaps between consecutive request arrivals.
///
/// The sequence is infinite. [`restart`](Self::restart) rewinds it to its
/// beginning so that a simulation can be replayed.
pub trait EventsArrival {
    /// Returns the time until the next arrival, in nanoseconds.
    fn nanos_to_next_event(&mut self) -> u64;

    /// Rewinds the sequence to its first gap.
    fn restart(&mut self);
}

/// Arrivals of a Poisson process: exponentially distributed gaps.
#[derive(Debug, Clone)]
pub struct PoissonEventsArrival {
    exp: Exp<f64>,
    seed: u64,
    rng: ChaCha8Rng,
}

impl PoissonEventsArrival {
    /// Creates arrivals averaging `events_per_second`.
    pub fn new(events_per_second: f64, seed: u64) -> Result<Self> {
        if !(events_per_second > 0.0 && events_per_second.is_finite()) {
            return Err(Error::InvalidDistribution {
                reason: format!("events per second must be positive, was {events_per_second}"),
            });
        }
        let exp = Exp::new(events_per_second).map_err(|err| Error::InvalidDistribution {
            reason: err.to_string(),
        })?;
        Ok(Self {
            exp,
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
        })
    }
}

impl EventsArrival for PoissonEventsArrival {
    fn nanos_to_next_event(&mut self) -> u64 {
        let seconds = self.exp.sample(&mut self.rng);
        (seconds * 1e9).round() as u64
    }

    fn restart(&mut self) {
        self.rng = ChaCha8Rng::seed_from_u64(self.seed);
    }
}

/// Arrivals at a fixed interval.
#[derive(Debug, Clone, Copy)]
pub struct ConstantEventsArrival {
    gap: u64,
}

impl ConstantEventsArrival {
    /// Creates arrivals every `gap`.
    pub fn new(gap: Duration) -> Self {
        Self {
            gap: gap.as_nanos().try_into().unwrap_or(u64::MAX),
        }
    }
}

impl EventsArrival for ConstantEventsArrival {
    fn nanos_to_next_event(&mut self) -> u64 {
        self.gap
    }

    fn restart(&mut self) {}
}

/// Arrivals with gaps uniformly distributed in `[min, max]`.
#[derive(Debug, Clone)]
pub struct UniformEventsArrival {
    min: u64,
    max: u64,
    seed: u64,
    rng: ChaCha8Rng,
}

impl UniformEventsArrival {
    /// Creates arrivals with gaps between `min` and `max`.
    pub fn new(min: Duration, max: Duration, seed: u64) -> Result<Self> {
        if min > max {
            return Err(Error::InvalidDistribution {
                reason: format!("min gap {min:?} is greater than max gap {max:?}"),
            });
        }
        Ok(Self {
            min: min.as_nanos().try_into().unwrap_or(u64::MAX),
            max: max.as_nanos().try_into().unwrap_or(u64::MAX),
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
        })
    }
}

impl EventsArrival for UniformEventsArrival {
    fn nanos_to_next_event(&mut self) -> u64 {
        self.rng.gen_range(self.min..=self.max)
    }

    fn restart(&mut self) {
        self.rng = ChaCha8Rng::seed_from_u64(self.seed);
    }
}
