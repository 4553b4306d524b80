//! Discrete-event simulation of backup requests.
//!
//! [`BackupRequestsSimulator`] drives a [`BackupRequestsStrategy`] with
//! synthetic traffic and records latencies with and without the effect of
//! backup requests. It is single threaded and, given seeded generators,
//! deterministic, which makes it suitable for calibrating a strategy and for
//! testing it.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//! use backup_requests::{
//!     simulator::{BackupRequestsSimulator, GaussianResponseTimeDistribution, PoissonEventsArrival},
//!     BoundedCostBackupRequestsStrategy,
//! };
//!
//! let arrival = PoissonEventsArrival::new(200.0, 1)?;
//! let distribution = GaussianResponseTimeDistribution::new(
//!     Duration::from_millis(100),
//!     Duration::from_millis(50),
//!     Duration::from_millis(20),
//!     Duration::from_secs(10),
//!     2,
//! )?;
//! let strategy = BoundedCostBackupRequestsStrategy::new(5.0, 64, 1024, 128, 0)?;
//!
//! let mut simulator = BackupRequestsSimulator::new(arrival, distribution, strategy);
//! simulator.simulate(10_000);
//!
//! assert!(simulator.number_of_backup_requests_made() > 0);
//! # Ok::<(), backup_requests::Error>(())
//! ```

mod arrival;
mod distribution;
mod request;

use std::{collections::BTreeMap, sync::Arc};

pub use arrival::{ConstantEventsArrival, EventsArrival, PoissonEventsArrival, UniformEventsArrival};
pub use distribution::{
    ConstantResponseTimeDistribution, GaussianResponseTimeDistribution,
    HiccupResponseTimeDistribution, ResponseTimeDistribution,
};
pub use request::{RequestKind, RequestState, SimulatedRequest};

use crate::{BackupRequestsStrategy, LatencyHistogram};

/// Runs a strategy against synthetic traffic.
pub struct BackupRequestsSimulator<A, D, S> {
    arrival: A,
    distribution: D,
    strategy: S,
    // Event time to the requests due at that time.
    pending: BTreeMap<u64, Vec<SimulatedRequest>>,
    backup_requests_made: u64,
    without_backup: LatencyHistogram,
    with_backup: LatencyHistogram,
}

impl<A, D, S> BackupRequestsSimulator<A, D, S>
where
    A: EventsArrival,
    D: ResponseTimeDistribution,
    S: BackupRequestsStrategy,
{
    /// Creates a simulator.
    pub fn new(arrival: A, distribution: D, strategy: S) -> Self {
        Self {
            arrival,
            distribution,
            strategy,
            pending: BTreeMap::new(),
            backup_requests_made: 0,
            without_backup: LatencyHistogram::default(),
            with_backup: LatencyHistogram::default(),
        }
    }

    /// Simulates `requests` original requests and every backup they cause,
    /// then waits for all of them to complete.
    ///
    /// Results accumulate across calls.
    pub fn simulate(&mut self, requests: usize) {
        let mut now = 0u64;
        for _ in 0..requests {
            // Times saturate rather than wrap on absurdly long runs.
            now = now.saturating_add(self.arrival.nanos_to_next_event());
            let end = now.saturating_add(self.distribution.response_time_nanos());
            self.schedule(now, SimulatedRequest::original(now, end));
            self.process_until(now);
        }
        self.process_until(u64::MAX);
    }

    /// Returns the number of backup requests admitted by the strategy.
    pub fn number_of_backup_requests_made(&self) -> u64 {
        self.backup_requests_made
    }

    /// Latencies of original requests, as if there were no backups.
    pub fn response_times_without_backup(&self) -> &LatencyHistogram {
        &self.without_backup
    }

    /// Latencies experienced by callers when backups are used.
    pub fn response_times_with_backup(&self) -> &LatencyHistogram {
        &self.with_backup
    }

    /// Returns the simulated strategy.
    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    /// Returns the arrival process.
    pub fn arrival_mut(&mut self) -> &mut A {
        &mut self.arrival
    }

    /// Returns the response time distribution.
    pub fn distribution_mut(&mut self) -> &mut D {
        &mut self.distribution
    }

    fn schedule(&mut self, time: u64, request: SimulatedRequest) {
        self.pending.entry(time).or_default().push(request);
    }

    fn process_until(&mut self, time: u64) {
        while let Some(entry) = self.pending.first_entry() {
            if *entry.key() > time {
                break;
            }
            // Requests due at the same time are independent of each other.
            for request in entry.remove() {
                match request.state() {
                    RequestState::Scheduled => self.start(request),
                    RequestState::Started => self.complete(request),
                }
            }
        }
    }

    fn start(&mut self, request: SimulatedRequest) {
        let started = request.started();
        if started.is_backup() {
            // A denied backup is dropped, never retried.
            if self.strategy.is_backup_request_allowed() {
                self.backup_requests_made += 1;
                self.schedule(started.end_nanos(), started);
            }
            return;
        }

        let started = match self.strategy.time_until_backup_request_nanos() {
            Some(delay) if started.duration_nanos() > delay => {
                let backup_start = started.start_nanos().saturating_add(delay);
                let backup_end =
                    backup_start.saturating_add(self.distribution.response_time_nanos());
                // Decided on predicted completions, whether or not the
                // backup is admitted later on.
                let overridden = backup_end < started.end_nanos();
                let original = started.overridden_by_backup(overridden);
                let shared = Arc::new(original.clone());
                self.schedule(
                    backup_start,
                    SimulatedRequest::backup(shared, backup_start, backup_end),
                );
                original
            }
            _ => started,
        };
        self.schedule(started.end_nanos(), started);
    }

    fn complete(&mut self, request: SimulatedRequest) {
        let response_time = request.duration_nanos();
        match request.kind() {
            RequestKind::Original {
                overridden_by_backup,
            } => {
                self.without_backup.record(response_time);
                if !overridden_by_backup {
                    self.with_backup.record(response_time);
                }
            }
            RequestKind::Backup { original } => {
                if original.is_overridden_by_backup() {
                    self.with_backup
                        .record(request.end_nanos() - original.start_nanos());
                }
            }
        }
        self.strategy.record_completion(response_time);
    }
}
