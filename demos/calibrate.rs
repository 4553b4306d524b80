//! Simulates a few costs against the same traffic and prints how much each
//! one improves tail latency.
//!
//! ```text
//! cargo run --example calibrate -- 200000
//! ```

use std::time::Duration;

use backup_requests::{
    simulator::{
        BackupRequestsSimulator, GaussianResponseTimeDistribution, HiccupResponseTimeDistribution,
        PoissonEventsArrival,
    },
    BoundedCostBackupRequestsStrategy, LatencyHistogram,
};
use tracing_subscriber::EnvFilter;

const COSTS: [f64; 5] = [1.0, 2.0, 5.0, 10.0, 20.0];
const PERCENTILES: [f64; 4] = [50.0, 90.0, 99.0, 99.9];

fn report(name: &str, latencies: &LatencyHistogram) -> String {
    let mut line = format!("{name:>16}");
    for p in PERCENTILES {
        let value = latencies.percentile(p).map(Duration::from_nanos);
        line.push_str(&format!(" p{p}={value:?}"));
    }
    line
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let requests: usize = match std::env::args().nth(1) {
        Some(requests) => requests.parse()?,
        None => 100_000,
    };

    // Mostly ~10ms responses with 1% multi-second hiccups.
    let ms = Duration::from_millis;
    let baseline = GaussianResponseTimeDistribution::new(ms(10), ms(3), ms(1), ms(100), 1)?;
    let hiccup = GaussianResponseTimeDistribution::new(ms(1000), ms(200), ms(300), ms(5000), 2)?;

    for cost in COSTS {
        let arrival = PoissonEventsArrival::new(500.0, 3)?;
        let distribution =
            HiccupResponseTimeDistribution::new(baseline.clone(), hiccup.clone(), 0.01, 4)?;
        let strategy = BoundedCostBackupRequestsStrategy::new(cost, 64, 1024, 128, 0)?;

        let mut simulator = BackupRequestsSimulator::new(arrival, distribution, strategy);
        simulator.simulate(requests);

        let backups = simulator.number_of_backup_requests_made();
        println!(
            "cost {cost}%: {backups} backup requests ({:.2}%)",
            backups as f64 * 100.0 / requests as f64
        );
        println!("{}", report("without backup", simulator.response_times_without_backup()));
        println!("{}", report("with backup", simulator.response_times_with_backup()));
    }

    Ok(())
}
