use std::time::Duration;

use backup_requests::{
    simulator::{
        BackupRequestsSimulator, ConstantEventsArrival, ConstantResponseTimeDistribution,
        EventsArrival, GaussianResponseTimeDistribution, HiccupResponseTimeDistribution,
        PoissonEventsArrival, ResponseTimeDistribution,
    },
    BackupRequestsStrategy, BoundedCostBackupRequestsStrategy, DEFAULT_HIGH_NANOS,
};

const REQUESTS: usize = 100_000;

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

fn strategy(percent: f64, min_backup_delay: Duration) -> BoundedCostBackupRequestsStrategy {
    BoundedCostBackupRequestsStrategy::new(
        percent,
        64,
        1024,
        128,
        min_backup_delay.as_nanos() as i64,
    )
    .unwrap()
}

fn simulate<A, D>(
    arrival: A,
    distribution: D,
    strategy: BoundedCostBackupRequestsStrategy,
) -> BackupRequestsSimulator<A, D, BoundedCostBackupRequestsStrategy>
where
    A: EventsArrival,
    D: ResponseTimeDistribution,
{
    let mut simulator = BackupRequestsSimulator::new(arrival, distribution, strategy);
    simulator.simulate(REQUESTS);
    simulator
}

fn backup_rate<A, D, S>(simulator: &BackupRequestsSimulator<A, D, S>) -> f64
where
    A: EventsArrival,
    D: ResponseTimeDistribution,
    S: BackupRequestsStrategy,
{
    simulator.number_of_backup_requests_made() as f64 * 100.0 / REQUESTS as f64
}

#[test]
fn test_backup_rate_converges_to_cost() {
    for percent in [1.0, 2.0, 3.0, 4.0, 5.0] {
        let simulator = simulate(
            PoissonEventsArrival::new(200.0, 7).unwrap(),
            GaussianResponseTimeDistribution::new(ms(100), ms(50), ms(20), ms(10_000), 11)
                .unwrap(),
            strategy(percent, Duration::ZERO),
        );

        let rate = backup_rate(&simulator);
        let error = (rate - percent).abs() / percent;
        assert!(
            error < 0.5,
            "percent = {percent}, backup rate = {rate}%, relative error = {error}"
        );
        assert_eq!(
            REQUESTS as u64,
            simulator.response_times_without_backup().count()
        );
    }
}

#[test]
fn test_min_backup_delay_above_every_response_time() {
    let simulator = simulate(
        PoissonEventsArrival::new(200.0, 7).unwrap(),
        GaussianResponseTimeDistribution::new(ms(50), ms(10), ms(10), ms(100), 11).unwrap(),
        strategy(5.0, ms(100)),
    );

    assert_eq!(0, simulator.number_of_backup_requests_made());
    assert_eq!(
        simulator.response_times_without_backup().count(),
        simulator.response_times_with_backup().count()
    );
}

#[test]
fn test_backups_cut_the_tail() {
    let baseline = GaussianResponseTimeDistribution::new(ms(5), ms(1), ms(1), ms(20), 11).unwrap();
    let hiccup =
        GaussianResponseTimeDistribution::new(ms(1000), ms(100), ms(500), ms(2000), 13).unwrap();
    let simulator = simulate(
        PoissonEventsArrival::new(200.0, 7).unwrap(),
        HiccupResponseTimeDistribution::new(baseline, hiccup, 0.02, 17).unwrap(),
        strategy(5.0, Duration::ZERO),
    );

    let without_backup = simulator.response_times_without_backup().percentile(99.0).unwrap();
    let with_backup = simulator.response_times_with_backup().percentile(99.0).unwrap();
    assert!(
        with_backup * 10 <= without_backup,
        "p99 with backup = {with_backup}, without backup = {without_backup}"
    );
    assert!(backup_rate(&simulator) <= 5.0 * 1.5);
}

#[test]
fn test_response_times_above_high_saturate() {
    let simulator = simulate(
        PoissonEventsArrival::new(200.0, 7).unwrap(),
        ConstantResponseTimeDistribution::new(Duration::from_nanos(DEFAULT_HIGH_NANOS) + ms(1000)),
        strategy(5.0, Duration::ZERO),
    );

    let delay = simulator
        .strategy()
        .time_until_backup_request_nanos()
        .unwrap();
    assert!(delay >= DEFAULT_HIGH_NANOS, "delay = {delay}");
    let rate = backup_rate(&simulator);
    assert!(rate <= 5.0 * 1.5, "backup rate = {rate}%");
}

#[test]
fn test_same_seed_same_outcome() {
    let run = || {
        simulate(
            PoissonEventsArrival::new(200.0, 3).unwrap(),
            GaussianResponseTimeDistribution::new(ms(100), ms(50), ms(20), ms(10_000), 5)
                .unwrap(),
            strategy(3.0, Duration::ZERO),
        )
    };
    let first = run();
    let second = run();

    assert_eq!(
        first.number_of_backup_requests_made(),
        second.number_of_backup_requests_made()
    );
    for (a, b) in [
        (
            first.response_times_without_backup(),
            second.response_times_without_backup(),
        ),
        (
            first.response_times_with_backup(),
            second.response_times_with_backup(),
        ),
    ] {
        assert_eq!(a.count(), b.count());
        for p in [1.0, 10.0, 50.0, 90.0, 99.0, 99.9, 100.0] {
            assert_eq!(a.percentile(p), b.percentile(p));
        }
    }
}

#[test]
fn test_restart_replays_the_same_traffic() {
    let mut simulator = BackupRequestsSimulator::new(
        ConstantEventsArrival::new(ms(5)),
        GaussianResponseTimeDistribution::new(ms(100), ms(50), ms(20), ms(10_000), 5).unwrap(),
        strategy(5.0, Duration::ZERO),
    );
    let first: Vec<_> = (0..100)
        .map(|_| simulator.distribution_mut().response_time_nanos())
        .collect();
    simulator.distribution_mut().restart();
    simulator.arrival_mut().restart();
    let second: Vec<_> = (0..100)
        .map(|_| simulator.distribution_mut().response_time_nanos())
        .collect();
    assert_eq!(first, second);
}
