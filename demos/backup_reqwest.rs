use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use backup_requests::{
    BackupRequests, BackupRequestsStrategy, BoundedCostBackupRequestsStrategy,
    TrackingBackupRequestsStrategy,
};
use rand::Rng;
use reqwest::Client;

/// Answers in half a millisecond, except for an occasional hiccup of a few
/// hundred milliseconds.
#[poem::handler]
async fn handle() -> String {
    let hiccup = {
        let mut rng = rand::thread_rng();
        rng.gen_bool(0.08)
            .then(|| Duration::from_millis(rng.gen_range(200..600)))
    };
    let wait = match hiccup {
        Some(wait) => {
            tracing::info!(?wait, "hiccup");
            wait
        }
        None => Duration::from_micros(500),
    };

    tokio::time::sleep(wait).await;
    "OK".into()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "backup_reqwest,backup_requests=trace,reqwest=debug")
    }

    tracing_subscriber::fmt::init();

    let listener = poem::listener::TcpListener::bind("127.0.0.1:9322");
    let server = poem::Server::new(listener).run(handle);
    tokio::spawn(server);

    // 10% extra load at most, the server is slow about 9% of the time.
    let strategy = BoundedCostBackupRequestsStrategy::new(10.0, 16, 256, 100, 1_000_000)?;
    let backup_requests = BackupRequests::new(
        "demo",
        "get",
        Arc::new(TrackingBackupRequestsStrategy::new(strategy)),
    );
    let client = Client::builder()
        .pool_max_idle_per_host(2)
        .http1_only() // so we can see connections being dialed and/or reused
        .build()?;

    let make_request = move || {
        tracing::trace!("make request");
        client.get("http://127.0.0.1:9322/").send()
    };

    for i in 0..1000 {
        let start = Instant::now();
        let (res, rem) = backup_requests.send(&make_request).await;
        res?;
        tracing::debug!(
            "[{i}] latency = {:?}, backup delay = {:?}",
            start.elapsed(),
            backup_requests
                .strategy()
                .delegate()
                .time_until_backup_request_nanos()
                .map(Duration::from_nanos)
        );
        if let Some(rem) = rem {
            tracing::info!(backup_won = rem.is_original(), "a backup request was made");
            // return the connection to the pool
            tokio::spawn(rem);
        }
    }

    tracing::info!(stats = ?backup_requests.strategy().stats(), "done");
    Ok(())
}
