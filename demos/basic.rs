use std::{
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};

use backup_requests::{
    BackupRequests, BackupRequestsStrategy, BoundedCostBackupRequestsStrategy,
    TrackingBackupRequestsStrategy,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let strategy = BoundedCostBackupRequestsStrategy::new(5.0, 64, 1024, 128, 0)?;
    let backup_requests = BackupRequests::new(
        "demo",
        "get",
        Arc::new(TrackingBackupRequestsStrategy::new(strategy)),
    );

    // No history yet: requests are never backed up.
    let fast_request = || async { "ok" };
    let (result, rem) = backup_requests.send(fast_request).await;
    assert!(rem.is_none());
    assert_eq!(result, "ok");

    // Warm up with 1ms requests, enough for the strategy to compute a
    // delay and to accumulate tokens.
    for _ in 0..200 {
        backup_requests.strategy().record_completion(1_000_000);
    }
    assert!(backup_requests
        .strategy()
        .time_until_backup_request_nanos()
        .is_some());

    let called = Arc::new(AtomicU32::new(0));
    let slow_request = {
        || {
            called.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(Duration::from_millis(500)).await;
                "ok"
            }
        }
    };

    let (_, rem) = backup_requests.send(slow_request).await;

    // a backup request was performed.
    assert!(rem.is_some());
    assert_eq!(called.load(Ordering::SeqCst), 2);

    // Wait for completion in a new task if the request is not cancel-safe.
    // For example a connection might need to be returned to a pool for reuse.
    if let Some(rem) = rem {
        tokio::spawn(rem);
    }

    println!("{:?}", backup_requests.strategy().stats());
    Ok(())
}
