mod bounded_cost;
mod from_config;
mod tracking;

use std::sync::Arc;

pub use bounded_cost::{BoundedCostBackupRequestsStrategy, MIN_HISTORY_LENGTH};
pub use from_config::BackupRequestsStrategyFromConfig;
pub use tracking::TrackingBackupRequestsStrategy;

/// Decides whether and when a backup request should be sent.
///
/// A client calls [`record_completion`](Self::record_completion) after every
/// completed original or backup request, asks
/// [`time_until_backup_request_nanos`](Self::time_until_backup_request_nanos)
/// when it issues the original, and calls
/// [`is_backup_request_allowed`](Self::is_backup_request_allowed) right before
/// actually dispatching the backup.
///
/// Implementations are shared between request-issuing threads and must not
/// block.
pub trait BackupRequestsStrategy: Send + Sync {
    /// Returns the delay, relative to the start of the original request,
    /// after which a backup is worth sending. `None` means no backup should
    /// be sent, typically because not enough latencies were observed yet.
    fn time_until_backup_request_nanos(&self) -> Option<u64>;

    /// Returns `true` if a backup request may be dispatched right now. A
    /// `true` answer is a commitment: the caller is expected to send it.
    fn is_backup_request_allowed(&self) -> bool;

    /// Feeds the latency of a completed request back into the strategy.
    fn record_completion(&self, response_time_nanos: u64);
}

impl<S: BackupRequestsStrategy + ?Sized> BackupRequestsStrategy for Arc<S> {
    fn time_until_backup_request_nanos(&self) -> Option<u64> {
        (**self).time_until_backup_request_nanos()
    }

    fn is_backup_request_allowed(&self) -> bool {
        (**self).is_backup_request_allowed()
    }

    fn record_completion(&self, response_time_nanos: u64) {
        (**self).record_completion(response_time_nanos)
    }
}

impl<S: BackupRequestsStrategy + ?Sized> BackupRequestsStrategy for Box<S> {
    fn time_until_backup_request_nanos(&self) -> Option<u64> {
        (**self).time_until_backup_request_nanos()
    }

    fn is_backup_request_allowed(&self) -> bool {
        (**self).is_backup_request_allowed()
    }

    fn record_completion(&self, response_time_nanos: u64) {
        (**self).record_completion(response_time_nanos)
    }
}
