use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use tokio::time::{timeout, Instant};

use crate::{
    stats::notify_consumer, BackupRequestsStrategy, BackupRequestsStrategyStatsConsumer,
    BoundedCostBackupRequestsStrategy, TrackingBackupRequestsStrategy,
};

struct Inner<S> {
    service: String,
    operation: String,
    strategy: Arc<TrackingBackupRequestsStrategy<S>>,
    consumer: Option<Arc<dyn BackupRequestsStrategyStatsConsumer>>,
}

impl<S: BackupRequestsStrategy> Inner<S> {
    fn original_completed(&self, start: Instant) {
        let nanos = elapsed_nanos(start);
        self.strategy.record_completion(nanos);
        self.record_latency(nanos, false);
    }

    fn backup_completed(&self, start: Instant) {
        self.strategy.record_completion(elapsed_nanos(start));
    }

    fn record_latency(&self, nanos: u64, with_backup: bool) {
        let metric = if with_backup {
            self.strategy.latency_with_backup()
        } else {
            self.strategy.latency_without_backup()
        };
        let res = metric.record(nanos, |latencies| {
            if let Some(consumer) = &self.consumer {
                notify_consumer(consumer.as_ref(), |consumer| {
                    consumer.latency_update(&self.service, &self.operation, latencies, with_backup)
                });
            }
        });
        if let Err(err) = res {
            tracing::warn!(
                service = %self.service,
                operation = %self.operation,
                with_backup,
                error = %err,
                "failed to record latency"
            );
        }
    }
}

fn elapsed_nanos(start: Instant) -> u64 {
    start.elapsed().as_nanos().try_into().unwrap_or(u64::MAX)
}

/// Performs backup requests for one operation of one service.
///
/// Cloning is cheap and clones share the strategy.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use backup_requests::{
///     BackupRequests, BoundedCostBackupRequestsStrategy, TrackingBackupRequestsStrategy,
/// };
///
/// let strategy = BoundedCostBackupRequestsStrategy::new(5.0, 64, 1024, 128, 0)?;
/// let backup_requests = BackupRequests::new(
///     "profiles",
///     "get",
///     Arc::new(TrackingBackupRequestsStrategy::new(strategy)),
/// );
/// # Ok::<(), backup_requests::Error>(())
/// ```
pub struct BackupRequests<S = BoundedCostBackupRequestsStrategy> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for BackupRequests<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: BackupRequestsStrategy> BackupRequests<S> {
    /// Creates a client of `operation` of `service` driven by `strategy`.
    pub fn new(
        service: impl Into<String>,
        operation: impl Into<String>,
        strategy: Arc<TrackingBackupRequestsStrategy<S>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                service: service.into(),
                operation: operation.into(),
                strategy,
                consumer: None,
            }),
        }
    }

    /// Sends full latency buffers to `consumer` as they fill up.
    pub fn with_stats_consumer(
        self,
        consumer: Arc<dyn BackupRequestsStrategyStatsConsumer>,
    ) -> Self {
        let inner = Inner {
            service: self.inner.service.clone(),
            operation: self.inner.operation.clone(),
            strategy: self.inner.strategy.clone(),
            consumer: Some(consumer),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Returns the strategy.
    pub fn strategy(&self) -> &Arc<TrackingBackupRequestsStrategy<S>> {
        &self.inner.strategy
    }

    /// Executes a request, backed up if it runs slow.
    ///
    /// The closure `f` is called once for the original request. If the
    /// strategy provides a delay and the original has not completed when it
    /// elapses, the strategy is asked for admission and, if granted, `f` is
    /// called again for the backup. The two then race.
    ///
    /// Requires the `tokio` feature.
    ///
    /// # Returns
    ///
    /// A tuple of two elements:
    /// 1. The result `R` of the request that completed first.
    /// 2. The request still in flight when a backup was sent, `None`
    ///    otherwise. The loser may not be cancel-safe, so it is handed back
    ///    rather than dropped. Polling the [`Straggler`] to completion also
    ///    records its latency; dropping it records nothing.
    pub async fn send<F, Fut, R>(&self, mut f: F) -> (R, Option<Straggler<S, Fut>>)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = R>,
    {
        let inner = &self.inner;
        let mut original = Box::pin((f)());
        let original_start = Instant::now();

        let admitted = match inner.strategy.time_until_backup_request_nanos() {
            None => false,
            Some(delay) => {
                if let Ok(res) = timeout(Duration::from_nanos(delay), original.as_mut()).await {
                    return (self.original_won(original_start, res), None);
                }
                inner.strategy.is_backup_request_allowed()
            }
        };
        if !admitted {
            let res = original.await;
            return (self.original_won(original_start, res), None);
        }

        tracing::trace!(
            service = %inner.service,
            operation = %inner.operation,
            "sending backup request"
        );
        let mut backup = Box::pin((f)());
        let backup_start = Instant::now();

        let (original_won, res) = tokio::select! {
            res = original.as_mut() => {
                (true, self.original_won(original_start, res))
            }
            res = backup.as_mut() => {
                inner.backup_completed(backup_start);
                inner.strategy.backup_request_success();
                inner.record_latency(elapsed_nanos(original_start), true);
                (false, res)
            }
        };

        let straggler = if original_won {
            Straggler::new(inner.clone(), backup, backup_start, false)
        } else {
            Straggler::new(inner.clone(), original, original_start, true)
        };
        (res, Some(straggler))
    }

    fn original_won<R>(&self, start: Instant, res: R) -> R {
        self.inner.original_completed(start);
        self.inner.record_latency(elapsed_nanos(start), true);
        res
    }
}

/// The losing request of a [`BackupRequests::send`], still in flight.
///
/// Resolves to the output of the request and records its completion.
pub struct Straggler<S, Fut> {
    inner: Arc<Inner<S>>,
    request: Pin<Box<Fut>>,
    start: Instant,
    original: bool,
}

impl<S, Fut> Straggler<S, Fut> {
    fn new(inner: Arc<Inner<S>>, request: Pin<Box<Fut>>, start: Instant, original: bool) -> Self {
        Self {
            inner,
            request,
            start,
            original,
        }
    }

    /// Returns `true` if the straggler is the original request, beaten by
    /// its backup.
    pub fn is_original(&self) -> bool {
        self.original
    }

    /// Returns the request without recording its completion.
    pub fn into_inner(self) -> Pin<Box<Fut>> {
        self.request
    }
}

impl<S, Fut> Future for Straggler<S, Fut>
where
    S: BackupRequestsStrategy,
    Fut: Future,
{
    type Output = Fut::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let res = match this.request.as_mut().poll(cx) {
            Poll::Ready(res) => res,
            Poll::Pending => return Poll::Pending,
        };
        if this.original {
            this.inner.original_completed(this.start);
        } else {
            this.inner.backup_completed(this.start);
        }
        Poll::Ready(res)
    }
}
