//! Backup requests strategies of every operation of every service.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use parking_lot::{Mutex, RwLock};

use crate::{
    stats::notify_consumer, BackupRequestsConfig, BackupRequestsStrategyFromConfig,
    BackupRequestsStrategyStatsConsumer, BackupRequestsStrategyStatsProvider, LatencyHistogram,
    Result, TrackingBackupRequestsStrategy,
};

struct Entry {
    service: String,
    operation: String,
    strategy: Arc<TrackingBackupRequestsStrategy>,
}

enum Change {
    Added(String, Arc<TrackingBackupRequestsStrategy>),
    Removed(String, Arc<TrackingBackupRequestsStrategy>),
}

/// Keeps one strategy per service operation in sync with configuration.
///
/// Configuration arrives per service as a list of [`BackupRequestsConfig`].
/// Strategies whose configuration did not change are kept, together with
/// their latency history. Replaced and removed strategies are reported to
/// the stats consumer, and their latency metrics are harvested one last time
/// by the next [`notify_latencies`](Self::notify_latencies), so latencies of
/// requests still in flight when the change happened are not lost.
#[derive(Default)]
pub struct BackupRequestsRegistry {
    strategies: RwLock<HashMap<String, HashMap<String, BackupRequestsStrategyFromConfig>>>,
    final_sweep: Mutex<Vec<Entry>>,
    consumer: Option<Arc<dyn BackupRequestsStrategyStatsConsumer>>,
}

impl BackupRequestsRegistry {
    /// Creates an empty registry without a stats consumer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty registry reporting to `consumer`.
    pub fn with_stats_consumer(consumer: Arc<dyn BackupRequestsStrategyStatsConsumer>) -> Self {
        Self {
            consumer: Some(consumer),
            ..Self::default()
        }
    }

    /// Returns the strategy serving `operation` of `service`, if any.
    pub fn strategy(
        &self,
        service: &str,
        operation: &str,
    ) -> Option<Arc<TrackingBackupRequestsStrategy>> {
        let strategies = self.strategies.read();
        let strategy = strategies
            .get(service)
            .and_then(|operations| operations.get(operation))
            .and_then(|from_config| from_config.strategy().cloned());
        if strategy.is_none() {
            tracing::trace!(service, operation, "no backup requests strategy");
        }
        strategy
    }

    /// Replaces the configuration of `service`.
    ///
    /// Operations missing from `configs` lose their strategy.
    pub fn update(&self, service: &str, configs: &[BackupRequestsConfig]) {
        let mut changes = Vec::new();
        {
            let mut strategies = self.strategies.write();
            let operations = strategies.entry(service.to_owned()).or_default();
            let mut configured = HashSet::new();

            for config in configs {
                configured.insert(config.operation.as_str());
                let replacement = match operations.get(&config.operation) {
                    None => Some(BackupRequestsStrategyFromConfig::new(config.clone())),
                    Some(existing) => existing.update(config).map(|replacement| {
                        if let Some(old) = existing.strategy() {
                            changes.push(Change::Removed(config.operation.clone(), old.clone()));
                        }
                        replacement
                    }),
                };
                if let Some(replacement) = replacement {
                    if let Some(new) = replacement.strategy() {
                        changes.push(Change::Added(config.operation.clone(), new.clone()));
                    }
                    operations.insert(config.operation.clone(), replacement);
                }
            }

            operations.retain(|operation, existing| {
                let keep = configured.contains(operation.as_str());
                if !keep {
                    if let Some(old) = existing.strategy() {
                        changes.push(Change::Removed(operation.clone(), old.clone()));
                    }
                }
                keep
            });
            if operations.is_empty() {
                strategies.remove(service);
            }
        }

        for change in changes {
            match change {
                Change::Added(operation, strategy) => {
                    tracing::debug!(service, %operation, "backup requests strategy added");
                    self.notify(|consumer| {
                        consumer.add_stats_provider(service, &operation, as_provider(&strategy))
                    });
                }
                Change::Removed(operation, strategy) => {
                    tracing::debug!(service, %operation, "backup requests strategy removed");
                    self.notify(|consumer| {
                        consumer.remove_stats_provider(service, &operation, as_provider(&strategy))
                    });
                    self.final_sweep.lock().push(Entry {
                        service: service.to_owned(),
                        operation,
                        strategy,
                    });
                }
            }
        }
    }

    /// Records a latency of `operation` of `service` into one of the metrics
    /// of `strategy`. A full metric buffer is passed to the stats consumer.
    pub fn record_latency(
        &self,
        service: &str,
        operation: &str,
        strategy: &TrackingBackupRequestsStrategy,
        nanos: u64,
        with_backup: bool,
    ) -> Result<()> {
        let metric = if with_backup {
            strategy.latency_with_backup()
        } else {
            strategy.latency_without_backup()
        };
        metric.record(nanos, |latencies| {
            self.latency_update(service, operation, latencies, with_backup)
        })
    }

    /// Harvests the latency metrics of every strategy, including strategies
    /// replaced or removed since the previous call, into the stats consumer.
    pub fn notify_latencies(&self) {
        let live: Vec<Entry> = self
            .strategies
            .read()
            .iter()
            .flat_map(|(service, operations)| {
                operations.iter().filter_map(move |(operation, from_config)| {
                    from_config.strategy().map(|strategy| Entry {
                        service: service.clone(),
                        operation: operation.clone(),
                        strategy: strategy.clone(),
                    })
                })
            })
            .collect();
        let swept = std::mem::take(&mut *self.final_sweep.lock());

        for entry in &live {
            self.harvest(entry);
        }
        // A strategy removed and then configured again is harvested once.
        for entry in swept
            .iter()
            .filter(|swept| !live.iter().any(|l| Arc::ptr_eq(&l.strategy, &swept.strategy)))
        {
            self.harvest(entry);
        }
    }

    fn harvest(&self, entry: &Entry) {
        for with_backup in [false, true] {
            let metric = if with_backup {
                entry.strategy.latency_with_backup()
            } else {
                entry.strategy.latency_without_backup()
            };
            let res = metric.harvest(|latencies| {
                self.latency_update(&entry.service, &entry.operation, latencies, with_backup)
            });
            if let Err(err) = res {
                tracing::warn!(
                    service = %entry.service,
                    operation = %entry.operation,
                    with_backup,
                    error = %err,
                    "failed to harvest latencies"
                );
            }
        }
    }

    fn latency_update(
        &self,
        service: &str,
        operation: &str,
        latencies: LatencyHistogram,
        with_backup: bool,
    ) {
        self.notify(|consumer| consumer.latency_update(service, operation, latencies, with_backup));
    }

    /// Calls the consumer, if any. A panicking consumer is logged and
    /// otherwise ignored.
    fn notify<F>(&self, f: F)
    where
        F: FnOnce(&dyn BackupRequestsStrategyStatsConsumer),
    {
        if let Some(consumer) = &self.consumer {
            notify_consumer(consumer.as_ref(), f);
        }
    }
}

fn as_provider(
    strategy: &Arc<TrackingBackupRequestsStrategy>,
) -> Arc<dyn BackupRequestsStrategyStatsProvider> {
    strategy.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BackupRequestsStrategy, BoundedCostConfig};

    #[derive(Debug, PartialEq)]
    enum Event {
        Add(String, String),
        Remove(String, String),
        Latency(String, String, u64, bool),
    }

    #[derive(Default)]
    struct RecordingConsumer {
        events: Mutex<Vec<Event>>,
    }

    impl RecordingConsumer {
        fn take(&self) -> Vec<Event> {
            std::mem::take(&mut *self.events.lock())
        }
    }

    impl BackupRequestsStrategyStatsConsumer for RecordingConsumer {
        fn add_stats_provider(
            &self,
            service: &str,
            operation: &str,
            _provider: Arc<dyn BackupRequestsStrategyStatsProvider>,
        ) {
            self.events
                .lock()
                .push(Event::Add(service.into(), operation.into()));
        }

        fn remove_stats_provider(
            &self,
            service: &str,
            operation: &str,
            _provider: Arc<dyn BackupRequestsStrategyStatsProvider>,
        ) {
            self.events
                .lock()
                .push(Event::Remove(service.into(), operation.into()));
        }

        fn latency_update(
            &self,
            service: &str,
            operation: &str,
            latencies: LatencyHistogram,
            with_backup: bool,
        ) {
            self.events.lock().push(Event::Latency(
                service.into(),
                operation.into(),
                latencies.count(),
                with_backup,
            ));
        }
    }

    struct PanickingConsumer;

    impl BackupRequestsStrategyStatsConsumer for PanickingConsumer {
        fn add_stats_provider(
            &self,
            _: &str,
            _: &str,
            _: Arc<dyn BackupRequestsStrategyStatsProvider>,
        ) {
            panic!("add");
        }

        fn remove_stats_provider(
            &self,
            _: &str,
            _: &str,
            _: Arc<dyn BackupRequestsStrategyStatsProvider>,
        ) {
            panic!("remove");
        }

        fn latency_update(&self, _: &str, _: &str, _: LatencyHistogram, _: bool) {
            panic!("latency");
        }
    }

    fn config(operation: &str, cost: f64) -> BackupRequestsConfig {
        BackupRequestsConfig::bounded_cost(operation, BoundedCostConfig::new(cost))
    }

    #[test]
    fn test_update_lifecycle() {
        let consumer = Arc::new(RecordingConsumer::default());
        let registry = BackupRequestsRegistry::with_stats_consumer(consumer.clone());

        registry.update("svc", &[config("get", 5.0)]);
        assert_eq!(vec![Event::Add("svc".into(), "get".into())], consumer.take());
        let get = registry.strategy("svc", "get").unwrap();
        assert!(registry.strategy("svc", "batch_get").is_none());
        assert!(registry.strategy("other", "get").is_none());

        // Unchanged configuration keeps the strategy.
        registry.update("svc", &[config("get", 5.0)]);
        assert!(consumer.take().is_empty());
        assert!(Arc::ptr_eq(&get, &registry.strategy("svc", "get").unwrap()));

        registry.update("svc", &[config("get", 3.0)]);
        assert_eq!(
            vec![
                Event::Remove("svc".into(), "get".into()),
                Event::Add("svc".into(), "get".into()),
            ],
            consumer.take()
        );
        assert_eq!(3.0, registry.strategy("svc", "get").unwrap().delegate().percent());

        registry.update("svc", &[config("batch_get", 5.0)]);
        let events = consumer.take();
        assert!(events.contains(&Event::Remove("svc".into(), "get".into())));
        assert!(events.contains(&Event::Add("svc".into(), "batch_get".into())));
        assert!(registry.strategy("svc", "get").is_none());
    }

    #[test]
    fn test_invalid_config_has_no_strategy() {
        let consumer = Arc::new(RecordingConsumer::default());
        let registry = BackupRequestsRegistry::with_stats_consumer(consumer.clone());
        registry.update("svc", &[config("get", -1.0)]);
        assert!(registry.strategy("svc", "get").is_none());
        assert!(consumer.take().is_empty());
    }

    #[test]
    fn test_notify_latencies_includes_final_sweep() {
        let consumer = Arc::new(RecordingConsumer::default());
        let registry = BackupRequestsRegistry::with_stats_consumer(consumer.clone());
        registry.update("svc", &[config("get", 5.0)]);
        let get = registry.strategy("svc", "get").unwrap();
        consumer.take();

        registry.update("svc", &[]);
        consumer.take();

        // A request still in flight when the strategy was removed completes.
        get.record_completion(1_000_000);
        registry.record_latency("svc", "get", &get, 1_000_000, false).unwrap();
        registry.record_latency("svc", "get", &get, 1_000_000, true).unwrap();
        registry.record_latency("svc", "get", &get, 2_000_000, true).unwrap();

        registry.notify_latencies();
        assert_eq!(
            vec![
                Event::Latency("svc".into(), "get".into(), 1, false),
                Event::Latency("svc".into(), "get".into(), 2, true),
            ],
            consumer.take()
        );

        registry.notify_latencies();
        assert!(consumer.take().is_empty());
    }

    #[test]
    fn test_panicking_consumer_is_contained() {
        let registry = BackupRequestsRegistry::with_stats_consumer(Arc::new(PanickingConsumer));
        registry.update("svc", &[config("get", 5.0)]);
        let get = registry.strategy("svc", "get").unwrap();
        registry.record_latency("svc", "get", &get, 1_000_000, true).unwrap();
        registry.notify_latencies();
        registry.update("svc", &[]);
    }
}
