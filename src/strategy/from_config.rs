use std::sync::Arc;

use crate::{
    BackupRequestsConfig, BoundedCostBackupRequestsStrategy, Result, StrategyConfig,
    TrackingBackupRequestsStrategy,
};

/// A tracking strategy built from, and kept alongside, its configuration.
///
/// An invalid configuration is logged and results in no strategy at all, so a
/// bad setting disables backup requests for the operation instead of failing
/// requests.
#[derive(Clone)]
pub struct BackupRequestsStrategyFromConfig {
    config: BackupRequestsConfig,
    strategy: Option<Arc<TrackingBackupRequestsStrategy>>,
}

impl BackupRequestsStrategyFromConfig {
    /// Builds the strategy described by `config`.
    pub fn new(config: BackupRequestsConfig) -> Self {
        let strategy = match Self::create(&config) {
            Ok(strategy) => {
                tracing::debug!(operation = %config.operation, "created backup requests strategy");
                Some(Arc::new(strategy))
            }
            Err(err) => {
                tracing::warn!(
                    operation = %config.operation,
                    error = %err,
                    "invalid backup requests configuration, backup requests disabled"
                );
                None
            }
        };
        Self { config, strategy }
    }

    fn create(config: &BackupRequestsConfig) -> Result<TrackingBackupRequestsStrategy> {
        match &config.strategy {
            StrategyConfig::BoundedCost(bounded_cost) => Ok(TrackingBackupRequestsStrategy::new(
                BoundedCostBackupRequestsStrategy::from_config(bounded_cost)?,
            )),
        }
    }

    /// Returns a replacement built from `config`, or `None` if `config` is the
    /// current configuration, in which case the existing strategy and its
    /// latency history should be kept.
    pub fn update(&self, config: &BackupRequestsConfig) -> Option<Self> {
        if *config == self.config {
            None
        } else {
            Some(Self::new(config.clone()))
        }
    }

    /// Returns the strategy, unless the configuration was invalid.
    pub fn strategy(&self) -> Option<&Arc<TrackingBackupRequestsStrategy>> {
        self.strategy.as_ref()
    }

    /// Returns the configuration the strategy was built from.
    pub fn config(&self) -> &BackupRequestsConfig {
        &self.config
    }
}
