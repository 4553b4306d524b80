use serde::{Deserialize, Serialize};

/// Configuration of a [`BoundedCostBackupRequestsStrategy`](crate::BoundedCostBackupRequestsStrategy)
/// as supplied by an external settings source.
///
/// Values are kept as they were received and validated when the strategy is
/// built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundedCostConfig {
    /// Target share of requests receiving a backup, in percent.
    pub cost: f64,
    /// Number of recent latencies the backup delay is estimated from.
    #[serde(default = "default_history_length")]
    pub history_length: i64,
    /// Number of latencies observed before any backup is sent.
    #[serde(default = "default_required_history_length")]
    pub required_history_length: i64,
    /// Maximum number of backups sent in a burst.
    #[serde(default = "default_max_burst")]
    pub max_burst: i64,
    /// Backups are never sent sooner than this, in milliseconds.
    #[serde(default = "default_min_backup_delay_ms")]
    pub min_backup_delay_ms: i64,
}

fn default_history_length() -> i64 {
    1024
}

fn default_required_history_length() -> i64 {
    128
}

fn default_max_burst() -> i64 {
    64
}

fn default_min_backup_delay_ms() -> i64 {
    5
}

impl BoundedCostConfig {
    /// Creates a configuration with the given cost and default values for
    /// everything else.
    pub fn new(cost: f64) -> Self {
        Self {
            cost,
            history_length: default_history_length(),
            required_history_length: default_required_history_length(),
            max_burst: default_max_burst(),
            min_backup_delay_ms: default_min_backup_delay_ms(),
        }
    }
}

/// The strategy selected for an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StrategyConfig {
    /// See [`BoundedCostBackupRequestsStrategy`](crate::BoundedCostBackupRequestsStrategy).
    BoundedCost(BoundedCostConfig),
}

/// Backup requests configuration of a single operation of a service.
///
/// # Examples
///
/// ```
/// use backup_requests::{BackupRequestsConfig, StrategyConfig};
///
/// let config: BackupRequestsConfig = serde_json::from_str(
///     r#"{ "operation": "get", "strategy": { "boundedCost": { "cost": 5 } } }"#,
/// )
/// .unwrap();
///
/// let StrategyConfig::BoundedCost(bounded_cost) = &config.strategy;
/// assert_eq!(1024, bounded_cost.history_length);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRequestsConfig {
    /// Name of the operation, e.g. `get` or `batch_get`.
    pub operation: String,
    /// The strategy deciding on backups for this operation.
    pub strategy: StrategyConfig,
}

impl BackupRequestsConfig {
    /// Creates a bounded cost configuration for `operation`.
    pub fn bounded_cost(operation: impl Into<String>, config: BoundedCostConfig) -> Self {
        Self {
            operation: operation.into(),
            strategy: StrategyConfig::BoundedCost(config),
        }
    }
}
