/// Error type returned by this crate.
///
/// Every variant but [`Error::Histogram`] is a configuration error: it is
/// raised synchronously when a strategy, metric or generator is built and is
/// never worth retrying.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The backup percentage is not in the `(0, 100)` range.
    #[error("percent must be in (0, 100), was {percent}")]
    InvalidPercent {
        /// The rejected value.
        percent: f64,
    },

    /// The burst budget is not positive.
    #[error("maxBurst must be greater than 0, was {max_burst}")]
    InvalidMaxBurst {
        /// The rejected value.
        max_burst: i64,
    },

    /// The latency history is too short to estimate a percentile.
    #[error("historyLength must be at least {min}, was {history_length}")]
    InvalidHistoryLength {
        /// The rejected value.
        history_length: i64,
        /// The smallest accepted value.
        min: i64,
    },

    /// The required history is too short or longer than the history itself.
    #[error(
        "requiredHistoryLength must be in [{min}, {history_length}], was {required_history_length}"
    )]
    InvalidRequiredHistoryLength {
        /// The rejected value.
        required_history_length: i64,
        /// The smallest accepted value.
        min: i64,
        /// The configured history length, the largest accepted value.
        history_length: i64,
    },

    /// The backup delay floor is negative or does not fit in nanoseconds.
    #[error("minBackupDelay must be a non-negative number of nanoseconds, was {nanos}")]
    InvalidMinBackupDelay {
        /// The rejected value, in nanoseconds when representable.
        nanos: i64,
    },

    /// The latency clipping range is empty or starts at zero.
    #[error("latency bounds must satisfy 0 < low < high, were [{low}, {high}]")]
    InvalidBounds {
        /// The rejected lower bound.
        low: u64,
        /// The rejected upper bound.
        high: u64,
    },

    /// A latency buffer can not hold a single sample.
    #[error("latency buffer capacity must be greater than 0")]
    InvalidCapacity,

    /// A random distribution was configured with unusable parameters.
    #[error("invalid distribution: {reason}")]
    InvalidDistribution {
        /// Human readable description of the problem.
        reason: String,
    },

    /// The underlying histogram rejected its configuration.
    #[error("histogram error: {source}")]
    Histogram {
        /// The histogram error.
        #[from]
        source: histogram::Error,
    },
}

impl Error {
    /// Returns `true` if this error was caused by invalid configuration.
    pub fn is_config(&self) -> bool {
        !matches!(self, Error::Histogram { .. })
    }
}

/// Result type alias for this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
