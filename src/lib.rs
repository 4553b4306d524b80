#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]

//! Cost-bounded backup requests, inspired by the hedged requests described in
//! ["The Tail at Scale"](https://research.google/pubs/pub40801/).
//!
//! A backup request is a duplicate of a request that is running unusually
//! slow. The first response to arrive wins. Backups are cheap tail-latency
//! insurance as long as they stay rare, so this crate bounds them to a
//! configured percentage of extra traffic.
//!
//! The crate is made of:
//!
//! - [`BackupRequestsStrategy`], the admission-control contract consulted by
//!   an RPC client, and [`BoundedCostBackupRequestsStrategy`], its adaptive
//!   implementation.
//! - [`TrackingBackupRequestsStrategy`], a decorator collecting usage
//!   statistics and latency metrics.
//! - [`LatencyMetric`], a non-blocking double-buffered latency histogram.
//! - [`simulator`], a deterministic discrete-event simulator used to
//!   calibrate a strategy against synthetic traffic.
//! - [`BackupRequestsRegistry`], which keeps one strategy per service
//!   operation in sync with externally supplied configuration.
//!
//! # Features
//!
//! - `tokio`: Enables [`BackupRequests::send`], an asynchronous client
//!   performing backup requests driven by a strategy.

mod bounds;
#[cfg(feature = "tokio")]
mod client;
mod config;
mod error;
mod latency;
mod latency_metric;
mod registry;
pub mod simulator;
mod stats;
mod strategy;

pub use bounds::{LatencyBounds, DEFAULT_HIGH_NANOS, DEFAULT_LOW_NANOS};
#[cfg(feature = "tokio")]
pub use client::{BackupRequests, Straggler};
pub use config::{BackupRequestsConfig, BoundedCostConfig, StrategyConfig};
pub use error::{Error, Result};
pub use latency::LatencyHistogram;
pub use latency_metric::{LatencyMetric, DEFAULT_MAX_SAMPLES};
pub use registry::BackupRequestsRegistry;
pub use stats::{
    BackupRequestsStrategyStats, BackupRequestsStrategyStatsConsumer,
    BackupRequestsStrategyStatsProvider,
};
pub use strategy::{
    BackupRequestsStrategy, BackupRequestsStrategyFromConfig, BoundedCostBackupRequestsStrategy,
    TrackingBackupRequestsStrategy, MIN_HISTORY_LENGTH,
};
