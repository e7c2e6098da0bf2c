//! Netpulse core library
//!
//! This library provides the pieces shared between the collector and the
//! query server: the measurement data model, the SQLite-backed durable
//! store, the hour-rotating CSV log, and the read-side query functions.

pub mod config;
pub mod csvlog;
pub mod error;
pub mod model;
pub mod query;
pub mod store;

// Re-export commonly used types
pub use config::{CollectorConfig, ServerConfig, SpeedtestConfig};
pub use csvlog::HourlyCsvLog;
pub use error::{ConfigError, CoreError, Result, StorageError};
pub use model::{HopTag, LatencyBucket, LatencySample, PathHop, ThroughputRecord};
pub use store::MeasurementStore;
