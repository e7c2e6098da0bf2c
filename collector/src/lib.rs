//! Netpulse collector library
//!
//! This library provides the measurement side of netpulse: one-time probe
//! capability detection, structured decoders for the external tools, and
//! the cooperative scheduler that interleaves path discovery, latency
//! probing and throughput probing on a single task.

pub mod error;
pub mod probes;
pub mod scheduler;

// Re-export commonly used types
pub use error::{CollectorError, ProbeError, Result};
pub use scheduler::{Scheduler, ThroughputPlan};
