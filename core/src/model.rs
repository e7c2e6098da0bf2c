//! Measurement data model
//!
//! The three stored record kinds (latency samples, path hops, throughput
//! results) plus the derived latency bucket. Stored records are append-only:
//! they are created by the collector the instant a measurement completes and
//! are never updated or deleted.

use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Current wall-clock time in milliseconds since the Unix epoch
pub fn epoch_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Label identifying which point along the network path a latency sample
/// targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HopTag {
    Hop1,
    Hop2,
    Hop3,
    Dest,
}

impl HopTag {
    /// The tag for a 1-based hop index. Only hops 1..=3 are ever tracked.
    pub fn for_hop(index: u8) -> Option<Self> {
        match index {
            1 => Some(HopTag::Hop1),
            2 => Some(HopTag::Hop2),
            3 => Some(HopTag::Hop3),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HopTag::Hop1 => "hop1",
            HopTag::Hop2 => "hop2",
            HopTag::Hop3 => "hop3",
            HopTag::Dest => "dest",
        }
    }
}

impl fmt::Display for HopTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HopTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hop1" => Ok(HopTag::Hop1),
            "hop2" => Ok(HopTag::Hop2),
            "hop3" => Ok(HopTag::Hop3),
            "dest" => Ok(HopTag::Dest),
            other => Err(format!("unknown hop tag: {other}")),
        }
    }
}

/// One ping attempt against a single target
///
/// Invariant: `success == false` implies `rtt_ms` is `None`. A probe that
/// exits successfully but produces no parseable time is recorded as a
/// failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencySample {
    /// Timestamp in milliseconds since epoch
    pub ts_ms: i64,

    /// Probed address or hostname
    pub target: String,

    /// Position of the target along the path
    pub tag: HopTag,

    /// Round-trip time in milliseconds, absent when the ping was lost
    pub rtt_ms: Option<f64>,

    /// Whether the probe succeeded
    pub success: bool,
}

impl LatencySample {
    pub fn success(ts_ms: i64, target: impl Into<String>, tag: HopTag, rtt_ms: f64) -> Self {
        Self {
            ts_ms,
            target: target.into(),
            tag,
            rtt_ms: Some(rtt_ms),
            success: true,
        }
    }

    pub fn lost(ts_ms: i64, target: impl Into<String>, tag: HopTag) -> Self {
        Self {
            ts_ms,
            target: target.into(),
            tag,
            rtt_ms: None,
            success: false,
        }
    }
}

/// One resolved hop from a path discovery run
///
/// Every hop recorded within one discovery cycle carries the identical
/// timestamp; the latest-path query depends on this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathHop {
    /// Timestamp in milliseconds since epoch, shared across the cycle
    pub ts_ms: i64,

    /// Destination the path was traced towards
    pub dest: String,

    /// 1-based hop index, at most 3
    pub hop: u8,

    /// Resolved address for this hop, if any
    pub ip: Option<String>,
}

/// One completed throughput measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThroughputRecord {
    /// Timestamp in milliseconds since epoch
    pub ts_ms: i64,

    /// Tool that produced the measurement ("ookla" or "speedtest-cli")
    pub tool: String,

    pub server_id: Option<String>,
    pub server_name: Option<String>,
    pub ping_ms: Option<f64>,
    pub download_mbps: Option<f64>,
    pub upload_mbps: Option<f64>,
    pub jitter_ms: Option<f64>,
}

/// One aggregated latency row: fixed-width time bucket, per hop tag
///
/// Derived inside the storage engine, never stored. The average covers
/// successful samples only and is absent when the bucket has none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyBucket {
    /// Bucket start time, an exact multiple of the requested width
    pub bucket_ts: i64,

    pub tag: String,
    pub avg_rtt_ms: Option<f64>,
    pub success_count: i64,
    pub total_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hop_tag_round_trip() {
        for tag in [HopTag::Hop1, HopTag::Hop2, HopTag::Hop3, HopTag::Dest] {
            assert_eq!(tag.as_str().parse::<HopTag>().unwrap(), tag);
        }
        assert!("hop4".parse::<HopTag>().is_err());
    }

    #[test]
    fn test_hop_tag_for_index() {
        assert_eq!(HopTag::for_hop(1), Some(HopTag::Hop1));
        assert_eq!(HopTag::for_hop(3), Some(HopTag::Hop3));
        assert_eq!(HopTag::for_hop(0), None);
        assert_eq!(HopTag::for_hop(4), None);
    }

    #[test]
    fn test_lost_sample_has_no_rtt() {
        let sample = LatencySample::lost(1000, "8.8.8.8", HopTag::Dest);
        assert!(!sample.success);
        assert!(sample.rtt_ms.is_none());
    }
}
