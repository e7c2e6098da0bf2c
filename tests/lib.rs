//! Netpulse integration test suite
//!
//! Shared fixtures for tests that exercise the collector and the read
//! side together across crate boundaries: a scripted probe suite that
//! stands in for the external tools, and a collector configuration
//! rooted in a temporary directory.

use std::collections::HashMap;
use std::path::Path;

use netpulse_collector::error::{ProbeError, ProbeResult};
use netpulse_collector::probes::{PingOutcome, ProbeSuite, SpeedtestResult};
use netpulse_core::CollectorConfig;

/// Probe suite with fixed, scripted behavior. Unknown ping targets are
/// reported as lost, matching how a real probe degrades.
#[derive(Default)]
pub struct ScriptedProbes {
    pub hops: Vec<String>,
    pub rtt_by_target: HashMap<String, f64>,
    pub throughput_result: Option<SpeedtestResult>,
}

impl ScriptedProbes {
    pub fn with_hops(hops: &[&str]) -> Self {
        Self {
            hops: hops.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn rtt(mut self, target: &str, rtt_ms: f64) -> Self {
        self.rtt_by_target.insert(target.to_string(), rtt_ms);
        self
    }

    pub fn throughput(mut self, result: SpeedtestResult) -> Self {
        self.throughput_result = Some(result);
        self
    }
}

impl ProbeSuite for ScriptedProbes {
    async fn discover_path(&self, _dest: &str) -> ProbeResult<Vec<String>> {
        Ok(self.hops.clone())
    }

    async fn ping(&self, target: &str) -> PingOutcome {
        match self.rtt_by_target.get(target) {
            Some(rtt) => PingOutcome::success(*rtt),
            None => PingOutcome::lost(),
        }
    }

    async fn throughput(&self, server_id: Option<&str>) -> ProbeResult<SpeedtestResult> {
        match &self.throughput_result {
            Some(result) => {
                let mut result = result.clone();
                if result.server_id.is_none() {
                    result.server_id = server_id.map(str::to_string);
                }
                Ok(result)
            }
            None => Err(ProbeError::Failed {
                tool: "speedtest".to_string(),
                reason: "scripted failure".to_string(),
            }),
        }
    }
}

/// Collector configuration rooted under `dir`, with intervals arranged so
/// a single driven cycle performs discovery and throughput exactly once.
pub fn test_config(dir: &Path) -> CollectorConfig {
    CollectorConfig {
        log_dir: dir.to_path_buf(),
        traceroute_refresh_sec: 3600,
        speedtest_interval_sec: 3600,
        ..Default::default()
    }
}

/// Count the data rows (excluding the header) of one CSV file
pub fn csv_data_rows(path: &Path) -> usize {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .unwrap();
    reader.records().count()
}
