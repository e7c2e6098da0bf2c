//! Latency probe
//!
//! One `ping` invocation per attempt, numeric output, single packet, 1s
//! reply wait. The decoder is a pure function of the tool output; an exit
//! status of 0 without a parseable time still counts as a loss.

use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

use super::{find_tool, run_with_timeout, PingOutcome, ToolCapability};

const PING_TIMEOUT: Duration = Duration::from_secs(5);

fn rtt_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"time[=<]\s*([\d\.]+)\s*ms").expect("static regex"))
}

/// Decode `ping` output into a round-trip time, if one is present
pub fn decode_ping_output(stdout: &str) -> Option<f64> {
    rtt_regex()
        .captures(stdout)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Single-attempt ping probe
pub struct PingProbe {
    binary: Option<PathBuf>,
}

impl PingProbe {
    /// Locate `ping` once at startup
    pub fn detect() -> Self {
        let binary = match find_tool("ping") {
            ToolCapability::Available(path) => Some(path),
            ToolCapability::Unavailable => {
                tracing::warn!("'ping' not found in PATH; all latency probes will be lost");
                None
            }
        };
        Self { binary }
    }

    /// One attempt against `target`. Every failure mode (missing tool,
    /// timeout, non-zero exit, unparseable output) is a loss, never an
    /// error; the scheduler persists the outcome either way.
    pub async fn probe(&self, target: &str) -> PingOutcome {
        let Some(binary) = &self.binary else {
            return PingOutcome::lost();
        };

        let result = run_with_timeout(
            "ping",
            binary,
            &["-n", "-c", "1", "-W", "1", target],
            PING_TIMEOUT,
        )
        .await;

        match result {
            Ok(output) if output.success => match decode_ping_output(&output.stdout) {
                Some(rtt_ms) => PingOutcome::success(rtt_ms),
                None => PingOutcome::lost(),
            },
            Ok(_) => PingOutcome::lost(),
            Err(e) => {
                tracing::debug!("ping {} failed: {}", target, e);
                PingOutcome::lost()
            }
        }
    }
}
