//! External measurement probes
//!
//! Each probe wraps one command-line tool behind a bounded, timeout-protected
//! call and a pure decoder from raw output to a typed result. Tool presence
//! is established once at startup via a PATH scan and cached for the process
//! lifetime; it is never re-checked per cycle.

pub mod ping;
pub mod speedtest;
pub mod traceroute;

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Command;

use crate::error::{ProbeError, ProbeResult};

pub use ping::PingProbe;
pub use speedtest::{SpeedtestResult, SpeedtestServer, SpeedtestTool};
pub use traceroute::PathDiscovery;

/// Result of the one-time startup capability probe for a tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCapability {
    Available(PathBuf),
    Unavailable,
}

impl ToolCapability {
    pub fn is_available(&self) -> bool {
        matches!(self, ToolCapability::Available(_))
    }
}

/// Look up an executable on PATH. Performed once per tool at startup.
pub fn find_tool(name: &str) -> ToolCapability {
    let Some(path_var) = env::var_os("PATH") else {
        return ToolCapability::Unavailable;
    };

    for dir in env::split_paths(&path_var) {
        let candidate = dir.join(name);
        if is_executable(&candidate) {
            return ToolCapability::Available(candidate);
        }
    }
    ToolCapability::Unavailable
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Captured output of one bounded probe invocation
#[derive(Debug)]
pub struct ProbeOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Run a tool with a hard timeout. The call is never interrupted from the
/// outside; cancellation only applies between probe calls.
pub(crate) async fn run_with_timeout(
    tool: &str,
    program: &Path,
    args: &[&str],
    timeout: Duration,
) -> ProbeResult<ProbeOutput> {
    let mut command = Command::new(program);
    command.args(args).kill_on_drop(true);

    let output = tokio::time::timeout(timeout, command.output())
        .await
        .map_err(|_| ProbeError::Timeout {
            tool: tool.to_string(),
            seconds: timeout.as_secs(),
        })?
        .map_err(|e| ProbeError::Failed {
            tool: tool.to_string(),
            reason: e.to_string(),
        })?;

    Ok(ProbeOutput {
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Outcome of one latency probe attempt
///
/// A probe that reports success without a parseable round-trip time is
/// treated as a failure, so `rtt_ms` is always present on success.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PingOutcome {
    pub success: bool,
    pub rtt_ms: Option<f64>,
}

impl PingOutcome {
    pub fn success(rtt_ms: f64) -> Self {
        Self {
            success: true,
            rtt_ms: Some(rtt_ms),
        }
    }

    pub fn lost() -> Self {
        Self {
            success: false,
            rtt_ms: None,
        }
    }
}

/// The probe seam the scheduler drives. One implementation wraps the real
/// command-line tools; tests substitute scripted fakes.
#[allow(async_fn_in_trait)]
pub trait ProbeSuite {
    /// Discover up to 3 hops towards `dest`. An unavailable tool or an
    /// unreachable path yields an empty list, not an error.
    async fn discover_path(&self, dest: &str) -> ProbeResult<Vec<String>>;

    /// One ping attempt against a single target.
    async fn ping(&self, target: &str) -> PingOutcome;

    /// One throughput measurement, optionally pinned to a server id.
    async fn throughput(&self, server_id: Option<&str>) -> ProbeResult<SpeedtestResult>;
}

/// Production probe suite over the real tools
pub struct ToolProbes {
    pub path: PathDiscovery,
    pub latency: PingProbe,
    pub speedtest: Option<SpeedtestTool>,
}

impl ToolProbes {
    /// Detect every tool once. Missing discovery or throughput tools are
    /// degraded (empty hop set / throughput disabled), never fatal.
    pub fn detect(speedtest_selector: &str) -> Self {
        let path = PathDiscovery::detect();
        let latency = PingProbe::detect();
        let speedtest = SpeedtestTool::resolve(speedtest_selector);

        if speedtest.is_none() {
            tracing::warn!(
                "No speedtest tool found in PATH ('speedtest' or 'speedtest-cli'); \
                 throughput probing is disabled for this run"
            );
        }

        Self {
            path,
            latency,
            speedtest,
        }
    }
}

impl ProbeSuite for ToolProbes {
    async fn discover_path(&self, dest: &str) -> ProbeResult<Vec<String>> {
        self.path.discover(dest).await
    }

    async fn ping(&self, target: &str) -> PingOutcome {
        self.latency.probe(target).await
    }

    async fn throughput(&self, server_id: Option<&str>) -> ProbeResult<SpeedtestResult> {
        match &self.speedtest {
            Some(tool) => tool.run(server_id).await,
            None => Err(ProbeError::ToolUnavailable {
                tool: "speedtest".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_tool_misses_nonsense_binary() {
        assert_eq!(
            find_tool("definitely-not-a-real-binary-name"),
            ToolCapability::Unavailable
        );
    }

    #[test]
    fn test_find_tool_locates_sh() {
        // /bin/sh exists on every unix this runs on
        assert!(find_tool("sh").is_available());
    }
}
