//! Path discovery probe
//!
//! Resolves the first 3 hops towards the configured destination via
//! `traceroute`, falling back to `mtr` in report mode. Tool detection
//! happens once at startup; an absent tool degrades discovery to an empty
//! hop set for the whole run.

use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

use super::{find_tool, run_with_timeout, ToolCapability};
use crate::error::ProbeResult;

const TRACE_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_HOPS: usize = 3;

fn ipv4_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d{1,3}(?:\.\d{1,3}){3})").expect("static regex"))
}

/// Decode `traceroute` output: the banner line is skipped, then the first
/// IPv4 address per hop line, up to 3 hops.
pub fn decode_traceroute_output(stdout: &str) -> Vec<String> {
    let mut hops = Vec::new();
    for line in stdout.lines().skip(1) {
        if let Some(m) = ipv4_regex().find(line) {
            hops.push(m.as_str().to_string());
        }
        if hops.len() >= MAX_HOPS {
            break;
        }
    }
    hops
}

/// Decode `mtr -r` output: first IPv4 per row, up to 3 hops.
pub fn decode_mtr_output(stdout: &str) -> Vec<String> {
    let mut hops = Vec::new();
    for line in stdout.lines() {
        if let Some(m) = ipv4_regex().find(line) {
            hops.push(m.as_str().to_string());
        }
        if hops.len() >= MAX_HOPS {
            break;
        }
    }
    hops
}

enum TraceTool {
    Traceroute(PathBuf),
    Mtr(PathBuf),
    Unavailable,
}

/// Path discovery over whichever trace tool is installed
pub struct PathDiscovery {
    tool: TraceTool,
}

impl PathDiscovery {
    /// Detect `traceroute` or `mtr` once at startup
    pub fn detect() -> Self {
        let tool = match find_tool("traceroute") {
            ToolCapability::Available(path) => TraceTool::Traceroute(path),
            ToolCapability::Unavailable => match find_tool("mtr") {
                ToolCapability::Available(path) => TraceTool::Mtr(path),
                ToolCapability::Unavailable => {
                    tracing::warn!(
                        "Neither 'traceroute' nor 'mtr' found in PATH; \
                         path discovery yields no hops"
                    );
                    TraceTool::Unavailable
                }
            },
        };
        Self { tool }
    }

    /// One discovery run. Timeouts and non-zero exits yield an empty hop
    /// set; the scheduler backs off until the next refresh window either
    /// way.
    pub async fn discover(&self, dest: &str) -> ProbeResult<Vec<String>> {
        let output = match &self.tool {
            TraceTool::Traceroute(path) => {
                tracing::debug!("traceroute -n -w 2 -q 1 {}", dest);
                run_with_timeout(
                    "traceroute",
                    path,
                    &["-n", "-w", "2", "-q", "1", dest],
                    TRACE_TIMEOUT,
                )
                .await?
            }
            TraceTool::Mtr(path) => {
                tracing::debug!("mtr -n -r -c 1 {}", dest);
                run_with_timeout("mtr", path, &["-n", "-r", "-c", "1", dest], TRACE_TIMEOUT)
                    .await?
            }
            TraceTool::Unavailable => return Ok(Vec::new()),
        };

        if !output.success {
            return Ok(Vec::new());
        }

        let hops = match &self.tool {
            TraceTool::Traceroute(_) => decode_traceroute_output(&output.stdout),
            TraceTool::Mtr(_) => decode_mtr_output(&output.stdout),
            TraceTool::Unavailable => unreachable!(),
        };
        Ok(hops)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRACEROUTE_OUT: &str = "traceroute to 8.8.8.8 (8.8.8.8), 30 hops max, 60 byte packets\n\
        \x20 1  192.168.1.1  0.512 ms\n\
        \x20 2  10.20.30.1  4.221 ms\n\
        \x20 3  100.64.0.17  8.913 ms\n\
        \x20 4  72.14.204.1  10.002 ms\n";

    #[test]
    fn test_decode_traceroute_caps_at_three_hops() {
        let hops = decode_traceroute_output(TRACEROUTE_OUT);
        assert_eq!(hops, vec!["192.168.1.1", "10.20.30.1", "100.64.0.17"]);
    }

    #[test]
    fn test_decode_traceroute_skips_banner() {
        // The banner contains the destination address; it must not be
        // mistaken for a hop.
        let out = "traceroute to 8.8.8.8 (8.8.8.8), 30 hops max\n 1  192.168.1.1  0.5 ms\n";
        assert_eq!(decode_traceroute_output(out), vec!["192.168.1.1"]);
    }

    #[test]
    fn test_decode_traceroute_unresolved_hops() {
        let out = "traceroute to 8.8.8.8 (8.8.8.8), 30 hops max\n\
            \x20 1  192.168.1.1  0.5 ms\n\
            \x20 2  * * *\n\
            \x20 3  100.64.0.17  8.9 ms\n";
        // A starred hop carries no address and contributes nothing
        assert_eq!(
            decode_traceroute_output(out),
            vec!["192.168.1.1", "100.64.0.17"]
        );
    }

    #[test]
    fn test_decode_mtr_report() {
        let out = "Start: 2025-08-20T11:00:00+0000\n\
            HOST: box                Loss%   Snt   Last   Avg  Best  Wrst StDev\n\
            \x20 1.|-- 192.168.1.1   0.0%     1    0.4   0.4   0.4   0.4   0.0\n\
            \x20 2.|-- 10.20.30.1    0.0%     1    3.9   3.9   3.9   3.9   0.0\n";
        assert_eq!(decode_mtr_output(out), vec!["192.168.1.1", "10.20.30.1"]);
    }

    #[test]
    fn test_decode_empty_output() {
        assert!(decode_traceroute_output("").is_empty());
        assert!(decode_mtr_output("").is_empty());
    }
}
