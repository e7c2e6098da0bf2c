//! Throughput probe
//!
//! Wraps the Ookla `speedtest` binary or the Python `speedtest-cli`, chosen
//! once at startup. Each tool gets its own structured decoder, a pure
//! function from the tool's JSON report to a typed result, so an output
//! format change touches only that decoder.

use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;

use super::{find_tool, run_with_timeout, ToolCapability};
use crate::error::{ProbeError, ProbeResult};

const OOKLA_TIMEOUT: Duration = Duration::from_secs(120);
const CLI_TIMEOUT: Duration = Duration::from_secs(180);
const OOKLA_LIST_TIMEOUT: Duration = Duration::from_secs(20);
const CLI_LIST_TIMEOUT: Duration = Duration::from_secs(25);

/// One completed throughput measurement, before timestamping
#[derive(Debug, Clone, PartialEq)]
pub struct SpeedtestResult {
    pub tool: String,
    pub server_id: Option<String>,
    pub server_name: Option<String>,
    pub ping_ms: Option<f64>,
    pub jitter_ms: Option<f64>,
    pub download_mbps: Option<f64>,
    pub upload_mbps: Option<f64>,
}

/// One entry from a tool's ranked server listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeedtestServer {
    pub id: String,
    pub name: String,
}

/// The throughput tool resolved for this run
pub enum SpeedtestTool {
    Ookla(PathBuf),
    Cli(PathBuf),
}

impl SpeedtestTool {
    /// Resolve the configured selector against PATH, once at startup.
    /// Returns `None` when no matching tool is installed.
    pub fn resolve(selector: &str) -> Option<Self> {
        let ookla = || match find_tool("speedtest") {
            ToolCapability::Available(path) => Some(SpeedtestTool::Ookla(path)),
            ToolCapability::Unavailable => None,
        };
        let cli = || match find_tool("speedtest-cli") {
            ToolCapability::Available(path) => Some(SpeedtestTool::Cli(path)),
            ToolCapability::Unavailable => None,
        };

        match selector {
            "auto" => ookla().or_else(cli),
            "ookla" => ookla(),
            "speedtest-cli" => cli(),
            _ => None,
        }
    }

    /// The tool identifier recorded with every throughput row
    pub fn name(&self) -> &'static str {
        match self {
            SpeedtestTool::Ookla(_) => "ookla",
            SpeedtestTool::Cli(_) => "speedtest-cli",
        }
    }

    /// Request the tool's ranked server list and keep the first `count`.
    /// A listing failure yields an empty list; the caller falls back to
    /// the tool's own default server.
    pub async fn list_servers(&self, count: usize) -> ProbeResult<Vec<SpeedtestServer>> {
        let output = match self {
            SpeedtestTool::Ookla(path) => {
                run_with_timeout("speedtest", path, &["-L"], OOKLA_LIST_TIMEOUT).await?
            }
            SpeedtestTool::Cli(path) => {
                run_with_timeout("speedtest-cli", path, &["--list"], CLI_LIST_TIMEOUT).await?
            }
        };

        if !output.success {
            return Ok(Vec::new());
        }
        Ok(decode_server_list(&output.stdout, count))
    }

    /// One measurement, optionally pinned to `server_id`
    pub async fn run(&self, server_id: Option<&str>) -> ProbeResult<SpeedtestResult> {
        match self {
            SpeedtestTool::Ookla(path) => {
                let mut args = vec!["--format=json"];
                if let Some(id) = server_id {
                    args.push("--server-id");
                    args.push(id);
                }
                let output = run_with_timeout("speedtest", path, &args, OOKLA_TIMEOUT).await?;
                if !output.success || output.stdout.trim().is_empty() {
                    return Err(ProbeError::Failed {
                        tool: "speedtest".to_string(),
                        reason: output.stderr.trim().to_string(),
                    });
                }
                decode_ookla_report(&output.stdout, server_id)
            }
            SpeedtestTool::Cli(path) => {
                let mut args = vec!["--json"];
                if let Some(id) = server_id {
                    args.push("--server");
                    args.push(id);
                }
                let output = run_with_timeout("speedtest-cli", path, &args, CLI_TIMEOUT).await?;
                if !output.success || output.stdout.trim().is_empty() {
                    return Err(ProbeError::Failed {
                        tool: "speedtest-cli".to_string(),
                        reason: output.stderr.trim().to_string(),
                    });
                }
                decode_cli_report(&output.stdout, server_id)
            }
        }
    }
}

fn server_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(\d+)\)\s*(.+)$").expect("static regex"))
}

/// Decode a `N) name` server listing, keeping the first `count` entries
pub fn decode_server_list(stdout: &str, count: usize) -> Vec<SpeedtestServer> {
    let mut servers = Vec::new();
    for line in stdout.lines() {
        if let Some(caps) = server_line_regex().captures(line.trim()) {
            servers.push(SpeedtestServer {
                id: caps[1].to_string(),
                name: caps[2].trim().to_string(),
            });
            if servers.len() >= count {
                break;
            }
        }
    }
    servers
}

fn id_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[derive(Deserialize)]
struct OoklaReport {
    ping: Option<OoklaPing>,
    download: Option<OoklaTransfer>,
    upload: Option<OoklaTransfer>,
    server: Option<OoklaServer>,
}

#[derive(Deserialize)]
struct OoklaPing {
    latency: Option<f64>,
    jitter: Option<f64>,
}

#[derive(Deserialize)]
struct OoklaTransfer {
    /// Bytes per second
    bandwidth: Option<f64>,
}

#[derive(Deserialize)]
struct OoklaServer {
    id: Option<serde_json::Value>,
    name: Option<String>,
    location: Option<String>,
}

/// Decode the Ookla JSON report. Bandwidth arrives in bytes per second and
/// is converted to Mbps.
pub fn decode_ookla_report(
    stdout: &str,
    requested_server: Option<&str>,
) -> ProbeResult<SpeedtestResult> {
    let report: OoklaReport =
        serde_json::from_str(stdout).map_err(|e| ProbeError::Parse {
            tool: "speedtest".to_string(),
            reason: e.to_string(),
        })?;

    let server = report.server.as_ref();
    let server_id = server
        .and_then(|s| s.id.as_ref())
        .and_then(id_to_string)
        .or_else(|| requested_server.map(str::to_string));

    let name = server.and_then(|s| s.name.as_deref()).unwrap_or("");
    let location = server.and_then(|s| s.location.as_deref()).unwrap_or("");
    let server_name = match format!("{name} - {location}")
        .trim_matches([' ', '-'])
        .to_string()
    {
        s if s.is_empty() => None,
        s => Some(s),
    };

    let to_mbps = |bps: f64| bps * 8.0 / 1e6;

    Ok(SpeedtestResult {
        tool: "ookla".to_string(),
        server_id,
        server_name,
        ping_ms: report.ping.as_ref().and_then(|p| p.latency),
        jitter_ms: report.ping.as_ref().and_then(|p| p.jitter),
        download_mbps: report
            .download
            .as_ref()
            .and_then(|t| t.bandwidth)
            .map(to_mbps),
        upload_mbps: report
            .upload
            .as_ref()
            .and_then(|t| t.bandwidth)
            .map(to_mbps),
    })
}

#[derive(Deserialize)]
struct CliReport {
    ping: Option<f64>,
    /// Bits per second
    download: Option<f64>,
    /// Bits per second
    upload: Option<f64>,
    server: Option<CliServer>,
}

#[derive(Deserialize)]
struct CliServer {
    id: Option<serde_json::Value>,
    sponsor: Option<String>,
    name: Option<String>,
}

/// Decode the speedtest-cli JSON report. Rates arrive in bits per second;
/// the tool reports no jitter.
pub fn decode_cli_report(
    stdout: &str,
    requested_server: Option<&str>,
) -> ProbeResult<SpeedtestResult> {
    let report: CliReport = serde_json::from_str(stdout).map_err(|e| ProbeError::Parse {
        tool: "speedtest-cli".to_string(),
        reason: e.to_string(),
    })?;

    let server = report.server.as_ref();
    let server_id = server
        .and_then(|s| s.id.as_ref())
        .and_then(id_to_string)
        .or_else(|| requested_server.map(str::to_string));

    let sponsor = server.and_then(|s| s.sponsor.as_deref()).unwrap_or("");
    let name = server.and_then(|s| s.name.as_deref()).unwrap_or("");
    let server_name = match format!("{sponsor} - {name}")
        .trim_matches([' ', '-'])
        .to_string()
    {
        s if s.is_empty() => None,
        s => Some(s),
    };

    Ok(SpeedtestResult {
        tool: "speedtest-cli".to_string(),
        server_id,
        server_name,
        ping_ms: report.ping,
        jitter_ms: None,
        download_mbps: report.download.map(|bps| bps / 1e6),
        upload_mbps: report.upload.map(|bps| bps / 1e6),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_ookla_report() {
        let json = r#"{
            "ping": {"latency": 8.4, "jitter": 0.6},
            "download": {"bandwidth": 117500000},
            "upload": {"bandwidth": 4687500},
            "server": {"id": 21541, "name": "Fiber One", "location": "Springfield"}
        }"#;

        let result = decode_ookla_report(json, None).unwrap();
        assert_eq!(result.tool, "ookla");
        assert_eq!(result.server_id.as_deref(), Some("21541"));
        assert_eq!(result.server_name.as_deref(), Some("Fiber One - Springfield"));
        assert_eq!(result.ping_ms, Some(8.4));
        assert_eq!(result.jitter_ms, Some(0.6));
        // 117500000 B/s * 8 / 1e6 = 940 Mbps
        assert_eq!(result.download_mbps, Some(940.0));
        assert_eq!(result.upload_mbps, Some(37.5));
    }

    #[test]
    fn test_decode_ookla_falls_back_to_requested_server() {
        let json = r#"{"ping": {"latency": 10.0}}"#;
        let result = decode_ookla_report(json, Some("99")).unwrap();
        assert_eq!(result.server_id.as_deref(), Some("99"));
        assert!(result.server_name.is_none());
        assert!(result.download_mbps.is_none());
    }

    #[test]
    fn test_decode_ookla_garbage_is_parse_error() {
        let err = decode_ookla_report("rc=1 something broke", None).unwrap_err();
        assert!(matches!(err, ProbeError::Parse { .. }));
    }

    #[test]
    fn test_decode_cli_report() {
        let json = r#"{
            "ping": 14.2,
            "download": 93400000.0,
            "upload": 37100000.0,
            "server": {"id": "4392", "sponsor": "ISP Labs", "name": "Shelbyville"}
        }"#;

        let result = decode_cli_report(json, None).unwrap();
        assert_eq!(result.tool, "speedtest-cli");
        assert_eq!(result.server_id.as_deref(), Some("4392"));
        assert_eq!(result.server_name.as_deref(), Some("ISP Labs - Shelbyville"));
        assert_eq!(result.ping_ms, Some(14.2));
        assert!(result.jitter_ms.is_none());
        assert_eq!(result.download_mbps, Some(93.4));
        assert_eq!(result.upload_mbps, Some(37.1));
    }

    #[test]
    fn test_decode_server_list() {
        let out = "Closest servers:\n\
            \x20 1234) ISP Labs (Shelbyville) [12.3 km]\n\
            \x20 5678) Fiber One (Springfield) [15.0 km]\n\
            \x20 9012) Far Away (Elsewhere) [900 km]\n";

        let servers = decode_server_list(out, 2);
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].id, "1234");
        assert!(servers[0].name.starts_with("ISP Labs"));
        assert_eq!(servers[1].id, "5678");
    }

    #[test]
    fn test_decode_server_list_ignores_non_entries() {
        let out = "Retrieving speedtest.net configuration...\nno servers here\n";
        assert!(decode_server_list(out, 5).is_empty());
    }
}
