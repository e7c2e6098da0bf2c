//! Measurement scheduler
//!
//! One cooperative loop multiplexing three independently-due timers (path
//! discovery refresh, latency cadence, throughput cadence) on a single
//! task. No two measurement kinds, and no two probes within a kind, ever
//! execute concurrently: the external probes contend for the same network
//! budget and throughput validity depends on exclusive access.
//!
//! Cancellation is checked between cycles, between latency targets and
//! between throughput servers, never inside a probe call; a probe already
//! in flight runs to its own timeout.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use netpulse_core::model::epoch_ms;
use netpulse_core::{
    CollectorConfig, HopTag, HourlyCsvLog, LatencySample, MeasurementStore, PathHop,
    ThroughputRecord,
};

use crate::probes::{ProbeSuite, SpeedtestTool};

const IDLE_STEP: Duration = Duration::from_millis(100);
const MAX_HOPS: usize = 3;

/// Throughput execution plan, fixed at startup
///
/// Each entry is one probe per batch; `None` means the tool picks its own
/// default server.
#[derive(Debug, Clone)]
pub struct ThroughputPlan {
    pub tool: String,
    pub servers: Vec<Option<String>>,
}

impl ThroughputPlan {
    /// Evaluate the server selection policy once: pinned ids win, then
    /// auto-selection of the first `count` ranked servers, then the tool
    /// default.
    pub async fn build(
        tool: &SpeedtestTool,
        pinned: &[String],
        auto_select: bool,
        count: usize,
    ) -> Self {
        let servers = if !pinned.is_empty() {
            pinned.iter().cloned().map(Some).collect()
        } else if auto_select {
            match tool.list_servers(count).await {
                Ok(listed) if !listed.is_empty() => {
                    listed.into_iter().map(|s| Some(s.id)).collect()
                }
                Ok(_) => {
                    tracing::warn!(
                        "Could not auto-select speedtest servers; using the tool's default"
                    );
                    vec![None]
                }
                Err(e) => {
                    tracing::warn!("Speedtest server listing failed ({}); using default", e);
                    vec![None]
                }
            }
        } else {
            vec![None]
        };

        Self {
            tool: tool.name().to_string(),
            servers,
        }
    }
}

/// The cooperative measurement loop
pub struct Scheduler<P: ProbeSuite> {
    config: CollectorConfig,
    probes: P,
    store: MeasurementStore,
    csv: HourlyCsvLog,
    plan: Option<ThroughputPlan>,

    hops: Vec<String>,
    last_discovery: Option<Instant>,
    last_throughput: Option<Instant>,
}

impl<P: ProbeSuite> Scheduler<P> {
    pub fn new(
        config: CollectorConfig,
        probes: P,
        store: MeasurementStore,
        csv: HourlyCsvLog,
        plan: Option<ThroughputPlan>,
    ) -> Self {
        Self {
            config,
            probes,
            store,
            csv,
            plan,
            hops: Vec::new(),
            last_discovery: None,
            last_throughput: None,
        }
    }

    /// Run until the token is cancelled. Flushes the CSV tree on the way
    /// out.
    pub async fn run(&mut self, token: CancellationToken) {
        tracing::info!(
            "Collector started: dest={} ping={}s trace={}s speedtest={}s",
            self.config.dest_host,
            self.config.ping_interval_sec,
            self.config.traceroute_refresh_sec,
            self.config.speedtest_interval_sec,
        );
        if let Some(plan) = &self.plan {
            let ids: Vec<&str> = plan
                .servers
                .iter()
                .map(|s| s.as_deref().unwrap_or("(default)"))
                .collect();
            tracing::info!(
                "Speedtest tool={} servers={}; runs are strictly sequential",
                plan.tool,
                ids.join(",")
            );
        }

        while !token.is_cancelled() {
            self.cycle(&token).await;
            self.idle_wait(&token).await;
        }

        self.csv.close();
        tracing::info!("Collector stopped");
    }

    /// One pass over all three due-conditions. Public so tests can drive
    /// cycles deterministically.
    pub async fn cycle(&mut self, token: &CancellationToken) {
        self.refresh_path_if_due().await;

        if token.is_cancelled() {
            return;
        }
        self.probe_latency_targets(token).await;

        if token.is_cancelled() {
            return;
        }
        self.run_throughput_if_due(token).await;
    }

    /// Step 1: path discovery, due on first cycle or when the refresh
    /// interval has elapsed. The clock resets unconditionally, even on an
    /// empty result: a failed discovery backs off until the next window
    /// rather than retrying every cycle.
    async fn refresh_path_if_due(&mut self) {
        let refresh = Duration::from_secs(self.config.traceroute_refresh_sec);
        let due = match self.last_discovery {
            None => true,
            Some(at) => at.elapsed() >= refresh,
        };
        if !due {
            return;
        }

        let dest = self.config.dest_host.clone();
        let mut hops = match self.probes.discover_path(&dest).await {
            Ok(hops) => hops,
            Err(e) => {
                tracing::error!("Path discovery failed: {}", e);
                Vec::new()
            }
        };
        hops.truncate(MAX_HOPS);

        let ts_ms = epoch_ms();
        tracing::info!("Path hops: {:?}", hops);

        if let Err(e) = self.store.insert_path_hops(ts_ms, &dest, &hops) {
            tracing::error!("Failed to store path hops: {}", e);
        }
        for (i, ip) in hops.iter().enumerate() {
            let hop = PathHop {
                ts_ms,
                dest: dest.clone(),
                hop: (i + 1) as u8,
                ip: Some(ip.clone()),
            };
            if let Err(e) = self.csv.write_path_hop(&hop) {
                tracing::warn!("Failed to log path hop to CSV: {}", e);
            }
        }

        self.hops = hops;
        self.last_discovery = Some(Instant::now());
    }

    /// Step 2: one latency attempt per known hop (in index order) plus the
    /// destination, every cycle. Each sample is persisted immediately;
    /// one lost target never blocks the next.
    async fn probe_latency_targets(&mut self, token: &CancellationToken) {
        let mut targets: Vec<(String, HopTag)> = self
            .hops
            .iter()
            .enumerate()
            .filter_map(|(i, ip)| HopTag::for_hop((i + 1) as u8).map(|tag| (ip.clone(), tag)))
            .collect();
        targets.push((self.config.dest_host.clone(), HopTag::Dest));

        for (target, tag) in targets {
            if token.is_cancelled() {
                break;
            }

            let ts_ms = epoch_ms();
            let outcome = self.probes.ping(&target).await;
            let sample = match outcome.rtt_ms.filter(|_| outcome.success) {
                Some(rtt) => {
                    tracing::debug!("ping {} {} {:.2} ms", tag, target, rtt);
                    LatencySample::success(ts_ms, target, tag, rtt)
                }
                None => {
                    tracing::debug!("ping {} {} lost", tag, target);
                    LatencySample::lost(ts_ms, target, tag)
                }
            };

            if let Err(e) = self.store.insert_latency(&sample) {
                tracing::error!("Failed to store latency sample: {}", e);
            }
            if let Err(e) = self.csv.write_latency(&sample) {
                tracing::warn!("Failed to log latency sample to CSV: {}", e);
            }
        }
    }

    /// Step 3: throughput, due when the interval has elapsed. Servers run
    /// strictly sequentially; a failed server is logged with no row and
    /// never blocks the next. The clock advances once per batch, even
    /// when the batch was interrupted by shutdown.
    async fn run_throughput_if_due(&mut self, token: &CancellationToken) {
        let Some(plan) = self.plan.clone() else {
            return;
        };

        let interval = Duration::from_secs(self.config.speedtest_interval_sec);
        let due = match self.last_throughput {
            None => true,
            Some(at) => at.elapsed() >= interval,
        };
        if !due {
            return;
        }

        for server_id in &plan.servers {
            if token.is_cancelled() {
                break;
            }

            let ts_ms = epoch_ms();
            match self.probes.throughput(server_id.as_deref()).await {
                Ok(result) => {
                    tracing::info!(
                        "speedtest {} {} down={:?} up={:?} ping={:?}",
                        result.server_id.as_deref().unwrap_or("-"),
                        result.server_name.as_deref().unwrap_or("-"),
                        result.download_mbps,
                        result.upload_mbps,
                        result.ping_ms,
                    );
                    let record = ThroughputRecord {
                        ts_ms,
                        tool: result.tool,
                        server_id: result.server_id,
                        server_name: result.server_name,
                        ping_ms: result.ping_ms,
                        download_mbps: result.download_mbps,
                        upload_mbps: result.upload_mbps,
                        jitter_ms: result.jitter_ms,
                    };
                    if let Err(e) = self.store.insert_throughput(&record) {
                        tracing::error!("Failed to store throughput result: {}", e);
                    }
                    if let Err(e) = self.csv.write_throughput(&record) {
                        tracing::warn!("Failed to log throughput result to CSV: {}", e);
                    }
                }
                Err(e) => {
                    tracing::error!(
                        "speedtest failed for server {}: {}",
                        server_id.as_deref().unwrap_or("(default)"),
                        e
                    );
                }
            }
        }

        self.last_throughput = Some(Instant::now());
    }

    /// Idle in short increments until the latency cadence elapses, so a
    /// shutdown request is observed promptly.
    async fn idle_wait(&self, token: &CancellationToken) {
        let deadline = Instant::now() + Duration::from_secs(self.config.ping_interval_sec);
        while Instant::now() < deadline {
            if token.is_cancelled() {
                return;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::time::sleep(remaining.min(IDLE_STEP)).await;
        }
    }
}
