//! End-to-end collector pipeline tests
//!
//! Drive scheduler cycles with scripted probes against real sinks in a
//! temporary directory, then verify the results through both the query
//! layer and the CSV tree.

use netpulse_collector::probes::SpeedtestResult;
use netpulse_collector::{Scheduler, ThroughputPlan};
use netpulse_core::csvlog::bucket_key;
use netpulse_core::{query, HopTag, HourlyCsvLog, MeasurementStore};
use netpulse_tests::{csv_data_rows, test_config, ScriptedProbes};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn ookla_result() -> SpeedtestResult {
    SpeedtestResult {
        tool: "ookla".to_string(),
        server_id: None,
        server_name: Some("Fast - Town".to_string()),
        ping_ms: Some(8.0),
        jitter_ms: Some(0.4),
        download_mbps: Some(940.0),
        upload_mbps: Some(37.5),
    }
}

#[tokio::test]
async fn test_one_cycle_populates_both_sinks_consistently() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    let db_path = config.db_path();

    let probes = ScriptedProbes::with_hops(&["10.0.0.1", "172.16.0.1"])
        .rtt("10.0.0.1", 1.2)
        .rtt("172.16.0.1", 4.8)
        .rtt("8.8.8.8", 12.5)
        .throughput(ookla_result());
    let plan = ThroughputPlan {
        tool: "ookla".to_string(),
        servers: vec![Some("1234".to_string())],
    };

    let store = MeasurementStore::open(&db_path).unwrap();
    let csv = HourlyCsvLog::new(config.log_dir.clone()).unwrap();
    let mut scheduler = Scheduler::new(config.clone(), probes, store, csv, Some(plan));

    scheduler.cycle(&CancellationToken::new()).await;

    // Durable store holds the full cycle
    let samples = query::latency_raw(&db_path, 0, i64::MAX).unwrap();
    assert_eq!(samples.len(), 3);
    assert!(samples.iter().all(|s| s.success));
    assert_eq!(samples[2].tag, HopTag::Dest);
    assert_eq!(samples[2].rtt_ms, Some(12.5));

    let hops = query::latest_path(&db_path).unwrap();
    assert_eq!(hops.len(), 2);
    assert_eq!(hops[0].ip.as_deref(), Some("10.0.0.1"));

    let throughput = query::throughput(&db_path, 0, i64::MAX).unwrap();
    assert_eq!(throughput.len(), 1);
    assert_eq!(throughput[0].server_id.as_deref(), Some("1234"));
    assert_eq!(throughput[0].download_mbps, Some(940.0));

    // CSV tree mirrors the store, row for row
    let bucket = config.log_dir.join(bucket_key(samples[0].ts_ms));
    assert_eq!(csv_data_rows(&bucket.join("pings.csv")), 3);
    assert_eq!(csv_data_rows(&bucket.join("traceroutes.csv")), 2);
    assert_eq!(csv_data_rows(&bucket.join("speedtests.csv")), 1);
}

#[tokio::test]
async fn test_lost_destination_recorded_as_loss_in_both_sinks() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    let db_path = config.db_path();

    // No scripted RTTs at all: everything is lost
    let probes = ScriptedProbes::with_hops(&[]);
    let store = MeasurementStore::open(&db_path).unwrap();
    let csv = HourlyCsvLog::new(config.log_dir.clone()).unwrap();
    let mut scheduler = Scheduler::new(config.clone(), probes, store, csv, None);

    scheduler.cycle(&CancellationToken::new()).await;

    let samples = query::latency_raw(&db_path, 0, i64::MAX).unwrap();
    assert_eq!(samples.len(), 1);
    assert!(!samples[0].success);
    assert!(samples[0].rtt_ms.is_none());

    let bucket = config.log_dir.join(bucket_key(samples[0].ts_ms));
    let mut reader = csv::Reader::from_path(bucket.join("pings.csv")).unwrap();
    let record = reader.records().next().unwrap().unwrap();
    assert_eq!(&record[1], "8.8.8.8");
    assert_eq!(&record[3], "", "lost sample keeps an empty rtt field");
    assert_eq!(&record[4], "0");
}

#[tokio::test]
async fn test_reader_sees_rows_while_writer_connection_open() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    let db_path = config.db_path();

    let probes = ScriptedProbes::with_hops(&["10.0.0.1"]).rtt("10.0.0.1", 2.0);
    let store = MeasurementStore::open(&db_path).unwrap();
    let csv = HourlyCsvLog::new(config.log_dir.clone()).unwrap();
    let mut scheduler = Scheduler::new(config, probes, store, csv, None);

    scheduler.cycle(&CancellationToken::new()).await;

    // The scheduler still owns its write connection; WAL mode lets the
    // read side open the same file concurrently.
    let samples = query::latency_raw(&db_path, 0, i64::MAX).unwrap();
    assert_eq!(samples.len(), 2);

    scheduler.cycle(&CancellationToken::new()).await;
    let samples = query::latency_raw(&db_path, 0, i64::MAX).unwrap();
    assert_eq!(samples.len(), 4);
}

#[tokio::test]
async fn test_repeated_cycles_accumulate_latency_only() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    let db_path = config.db_path();

    let probes = ScriptedProbes::with_hops(&["10.0.0.1"])
        .rtt("10.0.0.1", 2.0)
        .rtt("8.8.8.8", 9.0)
        .throughput(ookla_result());
    let plan = ThroughputPlan {
        tool: "ookla".to_string(),
        servers: vec![None],
    };

    let store = MeasurementStore::open(&db_path).unwrap();
    let csv = HourlyCsvLog::new(config.log_dir.clone()).unwrap();
    let mut scheduler = Scheduler::new(config, probes, store, csv, Some(plan));

    let token = CancellationToken::new();
    for _ in 0..3 {
        scheduler.cycle(&token).await;
    }

    // Latency runs every cycle; discovery and throughput ran once since
    // their intervals have not elapsed.
    assert_eq!(query::latency_raw(&db_path, 0, i64::MAX).unwrap().len(), 6);
    assert_eq!(query::latest_path(&db_path).unwrap().len(), 1);
    assert_eq!(query::throughput(&db_path, 0, i64::MAX).unwrap().len(), 1);
}
