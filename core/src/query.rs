//! Read-side queries over the durable store
//!
//! Stateless, read-only. Every call opens its own transient connection so
//! the query server can serve arbitrary read concurrency; the store's WAL
//! mode is the only coordination with the writer process. A database file
//! that does not exist yet yields empty results rather than an error: the
//! collector may simply not have started.

use std::path::Path;
use std::time::Duration;

use rusqlite::{params, Connection, OpenFlags};

use crate::error::{StorageError, StorageResult};
use crate::model::{LatencyBucket, LatencySample, PathHop, ThroughputRecord};

fn open_read_only(db_path: &Path) -> StorageResult<Option<Connection>> {
    if !db_path.exists() {
        return Ok(None);
    }

    let conn = Connection::open_with_flags(
        db_path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| StorageError::OpenFailed {
        reason: e.to_string(),
    })?;

    conn.busy_timeout(Duration::from_secs(15))
        .map_err(|e| StorageError::OpenFailed {
            reason: e.to_string(),
        })?;

    Ok(Some(conn))
}

/// All latency samples with `start_ms <= ts_ms <= end_ms`, ascending by
/// timestamp (insertion order within equal timestamps).
pub fn latency_raw(
    db_path: &Path,
    start_ms: i64,
    end_ms: i64,
) -> StorageResult<Vec<LatencySample>> {
    let Some(conn) = open_read_only(db_path)? else {
        return Ok(Vec::new());
    };

    let mut stmt = conn.prepare(
        "SELECT ts_ms, target, tag, rtt_ms, success
         FROM pings
         WHERE ts_ms BETWEEN ?1 AND ?2
         ORDER BY ts_ms ASC, rowid ASC",
    )?;

    let rows = stmt.query_map(params![start_ms, end_ms], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, Option<f64>>(3)?,
            row.get::<_, i64>(4)?,
        ))
    })?;

    let mut samples = Vec::new();
    for row in rows {
        let (ts_ms, target, tag, rtt_ms, success) = row?;
        let tag = tag.parse().map_err(|reason| StorageError::QueryFailed {
            reason,
        })?;
        samples.push(LatencySample {
            ts_ms,
            target,
            tag,
            rtt_ms,
            success: success != 0,
        });
    }
    Ok(samples)
}

/// Server-side downsampling: groups samples into `bucket_ms`-wide buckets
/// per hop tag. The aggregation runs inside SQLite; raw rows never cross
/// the connection, which is what keeps multi-week ranges bounded.
pub fn latency_bucketed(
    db_path: &Path,
    start_ms: i64,
    end_ms: i64,
    bucket_ms: i64,
) -> StorageResult<Vec<LatencyBucket>> {
    if bucket_ms <= 0 {
        return Err(StorageError::QueryFailed {
            reason: format!("bucket width must be positive, got {bucket_ms}"),
        });
    }

    let Some(conn) = open_read_only(db_path)? else {
        return Ok(Vec::new());
    };

    // bucket = floor(ts_ms / bucket_ms) * bucket_ms; the average covers
    // successful samples only
    let mut stmt = conn.prepare(
        "SELECT ((ts_ms / ?1) * ?1) AS bucket_ts,
                tag,
                AVG(CASE WHEN success=1 THEN rtt_ms END) AS avg_rtt,
                SUM(success) AS success_count,
                COUNT(*) AS total_count
         FROM pings
         WHERE ts_ms BETWEEN ?2 AND ?3
         GROUP BY bucket_ts, tag
         ORDER BY bucket_ts ASC, tag ASC",
    )?;

    let rows = stmt.query_map(params![bucket_ms, start_ms, end_ms], |row| {
        Ok(LatencyBucket {
            bucket_ts: row.get(0)?,
            tag: row.get(1)?,
            avg_rtt_ms: row.get(2)?,
            success_count: row.get(3)?,
            total_count: row.get(4)?,
        })
    })?;

    rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
}

/// All throughput rows in range, ascending by timestamp, unaggregated
pub fn throughput(
    db_path: &Path,
    start_ms: i64,
    end_ms: i64,
) -> StorageResult<Vec<ThroughputRecord>> {
    let Some(conn) = open_read_only(db_path)? else {
        return Ok(Vec::new());
    };

    let mut stmt = conn.prepare(
        "SELECT ts_ms, tool, server_id, server_name, ping_ms, download_mbps, upload_mbps, jitter_ms
         FROM speedtests
         WHERE ts_ms BETWEEN ?1 AND ?2
         ORDER BY ts_ms ASC, rowid ASC",
    )?;

    let rows = stmt.query_map(params![start_ms, end_ms], |row| {
        Ok(ThroughputRecord {
            ts_ms: row.get(0)?,
            tool: row.get(1)?,
            server_id: row.get(2)?,
            server_name: row.get(3)?,
            ping_ms: row.get(4)?,
            download_mbps: row.get(5)?,
            upload_mbps: row.get(6)?,
            jitter_ms: row.get(7)?,
        })
    })?;

    rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
}

/// The most recent discovery snapshot: every hop sharing the maximum
/// timestamp, ascending by hop index. Valid because the collector stamps
/// all hops of one discovery cycle with one timestamp.
pub fn latest_path(db_path: &Path) -> StorageResult<Vec<PathHop>> {
    let Some(conn) = open_read_only(db_path)? else {
        return Ok(Vec::new());
    };

    let max_ts: Option<i64> = conn.query_row("SELECT MAX(ts_ms) FROM traceroutes", [], |row| {
        row.get(0)
    })?;
    let Some(max_ts) = max_ts else {
        return Ok(Vec::new());
    };

    let mut stmt = conn.prepare(
        "SELECT ts_ms, dest, hop, ip
         FROM traceroutes
         WHERE ts_ms = ?1
         ORDER BY hop ASC",
    )?;

    let rows = stmt.query_map(params![max_ts], |row| {
        Ok(PathHop {
            ts_ms: row.get(0)?,
            dest: row.get(1)?,
            hop: row.get::<_, i64>(2)? as u8,
            ip: row.get(3)?,
        })
    })?;

    rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::HopTag;
    use crate::store::MeasurementStore;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn seeded_store() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.db");
        let _store = MeasurementStore::open(&path).unwrap();
        (dir, path)
    }

    #[test]
    fn test_missing_database_yields_empty_results() {
        let path = Path::new("/nonexistent/netpulse.db");
        assert!(latency_raw(path, 0, 100).unwrap().is_empty());
        assert!(latency_bucketed(path, 0, 100, 10).unwrap().is_empty());
        assert!(throughput(path, 0, 100).unwrap().is_empty());
        assert!(latest_path(path).unwrap().is_empty());
    }

    #[test]
    fn test_raw_query_is_ascending_and_range_bounded() {
        let (_dir, path) = seeded_store();
        let store = MeasurementStore::open(&path).unwrap();
        for ts in [3000, 1000, 2000, 5000] {
            store
                .insert_latency(&LatencySample::success(ts, "1.1.1.1", HopTag::Dest, 1.0))
                .unwrap();
        }

        let rows = latency_raw(&path, 1000, 3000).unwrap();
        let timestamps: Vec<i64> = rows.iter().map(|s| s.ts_ms).collect();
        assert_eq!(timestamps, vec![1000, 2000, 3000]);
    }

    #[test]
    fn test_raw_query_preserves_insertion_order_and_null_rtt() {
        let (_dir, path) = seeded_store();
        let store = MeasurementStore::open(&path).unwrap();
        store
            .insert_latency(&LatencySample::success(1000, "1.1.1.1", HopTag::Hop1, 12.5))
            .unwrap();
        store
            .insert_latency(&LatencySample::lost(1000, "8.8.8.8", HopTag::Dest))
            .unwrap();

        let rows = latency_raw(&path, 0, 2000).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].target, "1.1.1.1");
        assert_eq!(rows[0].rtt_ms, Some(12.5));
        assert_eq!(rows[1].target, "8.8.8.8");
        assert!(rows[1].rtt_ms.is_none());
        assert!(!rows[1].success);
    }

    #[test]
    fn test_bucketed_query_splits_and_averages() {
        let (_dir, path) = seeded_store();
        let store = MeasurementStore::open(&path).unwrap();
        for (ts, rtt) in [(0, 10.0), (1000, 20.0), (2000, 30.0), (3000, 50.0)] {
            store
                .insert_latency(&LatencySample::success(ts, "8.8.8.8", HopTag::Dest, rtt))
                .unwrap();
        }

        let buckets = latency_bucketed(&path, 0, 3999, 2000).unwrap();
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].bucket_ts, 0);
        assert_eq!(buckets[0].avg_rtt_ms, Some(15.0));
        assert_eq!(buckets[1].bucket_ts, 2000);
        assert_eq!(buckets[1].avg_rtt_ms, Some(40.0));
    }

    #[test]
    fn test_bucketed_query_invariants() {
        let (_dir, path) = seeded_store();
        let store = MeasurementStore::open(&path).unwrap();
        store
            .insert_latency(&LatencySample::success(1500, "a", HopTag::Hop1, 5.0))
            .unwrap();
        store
            .insert_latency(&LatencySample::lost(1700, "a", HopTag::Hop1))
            .unwrap();
        store
            .insert_latency(&LatencySample::lost(4200, "b", HopTag::Hop2))
            .unwrap();

        let buckets = latency_bucketed(&path, 0, 10_000, 1000).unwrap();
        for bucket in &buckets {
            assert_eq!(bucket.bucket_ts % 1000, 0);
            assert!(bucket.success_count <= bucket.total_count);
            assert_eq!(bucket.avg_rtt_ms.is_none(), bucket.success_count == 0);
        }

        // failure-only bucket keeps its loss accounting
        let loss_bucket = buckets.iter().find(|b| b.bucket_ts == 4000).unwrap();
        assert_eq!(loss_bucket.success_count, 0);
        assert_eq!(loss_bucket.total_count, 1);
        assert!(loss_bucket.avg_rtt_ms.is_none());
    }

    #[test]
    fn test_bucketed_query_is_deterministic() {
        let (_dir, path) = seeded_store();
        let store = MeasurementStore::open(&path).unwrap();
        for ts in 0..50 {
            store
                .insert_latency(&LatencySample::success(
                    ts * 137,
                    "8.8.8.8",
                    HopTag::Dest,
                    ts as f64,
                ))
                .unwrap();
        }

        let first = latency_bucketed(&path, 0, 10_000, 500).unwrap();
        let second = latency_bucketed(&path, 0, 10_000, 500).unwrap();
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn test_zero_bucket_width_rejected() {
        let (_dir, path) = seeded_store();
        assert!(latency_bucketed(&path, 0, 100, 0).is_err());
    }

    #[test]
    fn test_latest_path_returns_only_newest_snapshot() {
        let (_dir, path) = seeded_store();
        let store = MeasurementStore::open(&path).unwrap();
        store
            .insert_path_hops(1000, "8.8.8.8", &["10.0.0.1".to_string()])
            .unwrap();
        store
            .insert_path_hops(
                2000,
                "8.8.8.8",
                &["10.0.0.2".to_string(), "172.16.0.1".to_string()],
            )
            .unwrap();

        let hops = latest_path(&path).unwrap();
        assert_eq!(hops.len(), 2);
        assert!(hops.iter().all(|h| h.ts_ms == 2000));
        assert_eq!(hops[0].hop, 1);
        assert_eq!(hops[0].ip.as_deref(), Some("10.0.0.2"));
        assert_eq!(hops[1].hop, 2);
    }

    #[test]
    fn test_throughput_query_ascending() {
        let (_dir, path) = seeded_store();
        let store = MeasurementStore::open(&path).unwrap();
        for ts in [500, 100, 300] {
            store
                .insert_throughput(&ThroughputRecord {
                    ts_ms: ts,
                    tool: "ookla".to_string(),
                    server_id: None,
                    server_name: None,
                    ping_ms: None,
                    download_mbps: Some(100.0),
                    upload_mbps: None,
                    jitter_ms: None,
                })
                .unwrap();
        }

        let rows = throughput(&path, 0, 1000).unwrap();
        let timestamps: Vec<i64> = rows.iter().map(|r| r.ts_ms).collect();
        assert_eq!(timestamps, vec![100, 300, 500]);
    }
}
