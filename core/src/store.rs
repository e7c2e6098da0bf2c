//! Durable measurement store
//!
//! SQLite-backed append-only store. The collector process holds the single
//! writer connection for its whole lifetime; the query server opens its own
//! read connections against the same file. WAL mode is a hard requirement:
//! it is what lets the reader process query concurrently without blocking
//! the writer.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{params, Connection};

use crate::error::{StorageError, StorageResult};
use crate::model::{LatencySample, ThroughputRecord};

/// Single-writer handle to the durable store
pub struct MeasurementStore {
    conn: Connection,
    path: PathBuf,
}

impl MeasurementStore {
    /// Open (creating if needed) the store at `path` and initialize the
    /// schema. Fails only on unrecoverable conditions; a store that cannot
    /// be opened terminates the collector at startup.
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|_| StorageError::DirectoryCreationFailed {
                path: parent.to_string_lossy().to_string(),
            })?;
        }

        let conn = Connection::open(&path).map_err(|e| StorageError::OpenFailed {
            reason: e.to_string(),
        })?;

        conn.busy_timeout(Duration::from_secs(30))
            .map_err(|e| StorageError::OpenFailed {
                reason: e.to_string(),
            })?;

        // journal_mode returns the resulting mode as a row
        let mode: String = conn
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))
            .map_err(|e| StorageError::OpenFailed {
                reason: e.to_string(),
            })?;
        if !mode.eq_ignore_ascii_case("wal") {
            return Err(StorageError::OpenFailed {
                reason: format!("journal_mode=WAL rejected, got {mode}"),
            });
        }

        let store = Self { conn, path };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> StorageResult<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS pings (
                 ts_ms INTEGER NOT NULL,
                 target TEXT NOT NULL,
                 tag TEXT NOT NULL,
                 rtt_ms REAL,
                 success INTEGER NOT NULL CHECK (success IN (0,1))
             );
             CREATE INDEX IF NOT EXISTS idx_pings_ts ON pings(ts_ms);
             CREATE INDEX IF NOT EXISTS idx_pings_target ON pings(target);

             CREATE TABLE IF NOT EXISTS traceroutes (
                 ts_ms INTEGER NOT NULL,
                 dest TEXT NOT NULL,
                 hop INTEGER NOT NULL,
                 ip TEXT
             );
             CREATE INDEX IF NOT EXISTS idx_traces_ts ON traceroutes(ts_ms);

             CREATE TABLE IF NOT EXISTS speedtests (
                 ts_ms INTEGER NOT NULL,
                 tool TEXT NOT NULL,
                 server_id TEXT,
                 server_name TEXT,
                 ping_ms REAL,
                 download_mbps REAL,
                 upload_mbps REAL,
                 jitter_ms REAL
             );
             CREATE INDEX IF NOT EXISTS idx_speed_ts ON speedtests(ts_ms);",
        )?;

        tracing::info!("Initialized measurement store at {}", self.path.display());
        Ok(())
    }

    /// Path of the underlying database file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one latency sample
    pub fn insert_latency(&self, sample: &LatencySample) -> StorageResult<()> {
        self.conn
            .execute(
                "INSERT INTO pings (ts_ms, target, tag, rtt_ms, success) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    sample.ts_ms,
                    sample.target,
                    sample.tag.as_str(),
                    sample.rtt_ms,
                    sample.success as i64,
                ],
            )
            .map_err(|e| StorageError::WriteFailed {
                reason: e.to_string(),
            })?;
        Ok(())
    }

    /// Append one discovery cycle's hops under a single shared timestamp.
    ///
    /// At most 3 addresses are recorded; the caller is expected to have
    /// truncated already, anything longer is rejected.
    pub fn insert_path_hops(&self, ts_ms: i64, dest: &str, ips: &[String]) -> StorageResult<()> {
        if ips.len() > 3 {
            return Err(StorageError::InvalidHop {
                hop: ips.len() as u8,
            });
        }

        for (i, ip) in ips.iter().enumerate() {
            self.conn
                .execute(
                    "INSERT INTO traceroutes (ts_ms, dest, hop, ip) VALUES (?1, ?2, ?3, ?4)",
                    params![ts_ms, dest, (i + 1) as i64, ip],
                )
                .map_err(|e| StorageError::WriteFailed {
                    reason: e.to_string(),
                })?;
        }
        Ok(())
    }

    /// Append one throughput result
    pub fn insert_throughput(&self, record: &ThroughputRecord) -> StorageResult<()> {
        self.conn
            .execute(
                "INSERT INTO speedtests
                     (ts_ms, tool, server_id, server_name, ping_ms, download_mbps, upload_mbps, jitter_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    record.ts_ms,
                    record.tool,
                    record.server_id,
                    record.server_name,
                    record.ping_ms,
                    record.download_mbps,
                    record.upload_mbps,
                    record.jitter_ms,
                ],
            )
            .map_err(|e| StorageError::WriteFailed {
                reason: e.to_string(),
            })?;
        Ok(())
    }
}
