//! Hour-rotating CSV log
//!
//! Best-effort secondary sink next to the SQLite store. Records land in
//! `<base>/<YYYYMMDD_HH>/{pings,traceroutes,speedtests}.csv`, columns in the
//! same order as the durable schema. The bucket key is derived from the
//! record timestamp (UTC) at hour granularity; on key change every open
//! handle is flushed, closed and dropped, and per-kind files are lazily
//! reopened on first write in the new bucket. A header row is written only
//! when the target file is empty at open time, so re-appending after a
//! mid-hour restart never duplicates it.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use csv::Writer;

use crate::error::{StorageError, StorageResult};
use crate::model::{LatencySample, PathHop, ThroughputRecord};

/// The three per-hour file kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum CsvKind {
    Latency,
    Path,
    Throughput,
}

impl CsvKind {
    fn file_name(&self) -> &'static str {
        match self {
            CsvKind::Latency => "pings.csv",
            CsvKind::Path => "traceroutes.csv",
            CsvKind::Throughput => "speedtests.csv",
        }
    }

    fn header(&self) -> &'static [&'static str] {
        match self {
            CsvKind::Latency => &["ts_ms", "target", "tag", "rtt_ms", "success"],
            CsvKind::Path => &["ts_ms", "dest", "hop", "ip"],
            CsvKind::Throughput => &[
                "ts_ms",
                "tool",
                "server_id",
                "server_name",
                "ping_ms",
                "download_mbps",
                "upload_mbps",
                "jitter_ms",
            ],
        }
    }
}

/// Directory name for the hour bucket containing `ts_ms`
pub fn bucket_key(ts_ms: i64) -> String {
    let dt = DateTime::<Utc>::from_timestamp_millis(ts_ms).unwrap_or_else(Utc::now);
    dt.format("%Y%m%d_%H").to_string()
}

/// Rotating writer over the hourly CSV tree
pub struct HourlyCsvLog {
    base_dir: PathBuf,
    current_bucket: Option<String>,
    writers: HashMap<CsvKind, Writer<File>>,
}

impl HourlyCsvLog {
    /// Create the log rooted at `base_dir`, creating the directory if
    /// needed. Failure here is a fatal startup condition.
    pub fn new<P: AsRef<Path>>(base_dir: P) -> StorageResult<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        fs::create_dir_all(&base_dir).map_err(|_| StorageError::DirectoryCreationFailed {
            path: base_dir.to_string_lossy().to_string(),
        })?;

        Ok(Self {
            base_dir,
            current_bucket: None,
            writers: HashMap::new(),
        })
    }

    /// Append one latency row
    pub fn write_latency(&mut self, sample: &LatencySample) -> StorageResult<()> {
        let writer = self.ensure_writer(CsvKind::Latency, sample.ts_ms)?;
        writer.write_record([
            sample.ts_ms.to_string(),
            sample.target.clone(),
            sample.tag.as_str().to_string(),
            opt_f64(sample.rtt_ms),
            (sample.success as u8).to_string(),
        ])?;
        writer.flush().map_err(|e| StorageError::CsvWriteFailed {
            reason: e.to_string(),
        })?;
        Ok(())
    }

    /// Append one path hop row
    pub fn write_path_hop(&mut self, hop: &PathHop) -> StorageResult<()> {
        let writer = self.ensure_writer(CsvKind::Path, hop.ts_ms)?;
        writer.write_record([
            hop.ts_ms.to_string(),
            hop.dest.clone(),
            hop.hop.to_string(),
            hop.ip.clone().unwrap_or_default(),
        ])?;
        writer.flush().map_err(|e| StorageError::CsvWriteFailed {
            reason: e.to_string(),
        })?;
        Ok(())
    }

    /// Append one throughput row
    pub fn write_throughput(&mut self, record: &ThroughputRecord) -> StorageResult<()> {
        let writer = self.ensure_writer(CsvKind::Throughput, record.ts_ms)?;
        writer.write_record([
            record.ts_ms.to_string(),
            record.tool.clone(),
            record.server_id.clone().unwrap_or_default(),
            record.server_name.clone().unwrap_or_default(),
            opt_f64(record.ping_ms),
            opt_f64(record.download_mbps),
            opt_f64(record.upload_mbps),
            opt_f64(record.jitter_ms),
        ])?;
        writer.flush().map_err(|e| StorageError::CsvWriteFailed {
            reason: e.to_string(),
        })?;
        Ok(())
    }

    /// Flush and drop every open handle
    pub fn close(&mut self) {
        self.rotate();
    }

    fn rotate(&mut self) {
        for (kind, mut writer) in self.writers.drain() {
            if let Err(e) = writer.flush() {
                tracing::warn!("Failed to flush {} on rotation: {}", kind.file_name(), e);
            }
        }
    }

    fn ensure_writer(&mut self, kind: CsvKind, ts_ms: i64) -> StorageResult<&mut Writer<File>> {
        let bucket = bucket_key(ts_ms);

        if self.current_bucket.as_deref() != Some(bucket.as_str()) {
            self.rotate();
            self.current_bucket = Some(bucket.clone());
        }

        if !self.writers.contains_key(&kind) {
            let dir = self.base_dir.join(&bucket);
            fs::create_dir_all(&dir).map_err(|_| StorageError::DirectoryCreationFailed {
                path: dir.to_string_lossy().to_string(),
            })?;

            let path = dir.join(kind.file_name());
            let file = OpenOptions::new()
                .append(true)
                .create(true)
                .open(&path)
                .map_err(|e| StorageError::CsvWriteFailed {
                    reason: format!("{}: {}", path.display(), e),
                })?;

            let is_empty = file
                .metadata()
                .map_err(|e| StorageError::CsvWriteFailed {
                    reason: e.to_string(),
                })?
                .len()
                == 0;

            let mut writer = csv::WriterBuilder::new().from_writer(file);
            if is_empty {
                writer.write_record(kind.header())?;
            }
            self.writers.insert(kind, writer);
        }

        // contains_key checked above
        Ok(self.writers.get_mut(&kind).expect("writer just inserted"))
    }
}

impl Drop for HourlyCsvLog {
    fn drop(&mut self) {
        self.rotate();
    }
}

fn opt_f64(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}
