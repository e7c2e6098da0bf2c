//! HTTP query API
//!
//! Three read-only endpoints over the measurement database:
//!
//!   GET /api/latency?start=<ms>&end=<ms>&bucket_ms=<ms>
//!   GET /api/throughput?start=<ms>&end=<ms>
//!   GET /api/latest_path
//!
//! Rows are serialized as positional JSON arrays in durable-schema order,
//! which keeps chart-sized responses compact. The server holds no state
//! between requests; every request opens its own read-only connection on
//! a blocking worker, so a missing database (collector not started yet)
//! yields empty arrays rather than an error.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use netpulse_core::model::epoch_ms;
use netpulse_core::{query, StorageError};

/// Shared request context
#[derive(Debug, Clone)]
pub struct AppState {
    pub db_path: PathBuf,
    /// Window applied when the caller gives no explicit range
    pub default_window_ms: i64,
}

/// Query-side failures surfaced over HTTP
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("invalid query parameter: {reason}")]
    BadRequest { reason: String },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("query worker failed: {reason}")]
    Worker { reason: String },
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::Storage(_) | ApiError::Worker { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Time-range parameters shared by the range endpoints
#[derive(Debug, Deserialize)]
pub struct RangeParams {
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub bucket_ms: Option<i64>,
}

impl RangeParams {
    /// Resolve absent bounds: `end` defaults to now, `start` to one
    /// default window before `end`.
    fn resolve(&self, default_window_ms: i64) -> Result<(i64, i64), ApiError> {
        let end = self.end.unwrap_or_else(epoch_ms);
        let start = self.start.unwrap_or(end.saturating_sub(default_window_ms));
        if start > end {
            return Err(ApiError::BadRequest {
                reason: format!("start ({start}) is after end ({end})"),
            });
        }
        Ok((start, end))
    }
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/latency", get(latency))
        .route("/api/throughput", get(throughput))
        .route("/api/latest_path", get(latest_path))
        .fallback(not_found)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "not found")
}

/// Latency samples, raw or bucketed depending on `bucket_ms`.
///
/// Raw rows: `[ts_ms, target, tag, rtt_ms|null, success]`.
/// Bucketed rows: `[bucket_ts, tag, avg_rtt_ms|null, success_count,
/// total_count]`. `bucket_ms=0` (or absent) selects raw rows.
async fn latency(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RangeParams>,
) -> Result<Json<Vec<Value>>, ApiError> {
    let (start, end) = params.resolve(state.default_window_ms)?;
    let db_path = state.db_path.clone();

    match params.bucket_ms {
        Some(bucket_ms) if bucket_ms < 0 => Err(ApiError::BadRequest {
            reason: format!("bucket_ms must be non-negative, got {bucket_ms}"),
        }),
        Some(bucket_ms) if bucket_ms > 0 => {
            let buckets =
                run_query(move || query::latency_bucketed(&db_path, start, end, bucket_ms))
                    .await?;
            let rows = buckets
                .iter()
                .map(|b| {
                    json!([
                        b.bucket_ts,
                        b.tag,
                        b.avg_rtt_ms,
                        b.success_count,
                        b.total_count
                    ])
                })
                .collect();
            Ok(Json(rows))
        }
        _ => {
            let samples = run_query(move || query::latency_raw(&db_path, start, end)).await?;
            let rows = samples
                .iter()
                .map(|s| json!([s.ts_ms, s.target, s.tag, s.rtt_ms, s.success as i64]))
                .collect();
            Ok(Json(rows))
        }
    }
}

/// Throughput rows in range, never aggregated:
/// `[ts_ms, tool, server_id, server_name, ping_ms, download_mbps,
/// upload_mbps, jitter_ms]`.
async fn throughput(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RangeParams>,
) -> Result<Json<Vec<Value>>, ApiError> {
    let (start, end) = params.resolve(state.default_window_ms)?;
    let db_path = state.db_path.clone();

    let records = run_query(move || query::throughput(&db_path, start, end)).await?;
    let rows = records
        .iter()
        .map(|r| {
            json!([
                r.ts_ms,
                r.tool,
                r.server_id,
                r.server_name,
                r.ping_ms,
                r.download_mbps,
                r.upload_mbps,
                r.jitter_ms
            ])
        })
        .collect();
    Ok(Json(rows))
}

/// The most recent discovery snapshot: `[ts_ms, dest, hop, ip]` per hop.
async fn latest_path(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Value>>, ApiError> {
    let db_path = state.db_path.clone();

    let hops = run_query(move || query::latest_path(&db_path)).await?;
    let rows = hops
        .iter()
        .map(|h| json!([h.ts_ms, h.dest, h.hop, h.ip]))
        .collect();
    Ok(Json(rows))
}

/// SQLite calls are synchronous; keep them off the async workers.
async fn run_query<T, F>(f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, StorageError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Worker {
            reason: e.to_string(),
        })?
        .map_err(ApiError::from)
}
