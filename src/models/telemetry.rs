use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::job::JobStatus;

/// Latest known progress of one job, as reported by its worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    /// Cumulative; never decreases within one run.
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    pub speed_bytes_per_sec: f64,
    pub elapsed_seconds: f64,
    pub eta_seconds: Option<f64>,
    pub error_count: u64,
    pub last_error_message: Option<String>,
    pub transfers: u64,
    pub total_transfers: u64,
    pub fatal_error: bool,
    /// Local arrival time, used for ordering decisions only.
    pub received_at: DateTime<Utc>,
}

impl TelemetrySnapshot {
    /// A snapshot carrying only byte counters, everything else zeroed.
    pub fn from_counters(bytes_transferred: u64, total_bytes: u64) -> Self {
        Self {
            bytes_transferred,
            total_bytes,
            speed_bytes_per_sec: 0.0,
            elapsed_seconds: 0.0,
            eta_seconds: None,
            error_count: 0,
            last_error_message: None,
            transfers: 0,
            total_transfers: 0,
            fatal_error: false,
            received_at: Utc::now(),
        }
    }
}

/// Display-ready figures derived from a [`TelemetrySnapshot`].
///
/// Sizes and rates stay in raw bytes; conversion to MB happens when a row is
/// rendered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedMetrics {
    pub percent: f64,
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    pub speed_bytes_per_sec: f64,
    pub elapsed_seconds: f64,
    pub eta_seconds: Option<f64>,
}

/// An incremental telemetry push for one job.
///
/// Either half may be missing: a status-only push carries no counters, and a
/// counters-only push leaves the status alone.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryDelta {
    pub job_id: i64,
    pub status: Option<JobStatus>,
    pub snapshot: Option<TelemetrySnapshot>,
}
