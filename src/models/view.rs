use serde::Serialize;

use crate::models::job::{JobOptions, JobRecord, JobStatus};
use crate::services::progress;

/// One presentation row, rendered from a [`JobRecord`] on every read.
#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    pub id: i64,
    pub name: String,
    pub status: JobStatus,
    pub editable: bool,
    pub source: String,
    pub target: String,
    pub options: JobOptions,
    pub percent: f64,
    pub percent_label: String,
    pub transferred: String,
    pub total: String,
    pub speed: String,
    pub elapsed: String,
    pub remaining: Option<String>,
    pub error_count: u64,
    pub last_error: Option<String>,
    pub total_size: Option<String>,
}

impl From<&JobRecord> for JobView {
    fn from(job: &JobRecord) -> Self {
        let metrics = job.metrics.as_ref();
        let percent = metrics.map(|m| m.percent).unwrap_or(0.0);

        Self {
            id: job.id,
            name: job.name.clone(),
            status: job.status,
            editable: job.status.is_editable(),
            source: job.source_remote.to_string(),
            target: job.target_remote.to_string(),
            options: job.options.clone(),
            percent,
            percent_label: progress::format_percent(percent),
            transferred: progress::format_megabytes(metrics.map(|m| m.bytes_transferred).unwrap_or(0)),
            total: progress::format_megabytes(metrics.map(|m| m.total_bytes).unwrap_or(0)),
            speed: progress::format_speed(metrics.map(|m| m.speed_bytes_per_sec).unwrap_or(0.0)),
            elapsed: progress::format_duration(metrics.map(|m| m.elapsed_seconds).unwrap_or(0.0)),
            remaining: metrics.and_then(|m| m.eta_seconds).map(progress::format_duration),
            error_count: job.telemetry.as_ref().map(|t| t.error_count).unwrap_or(0),
            last_error: job.telemetry.as_ref().and_then(|t| t.last_error_message.clone()),
            total_size: job.total_size_bytes.map(progress::format_megabytes),
        }
    }
}
