//! Frames exchanged over the telemetry channel.
//!
//! Inbound frames look like `{ "type"?: "heartbeat", "jobId"?, "status"?, "data"? }`.
//! A frame without `type` is a telemetry delta whose `data` is an rclone stats
//! log record (or a bare stats object).

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::models::job::JobStatus;
use crate::models::telemetry::{TelemetryDelta, TelemetrySnapshot};

const HEARTBEAT: &str = "heartbeat";

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelMessage {
    Heartbeat,
    Delta(TelemetryDelta),
}

/// Reply sent for every heartbeat ping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeartbeatReply {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

impl HeartbeatReply {
    pub fn pong() -> Self {
        Self {
            kind: HEARTBEAT.to_string(),
            message: "pong".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Malformed channel frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported frame type: {0}")]
    UnknownType(String),

    #[error("Telemetry frame without a job id")]
    MissingJobId,

    #[error("Invalid job id: {0}")]
    InvalidJobId(String),
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(rename = "jobId", alias = "job_id", alias = "taskId")]
    job_id: Option<RawJobId>,
    status: Option<JobStatus>,
    data: Option<RawPayload>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawJobId {
    Number(i64),
    Text(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawPayload {
    Log { stats: RcloneStats },
    Stats(RcloneStats),
}

/// The subset of rclone's `--stats` record the store tracks.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RcloneStats {
    bytes: u64,
    #[serde(default)]
    total_bytes: u64,
    #[serde(default)]
    speed: f64,
    #[serde(default)]
    elapsed_time: f64,
    #[serde(default)]
    eta: Option<f64>,
    #[serde(default)]
    errors: u64,
    #[serde(default)]
    last_error: Option<String>,
    #[serde(default)]
    transfers: u64,
    #[serde(default)]
    total_transfers: u64,
    #[serde(default)]
    fatal_error: bool,
}

impl From<RcloneStats> for TelemetrySnapshot {
    fn from(stats: RcloneStats) -> Self {
        Self {
            bytes_transferred: stats.bytes,
            total_bytes: stats.total_bytes,
            speed_bytes_per_sec: stats.speed,
            elapsed_seconds: stats.elapsed_time,
            eta_seconds: stats.eta,
            error_count: stats.errors,
            last_error_message: stats.last_error.filter(|e| !e.is_empty()),
            transfers: stats.transfers,
            total_transfers: stats.total_transfers,
            fatal_error: stats.fatal_error,
            received_at: Utc::now(),
        }
    }
}

impl ChannelMessage {
    /// Decode one text frame.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let frame: RawFrame = serde_json::from_str(text)?;

        match frame.kind.as_deref() {
            Some(HEARTBEAT) => return Ok(ChannelMessage::Heartbeat),
            Some(other) => return Err(DecodeError::UnknownType(other.to_string())),
            None => {}
        }

        let job_id = match frame.job_id.ok_or(DecodeError::MissingJobId)? {
            RawJobId::Number(id) => id,
            RawJobId::Text(text) => text
                .trim()
                .parse()
                .map_err(|_| DecodeError::InvalidJobId(text))?,
        };

        let snapshot = frame.data.map(|payload| match payload {
            RawPayload::Log { stats } | RawPayload::Stats(stats) => TelemetrySnapshot::from(stats),
        });

        // An unrecognised status says nothing usable; keep the counters only.
        let status = frame.status.filter(|status| *status != JobStatus::Unknown);

        Ok(ChannelMessage::Delta(TelemetryDelta {
            job_id,
            status,
            snapshot,
        }))
    }
}
