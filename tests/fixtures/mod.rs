//! Job list and telemetry frames as the control plane sends them.

#![allow(dead_code)]

use serde_json::{json, Value};

/// A job record in the control plane's wire shape.
pub fn job(id: i64, name: &str, status: &str) -> Value {
    json!({
        "id": id,
        "name": name,
        "status": status,
        "source_remote": "src-minio:photos/2024",
        "target_remote": "dst-s3:archive/photos",
        "rclone_options": "{\"concurrent\": 4, \"limit_speed\": 0}",
        "pid": null,
        "start_time": "2024-05-01 10:00:00",
        "end_time": null,
    })
}

/// The three jobs most tests start from.
pub fn three_jobs() -> Value {
    json!([
        job(7, "Alpha", "RUNNING"),
        job(8, "Beta", "NEW"),
        job(9, "Gamma", "COMPLETED"),
    ])
}

/// A telemetry delta carrying an rclone stats log record.
pub fn stats_frame(job_id: i64, bytes: u64, total: u64) -> Value {
    json!({
        "jobId": job_id,
        "data": {
            "level": "info",
            "msg": "Transferred",
            "stats": {
                "bytes": bytes,
                "totalBytes": total,
                "speed": 1_048_576.0,
                "elapsedTime": 12.5,
                "eta": 30,
                "errors": 0,
                "transfers": 1,
                "totalTransfers": 4,
            }
        }
    })
}

/// A status-only delta.
pub fn status_frame(job_id: i64, status: &str) -> Value {
    json!({ "jobId": job_id, "status": status })
}

pub fn heartbeat() -> Value {
    json!({ "type": "heartbeat", "message": "ping" })
}
