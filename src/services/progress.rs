//! Derived progress figures and their presentation-time formatting.
//!
//! Everything here is a pure function of raw counters, so a row can be
//! re-rendered any number of times with identical output.

use crate::models::telemetry::{DerivedMetrics, TelemetrySnapshot};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Percentage of `total_bytes` already transferred, clamped to `0..=100`.
/// An unknown or zero total yields 0.
pub fn percent(bytes_transferred: u64, total_bytes: u64) -> f64 {
    if total_bytes == 0 {
        return 0.0;
    }
    let ratio = bytes_transferred as f64 / total_bytes as f64 * 100.0;
    if ratio.is_finite() {
        ratio.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

/// Derive display metrics from a snapshot. The ETA is the worker's own
/// estimate, passed through untouched.
pub fn derive(snapshot: &TelemetrySnapshot) -> DerivedMetrics {
    DerivedMetrics {
        percent: percent(snapshot.bytes_transferred, snapshot.total_bytes),
        bytes_transferred: snapshot.bytes_transferred,
        total_bytes: snapshot.total_bytes,
        speed_bytes_per_sec: sanitize(snapshot.speed_bytes_per_sec),
        elapsed_seconds: sanitize(snapshot.elapsed_seconds),
        eta_seconds: snapshot.eta_seconds,
    }
}

fn sanitize(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

pub fn format_percent(percent: f64) -> String {
    format!("{:.0}%", percent.floor())
}

pub fn format_megabytes(bytes: u64) -> String {
    format!("{:.2} MB", bytes as f64 / BYTES_PER_MB)
}

pub fn format_speed(bytes_per_sec: f64) -> String {
    format!("{:.2} MB/s", sanitize(bytes_per_sec) / BYTES_PER_MB)
}

/// `1h 2m 3s` style duration; sub-second remainders are dropped.
pub fn format_duration(seconds: f64) -> String {
    let total = sanitize(seconds) as u64;
    let (hours, minutes, secs) = (total / 3600, (total % 3600) / 60, total % 60);

    match (hours, minutes) {
        (0, 0) => format!("{secs}s"),
        (0, _) => format!("{minutes}m {secs}s"),
        _ => format!("{hours}h {minutes}m {secs}s"),
    }
}
