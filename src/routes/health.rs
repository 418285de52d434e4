use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::app_state::AppState;
use crate::services::channel::ChannelState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub jobs: usize,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub channel: ComponentHealth,
    pub snapshot: ComponentHealth,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    pub status: String,
    pub detail: Option<String>,
    pub last_success: Option<DateTime<Utc>>,
}

/// GET /health: state of the telemetry channel and the snapshot pull path.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let sync = state.reconciler.sync_status();
    let jobs = state.reconciler.store().get().len();

    let channel_ok = sync.channel == ChannelState::Open;
    let channel = ComponentHealth {
        status: if channel_ok { "ok" } else { "error" }.to_string(),
        detail: sync
            .last_channel_error
            .clone()
            .or_else(|| Some(sync.channel.to_string())),
        last_success: None,
    };

    let snapshot_ok = sync.last_snapshot_at.is_some() && sync.last_snapshot_error.is_none();
    let snapshot = ComponentHealth {
        status: if snapshot_ok { "ok" } else { "error" }.to_string(),
        detail: sync.last_snapshot_error.clone(),
        last_success: sync.last_snapshot_at,
    };

    let all_healthy = channel_ok && snapshot_ok;
    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if all_healthy {
            "ok".to_string()
        } else {
            "degraded".to_string()
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        jobs,
        checks: HealthChecks { channel, snapshot },
    };

    (status_code, Json(response))
}
