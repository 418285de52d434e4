use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;

use crate::services::channel::ChannelState;
use crate::services::reconciler::ReconcilerHandle;

#[derive(Clone)]
pub struct MetricsState {
    pub prometheus: Arc<PrometheusHandle>,
    pub reconciler: ReconcilerHandle,
}

/// Prometheus metrics scrape endpoint.
/// Point-in-time gauges are refreshed from the live store before rendering.
pub async fn prometheus_metrics(State(state): State<MetricsState>) -> impl IntoResponse {
    let sync = state.reconciler.sync_status();
    let open = if sync.channel == ChannelState::Open { 1.0 } else { 0.0 };

    metrics::gauge!("telemetry_channel_open").set(open);
    metrics::gauge!("jobs_tracked").set(state.reconciler.store().get().len() as f64);

    state.prometheus.render()
}
