use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use metrics_exporter_prometheus::PrometheusBuilder;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use migrate_telemetry::{
    app_state::AppState,
    config::AppConfig,
    routes::{self, metrics::MetricsState},
    services::{
        control::ControlClient,
        reconciler::{Reconciler, ReconcilerConfig},
    },
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing migrate-telemetry server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    // Register application metrics
    metrics::describe_counter!(
        "telemetry_deltas_applied_total",
        "Telemetry deltas that changed a job"
    );
    metrics::describe_counter!(
        "telemetry_deltas_dropped_total",
        "Telemetry deltas dropped as stale or for unlisted jobs"
    );
    metrics::describe_counter!(
        "job_status_unexpected_total",
        "Status transitions outside the job state machine"
    );
    metrics::describe_counter!("snapshot_pulls_total", "Snapshot pulls by outcome");
    metrics::describe_counter!(
        "telemetry_reconnects_total",
        "Successful telemetry channel reconnects"
    );
    metrics::describe_gauge!("jobs_tracked", "Jobs currently held in the store");
    metrics::describe_gauge!("telemetry_channel_open", "1 while the telemetry channel is open");

    // Initialize control API client
    tracing::info!(api = %config.api_base_url, "Initializing control API client");
    let control = ControlClient::new(
        &config.api_base_url,
        Duration::from_secs(config.request_timeout_secs),
    )
    .expect("Failed to initialize control API client");
    let control = Arc::new(control);

    // Start the reconciler for this process's view
    let (reconciler, handle) = Reconciler::new(ReconcilerConfig::from(&config), Arc::clone(&control));
    let reconciler_task = tokio::spawn(reconciler.run());

    let state = AppState::new(handle.clone(), control);
    let metrics_state = MetricsState {
        prometheus: prometheus_handle,
        reconciler: handle.clone(),
    };

    // Build API routes
    let app = routes::api_router(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(metrics_state),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(64 * 1024));

    tracing::info!("Starting migrate-telemetry on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    let shutdown_handle = handle.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown requested");
            shutdown_handle.shutdown();
        })
        .await
        .expect("Server error");

    handle.shutdown();
    if let Err(e) = reconciler_task.await {
        tracing::error!(error = %e, "Reconciler task ended abnormally");
    }
}
