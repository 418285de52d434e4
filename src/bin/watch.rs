use migrate_telemetry::{
    config::AppConfig,
    models::{job::JobRecord, remote::RemoteKind, view::JobView},
    services::{
        control::ControlClient,
        filter::{FilterCriteria, FilterView},
        reconciler::{Reconciler, ReconcilerConfig},
    },
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Terminal viewer: renders the filtered job view on every store change.
///
/// Filters come from `WATCH_NAME`, `WATCH_SOURCE_DEVICE_ID` and
/// `WATCH_TARGET_DEVICE_ID`.
#[tokio::main]
async fn main() {
    // Logs go to stderr so the table on stdout stays readable
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    let config = AppConfig::from_env().expect("Failed to load configuration");

    let control = ControlClient::new(
        &config.api_base_url,
        Duration::from_secs(config.request_timeout_secs),
    )
    .expect("Failed to initialize control API client");
    let control = Arc::new(control);

    let criteria = FilterCriteria {
        name: std::env::var("WATCH_NAME").ok(),
        source_device: device_from_env(&control, RemoteKind::Source, "WATCH_SOURCE_DEVICE_ID").await,
        target_device: device_from_env(&control, RemoteKind::Target, "WATCH_TARGET_DEVICE_ID").await,
    };

    let (reconciler, handle) = Reconciler::new(ReconcilerConfig::from(&config), Arc::clone(&control));
    let reconciler_task = tokio::spawn(reconciler.run());

    let mut view = FilterView::new(handle.store(), criteria);
    render(&view.current());

    loop {
        tokio::select! {
            rows = view.changed() => match rows {
                Some(rows) => render(&rows),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                handle.shutdown();
                break;
            }
        }
    }

    if let Err(e) = reconciler_task.await {
        tracing::error!(error = %e, "Reconciler task ended abnormally");
    }
}

async fn device_from_env(
    control: &ControlClient,
    kind: RemoteKind,
    var: &str,
) -> Option<migrate_telemetry::models::remote::Device> {
    let id: i64 = std::env::var(var).ok()?.parse().ok()?;
    match control.find_remote(kind, id).await {
        Ok(Some(device)) => Some(device),
        Ok(None) => {
            tracing::warn!(device_id = id, kind = %kind, "Device not registered, ignoring filter");
            None
        }
        Err(e) => {
            tracing::warn!(device_id = id, error = %e, "Could not resolve device, ignoring filter");
            None
        }
    }
}

fn render(rows: &[JobRecord]) {
    println!("{:-<110}", "");
    println!(
        "{:>5}  {:<20} {:<10} {:>5}  {:>22}  {:>12}  {:>9}  {:>9}",
        "ID", "NAME", "STATUS", "PCT", "TRANSFERRED", "SPEED", "ELAPSED", "ETA"
    );
    for job in rows {
        let row = JobView::from(job);
        println!(
            "{:>5}  {:<20} {:<10} {:>5}  {:>22}  {:>12}  {:>9}  {:>9}",
            row.id,
            truncate(&row.name, 20),
            row.status,
            row.percent_label,
            format!("{} / {}", row.transferred, row.total),
            row.speed,
            row.elapsed,
            row.remaining.as_deref().unwrap_or("-"),
        );
        if let Some(error) = &row.last_error {
            println!("       last error ({}): {}", row.error_count, error);
        }
    }
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        text.to_string()
    } else {
        let mut cut: String = text.chars().take(width.saturating_sub(1)).collect();
        cut.push('…');
        cut
    }
}
