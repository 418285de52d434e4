use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinSet};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::models::job::JobRecord;
use crate::services::channel::{ChannelError, ChannelState, ConnectAttempt, Dispatch, Socket, TelemetryChannel};
use crate::services::control::{ControlClient, ControlError};
use crate::services::store::{JobStore, StoreReader};

/// Timing knobs of a reconciler session.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub telemetry_url: String,
    /// `None` disables periodic pulls; pulls then only follow startup,
    /// reconnects, failures and explicit refresh requests.
    pub snapshot_interval: Option<Duration>,
    pub reconnect_initial: Duration,
    pub reconnect_max: Duration,
}

impl From<&AppConfig> for ReconcilerConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            telemetry_url: config.telemetry_url.clone(),
            snapshot_interval: (config.snapshot_interval_secs > 0)
                .then(|| Duration::from_secs(config.snapshot_interval_secs)),
            reconnect_initial: Duration::from_millis(config.reconnect_initial_ms),
            reconnect_max: Duration::from_millis(config.reconnect_max_ms),
        }
    }
}

/// Health of the two sync paths, for operators.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub channel: ChannelState,
    pub last_snapshot_at: Option<DateTime<Utc>>,
    /// Cleared once the channel opens again.
    pub last_channel_error: Option<String>,
    /// Cleared by the next successful pull.
    pub last_snapshot_error: Option<String>,
    pub reconnects: u64,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            channel: ChannelState::Closed,
            last_snapshot_at: None,
            last_channel_error: None,
            last_snapshot_error: None,
            reconnects: 0,
        }
    }
}

enum Command {
    RefreshSnapshot,
    Shutdown,
}

/// Cloneable handle given to the presentation layer.
#[derive(Clone)]
pub struct ReconcilerHandle {
    commands: mpsc::UnboundedSender<Command>,
    store: StoreReader,
    sync: watch::Receiver<SyncStatus>,
}

impl ReconcilerHandle {
    /// Ask for a snapshot pull. A no-op once the reconciler has stopped.
    pub fn refresh_snapshot(&self) {
        let _ = self.commands.send(Command::RefreshSnapshot);
    }

    /// Release the channel and stop pulling.
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }

    pub fn store(&self) -> &StoreReader {
        &self.store
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.sync.borrow().clone()
    }

    pub fn subscribe_sync(&self) -> watch::Receiver<SyncStatus> {
        self.sync.clone()
    }
}

/// Exponential delay, doubling from `initial` up to `max`.
#[derive(Debug, Clone)]
struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    fn next(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    fn reset(&mut self) {
        self.current = self.initial;
    }
}

type PullResult = (u64, Result<Vec<JobRecord>, ControlError>);

/// Owns the store and the channel for one view session, applying snapshot
/// pulls and channel deltas to the store from a single task.
pub struct Reconciler {
    config: ReconcilerConfig,
    control: Arc<ControlClient>,
    store: JobStore,
    channel: TelemetryChannel,
    commands: mpsc::UnboundedReceiver<Command>,
    sync: watch::Sender<SyncStatus>,
    pulls: JoinSet<PullResult>,
    issued_pulls: u64,
    applied_pull: u64,
    reconnect_backoff: Backoff,
    pull_backoff: Backoff,
}

impl Reconciler {
    pub fn new(config: ReconcilerConfig, control: Arc<ControlClient>) -> (Self, ReconcilerHandle) {
        let store = JobStore::new();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (sync_tx, sync_rx) = watch::channel(SyncStatus::default());

        let handle = ReconcilerHandle {
            commands: commands_tx,
            store: store.reader(),
            sync: sync_rx,
        };

        let reconciler = Self {
            channel: TelemetryChannel::new(config.telemetry_url.clone()),
            reconnect_backoff: Backoff::new(config.reconnect_initial, config.reconnect_max),
            pull_backoff: Backoff::new(config.reconnect_initial, config.reconnect_max),
            config,
            control,
            store,
            commands: commands_rx,
            sync: sync_tx,
            pulls: JoinSet::new(),
            issued_pulls: 0,
            applied_pull: 0,
        };

        (reconciler, handle)
    }

    /// Run until [`ReconcilerHandle::shutdown`] or until every handle is dropped.
    pub async fn run(mut self) {
        info!(url = %self.config.telemetry_url, "Reconciler starting");

        self.request_snapshot();
        let mut connect_at = Some(Instant::now());
        let mut connecting: Option<ConnectAttempt> = None;
        let mut pull_retry_at: Option<Instant> = None;
        let mut has_connected = false;
        let mut ticker = self.config.snapshot_interval.map(|period| {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker
        });

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::RefreshSnapshot) => self.request_snapshot(),
                    Some(Command::Shutdown) | None => break,
                },

                Some(joined) = self.pulls.join_next() => {
                    if !self.finish_pull(joined) && pull_retry_at.is_none() {
                        let delay = self.pull_backoff.next();
                        warn!(retry_in_ms = delay.as_millis() as u64, "Snapshot pull failed, retrying");
                        pull_retry_at = Some(Instant::now() + delay);
                    }
                }

                _ = wait_until(pull_retry_at) => {
                    pull_retry_at = None;
                    self.request_snapshot();
                }

                _ = next_tick(&mut ticker) => self.request_snapshot(),

                _ = wait_until(connect_at) => {
                    connect_at = None;
                    connecting = Some(self.channel.start_connect());
                    self.publish_channel_state(None);
                }

                result = handshake(&mut connecting) => {
                    connecting = None;
                    match self.channel.finish_connect(result) {
                        Ok(()) => {
                            self.reconnect_backoff.reset();
                            if has_connected {
                                // Deltas sent while disconnected are lost; resync from a pull.
                                metrics::counter!("telemetry_reconnects_total").increment(1);
                                self.sync.send_modify(|s| s.reconnects += 1);
                                self.request_snapshot();
                            }
                            has_connected = true;
                            info!(url = %self.config.telemetry_url, "Telemetry channel open");
                            self.publish_channel_state(None);
                        }
                        Err(e) => {
                            let delay = self.reconnect_backoff.next();
                            warn!(error = %e, retry_in_ms = delay.as_millis() as u64, "Telemetry channel connect failed");
                            self.publish_channel_state(Some(e.to_string()));
                            connect_at = Some(Instant::now() + delay);
                        }
                    }
                }

                frame = self.channel.recv() => {
                    let store = &mut self.store;
                    let result = self
                        .channel
                        .dispatch(frame, |delta| {
                            store.apply_delta(delta);
                        })
                        .await;

                    let failure = match result {
                        Ok(Dispatch::Continue) => continue,
                        Ok(Dispatch::Closed) => None,
                        Err(e) => Some(e.to_string()),
                    };
                    let delay = self.reconnect_backoff.next();
                    warn!(
                        error = failure.as_deref().unwrap_or("closed"),
                        retry_in_ms = delay.as_millis() as u64,
                        "Telemetry channel lost, scheduling reconnect"
                    );
                    self.publish_channel_state(failure);
                    connect_at = Some(Instant::now() + delay);
                }
            }
        }

        self.channel.close().await;
        self.pulls.abort_all();
        self.publish_channel_state(None);
        info!("Reconciler stopped");
    }

    fn request_snapshot(&mut self) {
        self.issued_pulls += 1;
        let seq = self.issued_pulls;
        let control = Arc::clone(&self.control);
        debug!(seq, "Requesting snapshot pull");
        self.pulls.spawn(async move { (seq, control.list_jobs().await) });
    }

    /// Apply a finished pull. Returns false when the pull failed.
    fn finish_pull(&mut self, joined: Result<PullResult, JoinError>) -> bool {
        let (seq, result) = match joined {
            Ok(pull) => pull,
            Err(e) => {
                error!(error = %e, "Snapshot pull task failed");
                return false;
            }
        };

        match result {
            Ok(_) if seq < self.applied_pull => {
                debug!(seq, applied = self.applied_pull, "Discarding superseded snapshot");
                metrics::counter!("snapshot_pulls_total", "outcome" => "superseded").increment(1);
                true
            }
            Ok(jobs) => {
                self.store.apply_snapshot(jobs);
                self.applied_pull = seq;
                self.pull_backoff.reset();
                metrics::counter!("snapshot_pulls_total", "outcome" => "ok").increment(1);
                self.sync.send_modify(|s| {
                    s.last_snapshot_at = Some(Utc::now());
                    s.last_snapshot_error = None;
                });
                true
            }
            Err(e) => {
                warn!(seq, error = %e, "Snapshot pull failed, keeping current jobs");
                metrics::counter!("snapshot_pulls_total", "outcome" => "error").increment(1);
                let message = e.to_string();
                self.sync.send_modify(|s| s.last_snapshot_error = Some(message));
                false
            }
        }
    }

    fn publish_channel_state(&self, error: Option<String>) {
        let state = self.channel.state();
        self.sync.send_modify(|s| {
            s.channel = state;
            match error {
                Some(error) => s.last_channel_error = Some(error),
                None if state == ChannelState::Open => s.last_channel_error = None,
                None => {}
            }
        });
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Drive the pending handshake, if any. Cancel-safe: the attempt stays boxed
/// in `connecting` between polls.
async fn handshake(connecting: &mut Option<ConnectAttempt>) -> Result<Socket, ChannelError> {
    match connecting {
        Some(attempt) => attempt.await,
        None => std::future::pending().await,
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
