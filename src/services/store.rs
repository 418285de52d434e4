use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::models::job::JobRecord;
use crate::models::telemetry::TelemetryDelta;
use crate::services::progress;

/// Immutable view of the store published after every mutation.
#[derive(Debug, Clone, Default)]
pub struct StoreSnapshot {
    /// Bumped exactly once per mutating call.
    pub version: u64,
    /// Jobs in the order of the latest snapshot pull.
    pub jobs: Vec<JobRecord>,
}

impl StoreSnapshot {
    pub fn get(&self, id: i64) -> Option<&JobRecord> {
        self.jobs.iter().find(|job| job.id == id)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// Read-only handle to a [`JobStore`], safe to hand to the presentation layer.
#[derive(Debug, Clone)]
pub struct StoreReader {
    rx: watch::Receiver<Arc<StoreSnapshot>>,
}

impl StoreReader {
    pub fn get(&self) -> Arc<StoreSnapshot> {
        self.rx.borrow().clone()
    }

    /// Receiver that is notified once per store mutation.
    pub fn subscribe(&self) -> watch::Receiver<Arc<StoreSnapshot>> {
        self.rx.clone()
    }
}

/// What [`JobStore::apply_delta`] did with a delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaOutcome {
    /// Counters accepted, or the status changed.
    Applied,
    /// Counters went backwards and were discarded. A status carried by the
    /// same delta was still written.
    Stale,
    /// No job with this id is listed; nothing changed.
    UnknownJob,
    /// The delta repeated what the store already holds.
    Unchanged,
}

struct Entry {
    record: JobRecord,
    /// Set when the job enters RUNNING; the next counters start a new baseline.
    fresh_run: bool,
}

/// Canonical, keyed set of jobs.
///
/// Snapshot pulls own the static fields and the key set; channel deltas own
/// `telemetry`. Both may write `status`, last write wins.
pub struct JobStore {
    entries: Vec<Entry>,
    index: HashMap<i64, usize>,
    version: u64,
    publisher: watch::Sender<Arc<StoreSnapshot>>,
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl JobStore {
    pub fn new() -> Self {
        let (publisher, _) = watch::channel(Arc::new(StoreSnapshot::default()));
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
            version: 0,
            publisher,
        }
    }

    pub fn reader(&self) -> StoreReader {
        StoreReader {
            rx: self.publisher.subscribe(),
        }
    }

    pub fn get(&self) -> Arc<StoreSnapshot> {
        self.publisher.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<StoreSnapshot>> {
        self.publisher.subscribe()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Replace the key set with exactly the ids in `jobs`.
    ///
    /// Existing jobs get every field overwritten except their live telemetry;
    /// new jobs start without telemetry; unlisted jobs are removed. Duplicate
    /// ids collapse onto the first position with the last value.
    pub fn apply_snapshot(&mut self, jobs: Vec<JobRecord>) {
        let mut order = Vec::with_capacity(jobs.len());
        let mut latest: HashMap<i64, JobRecord> = HashMap::with_capacity(jobs.len());
        for job in jobs {
            let id = job.id;
            if latest.insert(id, job).is_none() {
                order.push(id);
            }
        }

        let mut previous: HashMap<i64, Entry> = self
            .entries
            .drain(..)
            .map(|entry| (entry.record.id, entry))
            .collect();
        self.index.clear();

        let mut inserted = 0usize;
        for id in order {
            let Some(mut incoming) = latest.remove(&id) else {
                continue;
            };

            let entry = match previous.remove(&id) {
                Some(prev) => {
                    let entered_running =
                        incoming.status.is_running() && !prev.record.status.is_running();
                    incoming.telemetry = prev.record.telemetry;
                    incoming.metrics = prev.record.metrics;
                    Entry {
                        record: incoming,
                        fresh_run: prev.fresh_run || entered_running,
                    }
                }
                None => {
                    inserted += 1;
                    incoming.telemetry = None;
                    incoming.metrics = None;
                    Entry {
                        record: incoming,
                        fresh_run: false,
                    }
                }
            };

            self.index.insert(id, self.entries.len());
            self.entries.push(entry);
        }

        for id in previous.keys() {
            debug!(job_id = id, "Job no longer listed, removing");
        }

        info!(
            jobs = self.entries.len(),
            inserted,
            removed = previous.len(),
            "Snapshot applied"
        );
        metrics::gauge!("jobs_tracked").set(self.entries.len() as f64);

        self.publish();
    }

    /// Merge one telemetry delta.
    ///
    /// Counters are accepted when there is no previous telemetry, when they do
    /// not go backwards, or when the job has just entered RUNNING. A status in
    /// the delta is always written, and flagged when the transition is not one
    /// the state machine expects.
    pub fn apply_delta(&mut self, delta: TelemetryDelta) -> DeltaOutcome {
        let Some(&pos) = self.index.get(&delta.job_id) else {
            warn!(job_id = delta.job_id, "Telemetry for a job that is not listed, dropping");
            metrics::counter!("telemetry_deltas_dropped_total", "reason" => "unknown_job").increment(1);
            return DeltaOutcome::UnknownJob;
        };

        let entry = &mut self.entries[pos];
        let mut changed = false;

        if let Some(status) = delta.status {
            let current = entry.record.status;
            if !current.can_transition_to(status) {
                warn!(
                    job_id = delta.job_id,
                    from = %current,
                    to = %status,
                    "Unexpected status transition reported by server"
                );
                metrics::counter!("job_status_unexpected_total").increment(1);
            }
            if current != status {
                entry.record.status = status;
                if status.is_running() {
                    entry.fresh_run = true;
                }
                changed = true;
            }
        }

        let outcome = match delta.snapshot {
            Some(snapshot) => {
                let accept = entry.fresh_run
                    || entry
                        .record
                        .telemetry
                        .as_ref()
                        .map_or(true, |prev| snapshot.bytes_transferred >= prev.bytes_transferred);

                if accept {
                    entry.record.metrics = Some(progress::derive(&snapshot));
                    entry.record.telemetry = Some(snapshot);
                    entry.fresh_run = false;
                    changed = true;
                    DeltaOutcome::Applied
                } else {
                    debug!(
                        job_id = delta.job_id,
                        bytes = snapshot.bytes_transferred,
                        "Counters went backwards, discarding telemetry"
                    );
                    metrics::counter!("telemetry_deltas_dropped_total", "reason" => "stale").increment(1);
                    DeltaOutcome::Stale
                }
            }
            None if changed => DeltaOutcome::Applied,
            None => DeltaOutcome::Unchanged,
        };

        if changed {
            metrics::counter!("telemetry_deltas_applied_total").increment(1);
            self.publish();
        }
        outcome
    }

    fn publish(&mut self) {
        self.version += 1;
        let snapshot = StoreSnapshot {
            version: self.version,
            jobs: self.entries.iter().map(|entry| entry.record.clone()).collect(),
        };
        self.publisher.send_replace(Arc::new(snapshot));
    }
}
