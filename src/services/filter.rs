use std::sync::Arc;

use tokio::sync::watch;

use crate::models::job::JobRecord;
use crate::models::remote::Device;
use crate::services::store::{StoreReader, StoreSnapshot};

/// Operator-entered predicates. Unset fields do not constrain.
#[derive(Debug, Clone, Default)]
pub struct FilterCriteria {
    pub name: Option<String>,
    pub source_device: Option<Device>,
    pub target_device: Option<Device>,
}

impl FilterCriteria {
    pub fn is_empty(&self) -> bool {
        self.name_query().is_none() && self.source_device.is_none() && self.target_device.is_none()
    }

    fn name_query(&self) -> Option<&str> {
        self.name.as_deref().map(str::trim).filter(|q| !q.is_empty())
    }

    pub fn matches(&self, job: &JobRecord) -> bool {
        if let Some(query) = self.name_query() {
            if !name_matches(&job.name, query) {
                return false;
            }
        }
        if let Some(device) = &self.source_device {
            if !job.source_remote.is_on_remote(device.descriptor()) {
                return false;
            }
        }
        if let Some(device) = &self.target_device {
            if !job.target_remote.is_on_remote(device.descriptor()) {
                return false;
            }
        }
        true
    }
}

/// Case-insensitive match of `query` starting at a word boundary of `name`,
/// so "back" finds "Nightly backup" but "a" does not find "Beta".
fn name_matches(name: &str, query: &str) -> bool {
    let name = name.to_lowercase();
    let query = query.to_lowercase();

    let mut previous: Option<char> = None;
    for (i, c) in name.char_indices() {
        let at_boundary = previous.map_or(true, |p| !p.is_alphanumeric());
        if at_boundary && name[i..].starts_with(&query) {
            return true;
        }
        previous = Some(c);
    }
    false
}

/// Filter `jobs`, preserving their order. Empty criteria return everything.
pub fn apply(jobs: &[JobRecord], criteria: &FilterCriteria) -> Vec<JobRecord> {
    if criteria.is_empty() {
        return jobs.to_vec();
    }
    jobs.iter().filter(|job| criteria.matches(job)).cloned().collect()
}

/// Live filtered projection of a store. Results are recomputed on every read
/// and never cached.
pub struct FilterView {
    rx: watch::Receiver<Arc<StoreSnapshot>>,
    criteria: FilterCriteria,
}

impl FilterView {
    pub fn new(store: &StoreReader, criteria: FilterCriteria) -> Self {
        Self {
            rx: store.subscribe(),
            criteria,
        }
    }

    pub fn criteria(&self) -> &FilterCriteria {
        &self.criteria
    }

    pub fn set_criteria(&mut self, criteria: FilterCriteria) {
        self.criteria = criteria;
    }

    pub fn current(&self) -> Vec<JobRecord> {
        let snapshot = self.rx.borrow().clone();
        apply(&snapshot.jobs, &self.criteria)
    }

    /// Wait for the next store change and return the recomputed view.
    /// Returns `None` once the store has gone away.
    pub async fn changed(&mut self) -> Option<Vec<JobRecord>> {
        self.rx.changed().await.ok()?;
        let snapshot = self.rx.borrow_and_update().clone();
        Some(apply(&snapshot.jobs, &self.criteria))
    }
}
