//! Registry of jobs awaiting a terminal status.
//!
//! Membership doubles as the claim protocol: a job is in the registry while
//! its completion is still owed, and [`JobRegistry::take`] removes it
//! atomically. When the event channel and the poll loop race over the same
//! terminal status, exactly one of them gets the `Some` and reconciles; the
//! loser sees `None` and walks away. A reconciler that hits a transient error
//! puts the job back with [`JobRegistry::reinsert`] so the next poll tick can
//! claim it again.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::warn;

use crate::job::Job;
use crate::model::JobId;

/// Concurrent registry of in-flight jobs.
#[derive(Default)]
pub struct JobRegistry {
    jobs: DashMap<JobId, Arc<Job>>,
    // Lifetime counters, monotonically increasing.
    registered_total: AtomicU64,
    claimed_total: AtomicU64,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a job. A duplicate id is a protocol violation by the server
    /// and is refused, keeping the first registration.
    pub fn register(&self, job: Arc<Job>) -> bool {
        let id = job.id();
        let entry = self.jobs.entry(id);
        match entry {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                warn!(job_id = id, "duplicate job id, registration refused");
                false
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(job);
                self.registered_total.fetch_add(1, Ordering::Relaxed);
                true
            }
        }
    }

    /// Atomically claims a job for reconciliation. At most one caller gets
    /// `Some` per registration.
    pub fn take(&self, id: JobId) -> Option<Arc<Job>> {
        let claimed = self.jobs.remove(&id).map(|(_, job)| job);
        if claimed.is_some() {
            self.claimed_total.fetch_add(1, Ordering::Relaxed);
        }
        claimed
    }

    /// Puts a claimed job back after a transient reconciliation failure.
    pub fn reinsert(&self, job: Arc<Job>) {
        self.jobs.insert(job.id(), job);
    }

    /// Whether the job is currently registered.
    pub fn contains(&self, id: JobId) -> bool {
        self.jobs.contains_key(&id)
    }

    /// Ids of all currently registered jobs.
    pub fn snapshot_ids(&self) -> Vec<JobId> {
        self.jobs.iter().map(|entry| *entry.key()).collect()
    }

    /// Number of jobs currently awaiting completion.
    pub fn active_count(&self) -> usize {
        self.jobs.len()
    }

    /// Jobs registered over the registry's lifetime.
    pub fn registered_total(&self) -> u64 {
        self.registered_total.load(Ordering::Relaxed)
    }

    /// Jobs claimed for reconciliation over the registry's lifetime.
    pub fn claimed_total(&self) -> u64 {
        self.claimed_total.load(Ordering::Relaxed)
    }
}
