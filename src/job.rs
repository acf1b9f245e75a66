//! A submitted job and its write-once outcome slot.
//!
//! Two reconciliation paths (push events and polling) race to complete each
//! job. [`Job::complete`] resolves that race locally: the outcome slot is a
//! [`OnceLock`], so the first writer wins and every later attempt is a silent
//! no-op. Waiters park on a watch channel that flips exactly once.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;

use tokio::sync::watch;
use tracing::debug;

use crate::model::{JobId, JobOutcome, SimulationInput};

/// One job tracked by the runtime.
pub struct Job {
    id: JobId,
    input: SimulationInput,
    outcome: OnceLock<JobOutcome>,
    done_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
    transient_failures: AtomicU32,
}

impl Job {
    /// Creates a job for an id the server has already assigned.
    pub fn new(id: JobId, input: SimulationInput) -> Self {
        let (done_tx, done_rx) = watch::channel(false);
        Self {
            id,
            input,
            outcome: OnceLock::new(),
            done_tx,
            done_rx,
            transient_failures: AtomicU32::new(0),
        }
    }

    /// The server-assigned job id.
    pub fn id(&self) -> JobId {
        self.id
    }

    /// The input the job was submitted with.
    pub fn input(&self) -> &SimulationInput {
        &self.input
    }

    /// Records the final outcome. Returns `false` if the job was already
    /// completed, in which case the argument is dropped unchanged.
    pub fn complete(&self, outcome: JobOutcome) -> bool {
        if self.outcome.set(outcome).is_err() {
            debug!(job_id = self.id, "job already completed, outcome dropped");
            return false;
        }
        // Receivers may all be gone; completion stands regardless.
        let _ = self.done_tx.send(true);
        true
    }

    /// The outcome, if the job has completed.
    pub fn outcome(&self) -> Option<&JobOutcome> {
        self.outcome.get()
    }

    /// Whether the job has completed.
    pub fn is_complete(&self) -> bool {
        self.outcome.get().is_some()
    }

    /// Waits until the job completes and returns its outcome.
    pub async fn wait(&self) -> JobOutcome {
        let mut rx = self.done_rx.clone();
        loop {
            if let Some(outcome) = self.outcome.get() {
                return outcome.clone();
            }
            // The sender lives in self, so changed() cannot error before the
            // outcome is set.
            if rx.changed().await.is_err() {
                if let Some(outcome) = self.outcome.get() {
                    return outcome.clone();
                }
            }
        }
    }

    /// Bumps the count of transient reconciliation failures for this job and
    /// returns the previous value.
    pub fn record_transient_failure(&self) -> u32 {
        self.transient_failures.fetch_add(1, Ordering::Relaxed)
    }

    /// How many transient failures reconciliation has hit for this job.
    pub fn transient_failures(&self) -> u32 {
        self.transient_failures.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("complete", &self.is_complete())
            .finish()
    }
}
