//! Periodic status polling.
//!
//! The poll loop is the safety net under the push channel: every interval it
//! asks the server for the status of all registered jobs in one request and
//! reconciles any that turned terminal. Because registry claiming is atomic,
//! a tick that races with a push event reconciles each job at most once.
//!
//! The loop itself never exits on error; a failed bulk query is logged and
//! the next tick tries again. [`PollSupervisor`] additionally respawns the
//! loop task if it dies in a way the loop did not anticipate.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::ServiceApi;
use crate::model::JobStatus;
use crate::reconcile::Reconciler;
use crate::registry::JobRegistry;

/// Default spacing between poll ticks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Pause before the supervisor restarts a dead poll loop.
const RESPAWN_DELAY: Duration = Duration::from_secs(1);

/// The polling fallback path.
pub struct PollLoop<A: ServiceApi> {
    api: Arc<A>,
    registry: Arc<JobRegistry>,
    reconciler: Arc<Reconciler<A>>,
    interval: Duration,
}

impl<A: ServiceApi + 'static> PollLoop<A> {
    pub fn new(
        api: Arc<A>,
        registry: Arc<JobRegistry>,
        reconciler: Arc<Reconciler<A>>,
        interval: Duration,
    ) -> Self {
        Self {
            api,
            registry,
            reconciler,
            interval,
        }
    }

    /// Runs ticks until `shutdown` fires.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        // A delayed tick must not cause a burst of catch-up queries.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("poll loop stopping");
                    return;
                }
                _ = ticker.tick() => {}
            }
            self.tick().await;
        }
    }

    /// One poll pass over the registry.
    pub async fn tick(&self) {
        let ids = self.registry.snapshot_ids();
        if ids.is_empty() {
            return;
        }

        let statuses = match self.api.bulk_statuses(&ids).await {
            Ok(statuses) => statuses,
            Err(err) => {
                warn!(jobs = ids.len(), error = %err, "status poll failed");
                return;
            }
        };

        for id in ids {
            let Some(raw) = statuses.get(&id) else {
                // The server no longer lists this job. A fresh submission can
                // look like this for one tick; only a direct 404 is treated
                // as deletion, so leave the job for the next pass.
                warn!(job_id = id, "job absent from status poll");
                continue;
            };
            let Some(status) = JobStatus::parse(raw) else {
                // Never guess at an unknown vocabulary; the job stays
                // registered and the other jobs in the response still settle.
                warn!(job_id = id, status = %raw, "unknown status in poll, job left registered");
                continue;
            };
            if status.is_active() {
                continue;
            }
            let Some(job) = self.registry.take(id) else {
                // Claimed by the event channel between snapshot and now.
                continue;
            };
            if let Err(err) = self.reconciler.reconcile(&job, status).await {
                let failures = job.record_transient_failure() + 1;
                // First hiccup is routine; repeats are worth noticing.
                if failures > 1 {
                    warn!(job_id = id, failures, error = %err, "reconciliation still failing");
                } else {
                    debug!(job_id = id, error = %err, "reconciliation hit transient error");
                }
                self.registry.reinsert(job);
            }
        }
    }
}

/// Keeps the poll loop alive for the runtime's lifetime.
///
/// The loop only returns on shutdown; anything else (including a panic in a
/// tick) is unexpected, logged, and answered with a respawn.
pub struct PollSupervisor {
    task: tokio::task::JoinHandle<()>,
}

impl PollSupervisor {
    pub fn spawn<A: ServiceApi + 'static>(
        poll: Arc<PollLoop<A>>,
        shutdown: CancellationToken,
    ) -> Self {
        let task = tokio::spawn(async move {
            loop {
                let run = tokio::spawn(Arc::clone(&poll).run(shutdown.clone()));
                match run.await {
                    Ok(()) => {}
                    Err(err) => warn!(error = %err, "poll loop died"),
                }
                if shutdown.is_cancelled() {
                    return;
                }
                warn!("restarting poll loop");
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = tokio::time::sleep(RESPAWN_DELAY) => {}
                }
            }
        });
        Self { task }
    }

    /// Waits for the supervisor to wind down after shutdown.
    pub async fn join(self) {
        let _ = self.task.await;
    }
}
