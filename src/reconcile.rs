//! Turning a terminal server status into a local job outcome.
//!
//! Whoever claims a job from the registry calls [`Reconciler::reconcile`]
//! with the status the server reported. Dispatch:
//!
//! - `Done`: fetch results, decode against the declared outputs, attach the
//!   log if one is configured. Decode problems complete the job as a
//!   non-permanent failure.
//! - `Failed`: fetch the server's error text and the log; permanent failure.
//! - `Cancelled`: the server dropped the job; completes as cancelled.
//! - anything else terminal (`Invalid`): non-permanent failure with a
//!   best-effort log.
//!
//! The one case that does NOT complete the job is a transient error on the
//! wire (transport, 503). That error is returned to the caller, who records
//! it on the job and puts the job back in the registry for the next attempt.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::client::ServiceApi;
use crate::decode::ResultDecoder;
use crate::error::ClientError;
use crate::job::Job;
use crate::model::{JobOutcome, JobResults, JobStatus};

const DELETED_REASON: &str = "Deleted from server";

/// Applies terminal statuses to jobs.
pub struct Reconciler<A: ServiceApi> {
    api: Arc<A>,
    /// Server-side file fetched and attached to outcomes, when configured.
    log_file: Option<String>,
}

impl<A: ServiceApi> Reconciler<A> {
    pub fn new(api: Arc<A>, log_file: Option<String>) -> Self {
        Self { api, log_file }
    }

    /// Completes `job` according to `status`.
    ///
    /// Returns `Err` only for transient errors; the job is then still
    /// incomplete and must be re-registered by the caller. Every other path
    /// completes the job and returns `Ok`.
    pub async fn reconcile(&self, job: &Job, status: JobStatus) -> Result<(), ClientError> {
        debug_assert!(status.is_terminal(), "reconcile called with active status");
        match status {
            JobStatus::Done => self.reconcile_done(job).await,
            JobStatus::Failed => self.reconcile_failed(job).await,
            JobStatus::Cancelled => {
                info!(job_id = job.id(), "job cancelled by server");
                job.complete(JobOutcome::Cancelled);
                Ok(())
            }
            other => {
                warn!(job_id = job.id(), status = %other, "abnormal terminal status");
                let log = self.fetch_log(job.id()).await;
                job.complete(JobOutcome::failure(
                    false,
                    format!("Abnormal job status {other}"),
                    log,
                ));
                Ok(())
            }
        }
    }

    /// Completes `job` as missing from the server. Used when a status query
    /// comes back 404 for a job we still track.
    pub fn reconcile_deleted(&self, job: &Job) {
        warn!(job_id = job.id(), "job no longer known to server");
        job.complete(JobOutcome::failure(true, DELETED_REASON, None));
    }

    async fn reconcile_done(&self, job: &Job) -> Result<(), ClientError> {
        let outputs = job.input().namespace().outputs();
        let only: Vec<String> = outputs.iter().map(|(name, _)| name.clone()).collect();

        let response = match self.api.job_results(job.id(), &only).await {
            Ok(response) => response,
            Err(err) if err.is_transient() => return Err(err),
            Err(err) => {
                warn!(job_id = job.id(), error = %err, "results fetch failed");
                job.complete(JobOutcome::failure(
                    false,
                    format!("Failed to fetch results: {err}"),
                    None,
                ));
                return Ok(());
            }
        };

        let mut decoder = ResultDecoder::new(&response);
        let mut values = std::collections::BTreeMap::new();
        for (name, declared) in &outputs {
            match decoder.decode_field(name, declared) {
                Ok(value) => {
                    values.insert(name.clone(), value);
                }
                Err(err) => {
                    warn!(job_id = job.id(), output = %name, error = %err, "result decode failed");
                    job.complete(JobOutcome::failure(
                        false,
                        format!("Failed to decode result {name}: {err}"),
                        None,
                    ));
                    return Ok(());
                }
            }
        }

        let log = self.fetch_log(job.id()).await;
        info!(job_id = job.id(), outputs = values.len(), "job completed");
        job.complete(JobOutcome::Success(JobResults { values, log }));
        Ok(())
    }

    async fn reconcile_failed(&self, job: &Job) -> Result<(), ClientError> {
        // Without the server's error text the failure cannot be classified
        // as permanent; the same input might work on a healthy server.
        let (reason, permanent) = match self.api.job_error(job.id()).await {
            Ok(text) => (text, true),
            Err(err) if err.is_transient() => return Err(err),
            Err(err) => {
                debug!(job_id = job.id(), error = %err, "error text unavailable");
                (format!("Job failed (error text unavailable: {err})"), false)
            }
        };
        let log = self.fetch_log(job.id()).await;
        info!(job_id = job.id(), "job failed on server");
        job.complete(JobOutcome::failure(permanent, reason, log));
        Ok(())
    }

    /// Best effort; a missing or unreadable log never changes the outcome.
    async fn fetch_log(&self, id: crate::model::JobId) -> Option<String> {
        let name = self.log_file.as_deref()?;
        match self.api.job_file(id, name).await {
            Ok(log) => log,
            Err(err) => {
                debug!(job_id = id, file = name, error = %err, "log fetch failed");
                None
            }
        }
    }
}
