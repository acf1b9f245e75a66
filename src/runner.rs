//! Top-level runtime wiring submission, push events and polling together.
//!
//! One [`JobRunner`] owns the HTTP client, the job registry, the reconciler,
//! the event channel and the supervised poll loop, all tied to a single
//! cancellation token. Submitting returns an [`Arc<Job>`] handle the caller
//! can wait on; completion arrives through whichever notification path is
//! faster.

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{HttpServiceClient, ServiceApi};
use crate::config::RunnerConfig;
use crate::error::ClientError;
use crate::events::{EventChannel, EventSource, SseEventSource};
use crate::job::Job;
use crate::model::{InputError, JobOutcome, JobStatus, SimulationInput};
use crate::poll::{PollLoop, PollSupervisor};
use crate::reconcile::Reconciler;
use crate::registry::JobRegistry;

/// Errors surfaced by [`JobRunner::submit`].
#[derive(Debug, Error)]
pub enum SubmitError {
    /// The input bindings could not be assembled.
    #[error("invalid input: {0}")]
    Input(#[from] InputError),

    /// The server refused or never received the submission.
    #[error("submission failed: {0}")]
    Client(#[from] ClientError),
}

/// Errors from building a runner.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("HTTP client setup failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Client-side runtime for a simulation service.
pub struct JobRunner<A: ServiceApi + 'static> {
    api: Arc<A>,
    registry: Arc<JobRegistry>,
    reconciler: Arc<Reconciler<A>>,
    events: EventChannel,
    poll: PollSupervisor,
    shutdown: CancellationToken,
}

impl JobRunner<HttpServiceClient> {
    /// Builds a runner against a live service, spawning its background tasks
    /// onto the current tokio runtime.
    pub fn connect(config: RunnerConfig) -> Result<Self, RunnerError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()?;
        // The event stream must outlive the request timeout.
        let stream_http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;

        let api = Arc::new(
            HttpServiceClient::new(http, config.base_url.clone())
                .with_submit_attempts(config.submit_attempts),
        );
        let source = Arc::new(SseEventSource::new(stream_http, config.events_url()));
        Ok(Self::assemble(api, source, &config))
    }
}

impl<A: ServiceApi + 'static> JobRunner<A> {
    /// Wires a runner from its parts. Tests use this to inject mock services
    /// and event sources.
    pub fn assemble<S: EventSource>(api: Arc<A>, source: Arc<S>, config: &RunnerConfig) -> Self {
        let shutdown = CancellationToken::new();
        let registry = Arc::new(JobRegistry::new());
        let reconciler = Arc::new(Reconciler::new(Arc::clone(&api), config.log_file.clone()));

        let events = EventChannel::spawn(
            source,
            Arc::clone(&registry),
            Arc::clone(&reconciler),
            shutdown.clone(),
        );
        let poll_loop = Arc::new(PollLoop::new(
            Arc::clone(&api),
            Arc::clone(&registry),
            Arc::clone(&reconciler),
            config.poll_interval,
        ));
        let poll = PollSupervisor::spawn(poll_loop, shutdown.clone());

        info!(poll_interval = ?config.poll_interval, "job runner started");
        Self {
            api,
            registry,
            reconciler,
            events,
            poll,
            shutdown,
        }
    }

    /// Submits `input` and registers the resulting job for completion
    /// tracking.
    pub async fn submit(&self, input: SimulationInput) -> Result<Arc<Job>, SubmitError> {
        let bindings = input.bindings()?;
        let id = self.api.submit_job(&bindings).await?;
        let job = Arc::new(Job::new(id, input));
        self.registry.register(Arc::clone(&job));

        // Catches a job that turned terminal before either notification path
        // could see it. A 404 here just means the first status query ran
        // before the server listed the job, so missing is tolerated.
        match self.check_status(&job, true).await {
            Ok(Some(status)) => debug!(job_id = id, status = %status, "job submitted"),
            Ok(None) => debug!(job_id = id, "job not yet visible after submit"),
            Err(err) => debug!(job_id = id, error = %err, "post-submit status check failed"),
        }

        Ok(job)
    }

    /// Fetches `job`'s current status from the server and applies it.
    ///
    /// An active status is only reported. A terminal status claims the job
    /// and reconciles it on the spot instead of waiting for an event or the
    /// next poll tick. A 404 completes the job as deleted from the server,
    /// unless `tolerate_missing` is set for the window right after
    /// submission; either way it reports `None`.
    ///
    /// Transient errors (including a transient reconciliation failure, after
    /// which the job is back in the registry) are returned to the caller.
    pub async fn check_status(
        &self,
        job: &Arc<Job>,
        tolerate_missing: bool,
    ) -> Result<Option<JobStatus>, ClientError> {
        match self.api.job_status(job.id()).await {
            Ok(status) if status.is_terminal() => {
                if let Some(claimed) = self.registry.take(job.id()) {
                    if let Err(err) = self.reconciler.reconcile(&claimed, status).await {
                        let failures = claimed.record_transient_failure() + 1;
                        warn!(
                            job_id = claimed.id(),
                            failures,
                            error = %err,
                            "reconciliation hit transient error, job returned to registry"
                        );
                        self.registry.reinsert(claimed);
                        return Err(err);
                    }
                }
                Ok(Some(status))
            }
            Ok(status) => Ok(Some(status)),
            Err(err) if err.is_not_found() => {
                if !tolerate_missing {
                    self.registry.take(job.id());
                    self.reconciler.reconcile_deleted(job);
                }
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Marks `job` cancelled locally and stops tracking it.
    ///
    /// Server-side cancellation is the server's business; this only settles
    /// the local handle so waiters return.
    pub fn cancel(&self, job: &Arc<Job>) {
        if job.complete(JobOutcome::Cancelled) {
            info!(job_id = job.id(), "job cancelled locally");
        }
        self.registry.take(job.id());
    }

    /// Waits until the push channel is connected, up to `timeout`. Returns
    /// `false` on timeout; jobs still complete via polling.
    pub async fn wait_connected(&self, timeout: std::time::Duration) -> bool {
        self.events.wait_connected(timeout).await
    }

    /// Number of jobs still awaiting completion.
    pub fn active_jobs(&self) -> usize {
        self.registry.active_count()
    }

    /// Stops the background tasks and waits for them to finish.
    ///
    /// Jobs still in flight stay incomplete; their waiters keep waiting, so
    /// callers should settle or cancel them first.
    pub async fn close(self) {
        let active = self.registry.active_count();
        if active > 0 {
            warn!(active, "runner closing with jobs still in flight");
        }
        self.shutdown.cancel();
        self.events.join().await;
        self.poll.join().await;
        info!("job runner stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ChannelState, TerminatedEvent};
    use crate::model::{Component, JobId, JobStatus, Namespace, SimValue, ValueType};
    use serde_json::{json, Map, Value as Json};
    use std::collections::{BTreeMap, HashMap};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::{mpsc, watch};

    /// In-memory service: submissions get sequential ids, statuses and
    /// results are scripted.
    #[derive(Default)]
    struct ScriptedApi {
        next_id: AtomicU64,
        statuses: Mutex<HashMap<JobId, JobStatus>>,
        results: Mutex<HashMap<JobId, Map<String, Json>>>,
        finish_on_submit: Mutex<Option<Json>>,
    }

    impl ScriptedApi {
        fn finish(&self, id: JobId, results: Json) {
            let map = match results {
                Json::Object(map) => map,
                _ => panic!("results must be an object"),
            };
            self.results.lock().unwrap().insert(id, map);
            self.statuses.lock().unwrap().insert(id, JobStatus::Done);
        }

        /// Scripts a server so fast the job is already done when the
        /// submission response arrives.
        fn finish_on_submit(&self, results: Json) {
            *self.finish_on_submit.lock().unwrap() = Some(results);
        }

        fn forget(&self, id: JobId) {
            self.statuses.lock().unwrap().remove(&id);
        }
    }

    impl ServiceApi for ScriptedApi {
        async fn submit_job(&self, _bindings: &Map<String, Json>) -> Result<JobId, ClientError> {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            self.statuses.lock().unwrap().insert(id, JobStatus::Scheduled);
            if let Some(results) = self.finish_on_submit.lock().unwrap().take() {
                self.finish(id, results);
            }
            Ok(id)
        }

        async fn job_status(&self, id: JobId) -> Result<JobStatus, ClientError> {
            self.statuses
                .lock()
                .unwrap()
                .get(&id)
                .copied()
                .ok_or(ClientError::Protocol {
                    status: 404,
                    body: String::new(),
                })
        }

        async fn bulk_statuses(
            &self,
            ids: &[JobId],
        ) -> Result<HashMap<JobId, String>, ClientError> {
            let statuses = self.statuses.lock().unwrap();
            Ok(ids
                .iter()
                .filter_map(|id| statuses.get(id).map(|status| (*id, status.as_str().to_string())))
                .collect())
        }

        async fn job_results(
            &self,
            id: JobId,
            _only: &[String],
        ) -> Result<Map<String, Json>, ClientError> {
            self.results
                .lock()
                .unwrap()
                .get(&id)
                .cloned()
                .ok_or(ClientError::Protocol {
                    status: 404,
                    body: String::new(),
                })
        }

        async fn job_error(&self, _id: JobId) -> Result<String, ClientError> {
            Ok("scripted failure".into())
        }

        async fn job_file(&self, _id: JobId, _name: &str) -> Result<Option<String>, ClientError> {
            Ok(None)
        }
    }

    /// Event source driven by a test-held queue.
    struct ManualSource {
        feed: Mutex<Option<mpsc::Receiver<TerminatedEvent>>>,
    }

    impl ManualSource {
        fn new() -> (Arc<Self>, mpsc::Sender<TerminatedEvent>) {
            let (tx, rx) = mpsc::channel(8);
            (
                Arc::new(Self {
                    feed: Mutex::new(Some(rx)),
                }),
                tx,
            )
        }
    }

    impl EventSource for ManualSource {
        async fn run(
            self: Arc<Self>,
            events: mpsc::Sender<TerminatedEvent>,
            state: watch::Sender<ChannelState>,
            shutdown: CancellationToken,
        ) {
            let mut feed = self.feed.lock().unwrap().take().expect("source run twice");
            let _ = state.send(ChannelState::Connected);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    event = feed.recv() => match event {
                        Some(event) => {
                            let _ = events.send(event).await;
                        }
                        None => return,
                    },
                }
            }
        }
    }

    fn adder_input() -> SimulationInput {
        let mut namespace = Namespace::new();
        namespace.components.insert(
            "c".to_string(),
            Component {
                inputs: BTreeMap::from([
                    ("a".to_string(), ValueType::Integer),
                    ("b".to_string(), ValueType::Integer),
                ]),
                outputs: BTreeMap::from([("sum".to_string(), ValueType::Integer)]),
            },
        );
        SimulationInput::new(Arc::new(namespace))
    }

    fn bound_input() -> SimulationInput {
        let mut input = adder_input();
        input.set("c", "a", SimValue::Integer(1)).unwrap();
        input.set("c", "b", SimValue::Integer(2)).unwrap();
        input
    }

    fn runner(
        poll_interval: Duration,
    ) -> (
        Arc<ScriptedApi>,
        JobRunner<ScriptedApi>,
        mpsc::Sender<TerminatedEvent>,
    ) {
        let api = Arc::new(ScriptedApi::default());
        let (source, feed) = ManualSource::new();
        let config = RunnerConfig::new("http://unused.test").with_poll_interval(poll_interval);
        let runner = JobRunner::assemble(Arc::clone(&api), source, &config);
        (api, runner, feed)
    }

    #[tokio::test]
    async fn test_submit_then_poll_completion() {
        let (api, runner, _feed) = runner(Duration::from_millis(10));
        assert!(runner.wait_connected(Duration::from_secs(1)).await);

        let job = runner.submit(bound_input()).await.unwrap();
        assert_eq!(runner.active_jobs(), 1);

        api.finish(job.id(), json!({"c.sum": 3}));

        let outcome = tokio::time::timeout(Duration::from_secs(2), job.wait())
            .await
            .expect("polling should complete the job");
        let results = outcome.results().expect("job should succeed");
        assert_eq!(results.values.get("c.sum"), Some(&SimValue::Integer(3)));
        assert_eq!(runner.active_jobs(), 0);

        runner.close().await;
    }

    #[tokio::test]
    async fn test_event_completes_before_poll() {
        // Poll far in the future so only the event path can win.
        let (api, runner, feed) = runner(Duration::from_secs(3600));
        let job = runner.submit(bound_input()).await.unwrap();

        api.finish(job.id(), json!({"c.sum": 0}));
        feed.send(TerminatedEvent {
            job: job.id(),
            status: "done".into(),
        })
        .await
        .unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(2), job.wait())
            .await
            .expect("event should complete the job");
        assert!(outcome.is_success());
        runner.close().await;
    }

    #[tokio::test]
    async fn test_event_and_poll_converge_on_one_outcome() {
        let (api, runner, feed) = runner(Duration::from_millis(5));
        let job = runner.submit(bound_input()).await.unwrap();
        api.finish(job.id(), json!({"c.sum": 0}));

        // Flood duplicate events while the poll loop ticks over the same job.
        for _ in 0..5 {
            let _ = feed
                .send(TerminatedEvent {
                    job: job.id(),
                    status: "DONE".into(),
                })
                .await;
        }

        let outcome = tokio::time::timeout(Duration::from_secs(2), job.wait())
            .await
            .unwrap();
        assert!(outcome.is_success());
        // Settled means settled; later deliveries must not flip the outcome.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(job.outcome().unwrap().is_success());
        runner.close().await;
    }

    #[tokio::test]
    async fn test_job_already_terminal_at_submit_completes_without_polling() {
        // Both notification paths effectively disabled; only the post-submit
        // status check can settle this job.
        let (api, runner, _feed) = runner(Duration::from_secs(3600));
        api.finish_on_submit(json!({"c.sum": 3}));

        let job = runner.submit(bound_input()).await.unwrap();

        let outcome = tokio::time::timeout(Duration::from_millis(100), job.wait())
            .await
            .expect("post-submit check should complete the job");
        let results = outcome.results().expect("job should succeed");
        assert_eq!(results.values.get("c.sum"), Some(&SimValue::Integer(3)));
        assert_eq!(runner.active_jobs(), 0);
        runner.close().await;
    }

    #[tokio::test]
    async fn test_check_status_completes_deleted_job_when_missing_not_tolerated() {
        let (api, runner, _feed) = runner(Duration::from_secs(3600));
        let job = runner.submit(bound_input()).await.unwrap();
        api.forget(job.id());

        let status = runner.check_status(&job, false).await.unwrap();
        assert_eq!(status, None);

        match job.outcome().unwrap() {
            JobOutcome::Failure(failure) => {
                assert!(failure.permanent);
                assert_eq!(failure.reason, "Deleted from server");
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(runner.active_jobs(), 0);
        runner.close().await;
    }

    #[tokio::test]
    async fn test_check_status_tolerates_missing_job() {
        let (api, runner, _feed) = runner(Duration::from_secs(3600));
        let job = runner.submit(bound_input()).await.unwrap();
        api.forget(job.id());

        let status = runner.check_status(&job, true).await.unwrap();
        assert_eq!(status, None);
        assert!(!job.is_complete());
        assert_eq!(runner.active_jobs(), 1);
        runner.close().await;
    }

    #[tokio::test]
    async fn test_cancel_settles_waiters() {
        let (_api, runner, _feed) = runner(Duration::from_secs(3600));
        let job = runner.submit(bound_input()).await.unwrap();

        runner.cancel(&job);
        assert_eq!(job.wait().await, JobOutcome::Cancelled);
        assert_eq!(runner.active_jobs(), 0);
        runner.close().await;
    }

    #[tokio::test]
    async fn test_unbound_input_is_rejected_before_submission() {
        let (_api, runner, _feed) = runner(Duration::from_secs(3600));
        // Inputs declared but never set.
        let err = runner.submit(adder_input()).await;
        match err {
            Err(SubmitError::Input(InputError::Unbound(_))) => {}
            other => panic!("expected unbound input error, got {other:?}"),
        }
        runner.close().await;
    }
}
