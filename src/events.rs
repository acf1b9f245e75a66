//! Push notification channel for job termination.
//!
//! The service publishes a `terminated` event whenever a job reaches a
//! terminal status. This module subscribes to that feed over server-sent
//! events and forwards each notification to a dispatcher, which claims the
//! job from the registry and reconciles it. The poll loop covers every event
//! the feed drops, so the channel here favors liveness over completeness: on
//! any stream error it reports [`ChannelState::Failed`], waits, and
//! reconnects.

use std::sync::Arc;
use std::time::Duration;

use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::client::ServiceApi;
use crate::model::{JobId, JobStatus};
use crate::reconcile::Reconciler;
use crate::registry::JobRegistry;

/// Pause before reconnecting a failed event stream.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Event type published by the service for terminal transitions.
const TERMINATED_EVENT: &str = "terminated";

/// Capacity of the source → dispatcher queue.
const EVENT_QUEUE_DEPTH: usize = 64;

/// A termination notification as it arrives on the wire.
///
/// The status is kept raw here; the dispatcher parses it and decides what an
/// unknown string means.
#[derive(Debug, Clone, Deserialize)]
pub struct TerminatedEvent {
    pub job: JobId,
    pub status: String,
}

/// Connection state of the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Not yet connected, or between reconnect attempts.
    Connecting,
    /// Stream open, events flowing.
    Connected,
    /// Last attempt failed; a reconnect is pending.
    Failed,
}

/// Source of termination notifications.
///
/// Runs until `shutdown` fires, reporting connection state on `state` and
/// delivering events on `events`.
pub trait EventSource: Send + Sync + 'static {
    fn run(
        self: Arc<Self>,
        events: mpsc::Sender<TerminatedEvent>,
        state: watch::Sender<ChannelState>,
        shutdown: CancellationToken,
    ) -> impl std::future::Future<Output = ()> + Send;
}

/// [`EventSource`] over an SSE endpoint.
pub struct SseEventSource {
    http: reqwest::Client,
    url: String,
}

impl SseEventSource {
    pub fn new(http: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
        }
    }

    /// Streams one connection until it ends or errors. Returns whether the
    /// shutdown token fired.
    async fn stream_once(
        &self,
        events: &mpsc::Sender<TerminatedEvent>,
        state: &watch::Sender<ChannelState>,
        shutdown: &CancellationToken,
    ) -> bool {
        let response = match self.http.get(&self.url).send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                warn!(url = %self.url, status = %response.status(), "event stream refused");
                return false;
            }
            Err(err) => {
                warn!(url = %self.url, error = %err, "event stream connection failed");
                return false;
            }
        };

        let _ = state.send(ChannelState::Connected);
        info!(url = %self.url, "event stream connected");

        let mut stream = response.bytes_stream().eventsource();
        loop {
            let item = tokio::select! {
                _ = shutdown.cancelled() => return true,
                item = stream.next() => item,
            };
            match item {
                Some(Ok(event)) => {
                    if event.event != TERMINATED_EVENT {
                        trace!(event = %event.event, "ignoring unrelated event");
                        continue;
                    }
                    match serde_json::from_str::<TerminatedEvent>(&event.data) {
                        Ok(parsed) => {
                            if events.send(parsed).await.is_err() {
                                // Dispatcher gone, runtime is shutting down.
                                return true;
                            }
                        }
                        Err(err) => {
                            warn!(data = %event.data, error = %err, "malformed terminated event")
                        }
                    }
                }
                Some(Err(err)) => {
                    warn!(error = %err, "event stream broke");
                    return false;
                }
                None => {
                    info!("event stream closed by server");
                    return false;
                }
            }
        }
    }
}

impl EventSource for SseEventSource {
    async fn run(
        self: Arc<Self>,
        events: mpsc::Sender<TerminatedEvent>,
        state: watch::Sender<ChannelState>,
        shutdown: CancellationToken,
    ) {
        loop {
            let _ = state.send(ChannelState::Connecting);
            let stopped = self.stream_once(&events, &state, &shutdown).await;
            if stopped || shutdown.is_cancelled() {
                debug!("event source stopping");
                return;
            }
            let _ = state.send(ChannelState::Failed);
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
            }
        }
    }
}

/// Running push channel: one source task, one dispatcher task.
pub struct EventChannel {
    state_rx: watch::Receiver<ChannelState>,
    source_task: tokio::task::JoinHandle<()>,
    dispatch_task: tokio::task::JoinHandle<()>,
}

impl EventChannel {
    /// Spawns the channel against `source`, reconciling claimed jobs with
    /// `reconciler`.
    pub fn spawn<S, A>(
        source: Arc<S>,
        registry: Arc<JobRegistry>,
        reconciler: Arc<Reconciler<A>>,
        shutdown: CancellationToken,
    ) -> Self
    where
        S: EventSource,
        A: ServiceApi + 'static,
    {
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let (state_tx, state_rx) = watch::channel(ChannelState::Connecting);

        let source_task = tokio::spawn(source.run(event_tx, state_tx, shutdown.clone()));
        let dispatch_task = tokio::spawn(dispatch(event_rx, registry, reconciler));

        Self {
            state_rx,
            source_task,
            dispatch_task,
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ChannelState {
        *self.state_rx.borrow()
    }

    /// Waits until the channel reports connected, up to `timeout`.
    ///
    /// Returns `false` on timeout, and immediately once an attempt fails
    /// (state [`ChannelState::Failed`]) so callers are not left sleeping out
    /// the timeout against a dead endpoint. Submitting jobs without a live
    /// channel is safe (polling still completes them) but slower.
    pub async fn wait_connected(&self, timeout: Duration) -> bool {
        let mut rx = self.state_rx.clone();
        let wait = async {
            loop {
                match *rx.borrow_and_update() {
                    ChannelState::Connected => return true,
                    ChannelState::Failed => return false,
                    ChannelState::Connecting => {}
                }
                if rx.changed().await.is_err() {
                    return false;
                }
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .unwrap_or(false)
    }

    /// Stops both tasks. Call after cancelling the shutdown token.
    pub async fn join(self) {
        let _ = self.source_task.await;
        let _ = self.dispatch_task.await;
    }
}

/// Applies incoming termination events to the registry.
///
/// Exits when the source side of the queue closes.
async fn dispatch<A: ServiceApi>(
    mut events: mpsc::Receiver<TerminatedEvent>,
    registry: Arc<JobRegistry>,
    reconciler: Arc<Reconciler<A>>,
) {
    while let Some(event) = events.recv().await {
        let Some(status) = JobStatus::parse(&event.status) else {
            warn!(job_id = event.job, status = %event.status, "unknown status in event, ignored");
            continue;
        };
        if status.is_active() {
            debug!(job_id = event.job, status = %status, "non-terminal event ignored");
            continue;
        }
        let Some(job) = registry.take(event.job) else {
            // Lost the race to the poll loop, or the job was never ours.
            debug!(job_id = event.job, "termination event for unclaimed job");
            continue;
        };
        if let Err(err) = reconciler.reconcile(&job, status).await {
            let failures = job.record_transient_failure() + 1;
            warn!(
                job_id = job.id(),
                failures,
                error = %err,
                "reconciliation hit transient error, job returned to registry"
            );
            registry.reinsert(job);
        }
    }
    debug!("event dispatcher stopped");
}
