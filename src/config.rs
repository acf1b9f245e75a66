//! Runtime configuration.

use std::time::Duration;

use crate::client::DEFAULT_SUBMIT_ATTEMPTS;
use crate::poll::DEFAULT_POLL_INTERVAL;

/// Default time allowed for establishing a connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time allowed for a whole request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Path of the termination event stream, relative to the base URL.
pub const DEFAULT_EVENTS_PATH: &str = "events";

/// Settings for a [`JobRunner`](crate::runner::JobRunner).
///
/// Only the base URL is mandatory; everything else has a usable default.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Root of the service API, e.g. `http://sim.example.org/api`.
    pub base_url: String,
    /// Server-side file attached to each outcome, e.g. `"run.log"`.
    pub log_file: Option<String>,
    /// Spacing of poll ticks.
    pub poll_interval: Duration,
    /// Connection establishment timeout.
    pub connect_timeout: Duration,
    /// Whole-request timeout. The event stream is exempt; it stays open
    /// indefinitely.
    pub request_timeout: Duration,
    /// Attempts per job submission before a transient error is surfaced.
    pub submit_attempts: u32,
    /// Event stream path relative to `base_url`.
    pub events_path: String,
}

impl RunnerConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            log_file: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            submit_attempts: DEFAULT_SUBMIT_ATTEMPTS,
            events_path: DEFAULT_EVENTS_PATH.to_string(),
        }
    }

    pub fn with_log_file(mut self, name: impl Into<String>) -> Self {
        self.log_file = Some(name.into());
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_submit_attempts(mut self, attempts: u32) -> Self {
        self.submit_attempts = attempts.max(1);
        self
    }

    pub fn with_events_path(mut self, path: impl Into<String>) -> Self {
        self.events_path = path.into();
        self
    }

    /// Full URL of the event stream.
    pub fn events_url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.events_path.trim_start_matches('/')
        )
    }
}
