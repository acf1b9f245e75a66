//! HTTP access to the simulation service.
//!
//! [`ServiceApi`] is the seam between the runtime and the wire: the runner,
//! reconciler and poll loop all talk through it, so tests can swap in a mock
//! without a network. [`HttpServiceClient`] is the production implementation
//! on top of `reqwest`.
//!
//! The service surface is small:
//!
//! | Operation      | Request                                    |
//! |----------------|--------------------------------------------|
//! | submit         | `POST jobs/` with the input bindings       |
//! | status         | `GET jobs/{id}`                            |
//! | bulk statuses  | `GET jobs/?status=true&only=id1,id2,...`   |
//! | results        | `GET jobs/{id}/results/?only=a.x,b.y,...`  |
//! | error text     | `GET jobs/{id}/error`                      |
//! | job file       | `GET jobs/{id}/files/{name}`               |

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::{Map, Value as Json};
use tracing::{debug, warn};

use crate::error::ClientError;
use crate::model::{JobId, JobStatus};

/// Attempts made for a job submission before giving up on transient errors.
pub const DEFAULT_SUBMIT_ATTEMPTS: u32 = 3;

/// Pause between submission attempts.
pub const SUBMIT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Operations the simulation service exposes over HTTP.
///
/// Every method is fallible with [`ClientError`]; callers decide per call
/// site whether a transient error is retried, re-raised or recorded.
pub trait ServiceApi: Send + Sync {
    /// Submits a new job from flattened input bindings. Returns the id the
    /// server assigned.
    fn submit_job(
        &self,
        bindings: &Map<String, Json>,
    ) -> impl Future<Output = Result<JobId, ClientError>> + Send;

    /// Fetches the status of a single job.
    fn job_status(&self, id: JobId) -> impl Future<Output = Result<JobStatus, ClientError>> + Send;

    /// Fetches the statuses of several jobs in one request. Jobs the server
    /// no longer knows about are simply absent from the returned map.
    ///
    /// Statuses come back raw: one unparseable entry must not poison the
    /// rest of the response, so the caller vets each string per job.
    fn bulk_statuses(
        &self,
        ids: &[JobId],
    ) -> impl Future<Output = Result<HashMap<JobId, String>, ClientError>> + Send;

    /// Fetches the named result values of a completed job.
    fn job_results(
        &self,
        id: JobId,
        only: &[String],
    ) -> impl Future<Output = Result<Map<String, Json>, ClientError>> + Send;

    /// Fetches the error text of a failed job.
    fn job_error(&self, id: JobId) -> impl Future<Output = Result<String, ClientError>> + Send;

    /// Fetches a file produced by the job. `None` when the server has no such
    /// file, which is normal for jobs that wrote no log.
    fn job_file(
        &self,
        id: JobId,
        name: &str,
    ) -> impl Future<Output = Result<Option<String>, ClientError>> + Send;
}

/// Production [`ServiceApi`] backed by `reqwest`.
///
/// The client takes a prebuilt [`reqwest::Client`] so connection pooling,
/// timeouts and TLS are configured once by the caller.
pub struct HttpServiceClient {
    http: reqwest::Client,
    base_url: String,
    submit_attempts: u32,
}

impl HttpServiceClient {
    /// Creates a client rooted at `base_url` (with or without a trailing
    /// slash).
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            http,
            base_url,
            submit_attempts: DEFAULT_SUBMIT_ATTEMPTS,
        }
    }

    /// Overrides how many attempts a submission gets before a transient
    /// error is reported to the caller.
    pub fn with_submit_attempts(mut self, attempts: u32) -> Self {
        self.submit_attempts = attempts.max(1);
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn read_body(response: reqwest::Response) -> Result<String, ClientError> {
        let status = response.status();
        let body = response.text().await?;
        if status.is_success() {
            Ok(body)
        } else {
            Err(ClientError::Protocol {
                status: status.as_u16(),
                body,
            })
        }
    }

    async fn get_json(&self, path: &str) -> Result<Json, ClientError> {
        let body = Self::read_body(self.http.get(self.url(path)).send().await?).await?;
        serde_json::from_str(&body).map_err(|err| ClientError::Payload(err.to_string()))
    }

    async fn submit_once(&self, bindings: &Map<String, Json>) -> Result<JobId, ClientError> {
        let response = self
            .http
            .post(self.url("jobs/"))
            .json(bindings)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        // Job creation is 201 specifically; a 200 here would mean the server
        // did something other than create a job.
        if status != StatusCode::CREATED {
            return Err(ClientError::Protocol {
                status: status.as_u16(),
                body,
            });
        }
        let id: Json =
            serde_json::from_str(&body).map_err(|err| ClientError::Payload(err.to_string()))?;
        id.as_u64()
            .ok_or_else(|| ClientError::Payload(format!("job id is not an integer: {id}")))
    }
}

impl ServiceApi for HttpServiceClient {
    async fn submit_job(&self, bindings: &Map<String, Json>) -> Result<JobId, ClientError> {
        let mut attempt = 1;
        loop {
            match self.submit_once(bindings).await {
                Ok(id) => {
                    debug!(job_id = id, attempt, "job submitted");
                    return Ok(id);
                }
                Err(err) if err.is_transient() && attempt < self.submit_attempts => {
                    warn!(
                        attempt,
                        max_attempts = self.submit_attempts,
                        error = %err,
                        "job submission failed, retrying"
                    );
                    tokio::time::sleep(SUBMIT_RETRY_DELAY).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn job_status(&self, id: JobId) -> Result<JobStatus, ClientError> {
        let body = self.get_json(&format!("jobs/{id}")).await?;
        serde_json::from_value(body).map_err(|err| ClientError::Payload(err.to_string()))
    }

    async fn bulk_statuses(&self, ids: &[JobId]) -> Result<HashMap<JobId, String>, ClientError> {
        let only = ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let body = self.get_json(&format!("jobs/?status=true&only={only}")).await?;
        serde_json::from_value(body).map_err(|err| ClientError::Payload(err.to_string()))
    }

    async fn job_results(&self, id: JobId, only: &[String]) -> Result<Map<String, Json>, ClientError> {
        let path = if only.is_empty() {
            format!("jobs/{id}/results/")
        } else {
            format!("jobs/{id}/results/?only={}", only.join(","))
        };
        let body = self.get_json(&path).await?;
        match body {
            Json::Object(map) => Ok(map),
            other => Err(ClientError::Payload(format!(
                "results response is not an object: {other}"
            ))),
        }
    }

    async fn job_error(&self, id: JobId) -> Result<String, ClientError> {
        let body = self.get_json(&format!("jobs/{id}/error")).await?;
        match body {
            Json::String(text) => Ok(text),
            other => Ok(other.to_string()),
        }
    }

    async fn job_file(&self, id: JobId, name: &str) -> Result<Option<String>, ClientError> {
        let response = self
            .http
            .get(self.url(&format!("jobs/{id}/files/{name}")))
            .send()
            .await?;
        match Self::read_body(response).await {
            Ok(body) => Ok(Some(body)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn client(server: &MockServer) -> HttpServiceClient {
        HttpServiceClient::new(reqwest::Client::new(), server.base_url())
    }

    fn bindings() -> Map<String, Json> {
        let mut map = Map::new();
        map.insert("c.a".into(), json!(1));
        map.insert("c.b".into(), json!(2));
        map
    }

    #[tokio::test]
    async fn test_submit_returns_created_id() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/jobs/").json_body(json!({"c.a": 1, "c.b": 2}));
                then.status(201).json_body(json!(7));
            })
            .await;

        let id = client(&server).submit_job(&bindings()).await.unwrap();
        assert_eq!(id, 7);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_submit_rejects_200() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/jobs/");
                then.status(200).json_body(json!(7));
            })
            .await;

        let err = client(&server).submit_job(&bindings()).await.unwrap_err();
        assert_eq!(err.status(), Some(200));
    }

    #[tokio::test]
    async fn test_submit_retries_on_unavailable() {
        let server = MockServer::start_async().await;
        let unavailable = server
            .mock_async(|when, then| {
                when.method(POST).path("/jobs/");
                then.status(503).body("restarting");
            })
            .await;

        let err = client(&server).submit_job(&bindings()).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(unavailable.hits_async().await, DEFAULT_SUBMIT_ATTEMPTS as usize);
    }

    #[tokio::test]
    async fn test_submit_does_not_retry_stable_errors() {
        let server = MockServer::start_async().await;
        let rejected = server
            .mock_async(|when, then| {
                when.method(POST).path("/jobs/");
                then.status(400).body("bad input");
            })
            .await;

        let err = client(&server).submit_job(&bindings()).await.unwrap_err();
        assert_eq!(err.status(), Some(400));
        assert_eq!(rejected.hits_async().await, 1);
    }

    #[tokio::test]
    async fn test_job_status_parses_wire_casing() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/jobs/3");
                then.status(200).json_body(json!("RUNNING"));
            })
            .await;

        let status = client(&server).job_status(3).await.unwrap();
        assert_eq!(status, JobStatus::Running);
    }

    #[tokio::test]
    async fn test_job_status_rejects_unknown_strings() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/jobs/3");
                then.status(200).json_body(json!("EXPLODED"));
            })
            .await;

        let err = client(&server).job_status(3).await.unwrap_err();
        assert!(matches!(err, ClientError::Payload(_)));
    }

    #[tokio::test]
    async fn test_bulk_statuses() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/jobs/")
                    .query_param("status", "true")
                    .query_param("only", "1,2");
                then.status(200).json_body(json!({"1": "DONE", "2": "RUNNING"}));
            })
            .await;

        let statuses = client(&server).bulk_statuses(&[1, 2]).await.unwrap();
        assert_eq!(statuses.get(&1).map(String::as_str), Some("DONE"));
        assert_eq!(statuses.get(&2).map(String::as_str), Some("RUNNING"));
    }

    #[tokio::test]
    async fn test_bulk_statuses_pass_unknown_strings_through() {
        // An unrecognized status must not fail the whole response; the
        // caller decides per job what to do with it.
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/jobs/").query_param("status", "true");
                then.status(200).json_body(json!({"1": "DONE", "7": "EXPLODED"}));
            })
            .await;

        let statuses = client(&server).bulk_statuses(&[1, 7]).await.unwrap();
        assert_eq!(statuses.get(&1).map(String::as_str), Some("DONE"));
        assert_eq!(statuses.get(&7).map(String::as_str), Some("EXPLODED"));
    }

    #[tokio::test]
    async fn test_job_results_restricts_to_requested_outputs() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/jobs/5/results/")
                    .query_param("only", "c.sum");
                then.status(200).json_body(json!({"c.sum": 3}));
            })
            .await;

        let results = client(&server)
            .job_results(5, &["c.sum".to_string()])
            .await
            .unwrap();
        assert_eq!(results.get("c.sum"), Some(&json!(3)));
    }

    #[tokio::test]
    async fn test_job_results_propagates_unavailable() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/jobs/5/results/");
                then.status(503);
            })
            .await;

        let err = client(&server).job_results(5, &[]).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_job_file_absent_is_none() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/jobs/5/files/run.log");
                then.status(404);
            })
            .await;

        let file = client(&server).job_file(5, "run.log").await.unwrap();
        assert_eq!(file, None);
    }

    #[tokio::test]
    async fn test_job_file_present() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/jobs/5/files/run.log");
                then.status(200).body("step 1 ok\n");
            })
            .await;

        let file = client(&server).job_file(5, "run.log").await.unwrap();
        assert_eq!(file.as_deref(), Some("step 1 ok\n"));
    }
}
