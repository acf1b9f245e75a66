//! Local completion outcomes for submitted jobs.

use std::collections::BTreeMap;

use super::value::SimValue;

/// Decoded results of a successfully completed job.
#[derive(Clone, Debug, PartialEq)]
pub struct JobResults {
    /// Qualified output name → decoded value.
    pub values: BTreeMap<String, SimValue>,
    /// Contents of the job's log file, when one is configured and present.
    pub log: Option<String>,
}

/// A job that finished without producing results.
#[derive(Clone, Debug, PartialEq)]
pub struct JobFailure {
    /// Whether retrying the same input is expected to fail again.
    pub permanent: bool,
    /// Human-readable reason.
    pub reason: String,
    /// Log contents or error body, best effort.
    pub log: Option<String>,
}

/// The single value a job's completion slot is assigned.
#[derive(Clone, Debug, PartialEq)]
pub enum JobOutcome {
    Success(JobResults),
    Failure(JobFailure),
    /// Cancelled locally or by the server before completion.
    Cancelled,
}

impl JobOutcome {
    pub fn failure(permanent: bool, reason: impl Into<String>, log: Option<String>) -> Self {
        Self::Failure(JobFailure {
            permanent,
            reason: reason.into(),
            log,
        })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// The decoded results, if the job succeeded.
    pub fn results(&self) -> Option<&JobResults> {
        match self {
            Self::Success(res) => Some(res),
            _ => None,
        }
    }
}
