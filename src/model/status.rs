//! Server-side job status vocabulary.

use serde::{Deserialize, Deserializer};

/// Status of a job as reported by the simulation service.
///
/// Scheduled and Running are "active"; the remaining statuses are terminal
/// and never transition again. Parsing accepts any letter case; an
/// unrecognized string is rejected, never coerced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JobStatus {
    /// Queued on the server, not started.
    Scheduled,
    /// Currently executing.
    Running,
    /// Finished successfully; results are available.
    Done,
    /// Cancelled before completion.
    Cancelled,
    /// Finished with an error; an error message is available.
    Failed,
    /// The job input was rejected by the server.
    Invalid,
}

impl JobStatus {
    /// Parses a status string as sent by the service (any case).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "SCHEDULED" => Some(Self::Scheduled),
            "RUNNING" => Some(Self::Running),
            "DONE" => Some(Self::Done),
            "CANCELLED" => Some(Self::Cancelled),
            "FAILED" => Some(Self::Failed),
            "INVALID" => Some(Self::Invalid),
            _ => None,
        }
    }

    /// Returns true while the server may still change the status.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Scheduled | Self::Running)
    }

    /// Returns true once no further transition can occur.
    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    /// Returns the status name for logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Running => "running",
            Self::Done => "done",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
            Self::Invalid => "invalid",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl<'de> Deserialize<'de> for JobStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown job status {raw:?}")))
    }
}
