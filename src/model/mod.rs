//! Data model: statuses, typed values, namespaces and job outcomes.

mod namespace;
mod outcome;
mod status;
mod value;

pub use namespace::{Component, InputError, Namespace, SimulationInput};
pub use outcome::{JobFailure, JobOutcome, JobResults};
pub use status::JobStatus;
pub use value::{SeriesKind, SimValue, TimeSeries, ValueType};

/// Server-assigned job identifier.
pub type JobId = u64;
