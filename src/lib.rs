//! simtrack - Client runtime for a remote simulation service
//!
//! This library submits computation jobs to a simulation service over HTTP
//! and tracks them to completion. A completed status can arrive on two paths
//! that race: a push event stream and a periodic status poll. The registry
//! arbitrates the race so every job settles exactly once.
//!
//! # High-Level API
//!
//! Most callers only need the [`runner`] facade:
//!
//! ```ignore
//! use simtrack::config::RunnerConfig;
//! use simtrack::runner::JobRunner;
//!
//! let config = RunnerConfig::new("http://sim.example.org/api").with_log_file("run.log");
//! let runner = JobRunner::connect(config)?;
//!
//! let job = runner.submit(input).await?;
//! let outcome = job.wait().await;
//! ```

pub mod client;
pub mod config;
pub mod decode;
pub mod error;
pub mod events;
pub mod job;
pub mod logging;
pub mod model;
pub mod poll;
pub mod reconcile;
pub mod registry;
pub mod runner;

pub use client::{HttpServiceClient, ServiceApi};
pub use config::RunnerConfig;
pub use error::{ClientError, DecodeError};
pub use job::Job;
pub use model::{
    Component, JobId, JobOutcome, JobResults, JobStatus, Namespace, SimValue, SimulationInput,
    TimeSeries, ValueType,
};
pub use runner::{JobRunner, SubmitError};

/// Version of the simtrack library.
///
/// Defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
