//! Worker pool for the Relay media pipeline.
//!
//! Leases jobs from the work queue, generates the variant set,
//! uploads it, and drives the job record to a terminal state.

pub mod backoff;
pub mod config;
pub mod error;
pub mod executor;
pub mod pipeline;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use executor::WorkerPool;
pub use pipeline::PipelineContext;
