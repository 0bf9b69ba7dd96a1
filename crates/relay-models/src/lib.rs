//! Shared data models for the Relay media pipeline.

pub mod event;
pub mod failure;
pub mod job;
pub mod variant;

pub use event::{EventStatus, JobEvent};
pub use failure::{FailureKind, JobError};
pub use job::{JobId, JobState, MediaJob, MediaKind};
pub use variant::{storage_key, Variant, VariantFormat, VariantType};
