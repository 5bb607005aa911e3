//! Durable jobs: model, submission, reconciliation.

pub mod model;
pub mod submission;

pub use model::{Job, JobStatus, TaskDescriptor, TaskType};
pub use submission::{SubmissionApi, spawn_reconciliation_sweep, validate_payload};
