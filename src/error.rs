//! Error types for Leadflow.

use std::time::Duration;

use uuid::Uuid;

/// Top-level error type for the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),

    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Task queue / broker errors.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Queue for task type {task_type} is not registered")]
    UnknownTaskType { task_type: String },

    #[error("Task for job {job_id} is not in flight")]
    NotInFlight { job_id: Uuid },
}

/// External capability adapter errors.
///
/// Every adapter call is a single request/response with its own timeout;
/// these variants are the shared failure taxonomy. `is_transient()` decides
/// whether the broker may retry.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AdapterError {
    #[error("{capability} timed out after {timeout:?}")]
    Timeout { capability: String, timeout: Duration },

    #[error("{capability} rate limited")]
    RateLimited { capability: String },

    #[error("{capability} unavailable: {reason}")]
    Unavailable { capability: String, reason: String },

    #[error("{capability} returned a malformed response: {reason}")]
    Malformed { capability: String, reason: String },

    #[error("{capability} rejected the request: {reason}")]
    Rejected { capability: String, reason: String },

    #[error("{capability} requires a credential that is not configured")]
    MissingCredential { capability: String },
}

impl AdapterError {
    /// Whether retrying the same call later could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::RateLimited { .. } | Self::Unavailable { .. }
        )
    }
}

/// Conversation memory errors.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("Session {id} not found")]
    SessionNotFound { id: Uuid },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Job-related errors.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Job {id} not found")]
    NotFound { id: Uuid },

    #[error("Unknown task type: {0}")]
    UnknownTaskType(String),

    #[error("Invalid payload for {task_type}: {reason}")]
    InvalidPayload { task_type: String, reason: String },

    #[error("Job {id} is {state} and cannot be cancelled")]
    NotCancellable { id: Uuid, state: String },
}

/// A fault raised inside a worker pipeline, classified at the pipeline
/// boundary. Faults never escape the worker; they decide whether the broker
/// redelivers the task or the job fails outright.
#[derive(Debug, thiserror::Error)]
pub enum PipelineFault {
    /// Bad input discovered mid-pipeline. Never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Timeout, rate limit, or transient I/O. Retried per broker policy.
    #[error("transient fault: {0}")]
    Transient(String),

    /// Irrecoverable business failure. Job fails with no further retry.
    #[error("terminal fault: {0}")]
    Terminal(String),

    /// The store is unavailable; the worker gives the task back and relies
    /// on redelivery.
    #[error("persistence fault: {0}")]
    Persistence(String),
}

impl PipelineFault {
    /// Whether the broker should redeliver the task.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Persistence(_))
    }
}

impl From<AdapterError> for PipelineFault {
    fn from(e: AdapterError) -> Self {
        match &e {
            AdapterError::MissingCredential { .. } => Self::Terminal(e.to_string()),
            AdapterError::Rejected { .. } | AdapterError::Malformed { .. } => {
                Self::Terminal(e.to_string())
            }
            _ if e.is_transient() => Self::Transient(e.to_string()),
            _ => Self::Terminal(e.to_string()),
        }
    }
}

impl From<DatabaseError> for PipelineFault {
    fn from(e: DatabaseError) -> Self {
        Self::Persistence(e.to_string())
    }
}

/// Result type alias for the orchestrator.
pub type Result<T> = std::result::Result<T, Error>;
