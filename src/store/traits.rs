//! Unified `Store` trait — single async interface for all persistence.
//!
//! Jobs and result artifacts on one side, conversation memory (sessions,
//! messages, context cache, preferences) on the other. Workers and the
//! submission path coordinate only through this trait; there is no shared
//! in-memory mutable state between them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::jobs::model::{Job, TaskType};
use crate::memory::model::{
    ContextCache, ConversationMessage, ConversationSession, MemoryPreferences,
};

/// Backend-agnostic persistence trait covering jobs, artifacts, and
/// conversation memory.
#[async_trait]
pub trait Store: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Jobs ────────────────────────────────────────────────────────

    /// Persist a new pending job. Must commit before the task is enqueued.
    async fn insert_job(&self, job: &Job) -> Result<(), DatabaseError>;

    /// Get a job by id.
    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, DatabaseError>;

    /// Get a job by id, scoped to its owner. Returns `None` for other
    /// owners' jobs — there is no cross-owner read path.
    async fn get_job_for_owner(
        &self,
        owner_id: &str,
        id: Uuid,
    ) -> Result<Option<Job>, DatabaseError>;

    /// List an owner's jobs, most recent first.
    async fn list_jobs_for_owner(
        &self,
        owner_id: &str,
        limit: usize,
    ) -> Result<Vec<Job>, DatabaseError>;

    /// Compare-and-set pending → processing (or re-affirm processing on
    /// redelivery). Sets `started_at` on the first transition. Returns
    /// `false` if the job is already terminal.
    async fn mark_job_processing(&self, id: Uuid, attempt: u32) -> Result<bool, DatabaseError>;

    /// Compare-and-set progress. Only applies while the job is processing
    /// and the new value is not lower than the stored one. Returns whether
    /// the write took effect.
    async fn advance_job_progress(&self, id: Uuid, percent: u8) -> Result<bool, DatabaseError>;

    /// Compare-and-set processing → completed with the final output.
    /// Output is immutable once written. Returns whether the write took.
    async fn complete_job(
        &self,
        id: Uuid,
        output: &serde_json::Value,
    ) -> Result<bool, DatabaseError>;

    /// Compare-and-set pending/processing → failed with the last error.
    /// Returns whether the write took.
    async fn fail_job(&self, id: Uuid, error: &str) -> Result<bool, DatabaseError>;

    /// Record the latest (non-monotonic) error text without changing status.
    async fn record_job_error(&self, id: Uuid, error: &str) -> Result<(), DatabaseError>;

    /// Set the cancellation flag on an owner's pending or processing job.
    /// Returns `false` if the job is unknown to this owner or terminal.
    async fn request_job_cancel(&self, owner_id: &str, id: Uuid) -> Result<bool, DatabaseError>;

    /// Read the cancellation flag. Workers poll this at step boundaries.
    async fn is_cancel_requested(&self, id: Uuid) -> Result<bool, DatabaseError>;

    /// Pending jobs created before `cutoff` with no worker activity — the
    /// reconciliation sweep re-enqueues these.
    async fn stale_pending_jobs(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Job>, DatabaseError>;

    // ── Result artifacts ────────────────────────────────────────────

    /// Upsert a pipeline result keyed by (job, kind). At-least-once
    /// redelivery re-runs pipelines; the natural key keeps exactly one
    /// persisted artifact per job and kind.
    async fn upsert_artifact(
        &self,
        job_id: Uuid,
        kind: &str,
        payload: &serde_json::Value,
    ) -> Result<(), DatabaseError>;

    /// Get an artifact by natural key.
    async fn get_artifact(
        &self,
        job_id: Uuid,
        kind: &str,
    ) -> Result<Option<serde_json::Value>, DatabaseError>;

    /// Count artifacts persisted for a job.
    async fn count_artifacts(&self, job_id: Uuid) -> Result<usize, DatabaseError>;

    // ── Conversation sessions ───────────────────────────────────────

    /// Return the active session for (owner, agent), creating one if none
    /// exists. The insert is guarded so concurrent resolutions converge on
    /// a single active row.
    async fn get_or_create_active_session(
        &self,
        owner_id: &str,
        agent_id: &str,
        title: Option<&str>,
    ) -> Result<ConversationSession, DatabaseError>;

    /// Get a session by id.
    async fn get_session(&self, id: Uuid) -> Result<Option<ConversationSession>, DatabaseError>;

    /// Archive active sessions of this owner whose last activity predates
    /// `cutoff`. Returns how many rows changed; idempotent on re-runs.
    async fn archive_sessions_before(
        &self,
        owner_id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, DatabaseError>;

    // ── Conversation messages ───────────────────────────────────────

    /// Append a message and touch the session's last-activity timestamp.
    async fn append_message(&self, msg: &ConversationMessage) -> Result<(), DatabaseError>;

    /// The `limit` most recent relevance-flagged messages, newest first.
    async fn recent_relevant_messages(
        &self,
        session_id: Uuid,
        limit: usize,
    ) -> Result<Vec<ConversationMessage>, DatabaseError>;

    /// Relevance-flagged messages created strictly before `before`, newest
    /// first, up to `limit`. Used to summarize the dropped range.
    async fn relevant_messages_before(
        &self,
        session_id: Uuid,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ConversationMessage>, DatabaseError>;

    /// Total message count for a session.
    async fn count_messages(&self, session_id: Uuid) -> Result<usize, DatabaseError>;

    // ── Context cache ───────────────────────────────────────────────

    /// Get the cached summary for (session, agent), expired or not.
    async fn get_context_cache(
        &self,
        session_id: Uuid,
        agent_id: &str,
    ) -> Result<Option<ContextCache>, DatabaseError>;

    /// Upsert the cached summary for (session, agent).
    async fn put_context_cache(&self, cache: &ContextCache) -> Result<(), DatabaseError>;

    /// Delete expired cache rows. Returns how many were removed.
    async fn sweep_expired_caches(&self) -> Result<usize, DatabaseError>;

    // ── Memory preferences ──────────────────────────────────────────

    /// Per-(owner, agent) preferences, if configured.
    async fn get_preferences(
        &self,
        owner_id: &str,
        agent_id: &str,
    ) -> Result<Option<MemoryPreferences>, DatabaseError>;

    /// Upsert preferences for (owner, agent).
    async fn put_preferences(&self, prefs: &MemoryPreferences) -> Result<(), DatabaseError>;
}

/// Summary row for job list reconciliation responses.
#[derive(Debug, Clone, serde::Serialize)]
pub struct JobSnapshot {
    pub id: Uuid,
    pub task_type: TaskType,
    pub status: String,
    pub progress: u8,
    pub error: Option<String>,
}

impl From<&Job> for JobSnapshot {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            task_type: job.task_type,
            status: job.status.to_string(),
            progress: job.progress,
            error: job.error.clone(),
        }
    }
}
