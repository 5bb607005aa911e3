//! libSQL backend — async `Store` trait implementation.
//!
//! Supports local file and in-memory databases. Status and progress writes
//! are guarded UPDATEs (compare-and-set in SQL) so concurrent workers and
//! redeliveries can never regress a job row.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::info;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::jobs::model::{Job, JobStatus, TaskType};
use crate::memory::model::{
    ContextCache, ConversationMessage, ConversationSession, MemoryPreferences, MessageKind,
    MessageRole, SessionStatus,
};
use crate::store::migrations;
use crate::store::traits::Store;

/// libSQL store backend.
///
/// Holds a single connection reused for all operations;
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Connection(format!("Failed to open database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        store.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Connection(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        store.run_migrations().await?;
        Ok(store)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

fn query_err(e: libsql::Error) -> DatabaseError {
    DatabaseError::Query(e.to_string())
}

/// Job columns, in the order every job SELECT uses.
const JOB_COLUMNS: &str = "id, owner_id, task_type, status, progress, input, output, error, \
     attempts, max_attempts, cancel_requested, created_at, started_at, completed_at";

fn row_to_job(row: &libsql::Row) -> Result<Job, DatabaseError> {
    let id_str: String = row.get(0).map_err(query_err)?;
    let owner_id: String = row.get(1).map_err(query_err)?;
    let task_type_str: String = row.get(2).map_err(query_err)?;
    let status_str: String = row.get(3).map_err(query_err)?;
    let progress: i64 = row.get(4).map_err(query_err)?;
    let input_str: String = row.get(5).map_err(query_err)?;
    let output_str: Option<String> = row.get(6).ok();
    let error: Option<String> = row.get(7).ok();
    let attempts: i64 = row.get(8).map_err(query_err)?;
    let max_attempts: i64 = row.get(9).map_err(query_err)?;
    let cancel_requested: i64 = row.get(10).map_err(query_err)?;
    let created_str: String = row.get(11).map_err(query_err)?;
    let started_str: Option<String> = row.get(12).ok();
    let completed_str: Option<String> = row.get(13).ok();

    let task_type = TaskType::parse(&task_type_str).ok_or_else(|| {
        DatabaseError::Serialization(format!("unknown task type: {task_type_str}"))
    })?;
    let status = JobStatus::parse(&status_str)
        .ok_or_else(|| DatabaseError::Serialization(format!("unknown status: {status_str}")))?;
    let input = serde_json::from_str(&input_str)
        .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
    let output = output_str
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

    Ok(Job {
        id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::nil()),
        owner_id,
        task_type,
        status,
        progress: progress.clamp(0, 100) as u8,
        input,
        output,
        error,
        attempts: attempts.max(0) as u32,
        max_attempts: max_attempts.max(0) as u32,
        cancel_requested: cancel_requested != 0,
        created_at: parse_datetime(&created_str),
        started_at: parse_optional_datetime(&started_str),
        completed_at: parse_optional_datetime(&completed_str),
    })
}

fn row_to_session(row: &libsql::Row) -> Result<ConversationSession, DatabaseError> {
    let id_str: String = row.get(0).map_err(query_err)?;
    let owner_id: String = row.get(1).map_err(query_err)?;
    let agent_id: String = row.get(2).map_err(query_err)?;
    let status_str: String = row.get(3).map_err(query_err)?;
    let title: Option<String> = row.get(4).ok();
    let last_activity: String = row.get(5).map_err(query_err)?;
    let created_at: String = row.get(6).map_err(query_err)?;

    Ok(ConversationSession {
        id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::nil()),
        owner_id,
        agent_id,
        status: SessionStatus::parse(&status_str).unwrap_or(SessionStatus::Active),
        title,
        last_activity: parse_datetime(&last_activity),
        created_at: parse_datetime(&created_at),
    })
}

fn row_to_message(row: &libsql::Row) -> Result<ConversationMessage, DatabaseError> {
    let id_str: String = row.get(0).map_err(query_err)?;
    let session_str: String = row.get(1).map_err(query_err)?;
    let owner_id: String = row.get(2).map_err(query_err)?;
    let role_str: String = row.get(3).map_err(query_err)?;
    let content: String = row.get(4).map_err(query_err)?;
    let kind_str: String = row.get(5).map_err(query_err)?;
    let relevant: i64 = row.get(6).map_err(query_err)?;
    let token_estimate: i64 = row.get(7).map_err(query_err)?;
    let parent_str: Option<String> = row.get(8).ok();
    let created_str: String = row.get(9).map_err(query_err)?;

    Ok(ConversationMessage {
        id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::nil()),
        session_id: Uuid::parse_str(&session_str).unwrap_or_else(|_| Uuid::nil()),
        owner_id,
        role: MessageRole::parse(&role_str).unwrap_or(MessageRole::User),
        content,
        kind: MessageKind::parse(&kind_str).unwrap_or(MessageKind::Chat),
        relevant: relevant != 0,
        token_estimate: token_estimate.max(0) as usize,
        parent_id: parent_str.and_then(|s| Uuid::parse_str(&s).ok()),
        created_at: parse_datetime(&created_str),
    })
}

#[async_trait]
impl Store for LibSqlStore {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_all(self.conn()).await
    }

    // ── Jobs ────────────────────────────────────────────────────────

    async fn insert_job(&self, job: &Job) -> Result<(), DatabaseError> {
        let input = serde_json::to_string(&job.input)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

        self.conn()
            .execute(
                "INSERT INTO jobs (id, owner_id, task_type, status, progress, input,
                    attempts, max_attempts, cancel_requested, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    job.id.to_string(),
                    job.owner_id.clone(),
                    job.task_type.to_string(),
                    job.status.to_string(),
                    job.progress as i64,
                    input,
                    job.attempts as i64,
                    job.max_attempts as i64,
                    job.cancel_requested as i64,
                    job.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(query_err)?;

        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(Some(row_to_job(&row)?)),
            None => Ok(None),
        }
    }

    async fn get_job_for_owner(
        &self,
        owner_id: &str,
        id: Uuid,
    ) -> Result<Option<Job>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1 AND owner_id = ?2"),
                params![id.to_string(), owner_id],
            )
            .await
            .map_err(query_err)?;

        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(Some(row_to_job(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_jobs_for_owner(
        &self,
        owner_id: &str,
        limit: usize,
    ) -> Result<Vec<Job>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM jobs WHERE owner_id = ?1
                     ORDER BY created_at DESC LIMIT ?2"
                ),
                params![owner_id, limit as i64],
            )
            .await
            .map_err(query_err)?;

        let mut jobs = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            jobs.push(row_to_job(&row)?);
        }
        Ok(jobs)
    }

    async fn mark_job_processing(&self, id: Uuid, attempt: u32) -> Result<bool, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE jobs
                 SET status = 'processing',
                     attempts = MAX(attempts, ?2),
                     started_at = COALESCE(started_at, ?3)
                 WHERE id = ?1 AND status IN ('pending', 'processing')",
                params![id.to_string(), attempt as i64, Utc::now().to_rfc3339()],
            )
            .await
            .map_err(query_err)?;
        Ok(affected > 0)
    }

    async fn advance_job_progress(&self, id: Uuid, percent: u8) -> Result<bool, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE jobs SET progress = ?2
                 WHERE id = ?1 AND status = 'processing' AND progress <= ?2",
                params![id.to_string(), percent.min(100) as i64],
            )
            .await
            .map_err(query_err)?;
        Ok(affected > 0)
    }

    async fn complete_job(
        &self,
        id: Uuid,
        output: &serde_json::Value,
    ) -> Result<bool, DatabaseError> {
        let output_str = serde_json::to_string(output)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

        let affected = self
            .conn()
            .execute(
                "UPDATE jobs
                 SET status = 'completed', progress = 100, output = ?2, completed_at = ?3
                 WHERE id = ?1 AND status = 'processing'",
                params![id.to_string(), output_str, Utc::now().to_rfc3339()],
            )
            .await
            .map_err(query_err)?;
        Ok(affected > 0)
    }

    async fn fail_job(&self, id: Uuid, error: &str) -> Result<bool, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE jobs SET status = 'failed', error = ?2, completed_at = ?3
                 WHERE id = ?1 AND status IN ('pending', 'processing')",
                params![id.to_string(), error, Utc::now().to_rfc3339()],
            )
            .await
            .map_err(query_err)?;
        Ok(affected > 0)
    }

    async fn record_job_error(&self, id: Uuid, error: &str) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE jobs SET error = ?2 WHERE id = ?1 AND status NOT IN ('completed', 'failed')",
                params![id.to_string(), error],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn request_job_cancel(&self, owner_id: &str, id: Uuid) -> Result<bool, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE jobs SET cancel_requested = 1
                 WHERE id = ?1 AND owner_id = ?2 AND status IN ('pending', 'processing')",
                params![id.to_string(), owner_id],
            )
            .await
            .map_err(query_err)?;
        Ok(affected > 0)
    }

    async fn is_cancel_requested(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT cancel_requested FROM jobs WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(query_err)?;

        match rows.next().await.map_err(query_err)? {
            Some(row) => {
                let flag: i64 = row.get(0).map_err(query_err)?;
                Ok(flag != 0)
            }
            None => Ok(false),
        }
    }

    async fn stale_pending_jobs(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Job>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM jobs
                     WHERE status = 'pending' AND created_at < ?1
                     ORDER BY created_at ASC"
                ),
                params![cutoff.to_rfc3339()],
            )
            .await
            .map_err(query_err)?;

        let mut jobs = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            jobs.push(row_to_job(&row)?);
        }
        Ok(jobs)
    }

    // ── Result artifacts ────────────────────────────────────────────

    async fn upsert_artifact(
        &self,
        job_id: Uuid,
        kind: &str,
        payload: &serde_json::Value,
    ) -> Result<(), DatabaseError> {
        let payload_str = serde_json::to_string(payload)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let now = Utc::now().to_rfc3339();

        self.conn()
            .execute(
                "INSERT INTO job_artifacts (job_id, kind, payload, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 ON CONFLICT (job_id, kind)
                 DO UPDATE SET payload = excluded.payload, updated_at = excluded.updated_at",
                params![job_id.to_string(), kind, payload_str, now],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn get_artifact(
        &self,
        job_id: Uuid,
        kind: &str,
    ) -> Result<Option<serde_json::Value>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT payload FROM job_artifacts WHERE job_id = ?1 AND kind = ?2",
                params![job_id.to_string(), kind],
            )
            .await
            .map_err(query_err)?;

        match rows.next().await.map_err(query_err)? {
            Some(row) => {
                let payload: String = row.get(0).map_err(query_err)?;
                Ok(Some(serde_json::from_str(&payload).map_err(|e| {
                    DatabaseError::Serialization(e.to_string())
                })?))
            }
            None => Ok(None),
        }
    }

    async fn count_artifacts(&self, job_id: Uuid) -> Result<usize, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT COUNT(*) FROM job_artifacts WHERE job_id = ?1",
                params![job_id.to_string()],
            )
            .await
            .map_err(query_err)?;

        match rows.next().await.map_err(query_err)? {
            Some(row) => {
                let count: i64 = row.get(0).map_err(query_err)?;
                Ok(count.max(0) as usize)
            }
            None => Ok(0),
        }
    }

    // ── Conversation sessions ───────────────────────────────────────

    async fn get_or_create_active_session(
        &self,
        owner_id: &str,
        agent_id: &str,
        title: Option<&str>,
    ) -> Result<ConversationSession, DatabaseError> {
        let now = Utc::now().to_rfc3339();

        // Guarded insert: only lands when no active session exists, so two
        // concurrent resolutions converge on a single active row.
        self.conn()
            .execute(
                "INSERT INTO sessions (id, owner_id, agent_id, status, title, last_activity, created_at)
                 SELECT ?1, ?2, ?3, 'active', ?4, ?5, ?5
                 WHERE NOT EXISTS (
                     SELECT 1 FROM sessions
                     WHERE owner_id = ?2 AND agent_id = ?3 AND status = 'active'
                 )",
                params![Uuid::new_v4().to_string(), owner_id, agent_id, title, now],
            )
            .await
            .map_err(query_err)?;

        let mut rows = self
            .conn()
            .query(
                "SELECT id, owner_id, agent_id, status, title, last_activity, created_at
                 FROM sessions
                 WHERE owner_id = ?1 AND agent_id = ?2 AND status = 'active'
                 ORDER BY last_activity DESC LIMIT 1",
                params![owner_id, agent_id],
            )
            .await
            .map_err(query_err)?;

        match rows.next().await.map_err(query_err)? {
            Some(row) => row_to_session(&row),
            None => Err(DatabaseError::Query(
                "active session missing after guarded insert".into(),
            )),
        }
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<ConversationSession>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, owner_id, agent_id, status, title, last_activity, created_at
                 FROM sessions WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(query_err)?;

        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(Some(row_to_session(&row)?)),
            None => Ok(None),
        }
    }

    async fn archive_sessions_before(
        &self,
        owner_id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE sessions SET status = 'archived'
                 WHERE owner_id = ?1 AND status = 'active' AND last_activity < ?2",
                params![owner_id, cutoff.to_rfc3339()],
            )
            .await
            .map_err(query_err)?;
        Ok(affected as usize)
    }

    // ── Conversation messages ───────────────────────────────────────

    async fn append_message(&self, msg: &ConversationMessage) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO session_messages
                    (id, session_id, owner_id, role, content, kind, relevant,
                     token_estimate, parent_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    msg.id.to_string(),
                    msg.session_id.to_string(),
                    msg.owner_id.clone(),
                    msg.role.to_string(),
                    msg.content.clone(),
                    msg.kind.to_string(),
                    msg.relevant as i64,
                    msg.token_estimate as i64,
                    msg.parent_id.map(|p| p.to_string()),
                    msg.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(query_err)?;

        self.conn()
            .execute(
                "UPDATE sessions SET last_activity = ?2 WHERE id = ?1",
                params![msg.session_id.to_string(), msg.created_at.to_rfc3339()],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn recent_relevant_messages(
        &self,
        session_id: Uuid,
        limit: usize,
    ) -> Result<Vec<ConversationMessage>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, session_id, owner_id, role, content, kind, relevant,
                        token_estimate, parent_id, created_at
                 FROM session_messages
                 WHERE session_id = ?1 AND relevant = 1
                 ORDER BY created_at DESC, id DESC LIMIT ?2",
                params![session_id.to_string(), limit as i64],
            )
            .await
            .map_err(query_err)?;

        let mut messages = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            messages.push(row_to_message(&row)?);
        }
        Ok(messages)
    }

    async fn relevant_messages_before(
        &self,
        session_id: Uuid,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ConversationMessage>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, session_id, owner_id, role, content, kind, relevant,
                        token_estimate, parent_id, created_at
                 FROM session_messages
                 WHERE session_id = ?1 AND relevant = 1 AND created_at < ?2
                 ORDER BY created_at DESC, id DESC LIMIT ?3",
                params![session_id.to_string(), before.to_rfc3339(), limit as i64],
            )
            .await
            .map_err(query_err)?;

        let mut messages = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            messages.push(row_to_message(&row)?);
        }
        Ok(messages)
    }

    async fn count_messages(&self, session_id: Uuid) -> Result<usize, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT COUNT(*) FROM session_messages WHERE session_id = ?1",
                params![session_id.to_string()],
            )
            .await
            .map_err(query_err)?;

        match rows.next().await.map_err(query_err)? {
            Some(row) => {
                let count: i64 = row.get(0).map_err(query_err)?;
                Ok(count.max(0) as usize)
            }
            None => Ok(0),
        }
    }

    // ── Context cache ───────────────────────────────────────────────

    async fn get_context_cache(
        &self,
        session_id: Uuid,
        agent_id: &str,
    ) -> Result<Option<ContextCache>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT session_id, agent_id, summary, covered_messages, token_total, expires_at
                 FROM context_cache WHERE session_id = ?1 AND agent_id = ?2",
                params![session_id.to_string(), agent_id],
            )
            .await
            .map_err(query_err)?;

        match rows.next().await.map_err(query_err)? {
            Some(row) => {
                let session_str: String = row.get(0).map_err(query_err)?;
                let agent_id: String = row.get(1).map_err(query_err)?;
                let summary: String = row.get(2).map_err(query_err)?;
                let covered: i64 = row.get(3).map_err(query_err)?;
                let token_total: i64 = row.get(4).map_err(query_err)?;
                let expires_str: String = row.get(5).map_err(query_err)?;

                Ok(Some(ContextCache {
                    session_id: Uuid::parse_str(&session_str).unwrap_or_else(|_| Uuid::nil()),
                    agent_id,
                    summary,
                    covered_messages: covered.max(0) as usize,
                    token_total: token_total.max(0) as usize,
                    expires_at: parse_datetime(&expires_str),
                }))
            }
            None => Ok(None),
        }
    }

    async fn put_context_cache(&self, cache: &ContextCache) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO context_cache
                    (session_id, agent_id, summary, covered_messages, token_total, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (session_id, agent_id)
                 DO UPDATE SET summary = excluded.summary,
                               covered_messages = excluded.covered_messages,
                               token_total = excluded.token_total,
                               expires_at = excluded.expires_at",
                params![
                    cache.session_id.to_string(),
                    cache.agent_id.clone(),
                    cache.summary.clone(),
                    cache.covered_messages as i64,
                    cache.token_total as i64,
                    cache.expires_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn sweep_expired_caches(&self) -> Result<usize, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "DELETE FROM context_cache WHERE expires_at <= ?1",
                params![Utc::now().to_rfc3339()],
            )
            .await
            .map_err(query_err)?;
        Ok(affected as usize)
    }

    // ── Memory preferences ──────────────────────────────────────────

    async fn get_preferences(
        &self,
        owner_id: &str,
        agent_id: &str,
    ) -> Result<Option<MemoryPreferences>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT owner_id, agent_id, max_context_messages, max_context_tokens,
                        auto_summarize_threshold, retain_history
                 FROM memory_preferences WHERE owner_id = ?1 AND agent_id = ?2",
                params![owner_id, agent_id],
            )
            .await
            .map_err(query_err)?;

        match rows.next().await.map_err(query_err)? {
            Some(row) => {
                let owner_id: String = row.get(0).map_err(query_err)?;
                let agent_id: String = row.get(1).map_err(query_err)?;
                let max_messages: i64 = row.get(2).map_err(query_err)?;
                let max_tokens: i64 = row.get(3).map_err(query_err)?;
                let threshold: i64 = row.get(4).map_err(query_err)?;
                let retain: i64 = row.get(5).map_err(query_err)?;

                Ok(Some(MemoryPreferences {
                    owner_id,
                    agent_id,
                    max_context_messages: max_messages.max(0) as usize,
                    max_context_tokens: max_tokens.max(0) as usize,
                    auto_summarize_threshold: threshold.max(0) as usize,
                    retain_history: retain != 0,
                }))
            }
            None => Ok(None),
        }
    }

    async fn put_preferences(&self, prefs: &MemoryPreferences) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO memory_preferences
                    (owner_id, agent_id, max_context_messages, max_context_tokens,
                     auto_summarize_threshold, retain_history)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (owner_id, agent_id)
                 DO UPDATE SET max_context_messages = excluded.max_context_messages,
                               max_context_tokens = excluded.max_context_tokens,
                               auto_summarize_threshold = excluded.auto_summarize_threshold,
                               retain_history = excluded.retain_history",
                params![
                    prefs.owner_id.clone(),
                    prefs.agent_id.clone(),
                    prefs.max_context_messages as i64,
                    prefs.max_context_tokens as i64,
                    prefs.auto_summarize_threshold as i64,
                    prefs.retain_history as i64,
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }
}
