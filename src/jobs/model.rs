//! Job and task descriptor model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kinds of asynchronous work the orchestrator knows how to run.
///
/// `GeneralQuery` is a router-only intent: it never targets a worker pool and
/// never reaches the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    LeadGeneration,
    ProfileResearch,
    MessageCampaign,
    InboxMonitoring,
    GeneralQuery,
}

impl TaskType {
    /// All task types that have a worker pool.
    pub const WORKER_TYPES: [TaskType; 4] = [
        TaskType::LeadGeneration,
        TaskType::ProfileResearch,
        TaskType::MessageCampaign,
        TaskType::InboxMonitoring,
    ];

    /// Whether jobs of this type can be submitted for execution.
    pub fn has_worker(&self) -> bool {
        !matches!(self, Self::GeneralQuery)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "lead_generation" => Some(Self::LeadGeneration),
            "profile_research" => Some(Self::ProfileResearch),
            "message_campaign" => Some(Self::MessageCampaign),
            "inbox_monitoring" => Some(Self::InboxMonitoring),
            "general_query" => Some(Self::GeneralQuery),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::LeadGeneration => "lead_generation",
            Self::ProfileResearch => "profile_research",
            Self::MessageCampaign => "message_campaign",
            Self::InboxMonitoring => "inbox_monitoring",
            Self::GeneralQuery => "general_query",
        };
        write!(f, "{s}")
    }
}

/// Status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Committed, waiting for a worker.
    Pending,
    /// Claimed by a worker.
    Processing,
    /// Finished with a result artifact.
    Completed,
    /// Failed terminally or exhausted its retries.
    Failed,
}

impl JobStatus {
    /// Check if this status allows transitioning to another status.
    ///
    /// pending → processing → {completed | failed}; completed and failed have
    /// no outgoing transitions. A redelivered task finds the job already in
    /// `Processing`, which is why the self-transition is allowed.
    pub fn can_transition_to(&self, target: JobStatus) -> bool {
        use JobStatus::*;

        matches!(
            (self, target),
            (Pending, Processing)
                | (Pending, Failed)
                | (Processing, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
        )
    }

    /// Check if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl JobStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Durable record of one asynchronous unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub owner_id: String,
    pub task_type: TaskType,
    pub status: JobStatus,
    /// Percent complete, 0–100, never decreasing while processing.
    pub progress: u8,
    pub input: serde_json::Value,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    /// Delivery attempts so far, mirrored from the queue for visibility.
    pub attempts: u32,
    pub max_attempts: u32,
    /// Owner asked for this job to stop; workers check at step boundaries.
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new pending job.
    pub fn new(
        owner_id: impl Into<String>,
        task_type: TaskType,
        input: serde_json::Value,
        max_attempts: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.into(),
            task_type,
            status: JobStatus::Pending,
            progress: 0,
            input,
            output: None,
            error: None,
            attempts: 0,
            max_attempts,
            cancel_requested: false,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}

/// Ephemeral queue message describing a job to a worker.
///
/// Lives only inside the broker; connected to the durable [`Job`] by id
/// alone. Never carries worker state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub job_id: Uuid,
    pub owner_id: String,
    pub task_type: TaskType,
    pub params: serde_json::Value,
    /// Lower runs sooner.
    pub priority: u8,
    /// 1-based delivery attempt.
    pub attempt: u32,
}

impl TaskDescriptor {
    /// Build the first-attempt descriptor for a job.
    pub fn for_job(job: &Job, priority: u8) -> Self {
        Self {
            job_id: job.id,
            owner_id: job.owner_id.clone(),
            task_type: job.task_type,
            params: job.input.clone(),
            priority,
            attempt: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions_valid() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Processing));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Failed));
        // Redelivery after a crash finds the job already processing.
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Processing));
    }

    #[test]
    fn status_transitions_invalid() {
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Processing));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Processing));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Pending));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Completed));
    }

    #[test]
    fn terminal_statuses() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
    }

    #[test]
    fn task_type_roundtrip() {
        for t in TaskType::WORKER_TYPES {
            assert_eq!(TaskType::parse(&t.to_string()), Some(t));
            assert!(t.has_worker());
        }
        assert!(!TaskType::GeneralQuery.has_worker());
    }

    #[test]
    fn descriptor_carries_only_job_identity() {
        let job = Job::new("owner-1", TaskType::LeadGeneration, serde_json::json!({}), 3);
        let desc = TaskDescriptor::for_job(&job, 5);
        assert_eq!(desc.job_id, job.id);
        assert_eq!(desc.attempt, 1);
        assert_eq!(desc.priority, 5);
    }

    #[test]
    fn job_status_serde() {
        let json = serde_json::to_string(&JobStatus::Processing).unwrap();
        assert_eq!(json, "\"processing\"");
        let parsed: JobStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, JobStatus::Processing);
    }
}
