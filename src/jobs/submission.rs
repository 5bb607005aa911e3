//! Job submission, validation, and cancellation.
//!
//! The submission path is persist-first: a job is committed as `pending`
//! before its task is enqueued, so a crash between the two leaves a durable
//! record the reconciliation sweep can re-enqueue, never a running task
//! without one.

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::SubmissionConfig;
use crate::error::{Error, JobError};
use crate::jobs::model::{Job, JobStatus, TaskDescriptor, TaskType};
use crate::notify::hub::{JobEvent, NotificationHub};
use crate::queue::TaskBroker;
use crate::store::Store;

/// Priority assigned to submissions that don't ask for one.
pub const DEFAULT_PRIORITY: u8 = 5;

pub struct SubmissionApi {
    store: Arc<dyn Store>,
    broker: Arc<TaskBroker>,
    hub: Arc<NotificationHub>,
    max_attempts: u32,
}

impl SubmissionApi {
    pub fn new(
        store: Arc<dyn Store>,
        broker: Arc<TaskBroker>,
        hub: Arc<NotificationHub>,
        max_attempts: u32,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            broker,
            hub,
            max_attempts,
        })
    }

    /// Validate and submit a job. Returns the committed pending job.
    pub async fn submit(
        &self,
        owner_id: &str,
        task_type: TaskType,
        params: Value,
        priority: Option<u8>,
    ) -> Result<Job, Error> {
        if !task_type.has_worker() {
            return Err(JobError::InvalidPayload {
                task_type: task_type.to_string(),
                reason: "this intent is answered inline, not run as a job".into(),
            }
            .into());
        }
        validate_payload(task_type, &params)?;

        let job = Job::new(owner_id, task_type, params, self.max_attempts);
        self.store.insert_job(&job).await.map_err(Error::from)?;

        let descriptor = TaskDescriptor::for_job(&job, priority.unwrap_or(DEFAULT_PRIORITY));
        if let Err(e) = self.broker.enqueue(descriptor).await {
            // The pending row survives; the reconciliation sweep re-enqueues.
            warn!(job_id = %job.id, error = %e, "Enqueue failed after commit");
        }

        info!(job_id = %job.id, owner_id, task_type = %task_type, "Job submitted");
        Ok(job)
    }

    /// Request cancellation of an owner's job. A still-pending job fails
    /// immediately; a processing job stops at its next step boundary.
    pub async fn cancel(&self, owner_id: &str, job_id: Uuid) -> Result<Job, Error> {
        let flagged = self
            .store
            .request_job_cancel(owner_id, job_id)
            .await
            .map_err(Error::from)?;

        let job = self
            .store
            .get_job_for_owner(owner_id, job_id)
            .await
            .map_err(Error::from)?
            .ok_or(JobError::NotFound { id: job_id })?;

        if !flagged {
            return Err(JobError::NotCancellable {
                id: job_id,
                state: job.status.to_string(),
            }
            .into());
        }

        if job.status == JobStatus::Pending {
            let detail = "cancelled by owner";
            if self.store.fail_job(job_id, detail).await.map_err(Error::from)? {
                info!(job_id = %job_id, owner_id, "Pending job cancelled");
                self.hub
                    .broadcast(
                        owner_id,
                        JobEvent::JobFailed {
                            job_id,
                            task_type: job.task_type,
                            error: detail.to_string(),
                        },
                    )
                    .await;
            }
        } else {
            info!(job_id = %job_id, owner_id, "Cancellation requested for running job");
        }

        let job = self
            .store
            .get_job_for_owner(owner_id, job_id)
            .await
            .map_err(Error::from)?
            .ok_or(JobError::NotFound { id: job_id })?;
        Ok(job)
    }
}

/// Per-type payload validation, applied before any durable write.
pub fn validate_payload(task_type: TaskType, params: &Value) -> Result<(), JobError> {
    let require_array = |field: &str| -> Result<(), JobError> {
        match params.get(field).and_then(Value::as_array) {
            Some(items) if !items.is_empty() => Ok(()),
            _ => Err(JobError::InvalidPayload {
                task_type: task_type.to_string(),
                reason: format!("missing or empty field: {field}"),
            }),
        }
    };
    let require_present = |field: &str| -> Result<(), JobError> {
        match params.get(field) {
            Some(v) if !v.is_null() => Ok(()),
            _ => Err(JobError::InvalidPayload {
                task_type: task_type.to_string(),
                reason: format!("missing field: {field}"),
            }),
        }
    };

    match task_type {
        TaskType::LeadGeneration => {
            require_array("locations")?;
            require_array("businesses")?;
            require_array("jobTitles")
        }
        TaskType::ProfileResearch => require_present("profile"),
        TaskType::MessageCampaign => {
            require_array("recipients")?;
            // A pre-rendered `message` stands in for a `template`.
            let body = params
                .get("template")
                .or_else(|| params.get("message"))
                .and_then(Value::as_str);
            match body {
                Some(t) if !t.trim().is_empty() => Ok(()),
                _ => Err(JobError::InvalidPayload {
                    task_type: task_type.to_string(),
                    reason: "missing or empty field: template or message".into(),
                }),
            }
        }
        TaskType::InboxMonitoring => require_present("mailbox"),
        TaskType::GeneralQuery => Err(JobError::InvalidPayload {
            task_type: task_type.to_string(),
            reason: "this intent is answered inline, not run as a job".into(),
        }),
    }
}

/// Spawn the reconciliation sweep: pending jobs older than the grace period
/// with no worker activity get their tasks re-enqueued.
pub fn spawn_reconciliation_sweep(
    store: Arc<dyn Store>,
    broker: Arc<TaskBroker>,
    config: SubmissionConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.reconcile_interval);
        loop {
            ticker.tick().await;
            let cutoff = chrono::Utc::now()
                - chrono::Duration::from_std(config.reconcile_grace)
                    .unwrap_or_else(|_| chrono::Duration::seconds(120));
            let stale = match store.stale_pending_jobs(cutoff).await {
                Ok(jobs) => jobs,
                Err(e) => {
                    warn!(error = %e, "Reconciliation query failed");
                    continue;
                }
            };
            for job in stale {
                warn!(job_id = %job.id, task_type = %job.task_type, "Re-enqueueing stale pending job");
                let descriptor = TaskDescriptor::for_job(&job, DEFAULT_PRIORITY);
                if let Err(e) = broker.enqueue(descriptor).await {
                    warn!(job_id = %job.id, error = %e, "Re-enqueue failed");
                }
            }
        }
    })
}
