//! Worker loop: claim, execute, acknowledge.
//!
//! Each worker serves one task type. Faults are classified at the pipeline
//! boundary: retryable faults hand the task back to the broker, terminal
//! faults fail the job immediately. Every event is broadcast only after the
//! matching persistence write commits.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::error::PipelineFault;
use crate::jobs::model::{TaskDescriptor, TaskType};
use crate::notify::hub::{JobEvent, NotificationHub};
use crate::queue::{NackOutcome, TaskBroker};
use crate::store::Store;
use crate::worker::context::{CANCELLED_DETAIL, PipelineContext};
use crate::worker::pipelines::TaskPipeline;

pub struct Worker {
    pub(crate) instance: usize,
    pub(crate) task_type: TaskType,
    pub(crate) broker: Arc<TaskBroker>,
    pub(crate) store: Arc<dyn Store>,
    pub(crate) hub: Arc<NotificationHub>,
    pub(crate) pipeline: Arc<dyn TaskPipeline>,
    pub(crate) config: WorkerConfig,
}

impl Worker {
    /// Claim and execute tasks until the broker goes away.
    pub async fn run(self) {
        info!(task_type = %self.task_type, instance = self.instance, "Worker started");
        loop {
            match self.broker.claim(self.task_type).await {
                Ok(descriptor) => self.handle(descriptor).await,
                Err(e) => {
                    error!(task_type = %self.task_type, error = %e, "Worker claim failed");
                    break;
                }
            }
        }
    }

    pub(crate) async fn handle(&self, descriptor: TaskDescriptor) {
        let job_id = descriptor.job_id;

        match self.store.mark_job_processing(job_id, descriptor.attempt).await {
            Ok(true) => {}
            Ok(false) => {
                // Already terminal — a late redelivery of finished work.
                debug!(job_id = %job_id, "Dropping task for terminal job");
                self.ack(&descriptor).await;
                return;
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Could not mark job processing");
                self.nack_or_fail(&descriptor, &PipelineFault::Persistence(e.to_string()))
                    .await;
                return;
            }
        }

        // First observable activity: progress 10 plus the started event.
        match self.store.advance_job_progress(job_id, 10).await {
            Ok(true) => {
                self.hub
                    .broadcast(
                        &descriptor.owner_id,
                        JobEvent::JobStarted {
                            job_id,
                            task_type: descriptor.task_type,
                        },
                    )
                    .await;
                self.hub
                    .broadcast(
                        &descriptor.owner_id,
                        JobEvent::JobProgress { job_id, percent: 10 },
                    )
                    .await;
            }
            Ok(false) => {
                // Redelivery of a job that already progressed past 10; skip
                // the started event, the owner saw it on the first attempt.
                debug!(job_id = %job_id, attempt = descriptor.attempt, "Resuming redelivered task");
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Could not record initial progress");
                self.nack_or_fail(&descriptor, &PipelineFault::Persistence(e.to_string()))
                    .await;
                return;
            }
        }

        let mut cx = PipelineContext::new(
            job_id,
            descriptor.owner_id.clone(),
            descriptor.params.clone(),
            descriptor.attempt,
            self.store.clone(),
            self.hub.clone(),
            self.config.step_timeout,
            self.pipeline.step_names().len(),
        );

        match self.pipeline.execute(&mut cx).await {
            Ok(output) => self.finish(&descriptor, output).await,
            Err(fault) => {
                if let Err(e) = self.store.record_job_error(job_id, &fault.to_string()).await {
                    warn!(job_id = %job_id, error = %e, "Could not record job error");
                }
                self.nack_or_fail(&descriptor, &fault).await;
            }
        }
    }

    async fn finish(&self, descriptor: &TaskDescriptor, output: serde_json::Value) {
        let job_id = descriptor.job_id;
        let summary = output
            .get("summary")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("task completed")
            .to_string();

        match self.store.complete_job(job_id, &output).await {
            Ok(true) => {
                info!(job_id = %job_id, task_type = %descriptor.task_type, "Job completed");
                self.hub
                    .broadcast(
                        &descriptor.owner_id,
                        JobEvent::JobCompleted { job_id, summary },
                    )
                    .await;
                self.ack(descriptor).await;
            }
            Ok(false) => {
                // Lost the terminal race (cancel or concurrent failure); the
                // stored outcome wins.
                debug!(job_id = %job_id, "Completion superseded by existing terminal state");
                self.ack(descriptor).await;
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Could not persist completion");
                self.nack_or_fail(descriptor, &PipelineFault::Persistence(e.to_string()))
                    .await;
            }
        }
    }

    /// Retryable faults go back to the broker; terminal faults (and
    /// exhausted retries) fail the job durably before the failure event.
    async fn nack_or_fail(&self, descriptor: &TaskDescriptor, fault: &PipelineFault) {
        let job_id = descriptor.job_id;

        if fault.is_retryable() {
            match self.broker.nack(descriptor.task_type, job_id).await {
                Ok(NackOutcome::Retry { attempt, delay }) => {
                    info!(
                        job_id = %job_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %fault,
                        "Task will be retried"
                    );
                    return;
                }
                Ok(NackOutcome::Exhausted) => {}
                Err(e) => {
                    warn!(job_id = %job_id, error = %e, "Nack failed");
                    return;
                }
            }
        } else {
            self.ack(descriptor).await;
        }

        let detail = fault.to_string();
        match self.store.fail_job(job_id, &detail).await {
            Ok(true) => {
                if detail.contains(CANCELLED_DETAIL) {
                    info!(job_id = %job_id, "Job cancelled");
                } else {
                    warn!(job_id = %job_id, error = %detail, "Job failed");
                }
                self.hub
                    .broadcast(
                        &descriptor.owner_id,
                        JobEvent::JobFailed {
                            job_id,
                            task_type: descriptor.task_type,
                            error: detail,
                        },
                    )
                    .await;
            }
            Ok(false) => debug!(job_id = %job_id, "Job already terminal"),
            Err(e) => warn!(job_id = %job_id, error = %e, "Could not mark job failed"),
        }
    }

    async fn ack(&self, descriptor: &TaskDescriptor) {
        if let Err(e) = self.broker.ack(descriptor.task_type, descriptor.job_id).await {
            debug!(job_id = %descriptor.job_id, error = %e, "Ack skipped");
        }
    }
}
