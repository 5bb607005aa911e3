//! Shared execution context handed to a pipeline run.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use uuid::Uuid;

use crate::error::{AdapterError, PipelineFault};
use crate::notify::hub::{JobEvent, NotificationHub};
use crate::store::Store;

/// Text recorded on a job that its owner asked to stop.
pub const CANCELLED_DETAIL: &str = "cancelled by owner";

/// Everything a pipeline step needs: the task's identity and parameters,
/// persistence, notification fan-out, and the per-step timeout. Progress and
/// cancellation checks both happen at step boundaries through
/// [`PipelineContext::step_done`].
pub struct PipelineContext {
    pub job_id: Uuid,
    pub owner_id: String,
    pub params: Value,
    pub attempt: u32,
    store: Arc<dyn Store>,
    hub: Arc<NotificationHub>,
    step_timeout: Duration,
    total_steps: usize,
    completed_steps: usize,
}

impl PipelineContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        job_id: Uuid,
        owner_id: String,
        params: Value,
        attempt: u32,
        store: Arc<dyn Store>,
        hub: Arc<NotificationHub>,
        step_timeout: Duration,
        total_steps: usize,
    ) -> Self {
        Self {
            job_id,
            owner_id,
            params,
            attempt,
            store,
            hub,
            step_timeout,
            total_steps: total_steps.max(1),
            completed_steps: 0,
        }
    }

    /// Mark one named step finished: advance durable progress, notify the
    /// owner, and honor a pending cancellation before the next step starts.
    ///
    /// Progress runs 10 → 100 across the step count. The store write is a
    /// compare-and-set, so a redelivered task that re-runs earlier steps
    /// never moves progress backwards.
    pub async fn step_done(&mut self, step: &'static str) -> Result<(), PipelineFault> {
        self.completed_steps = (self.completed_steps + 1).min(self.total_steps);
        let percent = (10 + 90 * self.completed_steps / self.total_steps) as u8;

        tracing::debug!(job_id = %self.job_id, step, percent, "Pipeline step finished");

        if self.store.advance_job_progress(self.job_id, percent).await? {
            self.hub
                .broadcast(
                    &self.owner_id,
                    JobEvent::JobProgress {
                        job_id: self.job_id,
                        percent,
                    },
                )
                .await;
        }

        if self.store.is_cancel_requested(self.job_id).await? {
            return Err(PipelineFault::Terminal(CANCELLED_DETAIL.into()));
        }
        Ok(())
    }

    /// Run one external adapter call under the step timeout.
    pub async fn external<T>(
        &self,
        capability: &'static str,
        call: impl Future<Output = Result<T, AdapterError>>,
    ) -> Result<T, PipelineFault> {
        match tokio::time::timeout(self.step_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(AdapterError::Timeout {
                capability: capability.into(),
                timeout: self.step_timeout,
            }
            .into()),
        }
    }

    /// Persist a result artifact under its natural (job, kind) key.
    /// Re-running the step after a redelivery overwrites the same row.
    pub async fn persist(&self, kind: &str, payload: &Value) -> Result<(), PipelineFault> {
        Ok(self.store.upsert_artifact(self.job_id, kind, payload).await?)
    }

    /// Read back an artifact persisted by an earlier attempt, if any.
    pub async fn existing_artifact(&self, kind: &str) -> Result<Option<Value>, PipelineFault> {
        Ok(self.store.get_artifact(self.job_id, kind).await?)
    }
}
