//! Task broker — per-task-type priority queues with retry and redelivery.
//!
//! Each worker task type gets one logical FIFO-within-priority queue. Claimed
//! tasks move to an in-flight map with a visibility deadline; a task whose
//! worker dies without acking is redelivered once the deadline passes.
//! Delivery is at-least-once, so pipelines must stay idempotent.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::Duration;

use rand::Rng;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::BrokerConfig;
use crate::error::QueueError;
use crate::jobs::model::{TaskDescriptor, TaskType};

/// A task waiting in a ready queue. Ordered by priority (lower runs sooner),
/// then FIFO by enqueue sequence.
struct QueuedTask {
    descriptor: TaskDescriptor,
    seq: u64,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.descriptor.priority == other.descriptor.priority && self.seq == other.seq
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse so the smallest (priority, seq)
        // pops first.
        (other.descriptor.priority, other.seq).cmp(&(self.descriptor.priority, self.seq))
    }
}

/// A claimed task awaiting acknowledgement.
struct InFlightTask {
    descriptor: TaskDescriptor,
    deadline: Instant,
}

/// One ready queue + in-flight map per task type.
#[derive(Default)]
struct TypeQueue {
    ready: Mutex<BinaryHeap<QueuedTask>>,
    in_flight: Mutex<HashMap<Uuid, InFlightTask>>,
    notify: Notify,
}

/// Outcome of a negative acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NackOutcome {
    /// The task will be redelivered as `attempt` after `delay`.
    Retry { attempt: u32, delay: Duration },
    /// Attempts are exhausted; the job must be failed with the last error.
    Exhausted,
}

/// In-memory broker for task descriptors.
pub struct TaskBroker {
    config: BrokerConfig,
    queues: HashMap<TaskType, TypeQueue>,
    seq: AtomicU64,
}

impl TaskBroker {
    /// Create a broker with a queue per worker task type.
    pub fn new(config: BrokerConfig) -> Arc<Self> {
        let queues = TaskType::WORKER_TYPES
            .into_iter()
            .map(|t| (t, TypeQueue::default()))
            .collect();
        Arc::new(Self {
            config,
            queues,
            seq: AtomicU64::new(0),
        })
    }

    fn queue(&self, task_type: TaskType) -> Result<&TypeQueue, QueueError> {
        self.queues
            .get(&task_type)
            .ok_or_else(|| QueueError::UnknownTaskType {
                task_type: task_type.to_string(),
            })
    }

    /// Enqueue a task descriptor for its task type's workers.
    pub async fn enqueue(&self, descriptor: TaskDescriptor) -> Result<(), QueueError> {
        let queue = self.queue(descriptor.task_type)?;
        let seq = self.seq.fetch_add(1, AtomicOrdering::Relaxed);

        debug!(
            job_id = %descriptor.job_id,
            task_type = %descriptor.task_type,
            priority = descriptor.priority,
            attempt = descriptor.attempt,
            "Task enqueued"
        );

        queue.ready.lock().await.push(QueuedTask { descriptor, seq });
        queue.notify.notify_one();
        Ok(())
    }

    /// Claim the next ready task of a type, waiting if none is available.
    /// The claim carries a visibility deadline; unacked claims are
    /// redelivered by the sweep.
    pub async fn claim(&self, task_type: TaskType) -> Result<TaskDescriptor, QueueError> {
        let queue = self.queue(task_type)?;

        loop {
            {
                let mut ready = queue.ready.lock().await;
                if let Some(task) = ready.pop() {
                    let descriptor = task.descriptor;
                    queue.in_flight.lock().await.insert(
                        descriptor.job_id,
                        InFlightTask {
                            descriptor: descriptor.clone(),
                            deadline: Instant::now() + self.config.visibility_timeout,
                        },
                    );
                    return Ok(descriptor);
                }
            }
            queue.notify.notified().await;
        }
    }

    /// Acknowledge a claimed task as done (success or terminal failure).
    pub async fn ack(&self, task_type: TaskType, job_id: Uuid) -> Result<(), QueueError> {
        let queue = self.queue(task_type)?;
        queue
            .in_flight
            .lock()
            .await
            .remove(&job_id)
            .map(|_| ())
            .ok_or(QueueError::NotInFlight { job_id })
    }

    /// Negatively acknowledge a claimed task after a retryable fault.
    ///
    /// Schedules a delayed redelivery with exponential backoff + jitter while
    /// attempts remain; otherwise reports exhaustion so the caller can fail
    /// the job with the last captured error.
    pub async fn nack(
        self: &Arc<Self>,
        task_type: TaskType,
        job_id: Uuid,
    ) -> Result<NackOutcome, QueueError> {
        let queue = self.queue(task_type)?;
        let in_flight = queue
            .in_flight
            .lock()
            .await
            .remove(&job_id)
            .ok_or(QueueError::NotInFlight { job_id })?;

        let descriptor = in_flight.descriptor;
        if descriptor.attempt >= self.config.max_attempts {
            warn!(
                job_id = %job_id,
                attempts = descriptor.attempt,
                "Task retries exhausted"
            );
            return Ok(NackOutcome::Exhausted);
        }

        let next_attempt = descriptor.attempt + 1;
        let delay = self.backoff_delay(descriptor.attempt);

        debug!(
            job_id = %job_id,
            attempt = next_attempt,
            delay_ms = delay.as_millis() as u64,
            "Task scheduled for retry"
        );

        let broker = Arc::clone(self);
        let mut retry = descriptor;
        retry.attempt = next_attempt;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = broker.enqueue(retry).await {
                warn!(error = %e, "Failed to re-enqueue retried task");
            }
        });

        Ok(NackOutcome::Retry {
            attempt: next_attempt,
            delay,
        })
    }

    /// Exponential backoff with up to 50% jitter, capped.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let base = self
            .config
            .backoff_base
            .saturating_mul(2u32.saturating_pow(exp))
            .min(self.config.backoff_cap);
        let jitter = rand::thread_rng().gen_range(0.0..=0.5);
        base.mul_f64(1.0 + jitter).min(self.config.backoff_cap)
    }

    /// Move expired in-flight tasks back to ready (attempt + 1), returning
    /// descriptors whose attempts are exhausted instead of requeueing them.
    pub async fn redeliver_expired(&self) -> Vec<TaskDescriptor> {
        let now = Instant::now();
        let mut exhausted = Vec::new();

        for (task_type, queue) in &self.queues {
            let mut expired = Vec::new();
            {
                let mut in_flight = queue.in_flight.lock().await;
                let dead: Vec<Uuid> = in_flight
                    .iter()
                    .filter(|(_, t)| t.deadline <= now)
                    .map(|(id, _)| *id)
                    .collect();
                for id in dead {
                    if let Some(task) = in_flight.remove(&id) {
                        expired.push(task.descriptor);
                    }
                }
            }

            for mut descriptor in expired {
                if descriptor.attempt >= self.config.max_attempts {
                    warn!(
                        job_id = %descriptor.job_id,
                        task_type = %task_type,
                        "Expired task has no attempts left"
                    );
                    exhausted.push(descriptor);
                    continue;
                }

                descriptor.attempt += 1;
                warn!(
                    job_id = %descriptor.job_id,
                    task_type = %task_type,
                    attempt = descriptor.attempt,
                    "Redelivering unacknowledged task"
                );
                let seq = self.seq.fetch_add(1, AtomicOrdering::Relaxed);
                queue.ready.lock().await.push(QueuedTask { descriptor, seq });
                queue.notify.notify_one();
            }
        }

        exhausted
    }

    /// Ready-queue depth for a task type.
    pub async fn depth(&self, task_type: TaskType) -> usize {
        match self.queue(task_type) {
            Ok(queue) => queue.ready.lock().await.len(),
            Err(_) => 0,
        }
    }

    /// In-flight count for a task type.
    pub async fn in_flight_count(&self, task_type: TaskType) -> usize {
        match self.queue(task_type) {
            Ok(queue) => queue.in_flight.lock().await.len(),
            Err(_) => 0,
        }
    }
}
