//! Task queue / broker.

pub mod broker;

use std::sync::Arc;

pub use broker::{NackOutcome, TaskBroker};

use tracing::warn;

use crate::notify::hub::{JobEvent, NotificationHub};
use crate::store::Store;

/// Spawn the redelivery sweep: expired in-flight tasks go back to their
/// ready queues, and tasks with no attempts left fail their jobs with the
/// last captured error.
pub fn spawn_redelivery_sweep(
    broker: Arc<TaskBroker>,
    store: Arc<dyn Store>,
    hub: Arc<NotificationHub>,
    interval: std::time::Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            for descriptor in broker.redeliver_expired().await {
                let detail = "visibility timeout exceeded with no attempts left";
                match store.fail_job(descriptor.job_id, detail).await {
                    Ok(true) => {
                        hub.broadcast(
                            &descriptor.owner_id,
                            JobEvent::JobFailed {
                                job_id: descriptor.job_id,
                                task_type: descriptor.task_type,
                                error: detail.to_string(),
                            },
                        )
                        .await;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!(job_id = %descriptor.job_id, error = %e,
                            "Failed to mark exhausted job failed");
                    }
                }
            }
        }
    })
}
