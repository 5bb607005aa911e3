//! Notification hub — per-owner broadcast of job lifecycle events.
//!
//! Delivery is best-effort to live connections only; a client that was
//! offline reconciles on reconnect by fetching current job state, never by
//! replaying buffered events.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, broadcast};
use tracing::debug;
use uuid::Uuid;

use crate::jobs::model::TaskType;

/// Default per-owner broadcast channel capacity.
const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// A job lifecycle event pushed to an owner's live connections.
///
/// Events are emitted only after the corresponding persistence write
/// commits, so per-job `percent` values reach each client in non-decreasing
/// order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    JobStarted {
        job_id: Uuid,
        task_type: TaskType,
    },
    JobProgress {
        job_id: Uuid,
        percent: u8,
    },
    JobCompleted {
        job_id: Uuid,
        summary: String,
    },
    JobFailed {
        job_id: Uuid,
        task_type: TaskType,
        error: String,
    },
}

impl JobEvent {
    pub fn job_id(&self) -> Uuid {
        match self {
            Self::JobStarted { job_id, .. }
            | Self::JobProgress { job_id, .. }
            | Self::JobCompleted { job_id, .. }
            | Self::JobFailed { job_id, .. } => *job_id,
        }
    }
}

/// Fan-out hub keyed by owner id. Each owner gets a lazily created broadcast
/// channel; WebSocket connections subscribe on connect.
pub struct NotificationHub {
    channels: RwLock<HashMap<String, broadcast::Sender<JobEvent>>>,
}

impl NotificationHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            channels: RwLock::new(HashMap::new()),
        })
    }

    /// Subscribe to an owner's event stream. Each live connection calls this.
    /// Channels whose last receiver has gone are dropped here, so the map
    /// tracks owners with live connections rather than every owner ever seen.
    pub async fn subscribe(&self, owner_id: &str) -> broadcast::Receiver<JobEvent> {
        let mut channels = self.channels.write().await;
        channels.retain(|_, tx| tx.receiver_count() > 0);
        channels
            .entry(owner_id.to_string())
            .or_insert_with(|| broadcast::channel(DEFAULT_BROADCAST_CAPACITY).0)
            .subscribe()
    }

    /// Broadcast an event to the owner's live connections. No-op when the
    /// owner has no subscribers.
    pub async fn broadcast(&self, owner_id: &str, event: JobEvent) {
        let channels = self.channels.read().await;
        if let Some(tx) = channels.get(owner_id) {
            debug!(owner_id, job_id = %event.job_id(), "Broadcasting job event");
            let _ = tx.send(event);
        }
    }

    /// Number of live subscribers for an owner.
    pub async fn subscriber_count(&self, owner_id: &str) -> usize {
        self.channels
            .read()
            .await
            .get(owner_id)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    /// Number of owner channels currently held.
    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_reaches_only_that_owner() {
        let hub = NotificationHub::new();
        let mut alice = hub.subscribe("alice").await;
        let mut bob = hub.subscribe("bob").await;

        let job_id = Uuid::new_v4();
        hub.broadcast(
            "alice",
            JobEvent::JobStarted {
                job_id,
                task_type: TaskType::LeadGeneration,
            },
        )
        .await;

        let received = alice.recv().await.unwrap();
        assert_eq!(received.job_id(), job_id);
        assert!(bob.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_without_subscribers_is_a_noop() {
        let hub = NotificationHub::new();
        hub.broadcast(
            "nobody",
            JobEvent::JobProgress {
                job_id: Uuid::new_v4(),
                percent: 50,
            },
        )
        .await;
        assert_eq!(hub.subscriber_count("nobody").await, 0);
    }

    #[tokio::test]
    async fn multiple_connections_all_receive() {
        let hub = NotificationHub::new();
        let mut first = hub.subscribe("alice").await;
        let mut second = hub.subscribe("alice").await;
        assert_eq!(hub.subscriber_count("alice").await, 2);

        let job_id = Uuid::new_v4();
        hub.broadcast(
            "alice",
            JobEvent::JobCompleted {
                job_id,
                summary: "3 leads found".into(),
            },
        )
        .await;

        assert_eq!(first.recv().await.unwrap().job_id(), job_id);
        assert_eq!(second.recv().await.unwrap().job_id(), job_id);
    }

    #[tokio::test]
    async fn disconnected_owner_channels_are_pruned() {
        let hub = NotificationHub::new();
        let rx = hub.subscribe("alice").await;
        drop(rx);
        assert_eq!(hub.channel_count().await, 1);

        // Any later subscription sweeps channels with no receivers left.
        let _bob = hub.subscribe("bob").await;
        assert_eq!(hub.channel_count().await, 1);
        assert_eq!(hub.subscriber_count("alice").await, 0);
        assert_eq!(hub.subscriber_count("bob").await, 1);
    }

    #[test]
    fn event_serializes_with_snake_case_tag() {
        let event = JobEvent::JobProgress {
            job_id: Uuid::nil(),
            percent: 40,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "job_progress");
        assert_eq!(json["percent"], 40);
    }
}
