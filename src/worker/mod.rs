//! Typed worker pools.

pub mod context;
pub mod pipelines;
pub mod worker;

use std::sync::Arc;

pub use context::PipelineContext;
pub use pipelines::{TaskPipeline, pipeline_for};
pub use worker::Worker;

use crate::adapters::AdapterSet;
use crate::config::WorkerConfig;
use crate::jobs::model::TaskType;
use crate::notify::hub::NotificationHub;
use crate::queue::TaskBroker;
use crate::store::Store;

/// Handles of all running workers, a fixed pool per worker task type.
pub struct WorkerPool {
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `instances_per_type` workers for every worker task type.
    pub fn spawn(
        broker: Arc<TaskBroker>,
        store: Arc<dyn Store>,
        hub: Arc<NotificationHub>,
        adapters: AdapterSet,
        config: WorkerConfig,
    ) -> Self {
        let mut handles = Vec::new();
        for task_type in TaskType::WORKER_TYPES {
            let pipeline = pipeline_for(task_type, adapters.clone());
            for instance in 0..config.instances_per_type {
                let worker = Worker {
                    instance,
                    task_type,
                    broker: broker.clone(),
                    store: store.clone(),
                    hub: hub.clone(),
                    pipeline: pipeline.clone(),
                    config: config.clone(),
                };
                handles.push(tokio::spawn(worker.run()));
            }
        }
        Self { handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Abort all workers. In-flight tasks come back via redelivery.
    pub fn shutdown(&self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{
        DeliveryAdapter, InboxAdapter, LeadSearchAdapter, OrganizationAdapter, ProfileAdapter,
        ReputationAdapter,
    };
    use crate::config::BrokerConfig;
    use crate::error::AdapterError;
    use crate::jobs::model::{Job, JobStatus, TaskDescriptor};
    use crate::store::LibSqlStore;
    use async_trait::async_trait;
    use serde_json::{Value, json};

    struct StaticAdapter(Value);

    #[async_trait]
    impl LeadSearchAdapter for StaticAdapter {
        async fn search(&self, _query: &Value) -> Result<Value, AdapterError> {
            Ok(self.0.clone())
        }
    }
    #[async_trait]
    impl ProfileAdapter for StaticAdapter {
        async fn fetch_profile(&self, _reference: &Value) -> Result<Value, AdapterError> {
            Ok(self.0.clone())
        }
    }
    #[async_trait]
    impl OrganizationAdapter for StaticAdapter {
        async fn research(&self, _organization: &Value) -> Result<Value, AdapterError> {
            Ok(self.0.clone())
        }
    }
    #[async_trait]
    impl ReputationAdapter for StaticAdapter {
        async fn lookup(&self, _subject: &Value) -> Result<Value, AdapterError> {
            Ok(self.0.clone())
        }
    }
    #[async_trait]
    impl DeliveryAdapter for StaticAdapter {
        async fn deliver(&self, _recipient: &Value, _message: &str) -> Result<Value, AdapterError> {
            Ok(self.0.clone())
        }
    }
    #[async_trait]
    impl InboxAdapter for StaticAdapter {
        async fn fetch_unread(&self, _mailbox: &Value) -> Result<Value, AdapterError> {
            Ok(self.0.clone())
        }
    }

    fn static_adapters() -> AdapterSet {
        AdapterSet {
            lead_search: Arc::new(StaticAdapter(json!({
                "results": [{"name": "Ada", "title": "CEO"}]
            }))),
            profile: Arc::new(StaticAdapter(json!({"name": "Ada"}))),
            organization: Arc::new(StaticAdapter(json!({"industry": "software"}))),
            reputation: Arc::new(StaticAdapter(json!({"signals": []}))),
            delivery: Arc::new(StaticAdapter(json!({"accepted": true}))),
            inbox: Arc::new(StaticAdapter(json!({"items": []}))),
        }
    }

    fn worker_for(
        task_type: TaskType,
        broker: Arc<TaskBroker>,
        store: Arc<dyn Store>,
        hub: Arc<NotificationHub>,
    ) -> Worker {
        Worker {
            instance: 0,
            task_type,
            broker,
            store: store.clone(),
            hub,
            pipeline: pipeline_for(task_type, static_adapters()),
            config: WorkerConfig::default(),
        }
    }

    #[tokio::test]
    async fn completed_job_reaches_full_progress() {
        let store: Arc<dyn Store> = Arc::new(LibSqlStore::new_memory().await.unwrap());
        let broker = TaskBroker::new(BrokerConfig::default());
        let hub = NotificationHub::new();

        let job = Job::new(
            "owner-1",
            TaskType::LeadGeneration,
            json!({"locations": ["Austin"], "businesses": ["software"], "jobTitles": ["CEO"]}),
            3,
        );
        store.insert_job(&job).await.unwrap();
        let descriptor = TaskDescriptor::for_job(&job, 5);
        broker.enqueue(descriptor.clone()).await.unwrap();

        let worker = worker_for(TaskType::LeadGeneration, broker.clone(), store.clone(), hub);
        let claimed = broker.claim(TaskType::LeadGeneration).await.unwrap();
        worker.handle(claimed).await;

        let stored = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(stored.progress, 100);
        assert!(stored.output.is_some());
        assert_eq!(store.count_artifacts(job.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn invalid_payload_fails_without_retry() {
        let store: Arc<dyn Store> = Arc::new(LibSqlStore::new_memory().await.unwrap());
        let broker = TaskBroker::new(BrokerConfig::default());
        let hub = NotificationHub::new();

        // Missing required search fields gets past submission only in tests,
        // but mid-pipeline validation still has to be terminal.
        let job = Job::new("owner-1", TaskType::LeadGeneration, json!({}), 3);
        store.insert_job(&job).await.unwrap();
        broker.enqueue(TaskDescriptor::for_job(&job, 5)).await.unwrap();

        let worker = worker_for(TaskType::LeadGeneration, broker.clone(), store.clone(), hub);
        let claimed = broker.claim(TaskType::LeadGeneration).await.unwrap();
        worker.handle(claimed).await;

        let stored = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert!(stored.error.unwrap().contains("locations"));
        // Terminal fault acks; nothing left queued or in flight.
        assert_eq!(broker.depth(TaskType::LeadGeneration).await, 0);
        assert_eq!(broker.in_flight_count(TaskType::LeadGeneration).await, 0);
    }

    #[tokio::test]
    async fn cancellation_lands_as_failed_with_detail() {
        let store: Arc<dyn Store> = Arc::new(LibSqlStore::new_memory().await.unwrap());
        let broker = TaskBroker::new(BrokerConfig::default());
        let hub = NotificationHub::new();

        let job = Job::new(
            "owner-1",
            TaskType::InboxMonitoring,
            json!({"mailbox": {"address": "sales@example.com"}}),
            3,
        );
        store.insert_job(&job).await.unwrap();
        broker.enqueue(TaskDescriptor::for_job(&job, 5)).await.unwrap();
        assert!(store.request_job_cancel("owner-1", job.id).await.unwrap());

        let worker = worker_for(TaskType::InboxMonitoring, broker.clone(), store.clone(), hub);
        let claimed = broker.claim(TaskType::InboxMonitoring).await.unwrap();
        worker.handle(claimed).await;

        let stored = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert!(stored.error.unwrap().contains("cancelled by owner"));
    }

    #[tokio::test]
    async fn campaign_accepts_prerendered_message() {
        let store: Arc<dyn Store> = Arc::new(LibSqlStore::new_memory().await.unwrap());
        let broker = TaskBroker::new(BrokerConfig::default());
        let hub = NotificationHub::new();

        let job = Job::new(
            "owner-1",
            TaskType::MessageCampaign,
            json!({
                "recipients": [{"name": "Ada"}],
                "message": "Quick question about your pipeline",
            }),
            3,
        );
        store.insert_job(&job).await.unwrap();
        broker.enqueue(TaskDescriptor::for_job(&job, 5)).await.unwrap();

        let worker = worker_for(TaskType::MessageCampaign, broker.clone(), store.clone(), hub);
        let claimed = broker.claim(TaskType::MessageCampaign).await.unwrap();
        worker.handle(claimed).await;

        let stored = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        let report = store.get_artifact(job.id, "campaign").await.unwrap().unwrap();
        assert_eq!(report["delivered"], 1);
    }

    #[tokio::test]
    async fn redelivered_task_reuses_persisted_deliveries() {
        let store: Arc<dyn Store> = Arc::new(LibSqlStore::new_memory().await.unwrap());
        let broker = TaskBroker::new(BrokerConfig::default());
        let hub = NotificationHub::new();

        let job = Job::new(
            "owner-1",
            TaskType::MessageCampaign,
            json!({
                "recipients": [{"name": "Ada"}, {"name": "Grace"}],
                "template": "Hi {{name}}",
            }),
            3,
        );
        store.insert_job(&job).await.unwrap();

        // First attempt already delivered to recipient 0.
        store
            .upsert_artifact(job.id, "delivery:0", &json!({"accepted": true}))
            .await
            .unwrap();

        let mut descriptor = TaskDescriptor::for_job(&job, 5);
        descriptor.attempt = 2;
        broker.enqueue(descriptor).await.unwrap();

        let worker = worker_for(TaskType::MessageCampaign, broker.clone(), store.clone(), hub);
        let claimed = broker.claim(TaskType::MessageCampaign).await.unwrap();
        worker.handle(claimed).await;

        let stored = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        let report = store.get_artifact(job.id, "campaign").await.unwrap().unwrap();
        assert_eq!(report["delivered"], 1);
        assert_eq!(report["already_delivered"], 1);
    }
}
