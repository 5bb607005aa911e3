//! Shared test harness: scriptable adapters and a fully wired orchestrator.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use leadflow::adapters::{
    AdapterSet, DeliveryAdapter, InboxAdapter, LeadSearchAdapter, OrganizationAdapter,
    ProfileAdapter, ReputationAdapter,
};
use leadflow::config::{BrokerConfig, WorkerConfig};
use leadflow::error::AdapterError;
use leadflow::jobs::model::{Job, JobStatus};
use leadflow::jobs::submission::SubmissionApi;
use leadflow::notify::NotificationHub;
use leadflow::queue::{TaskBroker, spawn_redelivery_sweep};
use leadflow::store::{LibSqlStore, Store};
use leadflow::worker::WorkerPool;

/// Adapter that always answers with the same document.
pub struct StaticAdapter(pub Value);

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

/// Lead search that fails transiently a fixed number of times, then answers.
pub struct FlakyLeadSearch {
    remaining_failures: AtomicUsize,
    calls: AtomicUsize,
    answer: Value,
}

impl FlakyLeadSearch {
    pub fn new(failures: usize, answer: Value) -> Arc<Self> {
        Arc::new(Self {
            remaining_failures: AtomicUsize::new(failures),
            calls: AtomicUsize::new(0),
            answer,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LeadSearchAdapter for FlakyLeadSearch {
    async fn search(&self, _query: &Value) -> Result<Value, AdapterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.remaining_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.remaining_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(AdapterError::Unavailable {
                capability: "lead_search".into(),
                reason: "service briefly down".into(),
            });
        }
        Ok(self.answer.clone())
    }
}

/// Lead search that always gets rejected. Never worth retrying.
pub struct RejectingLeadSearch;

#[async_trait]
impl LeadSearchAdapter for RejectingLeadSearch {
    async fn search(&self, _query: &Value) -> Result<Value, AdapterError> {
        Err(AdapterError::Rejected {
            capability: "lead_search".into(),
            reason: "query not permitted".into(),
        })
    }
}

/// Adapter set answering every capability with plausible fixed data.
pub fn happy_adapters() -> AdapterSet {
    AdapterSet {
        lead_search: Arc::new(StaticAdapter(json!({
            "results": [
                {"name": "Ada Lovelace", "title": "CEO"},
                {"name": "Grace Hopper", "title": "CTO"},
            ]
        }))),
        profile: Arc::new(StaticAdapter(json!({
            "name": "Ada Lovelace",
            "organization": {"name": "Analytical Engines"},
        }))),
        organization: Arc::new(StaticAdapter(json!({"industry": "software", "size": 40}))),
        reputation: Arc::new(StaticAdapter(json!({"signals": ["press", "awards"]}))),
        delivery: Arc::new(StaticAdapter(json!({"accepted": true}))),
        inbox: Arc::new(StaticAdapter(json!({
            "items": [{"from": "ada@example.com", "in_reply_to": "msg-1"}]
        }))),
    }
}

/// Same set with the lead search swapped out.
pub fn adapters_with_lead_search(lead_search: Arc<dyn LeadSearchAdapter>) -> AdapterSet {
    AdapterSet {
        lead_search,
        ..happy_adapters()
    }
}

/// Broker tuned for tests: fast backoff, short visibility timeout.
pub fn fast_broker_config(max_attempts: u32) -> BrokerConfig {
    BrokerConfig {
        max_attempts,
        backoff_base: Duration::from_millis(10),
        backoff_cap: Duration::from_millis(50),
        visibility_timeout: Duration::from_millis(500),
        redelivery_interval: Duration::from_millis(50),
    }
}

/// A fully wired orchestrator over an in-memory store.
pub struct Harness {
    pub store: Arc<dyn Store>,
    pub broker: Arc<TaskBroker>,
    pub hub: Arc<NotificationHub>,
    pub submission: Arc<SubmissionApi>,
    pub pool: WorkerPool,
}

pub async fn start_harness(broker_config: BrokerConfig, adapters: AdapterSet) -> Harness {
    let store: Arc<dyn Store> = Arc::new(LibSqlStore::new_memory().await.unwrap());
    let broker = TaskBroker::new(broker_config.clone());
    let hub = NotificationHub::new();
    let submission = SubmissionApi::new(
        store.clone(),
        broker.clone(),
        hub.clone(),
        broker_config.max_attempts,
    );
    let worker_config = WorkerConfig {
        instances_per_type: 1,
        step_timeout: Duration::from_secs(5),
    };
    let pool = WorkerPool::spawn(
        broker.clone(),
        store.clone(),
        hub.clone(),
        adapters,
        worker_config,
    );
    spawn_redelivery_sweep(
        broker.clone(),
        store.clone(),
        hub.clone(),
        broker_config.redelivery_interval,
    );

    Harness {
        store,
        broker,
        hub,
        submission,
        pool,
    }
}

/// Poll until the job reaches the wanted status.
pub async fn wait_for_status(
    store: &Arc<dyn Store>,
    job_id: uuid::Uuid,
    status: JobStatus,
    deadline: Duration,
) -> Job {
    let result = tokio::time::timeout(deadline, async {
        loop {
            if let Some(job) = store.get_job(job_id).await.unwrap() {
                if job.status == status {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    result.unwrap_or_else(|_| panic!("job never reached {status}"))
}
