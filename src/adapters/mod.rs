//! External capability adapters.
//!
//! Every third-party capability the pipelines call — classification,
//! summarization, lead search, profile/organization/reputation lookups,
//! message delivery, inbox fetch — is exposed to the core as a single
//! opaque request/response operation with its own timeout and failure mode.

pub mod http;
pub mod llm;

use async_trait::async_trait;

use crate::error::AdapterError;
use crate::jobs::model::TaskType;
use crate::memory::model::ConversationMessage;

/// Structured result of a classification call.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ClassifiedIntent {
    pub task_type: TaskType,
    pub confidence: f32,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

/// Classifies an utterance (plus a short context excerpt) into a task type.
#[async_trait]
pub trait ClassificationAdapter: Send + Sync {
    async fn classify(
        &self,
        utterance: &str,
        context: &str,
    ) -> Result<ClassifiedIntent, AdapterError>;
}

/// Condenses an ordered message list into a short narrative.
#[async_trait]
pub trait SummarizationAdapter: Send + Sync {
    async fn summarize(
        &self,
        messages: &[ConversationMessage],
    ) -> Result<String, AdapterError>;
}

/// Searches a company directory for lead candidates.
#[async_trait]
pub trait LeadSearchAdapter: Send + Sync {
    async fn search(&self, query: &serde_json::Value) -> Result<serde_json::Value, AdapterError>;
}

/// Fetches a person's public profile.
#[async_trait]
pub trait ProfileAdapter: Send + Sync {
    async fn fetch_profile(
        &self,
        reference: &serde_json::Value,
    ) -> Result<serde_json::Value, AdapterError>;
}

/// Researches an organization.
#[async_trait]
pub trait OrganizationAdapter: Send + Sync {
    async fn research(
        &self,
        organization: &serde_json::Value,
    ) -> Result<serde_json::Value, AdapterError>;
}

/// Looks up reputation signals for a person or organization.
#[async_trait]
pub trait ReputationAdapter: Send + Sync {
    async fn lookup(
        &self,
        subject: &serde_json::Value,
    ) -> Result<serde_json::Value, AdapterError>;
}

/// Delivers an outbound message to one recipient.
#[async_trait]
pub trait DeliveryAdapter: Send + Sync {
    async fn deliver(
        &self,
        recipient: &serde_json::Value,
        message: &str,
    ) -> Result<serde_json::Value, AdapterError>;
}

/// Fetches unread items from a monitored mailbox.
#[async_trait]
pub trait InboxAdapter: Send + Sync {
    async fn fetch_unread(
        &self,
        mailbox: &serde_json::Value,
    ) -> Result<serde_json::Value, AdapterError>;
}

/// The full adapter bundle handed to worker pipelines.
#[derive(Clone)]
pub struct AdapterSet {
    pub lead_search: std::sync::Arc<dyn LeadSearchAdapter>,
    pub profile: std::sync::Arc<dyn ProfileAdapter>,
    pub organization: std::sync::Arc<dyn OrganizationAdapter>,
    pub reputation: std::sync::Arc<dyn ReputationAdapter>,
    pub delivery: std::sync::Arc<dyn DeliveryAdapter>,
    pub inbox: std::sync::Arc<dyn InboxAdapter>,
}
