//! HTTP-backed data and delivery adapters.
//!
//! Each capability is one POST against a configured service endpoint. The
//! response body is passed through opaquely; the core never interprets
//! provider-specific fields beyond JSON validity.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde_json::Value;

use crate::adapters::{
    AdapterSet, DeliveryAdapter, InboxAdapter, LeadSearchAdapter, OrganizationAdapter,
    ProfileAdapter, ReputationAdapter,
};
use crate::error::AdapterError;

/// Configuration shared by the HTTP adapters.
#[derive(Debug, Clone)]
pub struct HttpAdapterConfig {
    pub base_url: String,
    pub api_key: Option<secrecy::SecretString>,
    pub timeout: Duration,
}

/// One capability endpoint: `POST {base_url}/{path}`.
struct Endpoint {
    client: reqwest::Client,
    url: String,
    api_key: Option<secrecy::SecretString>,
    capability: &'static str,
    timeout: Duration,
}

impl Endpoint {
    fn new(config: &HttpAdapterConfig, capability: &'static str, path: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: format!("{}/{}", config.base_url.trim_end_matches('/'), path),
            api_key: config.api_key.clone(),
            capability,
            timeout: config.timeout,
        }
    }

    async fn call(&self, body: &Value) -> Result<Value, AdapterError> {
        let mut request = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                AdapterError::Timeout {
                    capability: self.capability.into(),
                    timeout: self.timeout,
                }
            } else {
                AdapterError::Unavailable {
                    capability: self.capability.into(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(AdapterError::RateLimited {
                capability: self.capability.into(),
            });
        }
        if status.is_server_error() {
            return Err(AdapterError::Unavailable {
                capability: self.capability.into(),
                reason: format!("HTTP {status}"),
            });
        }
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(AdapterError::MissingCredential {
                capability: self.capability.into(),
            });
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(AdapterError::Rejected {
                capability: self.capability.into(),
                reason: format!("HTTP {status}: {detail}"),
            });
        }

        response.json().await.map_err(|e| AdapterError::Malformed {
            capability: self.capability.into(),
            reason: e.to_string(),
        })
    }
}

pub struct HttpLeadSearch(Endpoint);
pub struct HttpProfile(Endpoint);
pub struct HttpOrganization(Endpoint);
pub struct HttpReputation(Endpoint);
pub struct HttpDelivery(Endpoint);
pub struct HttpInbox(Endpoint);

/// Build the full adapter set against one service base URL.
pub fn create_http_adapters(config: &HttpAdapterConfig) -> AdapterSet {
    AdapterSet {
        lead_search: Arc::new(HttpLeadSearch(Endpoint::new(
            config,
            "lead_search",
            "v1/leads/search",
        ))),
        profile: Arc::new(HttpProfile(Endpoint::new(
            config,
            "profile_fetch",
            "v1/profiles/fetch",
        ))),
        organization: Arc::new(HttpOrganization(Endpoint::new(
            config,
            "organization_research",
            "v1/organizations/research",
        ))),
        reputation: Arc::new(HttpReputation(Endpoint::new(
            config,
            "reputation_lookup",
            "v1/reputation/lookup",
        ))),
        delivery: Arc::new(HttpDelivery(Endpoint::new(
            config,
            "message_delivery",
            "v1/messages/deliver",
        ))),
        inbox: Arc::new(HttpInbox(Endpoint::new(
            config,
            "inbox_fetch",
            "v1/inbox/unread",
        ))),
    }
}

#[async_trait]
impl LeadSearchAdapter for HttpLeadSearch {
    async fn search(&self, query: &Value) -> Result<Value, AdapterError> {
        self.0.call(query).await
    }
}

#[async_trait]
impl ProfileAdapter for HttpProfile {
    async fn fetch_profile(&self, reference: &Value) -> Result<Value, AdapterError> {
        self.0.call(reference).await
    }
}

#[async_trait]
impl OrganizationAdapter for HttpOrganization {
    async fn research(&self, organization: &Value) -> Result<Value, AdapterError> {
        self.0.call(organization).await
    }
}

#[async_trait]
impl ReputationAdapter for HttpReputation {
    async fn lookup(&self, subject: &Value) -> Result<Value, AdapterError> {
        self.0.call(subject).await
    }
}

#[async_trait]
impl DeliveryAdapter for HttpDelivery {
    async fn deliver(&self, recipient: &Value, message: &str) -> Result<Value, AdapterError> {
        self.0
            .call(&serde_json::json!({"recipient": recipient, "message": message}))
            .await
    }
}

#[async_trait]
impl InboxAdapter for HttpInbox {
    async fn fetch_unread(&self, mailbox: &Value) -> Result<Value, AdapterError> {
        self.0.call(mailbox).await
    }
}
