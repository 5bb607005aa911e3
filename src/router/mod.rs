//! Intent routing.
//!
//! Turns a raw owner utterance into a routed intent: which task type it
//! asks for, with what parameters, and whether a worker pool should run it.
//! The LLM classifier is primary; the keyword classifier covers its
//! failures, timeouts, and low-confidence answers. Routing itself never
//! fails — the worst outcome is `general_query` at zero confidence.

pub mod keyword;

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

pub use keyword::KeywordClassifier;

use crate::adapters::{ClassificationAdapter, ClassifiedIntent};
use crate::config::RouterConfig;
use crate::jobs::model::TaskType;
use crate::memory::MemoryManager;

/// The router's answer for one utterance.
#[derive(Debug, Clone, Serialize)]
pub struct RoutedIntent {
    pub task_type: TaskType,
    pub confidence: f32,
    pub parameters: serde_json::Value,
    /// Whether this intent should be submitted as an asynchronous job.
    pub requires_worker: bool,
}

impl RoutedIntent {
    fn from_classified(intent: ClassifiedIntent) -> Self {
        Self {
            requires_worker: intent.task_type.has_worker(),
            task_type: intent.task_type,
            confidence: intent.confidence,
            parameters: intent.parameters,
        }
    }
}

pub struct IntentRouter {
    config: RouterConfig,
    primary: Option<Arc<dyn ClassificationAdapter>>,
    fallback: KeywordClassifier,
    memory: Arc<MemoryManager>,
}

impl IntentRouter {
    pub fn new(
        config: RouterConfig,
        primary: Option<Arc<dyn ClassificationAdapter>>,
        memory: Arc<MemoryManager>,
    ) -> Arc<Self> {
        let fallback = KeywordClassifier::new(config.fallback_confidence);
        Arc::new(Self {
            config,
            primary,
            fallback,
            memory,
        })
    }

    /// Route one utterance for (owner, agent).
    pub async fn route(
        &self,
        owner_id: &str,
        agent_id: &str,
        utterance: &str,
        session_id: Option<Uuid>,
    ) -> RoutedIntent {
        let utterance = utterance.trim();
        if utterance.is_empty() {
            return RoutedIntent {
                task_type: TaskType::GeneralQuery,
                confidence: 0.0,
                parameters: serde_json::json!({}),
                requires_worker: false,
            };
        }

        let context = self.context_excerpt(owner_id, agent_id, session_id).await;

        if let Some(primary) = &self.primary {
            match tokio::time::timeout(
                self.config.classify_timeout,
                primary.classify(utterance, &context),
            )
            .await
            {
                Ok(Ok(intent)) if intent.confidence >= self.config.confidence_threshold => {
                    debug!(owner_id, task_type = %intent.task_type,
                        confidence = intent.confidence, "Classified intent");
                    return RoutedIntent::from_classified(intent);
                }
                Ok(Ok(intent)) => {
                    debug!(owner_id, task_type = %intent.task_type,
                        confidence = intent.confidence,
                        "Classification below threshold, using keyword fallback");
                }
                Ok(Err(e)) => {
                    warn!(owner_id, error = %e,
                        "Classification failed, using keyword fallback");
                }
                Err(_) => {
                    warn!(owner_id, timeout = ?self.config.classify_timeout,
                        "Classification timed out, using keyword fallback");
                }
            }
        }

        RoutedIntent::from_classified(self.fallback.classify_keywords(utterance))
    }

    /// A short excerpt of recent conversation, formatted one message per
    /// line. Memory failures degrade to an empty excerpt.
    async fn context_excerpt(
        &self,
        owner_id: &str,
        agent_id: &str,
        session_id: Option<Uuid>,
    ) -> String {
        match self
            .memory
            .get_context(owner_id, agent_id, session_id, Some(self.config.context_excerpt))
            .await
        {
            Ok(window) => window
                .messages
                .iter()
                .map(|m| format!("{}: {}", m.role, m.content))
                .collect::<Vec<_>>()
                .join("\n"),
            Err(e) => {
                debug!(owner_id, error = %e, "Context excerpt unavailable");
                String::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfig;
    use crate::error::AdapterError;
    use crate::store::LibSqlStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;

    enum Script {
        Answer(ClassifiedIntent),
        Fail,
        Hang,
    }

    struct ScriptedClassifier(Script);

    #[async_trait]
    impl ClassificationAdapter for ScriptedClassifier {
        async fn classify(
            &self,
            _utterance: &str,
            _context: &str,
        ) -> Result<ClassifiedIntent, AdapterError> {
            match &self.0 {
                Script::Answer(intent) => Ok(intent.clone()),
                Script::Fail => Err(AdapterError::Malformed {
                    capability: "classification".into(),
                    reason: "not json".into(),
                }),
                Script::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    unreachable!()
                }
            }
        }
    }

    async fn router_with(primary: Option<Script>) -> Arc<IntentRouter> {
        let store = Arc::new(LibSqlStore::new_memory().await.unwrap());
        let memory = MemoryManager::new(store, None, MemoryConfig::default());
        let config = RouterConfig {
            classify_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let primary = primary
            .map(|s| Arc::new(ScriptedClassifier(s)) as Arc<dyn ClassificationAdapter>);
        IntentRouter::new(config, primary, memory)
    }

    #[tokio::test]
    async fn confident_classification_wins() {
        let router = router_with(Some(Script::Answer(ClassifiedIntent {
            task_type: TaskType::ProfileResearch,
            confidence: 0.95,
            parameters: json!({"profile": {"name": "Ada"}}),
        })))
        .await;

        let intent = router
            .route("owner-1", "router", "look into Ada for me", None)
            .await;
        assert_eq!(intent.task_type, TaskType::ProfileResearch);
        assert!(intent.requires_worker);
        assert_eq!(intent.confidence, 0.95);
    }

    #[tokio::test]
    async fn low_confidence_falls_back_to_keywords() {
        let router = router_with(Some(Script::Answer(ClassifiedIntent {
            task_type: TaskType::MessageCampaign,
            confidence: 0.4,
            parameters: json!({}),
        })))
        .await;

        let intent = router
            .route("owner-1", "router", "find leads in Austin", None)
            .await;
        assert_eq!(intent.task_type, TaskType::LeadGeneration);
        assert_eq!(intent.confidence, 0.6);
    }

    #[tokio::test]
    async fn malformed_classification_never_raises() {
        let router = router_with(Some(Script::Fail)).await;
        let intent = router
            .route("owner-1", "router", "find leads in Austin", None)
            .await;
        assert_eq!(intent.task_type, TaskType::LeadGeneration);
    }

    #[tokio::test(start_paused = true)]
    async fn classification_timeout_falls_back() {
        let router = router_with(Some(Script::Hang)).await;
        let intent = router
            .route("owner-1", "router", "monitor my inbox", None)
            .await;
        assert_eq!(intent.task_type, TaskType::InboxMonitoring);
    }

    #[tokio::test]
    async fn empty_utterance_is_general_query() {
        let router = router_with(None).await;
        let intent = router.route("owner-1", "router", "   ", None).await;
        assert_eq!(intent.task_type, TaskType::GeneralQuery);
        assert_eq!(intent.confidence, 0.0);
        assert!(!intent.requires_worker);
    }

    #[tokio::test]
    async fn no_primary_goes_straight_to_keywords() {
        let router = router_with(None).await;
        let intent = router
            .route(
                "owner-1",
                "router",
                "find leads in Austin software companies with CEO",
                None,
            )
            .await;
        assert_eq!(intent.task_type, TaskType::LeadGeneration);
        assert_eq!(intent.parameters["locations"], json!(["Austin"]));
        assert_eq!(intent.parameters["businesses"], json!(["software"]));
        assert_eq!(intent.parameters["jobTitles"], json!(["CEO"]));
    }
}
