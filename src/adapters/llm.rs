//! LLM-backed classification and summarization.
//!
//! Supports:
//! - **Anthropic**: direct API access via rig-core
//! - **OpenAI**: direct API access via rig-core
//!
//! Both capabilities go through one rig agent; prompts request strict JSON
//! (classification) or plain prose (summarization). Malformed model output
//! is reported as [`AdapterError::Malformed`] — callers degrade, they never
//! crash on it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rig::client::CompletionClient;
use rig::completion::{CompletionModel, Prompt};
use secrecy::ExposeSecret;

use crate::adapters::{ClassificationAdapter, ClassifiedIntent, SummarizationAdapter};
use crate::error::AdapterError;
use crate::jobs::model::TaskType;
use crate::memory::model::ConversationMessage;

/// Supported LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    Anthropic,
    OpenAi,
}

/// Configuration for creating the LLM capability.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    pub api_key: secrecy::SecretString,
    pub model: String,
    pub classify_timeout: Duration,
    pub summarize_timeout: Duration,
}

/// One rig agent serving both adapter traits.
pub struct LlmCapability<M: CompletionModel> {
    agent: rig::agent::Agent<M>,
    classify_timeout: Duration,
    summarize_timeout: Duration,
}

/// Create the classification + summarization pair from configuration.
pub fn create_llm_capability(
    config: &LlmConfig,
) -> Result<(Arc<dyn ClassificationAdapter>, Arc<dyn SummarizationAdapter>), AdapterError> {
    match config.backend {
        LlmBackend::Anthropic => {
            use rig::providers::anthropic;

            let client: rig::client::Client<anthropic::client::AnthropicExt> =
                anthropic::Client::new(config.api_key.expose_secret()).map_err(|e| {
                    AdapterError::Unavailable {
                        capability: "llm".into(),
                        reason: format!("Failed to create Anthropic client: {e}"),
                    }
                })?;

            tracing::info!(model = %config.model, "Using Anthropic");
            let capability = Arc::new(LlmCapability {
                agent: client.agent(&config.model).build(),
                classify_timeout: config.classify_timeout,
                summarize_timeout: config.summarize_timeout,
            });
            Ok((capability.clone(), capability))
        }
        LlmBackend::OpenAi => {
            use rig::providers::openai;

            let client: rig::client::Client<openai::client::OpenAIResponsesExt> =
                openai::Client::new(config.api_key.expose_secret()).map_err(|e| {
                    AdapterError::Unavailable {
                        capability: "llm".into(),
                        reason: format!("Failed to create OpenAI client: {e}"),
                    }
                })?;

            tracing::info!(model = %config.model, "Using OpenAI");
            let capability = Arc::new(LlmCapability {
                agent: client.agent(&config.model).build(),
                classify_timeout: config.classify_timeout,
                summarize_timeout: config.summarize_timeout,
            });
            Ok((capability.clone(), capability))
        }
    }
}

fn classification_prompt(utterance: &str, context: &str) -> String {
    format!(
        r#"Classify the user request below into exactly one task type:
lead_generation, profile_research, message_campaign, inbox_monitoring, general_query.

Respond with a single JSON object, nothing else:
{{"task_type": "...", "confidence": 0.0, "parameters": {{"locations": [], "businesses": [], "jobTitles": []}}}}

Recent conversation context:
{context}

User request:
{utterance}"#
    )
}

fn summarization_prompt(messages: &[ConversationMessage]) -> String {
    let mut transcript = String::new();
    for msg in messages {
        transcript.push_str(&format!("{}: {}\n", msg.role, msg.content));
    }
    format!(
        "Condense the following conversation into a short narrative that \
         preserves names, goals, and decisions. Reply with the narrative only.\n\n{transcript}"
    )
}

/// Raw shape the model is asked to produce.
#[derive(serde::Deserialize)]
struct RawClassification {
    task_type: String,
    confidence: f32,
    #[serde(default)]
    parameters: serde_json::Value,
}

/// Strip a Markdown code fence if the model wrapped its JSON in one.
fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}

#[async_trait]
impl<M: CompletionModel> ClassificationAdapter for LlmCapability<M> {
    async fn classify(
        &self,
        utterance: &str,
        context: &str,
    ) -> Result<ClassifiedIntent, AdapterError> {
        let prompt = classification_prompt(utterance, context);

        let reply = tokio::time::timeout(self.classify_timeout, self.agent.prompt(prompt))
            .await
            .map_err(|_| AdapterError::Timeout {
                capability: "classification".into(),
                timeout: self.classify_timeout,
            })?
            .map_err(|e| AdapterError::Unavailable {
                capability: "classification".into(),
                reason: e.to_string(),
            })?;

        let raw: RawClassification =
            serde_json::from_str(strip_fences(&reply)).map_err(|e| AdapterError::Malformed {
                capability: "classification".into(),
                reason: format!("{e}: {reply}"),
            })?;

        let task_type =
            TaskType::parse(&raw.task_type).ok_or_else(|| AdapterError::Malformed {
                capability: "classification".into(),
                reason: format!("unknown task type: {}", raw.task_type),
            })?;

        Ok(ClassifiedIntent {
            task_type,
            confidence: raw.confidence.clamp(0.0, 1.0),
            parameters: raw.parameters,
        })
    }
}

#[async_trait]
impl<M: CompletionModel> SummarizationAdapter for LlmCapability<M> {
    async fn summarize(
        &self,
        messages: &[ConversationMessage],
    ) -> Result<String, AdapterError> {
        let prompt = summarization_prompt(messages);

        let summary = tokio::time::timeout(self.summarize_timeout, self.agent.prompt(prompt))
            .await
            .map_err(|_| AdapterError::Timeout {
                capability: "summarization".into(),
                timeout: self.summarize_timeout,
            })?
            .map_err(|e| AdapterError::Unavailable {
                capability: "summarization".into(),
                reason: e.to_string(),
            })?;

        let summary = summary.trim().to_string();
        if summary.is_empty() {
            return Err(AdapterError::Malformed {
                capability: "summarization".into(),
                reason: "empty summary".into(),
            });
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_code_fences() {
        assert_eq!(strip_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_fences("```\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_fences("{\"a\":1}"), "{\"a\":1}");
    }

    #[test]
    fn classification_prompt_includes_utterance_and_context() {
        let prompt = classification_prompt("find leads in Austin", "user: hi");
        assert!(prompt.contains("find leads in Austin"));
        assert!(prompt.contains("user: hi"));
        assert!(prompt.contains("lead_generation"));
    }

    #[test]
    fn raw_classification_parses() {
        let raw: RawClassification = serde_json::from_str(
            r#"{"task_type": "lead_generation", "confidence": 0.92,
                "parameters": {"locations": ["Austin"]}}"#,
        )
        .unwrap();
        assert_eq!(raw.task_type, "lead_generation");
        assert!(raw.confidence > 0.9);
    }
}
