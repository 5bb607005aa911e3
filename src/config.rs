//! Configuration types.
//!
//! One `OrchestratorConfig` value is assembled at startup and handed into
//! every component. Numeric tuning values (retry counts, backoff, context
//! budgets, TTLs) are business defaults, not invariants — tests override them
//! freely.

use std::time::Duration;

use crate::error::ConfigError;

/// Top-level orchestrator configuration.
#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfig {
    pub broker: BrokerConfig,
    pub worker: WorkerConfig,
    pub router: RouterConfig,
    pub memory: MemoryConfig,
    pub submission: SubmissionConfig,
}

impl OrchestratorConfig {
    /// Defaults, with the common tuning knobs overridable from environment
    /// variables. Unset variables keep their defaults; set-but-unparseable
    /// values are a startup error, not a silent fallback.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(n) = env_parse::<u32>("LEADFLOW_MAX_ATTEMPTS")? {
            config.broker.max_attempts = n.max(1);
        }
        if let Some(secs) = env_parse::<u64>("LEADFLOW_VISIBILITY_TIMEOUT_SECS")? {
            config.broker.visibility_timeout = Duration::from_secs(secs);
        }
        if let Some(n) = env_parse::<usize>("LEADFLOW_WORKERS_PER_TYPE")? {
            config.worker.instances_per_type = n.max(1);
        }
        if let Some(secs) = env_parse::<u64>("LEADFLOW_STEP_TIMEOUT_SECS")? {
            config.worker.step_timeout = Duration::from_secs(secs);
        }
        if let Some(n) = env_parse::<usize>("LEADFLOW_CONTEXT_MESSAGES")? {
            config.memory.max_context_messages = n.max(1);
        }
        if let Some(n) = env_parse::<usize>("LEADFLOW_CONTEXT_TOKENS")? {
            config.memory.max_context_tokens = n.max(1);
        }

        Ok(config)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("could not parse {raw:?}"),
            }),
        Err(_) => Ok(None),
    }
}

/// Broker / retry policy configuration.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Default maximum delivery attempts per task.
    pub max_attempts: u32,
    /// Base delay for exponential backoff between attempts.
    pub backoff_base: Duration,
    /// Cap on the backoff delay.
    pub backoff_cap: Duration,
    /// How long a claimed task may go unacknowledged before redelivery.
    pub visibility_timeout: Duration,
    /// How often the redelivery sweep runs.
    pub redelivery_interval: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_secs(2),
            backoff_cap: Duration::from_secs(60),
            visibility_timeout: Duration::from_secs(300),
            redelivery_interval: Duration::from_secs(10),
        }
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Worker instances per task type.
    pub instances_per_type: usize,
    /// Timeout applied to each external adapter call made by a pipeline step.
    pub step_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            instances_per_type: 2,
            step_timeout: Duration::from_secs(30),
        }
    }
}

/// Intent router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Below this confidence the primary classification falls back to
    /// keyword extraction.
    pub confidence_threshold: f32,
    /// Fixed confidence reported by the keyword fallback.
    pub fallback_confidence: f32,
    /// Timeout for the classification adapter call.
    pub classify_timeout: Duration,
    /// How many recent messages to excerpt as classification context.
    pub context_excerpt: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
            fallback_confidence: 0.6,
            classify_timeout: Duration::from_secs(10),
            context_excerpt: 6,
        }
    }
}

/// Conversation memory configuration.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Default context window size in messages.
    pub max_context_messages: usize,
    /// Default context window budget in (approximate) tokens.
    pub max_context_tokens: usize,
    /// Minimum dropped messages before summarization is worth a call.
    pub min_summarize_messages: usize,
    /// How long a cached summary stays valid.
    pub summary_ttl: Duration,
    /// Timeout for the summarization adapter call.
    pub summarize_timeout: Duration,
    /// How often the expired-cache sweep runs.
    pub cache_sweep_interval: Duration,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_context_messages: 20,
            max_context_tokens: 4000,
            min_summarize_messages: 5,
            summary_ttl: Duration::from_secs(24 * 3600),
            summarize_timeout: Duration::from_secs(20),
            cache_sweep_interval: Duration::from_secs(3600),
        }
    }
}

/// Submission / reconciliation configuration.
#[derive(Debug, Clone)]
pub struct SubmissionConfig {
    /// Pending jobs with no worker activity for this long are re-enqueued.
    pub reconcile_grace: Duration,
    /// How often the reconciliation sweep runs.
    pub reconcile_interval: Duration,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            reconcile_grace: Duration::from_secs(120),
            reconcile_interval: Duration::from_secs(60),
        }
    }
}
