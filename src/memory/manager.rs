//! Conversation memory manager.
//!
//! Supplies bounded, relevance-filtered context windows per (owner, agent)
//! pair, with TTL-cached summarization of history that falls outside the
//! window. Appending never blocks on summarization; summaries are produced
//! lazily on context retrieval and degrade to "no summary" when the
//! capability is unavailable.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::adapters::SummarizationAdapter;
use crate::config::MemoryConfig;
use crate::error::MemoryError;
use crate::memory::model::{
    ContextCache, ContextWindow, ConversationMessage, ConversationSession, MemoryPreferences,
    MessageKind, MessageRole,
};
use crate::store::Store;

/// How many dropped messages a single summarization call covers at most.
const SUMMARY_RANGE_LIMIT: usize = 50;

pub struct MemoryManager {
    store: Arc<dyn Store>,
    summarizer: Option<Arc<dyn SummarizationAdapter>>,
    config: MemoryConfig,
}

impl MemoryManager {
    pub fn new(
        store: Arc<dyn Store>,
        summarizer: Option<Arc<dyn SummarizationAdapter>>,
        config: MemoryConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            summarizer,
            config,
        })
    }

    /// Return the active session for (owner, agent), creating one if needed.
    pub async fn get_or_create_session(
        &self,
        owner_id: &str,
        agent_id: &str,
        title_hint: Option<&str>,
    ) -> Result<ConversationSession, MemoryError> {
        Ok(self
            .store
            .get_or_create_active_session(owner_id, agent_id, title_hint)
            .await?)
    }

    /// Append a message to the (owner, agent) active session and touch its
    /// last-activity timestamp. Never triggers summarization.
    pub async fn append_message(
        &self,
        owner_id: &str,
        agent_id: &str,
        role: MessageRole,
        kind: MessageKind,
        content: &str,
    ) -> Result<ConversationMessage, MemoryError> {
        let session = self.get_or_create_session(owner_id, agent_id, None).await?;
        let msg = ConversationMessage::new(session.id, owner_id, role, kind, content);
        self.store.append_message(&msg).await?;
        Ok(msg)
    }

    /// Build the context window for (owner, agent): up to the configured
    /// number of recent relevant messages (oldest first), within the token
    /// budget, with an unexpired cached summary of the dropped range
    /// prepended when one is available or can be produced.
    pub async fn get_context(
        &self,
        owner_id: &str,
        agent_id: &str,
        session_id: Option<Uuid>,
        limit: Option<usize>,
    ) -> Result<ContextWindow, MemoryError> {
        let session = match session_id {
            Some(id) => {
                let session = self
                    .store
                    .get_session(id)
                    .await?
                    .ok_or(MemoryError::SessionNotFound { id })?;
                // A session id belonging to another owner or agent reads as
                // absent, never as someone else's history.
                if session.owner_id != owner_id || session.agent_id != agent_id {
                    return Err(MemoryError::SessionNotFound { id });
                }
                session
            }
            None => self.get_or_create_session(owner_id, agent_id, None).await?,
        };

        let prefs = self.effective_preferences(owner_id, agent_id).await?;
        let max_messages = limit
            .unwrap_or(prefs.max_context_messages)
            .min(prefs.max_context_messages);
        let max_tokens = prefs.max_context_tokens;

        // Newest first; one extra row tells us whether anything was dropped
        // beyond the message cap.
        let recent = self
            .store
            .recent_relevant_messages(session.id, max_messages + 1)
            .await?;

        let mut kept: Vec<ConversationMessage> = Vec::new();
        let mut token_total = 0usize;
        for msg in recent.iter().take(max_messages) {
            if token_total + msg.token_estimate > max_tokens {
                break;
            }
            token_total += msg.token_estimate;
            kept.push(msg.clone());
        }

        let total_messages = self.store.count_messages(session.id).await?;
        let dropped = total_messages.saturating_sub(kept.len());

        let summary = if dropped > 0 {
            self.summary_for(&session, agent_id, &kept, dropped).await?
        } else {
            None
        };

        kept.reverse();
        Ok(ContextWindow {
            summary,
            messages: kept,
            token_total,
        })
    }

    /// Reuse an unexpired cached summary, or produce and cache a fresh one
    /// when enough messages were dropped. Degrades to `None` when the
    /// summarization capability fails or is not configured.
    async fn summary_for(
        &self,
        session: &ConversationSession,
        agent_id: &str,
        kept: &[ConversationMessage],
        dropped: usize,
    ) -> Result<Option<String>, MemoryError> {
        if let Some(cache) = self.store.get_context_cache(session.id, agent_id).await? {
            if !cache.is_expired() {
                return Ok(Some(cache.summary));
            }
        }

        let min_messages = self.config.min_summarize_messages;
        if dropped < min_messages {
            return Ok(None);
        }
        let Some(summarizer) = &self.summarizer else {
            return Ok(None);
        };

        // The dropped range ends where the kept window begins. `kept` is
        // newest-first here, so the boundary is its last element.
        let boundary = kept
            .last()
            .map(|m| m.created_at)
            .unwrap_or_else(Utc::now);
        let mut range = self
            .store
            .relevant_messages_before(session.id, boundary, SUMMARY_RANGE_LIMIT)
            .await?;
        range.reverse();
        if range.len() < min_messages {
            return Ok(None);
        }

        match summarizer.summarize(&range).await {
            Ok(summary) => {
                let token_total = range.iter().map(|m| m.token_estimate).sum();
                let cache = ContextCache {
                    session_id: session.id,
                    agent_id: agent_id.to_string(),
                    summary: summary.clone(),
                    covered_messages: range.len(),
                    token_total,
                    expires_at: Utc::now()
                        + ChronoDuration::from_std(self.config.summary_ttl)
                            .unwrap_or_else(|_| ChronoDuration::hours(24)),
                };
                self.store.put_context_cache(&cache).await?;
                debug!(session_id = %session.id, covered = range.len(), "Cached context summary");
                Ok(Some(summary))
            }
            Err(e) => {
                warn!(session_id = %session.id, error = %e,
                    "Summarization unavailable, returning context without summary");
                Ok(None)
            }
        }
    }

    /// Archive this owner's active sessions idle for more than
    /// `days_threshold` days. Idempotent on repeated runs.
    pub async fn archive_old_sessions(
        &self,
        owner_id: &str,
        days_threshold: i64,
    ) -> Result<usize, MemoryError> {
        let cutoff = Utc::now() - ChronoDuration::days(days_threshold);
        let archived = self.store.archive_sessions_before(owner_id, cutoff).await?;
        if archived > 0 {
            debug!(owner_id, archived, "Archived idle sessions");
        }
        Ok(archived)
    }

    async fn effective_preferences(
        &self,
        owner_id: &str,
        agent_id: &str,
    ) -> Result<MemoryPreferences, MemoryError> {
        Ok(self
            .store
            .get_preferences(owner_id, agent_id)
            .await?
            .unwrap_or(MemoryPreferences {
                owner_id: owner_id.to_string(),
                agent_id: agent_id.to_string(),
                max_context_messages: self.config.max_context_messages,
                max_context_tokens: self.config.max_context_tokens,
                auto_summarize_threshold: self.config.min_summarize_messages,
                retain_history: true,
            }))
    }
}

/// Spawn a background task that periodically drops expired context caches.
pub fn spawn_cache_sweep(
    store: Arc<dyn Store>,
    interval: std::time::Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match store.sweep_expired_caches().await {
                Ok(0) => {}
                Ok(n) => debug!(removed = n, "Swept expired context caches"),
                Err(e) => warn!(error = %e, "Context cache sweep failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AdapterError;
    use crate::store::LibSqlStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Summarizer fake that counts calls and can be told to fail.
    struct FakeSummarizer {
        calls: AtomicUsize,
        fail: bool,
    }

    impl FakeSummarizer {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail,
            })
        }
    }

    #[async_trait]
    impl SummarizationAdapter for FakeSummarizer {
        async fn summarize(
            &self,
            messages: &[ConversationMessage],
        ) -> Result<String, AdapterError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(AdapterError::Unavailable {
                    capability: "summarization".into(),
                    reason: "down".into(),
                });
            }
            Ok(format!("summary of {} messages", messages.len()))
        }
    }

    fn config(max_messages: usize, max_tokens: usize) -> MemoryConfig {
        MemoryConfig {
            max_context_messages: max_messages,
            max_context_tokens: max_tokens,
            min_summarize_messages: 5,
            ..Default::default()
        }
    }

    async fn seed_messages(manager: &MemoryManager, count: usize) {
        for i in 0..count {
            manager
                .append_message(
                    "owner-1",
                    "researcher",
                    MessageRole::User,
                    MessageKind::Chat,
                    &format!("message number {i}"),
                )
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn context_respects_message_cap() {
        let store = Arc::new(LibSqlStore::new_memory().await.unwrap());
        let manager = MemoryManager::new(store, None, config(3, 10_000));
        seed_messages(&manager, 6).await;

        let window = manager
            .get_context("owner-1", "researcher", None, None)
            .await
            .unwrap();
        assert_eq!(window.messages.len(), 3);
        // Oldest first.
        assert!(window.messages[0].created_at <= window.messages[2].created_at);
    }

    #[tokio::test]
    async fn context_respects_token_budget() {
        let store = Arc::new(LibSqlStore::new_memory().await.unwrap());
        // Each "message number N" is ~16 bytes ≈ 4 tokens; budget of 9
        // tokens fits two messages.
        let manager = MemoryManager::new(store, None, config(20, 9));
        seed_messages(&manager, 6).await;

        let window = manager
            .get_context("owner-1", "researcher", None, None)
            .await
            .unwrap();
        assert!(window.token_total <= 9);
        assert!(window.messages.len() < 6);
    }

    #[tokio::test]
    async fn summarization_needs_five_dropped_messages() {
        let store = Arc::new(LibSqlStore::new_memory().await.unwrap());
        let summarizer = FakeSummarizer::new(false);
        let manager = MemoryManager::new(
            store,
            Some(summarizer.clone()),
            config(2, 10_000),
        );

        // 4 messages, window of 2 → only 2 dropped, below the minimum.
        seed_messages(&manager, 4).await;
        let window = manager
            .get_context("owner-1", "researcher", None, None)
            .await
            .unwrap();
        assert!(window.summary.is_none());
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 0);

        // 7 messages → 5 dropped, summarization fires.
        seed_messages(&manager, 3).await;
        let window = manager
            .get_context("owner-1", "researcher", None, None)
            .await
            .unwrap();
        assert!(window.summary.is_some());
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cached_summary_is_reused_until_expiry() {
        let store = Arc::new(LibSqlStore::new_memory().await.unwrap());
        let summarizer = FakeSummarizer::new(false);
        let manager = MemoryManager::new(
            store.clone(),
            Some(summarizer.clone()),
            config(2, 10_000),
        );
        seed_messages(&manager, 8).await;

        let first = manager
            .get_context("owner-1", "researcher", None, None)
            .await
            .unwrap();
        let second = manager
            .get_context("owner-1", "researcher", None, None)
            .await
            .unwrap();
        assert_eq!(first.summary, second.summary);
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 1);

        // Expire the cache; the next retrieval regenerates.
        let session = manager
            .get_or_create_session("owner-1", "researcher", None)
            .await
            .unwrap();
        let mut cache = store
            .get_context_cache(session.id, "researcher")
            .await
            .unwrap()
            .unwrap();
        cache.expires_at = Utc::now() - ChronoDuration::seconds(1);
        store.put_context_cache(&cache).await.unwrap();

        let third = manager
            .get_context("owner-1", "researcher", None, None)
            .await
            .unwrap();
        assert!(third.summary.is_some());
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn summarizer_failure_degrades_to_no_summary() {
        let store = Arc::new(LibSqlStore::new_memory().await.unwrap());
        let manager = MemoryManager::new(
            store,
            Some(FakeSummarizer::new(true)),
            config(2, 10_000),
        );
        seed_messages(&manager, 8).await;

        let window = manager
            .get_context("owner-1", "researcher", None, None)
            .await
            .unwrap();
        assert!(window.summary.is_none());
        assert_eq!(window.messages.len(), 2);
    }

    #[tokio::test]
    async fn foreign_session_id_reads_as_absent() {
        let store = Arc::new(LibSqlStore::new_memory().await.unwrap());
        let manager = MemoryManager::new(store, None, MemoryConfig::default());
        manager
            .append_message(
                "owner-1",
                "researcher",
                MessageRole::User,
                MessageKind::Chat,
                "quarterly pipeline numbers",
            )
            .await
            .unwrap();
        let session = manager
            .get_or_create_session("owner-1", "researcher", None)
            .await
            .unwrap();

        // Another owner quoting the session id gets nothing back.
        let err = manager
            .get_context("owner-2", "researcher", Some(session.id), None)
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::SessionNotFound { .. }));

        // Same owner, wrong agent: also absent.
        let err = manager
            .get_context("owner-1", "scheduler", Some(session.id), None)
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::SessionNotFound { .. }));

        // The rightful pair still resolves it.
        let window = manager
            .get_context("owner-1", "researcher", Some(session.id), None)
            .await
            .unwrap();
        assert_eq!(window.messages.len(), 1);
    }

    #[tokio::test]
    async fn archive_old_sessions_is_idempotent() {
        let store = Arc::new(LibSqlStore::new_memory().await.unwrap());
        let manager = MemoryManager::new(store, None, MemoryConfig::default());
        manager
            .get_or_create_session("owner-1", "researcher", None)
            .await
            .unwrap();

        // Negative threshold puts the cutoff in the future, so the fresh
        // session counts as idle.
        assert_eq!(
            manager.archive_old_sessions("owner-1", -1).await.unwrap(),
            1
        );
        assert_eq!(
            manager.archive_old_sessions("owner-1", -1).await.unwrap(),
            0
        );
    }
}
