//! Conversation memory model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a conversation session.
///
/// active → {paused | archived}; both targets are terminal for automatic
/// processing but the history stays readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Paused,
    Archived,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Archived => "archived",
        };
        write!(f, "{s}")
    }
}

impl SessionStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "paused" => Some(Self::Paused),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }
}

/// One conversation between an owner and an agent. At most one active
/// session per (owner, agent) pair at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSession {
    pub id: Uuid,
    pub owner_id: String,
    pub agent_id: String,
    pub status: SessionStatus,
    pub title: Option<String>,
    pub last_activity: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Role of a conversation message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        };
        write!(f, "{s}")
    }
}

impl MessageRole {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

/// Coarse classification of a message, used by relevance filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Chat,
    Command,
    Result,
    Error,
    System,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Chat => "chat",
            Self::Command => "command",
            Self::Result => "result",
            Self::Error => "error",
            Self::System => "system",
        };
        write!(f, "{s}")
    }
}

impl MessageKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "chat" => Some(Self::Chat),
            "command" => Some(Self::Command),
            "result" => Some(Self::Result),
            "error" => Some(Self::Error),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

/// Append-only conversation message. Never mutated once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: Uuid,
    pub session_id: Uuid,
    pub owner_id: String,
    pub role: MessageRole,
    pub content: String,
    pub kind: MessageKind,
    /// Whether this message should be part of future context windows.
    pub relevant: bool,
    /// Approximate token cost, ≈ 1 token per 4 content bytes.
    pub token_estimate: usize,
    pub parent_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl ConversationMessage {
    pub fn new(
        session_id: Uuid,
        owner_id: impl Into<String>,
        role: MessageRole,
        kind: MessageKind,
        content: impl Into<String>,
    ) -> Self {
        let content = content.into();
        Self {
            id: Uuid::new_v4(),
            session_id,
            owner_id: owner_id.into(),
            role,
            kind,
            relevant: true,
            token_estimate: estimate_tokens(&content),
            parent_id: None,
            created_at: Utc::now(),
            content,
        }
    }

    pub fn with_parent(mut self, parent_id: Uuid) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn irrelevant(mut self) -> Self {
        self.relevant = false;
        self
    }
}

/// Rough token estimate: one token per four content bytes, minimum one.
pub fn estimate_tokens(content: &str) -> usize {
    (content.len() / 4).max(1)
}

/// Cached summary of an older message range. Strictly re-derivable from the
/// message history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextCache {
    pub session_id: Uuid,
    pub agent_id: String,
    pub summary: String,
    /// How many messages the summary covers.
    pub covered_messages: usize,
    pub token_total: usize,
    pub expires_at: DateTime<Utc>,
}

impl ContextCache {
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

/// Per-(owner, agent) context tuning. Defaults apply when absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryPreferences {
    pub owner_id: String,
    pub agent_id: String,
    pub max_context_messages: usize,
    pub max_context_tokens: usize,
    pub auto_summarize_threshold: usize,
    pub retain_history: bool,
}

/// The context window handed to an agent: an optional summary of older
/// history plus the most recent relevant messages, oldest first.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ContextWindow {
    pub summary: Option<String>,
    pub messages: Vec<ConversationMessage>,
    pub token_total: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_estimate_quarter_length() {
        assert_eq!(estimate_tokens("abcdefgh"), 2);
        assert_eq!(estimate_tokens(""), 1);
        assert_eq!(estimate_tokens("abc"), 1);
    }

    #[test]
    fn message_defaults_relevant() {
        let msg = ConversationMessage::new(
            Uuid::new_v4(),
            "owner-1",
            MessageRole::User,
            MessageKind::Chat,
            "hello there",
        );
        assert!(msg.relevant);
        assert_eq!(msg.token_estimate, estimate_tokens("hello there"));
        assert!(msg.parent_id.is_none());
    }

    #[test]
    fn cache_expiry() {
        let cache = ContextCache {
            session_id: Uuid::new_v4(),
            agent_id: "agent".into(),
            summary: "older history".into(),
            covered_messages: 8,
            token_total: 120,
            expires_at: Utc::now() - chrono::Duration::seconds(1),
        };
        assert!(cache.is_expired());
    }

    #[test]
    fn status_roundtrip() {
        for s in [
            SessionStatus::Active,
            SessionStatus::Paused,
            SessionStatus::Archived,
        ] {
            assert_eq!(SessionStatus::parse(&s.to_string()), Some(s));
        }
    }
}
