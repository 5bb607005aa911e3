//! Conversation memory: sessions, bounded context windows, summarization.

pub mod manager;
pub mod model;

pub use manager::{spawn_cache_sweep, MemoryManager};
pub use model::{
    ContextWindow, ConversationMessage, ConversationSession, MemoryPreferences, MessageKind,
    MessageRole, SessionStatus,
};
