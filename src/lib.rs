//! Leadflow — asynchronous orchestration core for sales outreach agents.
//!
//! Owner utterances are routed to typed intents, worker-bound intents become
//! durable jobs executed by per-type worker pools with retry and redelivery,
//! lifecycle events fan out to live connections, and conversation memory
//! supplies bounded context windows with cached summarization.

pub mod adapters;
pub mod config;
pub mod error;
pub mod jobs;
pub mod memory;
pub mod notify;
pub mod queue;
pub mod router;
pub mod store;
pub mod worker;

pub use config::OrchestratorConfig;
pub use error::{Error, Result};
