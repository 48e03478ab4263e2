//! staysense — conversational query router for the hotel-pricing assistant.
//!
//! Pipeline per user turn: entity dictionary refresh, intent classification
//! (rules first, optional LLM layer), conversation context tracking, tool
//! dispatch, and a sandboxed read-only query path with deterministic
//! recovery. See [`assistant::Assistant::handle_message`] for the entry
//! point.

pub mod assistant;
pub mod classifier;
pub mod config;
pub mod context;
pub mod dictionary;
pub mod error;
pub mod fuzzy;
pub mod llm;
pub mod router;
pub mod sandbox;
pub mod store;

pub use assistant::{Assistant, ToolOutcome, TurnOutcome};
pub use classifier::{ClassificationResult, IntentKind};
pub use config::RouterConfig;
pub use error::{AssistantError, Result};
pub use router::ToolInvocation;
pub use sandbox::{QueryErrorCode, QueryExecutionResult};
