//! Conversation persistence and context assembly.
//!
//! [`store`] owns the JSON-file conversation store; [`context`] renders a
//! conversation's history plus the current input into provider-agnostic
//! turns.

pub mod context;
pub mod store;

pub use context::build_context;
pub use store::ConversationStore;
