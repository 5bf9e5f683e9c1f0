//! The orchestration loop and its per-task state.

pub mod orchestrator;
pub mod prompt;
pub mod state;

pub use orchestrator::Orchestrator;
pub use state::{ConversationState, Outcome, Phase, TaskReport};
