//! Per-task conversation state.
//!
//! One [`ConversationState`] exists per running task. Only the orchestrator
//! mutates it, and it is handed back inside a [`TaskReport`] when the task
//! ends.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::tools::ScheduledInvocation;
use crate::types::{Invocation, Message};
use crate::utilities::errors::{FailureKind, TaskFailure};

/// Orchestrator state machine phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Init,
    AwaitModel,
    Resolving,
    Executing,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "INIT"),
            Self::AwaitModel => write!(f, "AWAIT_MODEL"),
            Self::Resolving => write!(f, "RESOLVING"),
            Self::Executing => write!(f, "EXECUTING"),
            Self::Done => write!(f, "DONE"),
        }
    }
}

/// How a task ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outcome {
    Answer { text: String },
    Failure(TaskFailure),
}

impl Outcome {
    pub fn failure(kind: FailureKind, reason: impl Into<String>) -> Self {
        Outcome::Failure(TaskFailure {
            kind,
            reason: reason.into(),
        })
    }
}

/// Mutable state of one task.
#[derive(Debug, Clone)]
pub struct ConversationState {
    /// Append-only history.
    pub history: Vec<Message>,
    /// Providers whose capabilities the model is offered.
    pub loaded_providers: BTreeSet<String>,
    /// Providers this turn needs that are not loaded yet.
    pub required_providers: BTreeSet<String>,
    /// Invocations blocked on a load. Cleared after resolving, never replayed.
    pub pending_invocations: Vec<Invocation>,
    /// Invocations ready for the executing phase.
    pub scheduled: Vec<ScheduledInvocation>,
    /// Consecutive turns each capability name went unresolved.
    pub unresolved_counts: HashMap<String, usize>,
    /// Model calls made so far.
    pub steps: usize,
    pub phase: Phase,
    pub outcome: Option<Outcome>,
}

impl ConversationState {
    pub fn new(loaded_providers: impl IntoIterator<Item = String>) -> Self {
        Self {
            history: Vec::new(),
            loaded_providers: loaded_providers.into_iter().collect(),
            required_providers: BTreeSet::new(),
            pending_invocations: Vec::new(),
            scheduled: Vec::new(),
            unresolved_counts: HashMap::new(),
            steps: 0,
            phase: Phase::Init,
            outcome: None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    pub fn push(&mut self, message: Message) {
        self.history.push(message);
    }

    pub fn transition(&mut self, next: Phase) {
        log::debug!("Orchestrator: {} -> {}", self.phase, next);
        self.phase = next;
    }

    /// Enter `Done`. A failure is also recorded in history as a notice.
    pub fn finish(&mut self, outcome: Outcome) {
        if let Outcome::Failure(failure) = &outcome {
            self.push(Message::notice(failure.to_string()));
        }
        self.outcome = Some(outcome);
        self.transition(Phase::Done);
    }

    pub fn into_report(self) -> TaskReport {
        let outcome = self.outcome.unwrap_or_else(|| {
            Outcome::failure(FailureKind::TaskTimeout, "task ended without an outcome")
        });
        TaskReport {
            outcome,
            history: self.history,
            loaded_providers: self.loaded_providers,
            steps: self.steps,
        }
    }
}

/// Result of running one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskReport {
    pub outcome: Outcome,
    pub history: Vec<Message>,
    pub loaded_providers: BTreeSet<String>,
    pub steps: usize,
}

impl TaskReport {
    pub fn answer(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Answer { text } => Some(text),
            Outcome::Failure(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&TaskFailure> {
        match &self.outcome {
            Outcome::Failure(failure) => Some(failure),
            Outcome::Answer { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_appends_notice() {
        let mut state = ConversationState::new(vec!["builtin".to_string()]);
        state.transition(Phase::AwaitModel);
        state.finish(Outcome::failure(FailureKind::StepLimit, "exceeded 3 steps"));

        assert!(state.is_done());
        assert_eq!(
            state.history.last(),
            Some(&Message::notice("task failed (step-limit): exceeded 3 steps"))
        );
        let report = state.into_report();
        assert_eq!(report.failure().map(|f| f.kind), Some(FailureKind::StepLimit));
        assert!(report.loaded_providers.contains("builtin"));
    }

    #[test]
    fn test_answer_adds_no_notice() {
        let mut state = ConversationState::new(Vec::new());
        state.finish(Outcome::Answer {
            text: "42".to_string(),
        });
        assert!(state.history.is_empty());
        assert_eq!(state.into_report().answer(), Some("42"));
    }

    #[test]
    fn test_report_serializes_outcome_tag() {
        let report = TaskReport {
            outcome: Outcome::Answer {
                text: "ok".to_string(),
            },
            history: vec![Message::user("hi")],
            loaded_providers: BTreeSet::new(),
            steps: 1,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["outcome"]["type"], "answer");
        assert_eq!(json["history"][0]["kind"], "user");
    }
}
