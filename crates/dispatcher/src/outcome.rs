use serde::Serialize;
use serde_json::Value;

use weft_core::{ActionError, ErrorInfo, InvocationId};

/// States of the dispatcher state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Before,
    Executing,
    Success,
    Error,
    Finally,
    Done,
}

/// How an invocation ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "value", rename_all = "snake_case")]
pub enum Outcome {
    /// The main action succeeded with this (mapped) result.
    Succeeded(Value),
    /// The main action failed; the error branch ran.
    Failed(ErrorInfo),
    /// The invocation was cancelled before the chain completed.
    Cancelled,
}

impl Outcome {
    pub(crate) fn from_result(result: &Result<Value, ActionError>) -> Self {
        match result {
            Ok(value) => Self::Succeeded(value.clone()),
            Err(ActionError::Cancelled) => Self::Cancelled,
            Err(err) => Self::Failed(err.info()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Result of [`ActionDispatcher::dispatch`](crate::ActionDispatcher::dispatch).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchReport {
    pub invocation_id: InvocationId,
    /// States visited by the top-level handler, in order.
    pub phases: Vec<Phase>,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl DispatchReport {
    pub fn visited(&self, phase: Phase) -> bool {
        self.phases.contains(&phase)
    }
}
