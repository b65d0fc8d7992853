//! Workflow status graph.
//!
//! ```text
//! pending → in_progress ──┬─→ awaiting_approval ──┬─→ in_progress (approve/reject)
//!                         │                       └─→ failed
//!                         ├─→ blocked ──┬─→ in_progress (blocker resolved)
//!                         │             └─→ failed
//!                         ├─→ completed (terminal)
//!                         └─→ failed    (terminal)
//! ```
//!
//! `pending → failed` is also allowed so a workflow cancelled before its
//! first stage can still be finalized. Transitions are monotonic along this
//! graph; terminal states accept no further mutation.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a workflow.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    InProgress,
    AwaitingApproval,
    Blocked,
    Completed,
    Failed,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Pending => "pending",
            WorkflowStatus::InProgress => "in_progress",
            WorkflowStatus::AwaitingApproval => "awaiting_approval",
            WorkflowStatus::Blocked => "blocked",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
        }
    }

    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowStatus::Completed | WorkflowStatus::Failed)
    }

    /// Whether the status graph permits moving to `next` from here.
    ///
    /// The coordinator consults only this method before mutating a
    /// workflow's status, so the graph is testable in isolation.
    pub fn can_transition_to(&self, next: WorkflowStatus) -> bool {
        use WorkflowStatus::*;
        match self {
            Pending => matches!(next, InProgress | Failed),
            InProgress => matches!(next, AwaitingApproval | Blocked | Completed | Failed),
            AwaitingApproval => matches!(next, InProgress | Failed),
            Blocked => matches!(next, InProgress | Failed),
            Completed | Failed => false,
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
