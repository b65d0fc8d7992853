//! Error taxonomy for the orchestration core.
//!
//! Two layers: [`ValidationError`] covers handoff contract violations (the
//! validator is side-effect free, so these are always recoverable by
//! resubmitting a corrected output), and [`OrchestratorError`] covers
//! everything the coordinator itself can surface — caller contract errors,
//! agent boundary faults, compaction and artifact integrity failures.
//!
//! Propagation policy: contract violations and agent faults are retried up
//! to the per-stage attempt budget and then surface as a `blocked` workflow,
//! never a crash. `InvalidState` / `UnknownWorkflow` are caller errors,
//! returned immediately and never retried.

use crate::workflow::status::WorkflowStatus;
use crate::{AgentRole, Phase};
use thiserror::Error;

/// Handoff contract violations, in the order the validator checks them.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("required field missing: {field}")]
    MissingField { field: &'static str },

    #[error("malformed id `{id}`: expected `{expected}_` prefix")]
    MalformedId { id: String, expected: &'static str },

    #[error("confidence {value} outside [0, 1]")]
    ConfidenceOutOfRange { value: f64 },

    #[error("payload does not match {phase} schema at `{field}`: {detail}")]
    SchemaViolation {
        phase: Phase,
        field: String,
        detail: String,
    },
}

/// Errors surfaced by the coordinator, the agent boundary, and the stores.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unknown workflow: {0}")]
    UnknownWorkflow(String),

    #[error("workflow {id} is {status}; {operation} not allowed")]
    InvalidState {
        id: String,
        status: WorkflowStatus,
        operation: &'static str,
    },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{role} timed out after {seconds}s (attempt {attempt})")]
    AgentTimeout {
        role: AgentRole,
        seconds: u64,
        attempt: u32,
    },

    #[error("{role} failed: {reason}")]
    AgentFailure { role: AgentRole, reason: String },

    #[error("compaction aborted: {0}")]
    CompactionIntegrity(String),

    #[error("artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("artifact {id} failed integrity check: stored content no longer matches its hash")]
    ArtifactIntegrity { id: String },

    #[error("store error: {0}")]
    Store(String),
}

/// Result alias used throughout the crate.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_format_the_offending_field() {
        let err = ValidationError::SchemaViolation {
            phase: Phase::Scout,
            field: "confidence".into(),
            detail: "expected number".into(),
        };
        let text = err.to_string();
        assert!(text.contains("scout"));
        assert!(text.contains("confidence"));
    }

    #[test]
    fn validation_converts_into_orchestrator_error() {
        let err: OrchestratorError = ValidationError::MissingField { field: "summary" }.into();
        assert!(matches!(err, OrchestratorError::Validation(_)));
        assert!(err.to_string().contains("summary"));
    }

    #[test]
    fn invalid_state_names_workflow_and_operation() {
        let err = OrchestratorError::InvalidState {
            id: "wf_x".into(),
            status: WorkflowStatus::Completed,
            operation: "advance",
        };
        let text = err.to_string();
        assert!(text.contains("wf_x"));
        assert!(text.contains("completed"));
        assert!(text.contains("advance"));
    }
}
