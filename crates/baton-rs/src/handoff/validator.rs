//! Handoff validator: the gate every agent output passes before it can
//! move a workflow.
//!
//! Checks run in a fixed order — required fields, id convention, confidence
//! range, role sanity, then the phase-specific payload schema. The schema
//! check validates the raw JSON against the phase's generated JSON Schema
//! first (so errors name the offending field), then decodes into the typed
//! [`HandoffPayload`] variant.
//!
//! Validation is side-effect free: it persists nothing and the caller
//! decides what a failure costs (one retry attempt, per the coordinator's
//! stage budget).

use crate::error::ValidationError;
use crate::{
    BuildReport, ContextReport, HandoffDraft, HandoffPayload, Phase, PlanReport, ScoutReport,
};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;

/// Validate a draft and produce its typed payload.
pub fn validate(draft: &HandoffDraft) -> Result<HandoffPayload, ValidationError> {
    // (1) Required fields.
    if draft.summary.trim().is_empty() {
        return Err(ValidationError::MissingField { field: "summary" });
    }
    if draft.workflow_id.trim().is_empty() {
        return Err(ValidationError::MissingField { field: "workflow_id" });
    }
    if draft.payload.is_null() {
        return Err(ValidationError::MissingField { field: "payload" });
    }
    if draft.timestamp.is_none() {
        return Err(ValidationError::MissingField { field: "timestamp" });
    }

    // (2) Id convention: `wf_` prefix with timestamp + suffix segments.
    if !crate::has_id_prefix(&draft.workflow_id, "wf") {
        return Err(ValidationError::MalformedId {
            id: draft.workflow_id.clone(),
            expected: "wf",
        });
    }

    // (3) Confidence domain.
    if let Some(confidence) = draft.confidence
        && !(0.0..=1.0).contains(&confidence)
    {
        return Err(ValidationError::ConfidenceOutOfRange { value: confidence });
    }

    // (4) Role sanity: a handoff cannot target its own sender.
    if draft.from == draft.to {
        return Err(ValidationError::SchemaViolation {
            phase: draft.phase,
            field: "to_agent".into(),
            detail: format!("must differ from from_agent ({})", draft.from),
        });
    }

    // (5) Phase schema, then typed decode. Exhaustive over the payload sum.
    match draft.phase {
        Phase::Scout => decode::<ScoutReport>(draft).map(HandoffPayload::Scout),
        Phase::Plan => decode::<PlanReport>(draft).and_then(|plan| {
            if plan.task_count as usize != plan.tasks.len() {
                return Err(ValidationError::SchemaViolation {
                    phase: Phase::Plan,
                    field: "task_count".into(),
                    detail: format!(
                        "declares {} tasks but {} listed",
                        plan.task_count,
                        plan.tasks.len()
                    ),
                });
            }
            Ok(HandoffPayload::Plan(plan))
        }),
        Phase::Build => decode::<BuildReport>(draft).and_then(|build| {
            if build.tasks_completed > build.total_tasks {
                return Err(ValidationError::SchemaViolation {
                    phase: Phase::Build,
                    field: "tasks_completed".into(),
                    detail: format!(
                        "{} completed exceeds {} total",
                        build.tasks_completed, build.total_tasks
                    ),
                });
            }
            Ok(HandoffPayload::Build(build))
        }),
        Phase::Context => decode::<ContextReport>(draft).map(HandoffPayload::Context),
    }
}

/// Validate `draft.payload` against `T`'s JSON Schema, then decode it.
///
/// Schema validation runs first so failures carry the instance path of the
/// offending field rather than a serde parse trace.
fn decode<T>(draft: &HandoffDraft) -> Result<T, ValidationError>
where
    T: JsonSchema + DeserializeOwned,
{
    let schema = serde_json::to_value(schemars::schema_for!(T)).unwrap_or_default();

    if let Ok(validator) = jsonschema::validator_for(&schema) {
        if let Some(error) = validator.iter_errors(&draft.payload).next() {
            let path = error.instance_path().to_string();
            let field = if path.is_empty() {
                "payload".to_string()
            } else {
                path.trim_start_matches('/').replace('/', ".")
            };
            return Err(ValidationError::SchemaViolation {
                phase: draft.phase,
                field,
                detail: error.to_string(),
            });
        }
    }

    serde_json::from_value(draft.payload.clone()).map_err(|e| ValidationError::SchemaViolation {
        phase: draft.phase,
        field: "payload".into(),
        detail: e.to_string(),
    })
}
