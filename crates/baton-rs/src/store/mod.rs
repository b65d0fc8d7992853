//! Persistence surface for workflows, handoffs, snapshots, and events.
//!
//! The logical layout is storage-technology-agnostic: one mutable row per
//! workflow plus three append-only logs (`handoffs`, `context_snapshots`,
//! `events`) and the artifact metadata index. The coordinator reaches all
//! of it through the [`WorkflowStore`] trait — no process-wide singletons,
//! so tests and embedders inject whatever backing they want.
//!
//! [`MemoryStore`] is the in-crate implementation; artifact blobs live in
//! the separate filesystem-backed [`ArtifactStore`](artifact::ArtifactStore).

pub mod artifact;

use crate::context::compaction::CompactionMode;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::workflow::status::WorkflowStatus;
use crate::{AgentRole, Handoff};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

pub use artifact::{Artifact, ArtifactStore};

// ── Records ────────────────────────────────────────────────────────

/// The mutable per-workflow row.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct WorkflowRecord {
    pub id: String,
    pub status: WorkflowStatus,
    /// Non-`None` only while the workflow is `in_progress`.
    pub current_agent: Option<AgentRole>,
    pub user_request: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An immutable capture of workflow state taken at a compaction boundary.
///
/// Retained for audit and recovery; never deleted automatically.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Snapshot {
    pub id: String,
    pub workflow_id: String,
    pub token_count: u64,
    pub compaction_type: CompactionMode,
    /// Serialized conversational history at the boundary.
    pub state: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// One entry in the monitoring event stream (warnings, compactions,
/// blockers, approvals) — independent of the handoff log.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct EventRecord {
    pub id: String,
    pub workflow_id: String,
    pub agent: AgentRole,
    pub event_type: String,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl EventRecord {
    pub fn new(
        workflow_id: impl Into<String>,
        agent: AgentRole,
        event_type: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            id: crate::event_id(),
            workflow_id: workflow_id.into(),
            agent,
            event_type: event_type.into(),
            data,
            timestamp: Utc::now(),
        }
    }
}

// ── Store trait ────────────────────────────────────────────────────

/// Injected persistence boundary for the coordinator.
///
/// Implementations must treat the handoff, snapshot, and event logs as
/// append-only; only the workflow row is ever updated in place.
pub trait WorkflowStore: Send + Sync {
    fn insert_workflow(&self, record: WorkflowRecord) -> OrchestratorResult<()>;
    fn update_workflow(&self, record: &WorkflowRecord) -> OrchestratorResult<()>;
    fn workflow(&self, id: &str) -> Option<WorkflowRecord>;
    fn list_workflows(&self) -> Vec<WorkflowRecord>;

    fn append_handoff(&self, handoff: Handoff) -> OrchestratorResult<()>;
    fn handoffs(&self, workflow_id: &str) -> Vec<Handoff>;

    fn append_snapshot(&self, snapshot: Snapshot) -> OrchestratorResult<()>;
    fn snapshots(&self, workflow_id: &str) -> Vec<Snapshot>;

    fn append_event(&self, event: EventRecord) -> OrchestratorResult<()>;
    fn events(&self, workflow_id: &str) -> Vec<EventRecord>;
}

// ── In-memory implementation ───────────────────────────────────────

#[derive(Default)]
struct MemoryStoreInner {
    workflows: HashMap<String, WorkflowRecord>,
    handoffs: Vec<Handoff>,
    snapshots: Vec<Snapshot>,
    events: Vec<EventRecord>,
}

/// In-memory [`WorkflowStore`] — the default backing for tests and
/// single-process embedders.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryStoreInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> OrchestratorResult<std::sync::MutexGuard<'_, MemoryStoreInner>> {
        self.inner
            .lock()
            .map_err(|_| OrchestratorError::Store("store lock poisoned".into()))
    }
}

impl WorkflowStore for MemoryStore {
    fn insert_workflow(&self, record: WorkflowRecord) -> OrchestratorResult<()> {
        let mut inner = self.lock()?;
        if inner.workflows.contains_key(&record.id) {
            return Err(OrchestratorError::Store(format!(
                "workflow {} already exists",
                record.id
            )));
        }
        inner.workflows.insert(record.id.clone(), record);
        Ok(())
    }

    fn update_workflow(&self, record: &WorkflowRecord) -> OrchestratorResult<()> {
        let mut inner = self.lock()?;
        match inner.workflows.get_mut(&record.id) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(OrchestratorError::UnknownWorkflow(record.id.clone())),
        }
    }

    fn workflow(&self, id: &str) -> Option<WorkflowRecord> {
        self.inner.lock().ok()?.workflows.get(id).cloned()
    }

    fn list_workflows(&self) -> Vec<WorkflowRecord> {
        let Ok(inner) = self.inner.lock() else {
            return Vec::new();
        };
        let mut records: Vec<_> = inner.workflows.values().cloned().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    fn append_handoff(&self, handoff: Handoff) -> OrchestratorResult<()> {
        self.lock()?.handoffs.push(handoff);
        Ok(())
    }

    fn handoffs(&self, workflow_id: &str) -> Vec<Handoff> {
        let Ok(inner) = self.inner.lock() else {
            return Vec::new();
        };
        inner
            .handoffs
            .iter()
            .filter(|h| h.workflow_id == workflow_id)
            .cloned()
            .collect()
    }

    fn append_snapshot(&self, snapshot: Snapshot) -> OrchestratorResult<()> {
        self.lock()?.snapshots.push(snapshot);
        Ok(())
    }

    fn snapshots(&self, workflow_id: &str) -> Vec<Snapshot> {
        let Ok(inner) = self.inner.lock() else {
            return Vec::new();
        };
        inner
            .snapshots
            .iter()
            .filter(|s| s.workflow_id == workflow_id)
            .cloned()
            .collect()
    }

    fn append_event(&self, event: EventRecord) -> OrchestratorResult<()> {
        self.lock()?.events.push(event);
        Ok(())
    }

    fn events(&self, workflow_id: &str) -> Vec<EventRecord> {
        let Ok(inner) = self.inner.lock() else {
            return Vec::new();
        };
        inner
            .events
            .iter()
            .filter(|e| e.workflow_id == workflow_id)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{HandoffPayload, Phase, ScoutReport};

    fn record(id: &str) -> WorkflowRecord {
        let now = Utc::now();
        WorkflowRecord {
            id: id.into(),
            status: WorkflowStatus::Pending,
            current_agent: None,
            user_request: "build a thing".into(),
            created_at: now,
            updated_at: now,
        }
    }

    fn scout_handoff(workflow_id: &str) -> Handoff {
        Handoff {
            id: crate::handoff_id(),
            workflow_id: workflow_id.into(),
            from_agent: AgentRole::Scout,
            to_agent: AgentRole::Planner,
            phase: Phase::Scout,
            summary: "scouted".into(),
            payload: HandoffPayload::Scout(ScoutReport {
                project_type: "cli_tool".into(),
                tech_stack: vec!["Node.js".into()],
                unknowns: vec![],
                recommendations: vec![],
                confidence: 0.85,
            }),
            confidence: 0.85,
            warnings: vec![],
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn insert_and_fetch_workflow() {
        let store = MemoryStore::new();
        store.insert_workflow(record("wf_a")).unwrap();
        assert_eq!(store.workflow("wf_a").unwrap().id, "wf_a");
        assert!(store.workflow("wf_b").is_none());
    }

    #[test]
    fn duplicate_insert_rejected() {
        let store = MemoryStore::new();
        store.insert_workflow(record("wf_a")).unwrap();
        assert!(matches!(
            store.insert_workflow(record("wf_a")),
            Err(OrchestratorError::Store(_))
        ));
    }

    #[test]
    fn update_unknown_workflow_fails() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.update_workflow(&record("wf_missing")),
            Err(OrchestratorError::UnknownWorkflow(_))
        ));
    }

    #[test]
    fn handoff_log_filters_by_workflow() {
        let store = MemoryStore::new();
        store.append_handoff(scout_handoff("wf_a")).unwrap();
        store.append_handoff(scout_handoff("wf_a")).unwrap();
        store.append_handoff(scout_handoff("wf_b")).unwrap();

        assert_eq!(store.handoffs("wf_a").len(), 2);
        assert_eq!(store.handoffs("wf_b").len(), 1);
        assert!(store.handoffs("wf_c").is_empty());
    }

    #[test]
    fn event_stream_appends() {
        let store = MemoryStore::new();
        store
            .append_event(EventRecord::new(
                "wf_a",
                AgentRole::ContextManager,
                "warn",
                serde_json::json!({"usage_pct": 75.0}),
            ))
            .unwrap();

        let events = store.events("wf_a");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "warn");
        assert!(events[0].id.starts_with("evt_"));
    }

    #[test]
    fn list_workflows_sorted_by_id() {
        let store = MemoryStore::new();
        store.insert_workflow(record("wf_b")).unwrap();
        store.insert_workflow(record("wf_a")).unwrap();
        let ids: Vec<String> = store.list_workflows().into_iter().map(|w| w.id).collect();
        assert_eq!(ids, vec!["wf_a".to_string(), "wf_b".to_string()]);
    }
}
