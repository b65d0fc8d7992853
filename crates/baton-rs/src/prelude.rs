//! Convenience re-exports for common `baton-rs` types.
//!
//! Meant to be glob-imported when embedding the coordinator:
//!
//! ```ignore
//! use baton_rs::prelude::*;
//! ```
//!
//! This pulls in what most embedders need: the [`Coordinator`] and its
//! config, the workflow status graph, the agent boundary types, the stores,
//! and the event handlers. Specialized types (compaction internals, digest
//! config, validator entry points) are intentionally excluded — import
//! those from their modules directly when needed.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{
    AgentRole, ArtifactType, BuildReport, Handoff, HandoffPayload, Message, Phase, PlanReport,
    ScoutReport,
};

// ── Coordinator ─────────────────────────────────────────────────────
pub use crate::workflow::{
    AdvanceOutcome, BlockerResolution, Coordinator, CoordinatorConfig, StagePolicy, WorkflowStatus,
};

// ── Errors ──────────────────────────────────────────────────────────
pub use crate::error::{OrchestratorError, OrchestratorResult, ValidationError};

// ── Context budget ──────────────────────────────────────────────────
pub use crate::context::{BudgetAction, BudgetThresholds, CompactionEvent, ContextState};

// ── Agent boundary ──────────────────────────────────────────────────
pub use crate::invoke::{
    AgentInvoker, AgentReply, HttpInvoker, InvocationRequest, InvokeError, RetryConfig,
    ScriptedInvoker,
};

// ── Persistence ─────────────────────────────────────────────────────
pub use crate::store::{Artifact, ArtifactStore, MemoryStore, WorkflowRecord, WorkflowStore};

// ── Events ──────────────────────────────────────────────────────────
pub use crate::events::{
    CompositeEventHandler, EventHandler, FnEventHandler, LoggingHandler, NoopHandler,
    OrchestratorEvent,
};
