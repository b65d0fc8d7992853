//! Multi-agent workflow orchestration core.
//!
//! `baton-rs` provides the coordination layer for a pipeline of specialized
//! agents (Scout, Planner, Builder) working on a single user request. The
//! core abstraction is the [`Coordinator`](workflow::machine::Coordinator) —
//! a per-workflow state machine that invokes agents through an abstract
//! boundary, validates every handoff against its phase schema, tracks a
//! shared token budget, and compacts context synchronously when the budget
//! runs hot.
//!
//! Agents themselves are external collaborators: the crate never reasons or
//! generates, it only sequences, validates, budgets, and recovers.
//!
//! # Where to find things
//!
//! If you're looking for how to...
//!
//! - **Drive a workflow:** see [`Coordinator`](workflow::machine::Coordinator)
//!   and [`CoordinatorConfig`](workflow::config::CoordinatorConfig). `start()`
//!   creates a workflow, `run_stage()` invokes the current agent and advances,
//!   `approve()`/`reject()` service the post-plan approval gate, and
//!   `resolve_blocker()` recovers a blocked run.
//!
//! - **Supply agent outputs yourself:** call
//!   [`Coordinator::advance()`](workflow::machine::Coordinator::advance) with
//!   an [`AgentReply`](invoke::AgentReply) instead of letting the coordinator
//!   invoke the boundary.
//!
//! - **Plug in real agents:** implement [`AgentInvoker`](invoke::AgentInvoker).
//!   [`HttpInvoker`](invoke::http::HttpInvoker) posts requests to a remote
//!   agent service; [`ScriptedInvoker`](invoke::scripted::ScriptedInvoker)
//!   replays canned outputs for tests.
//!
//! - **Observe workflow behavior:** implement [`EventHandler`](events::EventHandler)
//!   — [`LoggingHandler`](events::LoggingHandler) for tracing-based logging,
//!   [`CompositeEventHandler`](events::CompositeEventHandler) to compose.
//!
//! - **Manage the context budget:** see [`context::monitor`] for the usage
//!   tier classification and [`context::compaction`] for the eviction /
//!   digest / archive pipeline that keeps a workflow under its ceiling.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`workflow`] | [`Coordinator`](workflow::machine::Coordinator) state machine, status graph, config |
//! | [`handoff`] | Handoff contract validation (field, id, confidence, phase schema) |
//! | [`context`] | Budget monitor, compaction engine, digest bookkeeping |
//! | [`store`] | [`WorkflowStore`](store::WorkflowStore) trait, in-memory store, content-addressed artifact store |
//! | [`invoke`] | [`AgentInvoker`](invoke::AgentInvoker) boundary, retry/backoff, scripted + HTTP implementations |
//! | [`events`] | Lifecycle events and handler plumbing |
//!
//! # Design principles
//!
//! 1. **The pipeline decides, agents propose.** Every agent output passes
//!    through the validator before it can move a workflow; a bad output
//!    burns a retry attempt, never corrupts state.
//!
//! 2. **Context is the scarcest resource.** Token usage is re-evaluated
//!    after every accepted handoff, and compaction blocks the pipeline
//!    until headroom is restored.
//!
//! 3. **Single writer per workflow.** All transitions and compactions for
//!    one workflow are serialized behind its own lock; separate workflows
//!    never contend.
//!
//! 4. **Nothing partial is ever visible.** Handoffs and artifacts are
//!    written whole or not at all; a cancelled in-flight agent call is
//!    discarded at the next checkpoint.

pub mod context;
pub mod error;
pub mod events;
pub mod handoff;
pub mod invoke;
pub mod prelude;
pub mod store;
pub mod workflow;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// Re-export schemars for downstream crates.
pub use schemars;

// ── Constants ──────────────────────────────────────────────────────

/// Default context ceiling in tokens.
pub const DEFAULT_MAX_TOKENS: u64 = 200_000;

/// Characters per token for payload size estimation (conservative for
/// JSON-heavy content).
pub const CHARS_PER_TOKEN: u64 = 4;

// ── Identifiers ────────────────────────────────────────────────────

/// Generate a prefixed, chronologically sortable id:
/// `{prefix}_{yyyymmdd_HHMMSS}_{6-hex}`.
///
/// The timestamp segment gives rough creation-time ordering; the random
/// suffix guards against collisions within the same second.
pub fn new_id(prefix: &str) -> String {
    let stamp = Utc::now().format("%Y%m%d_%H%M%S");
    let suffix = short_hex(6);
    format!("{prefix}_{stamp}_{suffix}")
}

/// Generate a workflow id (`wf_...`).
pub fn workflow_id() -> String {
    new_id("wf")
}

/// Generate a snapshot id (`snap_...`).
pub fn snapshot_id() -> String {
    new_id("snap")
}

/// Generate a handoff id (`ho_` + 12 hex chars).
pub fn handoff_id() -> String {
    format!("ho_{}", short_hex(12))
}

/// Generate an event id (`evt_` + 12 hex chars).
pub fn event_id() -> String {
    format!("evt_{}", short_hex(12))
}

/// Generate an artifact id (`art_{type}_` + 8 hex chars).
pub fn artifact_id(artifact_type: ArtifactType) -> String {
    format!("art_{}_{}", artifact_type.as_str(), short_hex(8))
}

/// First `n` hex characters of a fresh UUIDv4.
fn short_hex(n: usize) -> String {
    uuid::Uuid::new_v4().simple().to_string().chars().take(n).collect()
}

/// Whether an id carries the expected prefix followed by content.
pub fn has_id_prefix(id: &str, prefix: &str) -> bool {
    id.strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('_'))
        .is_some_and(|rest| !rest.is_empty())
}

// ── Agent roles and phases ─────────────────────────────────────────

/// The roles that can produce or receive handoffs.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Orchestrator,
    Scout,
    Planner,
    Builder,
    ContextManager,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Orchestrator => "orchestrator",
            AgentRole::Scout => "scout",
            AgentRole::Planner => "planner",
            AgentRole::Builder => "builder",
            AgentRole::ContextManager => "context_manager",
        }
    }

    /// The pipeline stage roles, in execution order.
    pub fn pipeline() -> [AgentRole; 3] {
        [AgentRole::Scout, AgentRole::Planner, AgentRole::Builder]
    }

    /// The handoff phase this role reports under, if it is a pipeline stage.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            AgentRole::Scout => Some(Phase::Scout),
            AgentRole::Planner => Some(Phase::Plan),
            AgentRole::Builder => Some(Phase::Build),
            AgentRole::ContextManager => Some(Phase::Context),
            AgentRole::Orchestrator => None,
        }
    }

    /// The role a completed stage hands off to. Scout reports feed the
    /// planner directly; planner and builder report back to the
    /// orchestrator (approval gate, completion assessment).
    pub fn handoff_target(&self) -> AgentRole {
        match self {
            AgentRole::Scout => AgentRole::Planner,
            _ => AgentRole::Orchestrator,
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline phase a handoff belongs to.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Scout,
    Plan,
    Build,
    Context,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Scout => "scout",
            Phase::Plan => "plan",
            Phase::Build => "build",
            Phase::Context => "context",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Artifact types ─────────────────────────────────────────────────

/// Category of content evicted to the artifact store during compaction.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    ResearchReport,
    CodeBlock,
    DependencyGraph,
    ArchitectureDiagram,
    TestResults,
    /// Archived conversational history blocks produced by compaction.
    ConversationLog,
}

impl ArtifactType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactType::ResearchReport => "research_report",
            ArtifactType::CodeBlock => "code_block",
            ArtifactType::DependencyGraph => "dependency_graph",
            ArtifactType::ArchitectureDiagram => "architecture_diagram",
            ArtifactType::TestResults => "test_results",
            ArtifactType::ConversationLog => "conversation_log",
        }
    }
}

impl std::fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Messages ───────────────────────────────────────────────────────

/// Role of a message in a workflow's conversational history.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Agent,
}

/// One entry in a workflow's conversational history.
///
/// Messages are what the compaction engine partitions: critical messages
/// (handoff digests, the user's request, approval feedback) survive every
/// compaction verbatim; ordinary messages may be summarized or archived.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    /// Estimated token cost of this message.
    pub token_estimate: u64,
    /// Critical messages must remain directly inspectable after compaction.
    pub critical: bool,
    /// Hint for eviction: large payloads of a known category can be moved
    /// to the artifact store ahead of ordinary turns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_hint: Option<ArtifactType>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn agent(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Agent, content)
    }

    fn new(role: MessageRole, content: impl Into<String>) -> Self {
        let content = content.into();
        let token_estimate = estimate_tokens(&content);
        Self {
            role,
            content,
            token_estimate,
            critical: false,
            artifact_hint: None,
        }
    }

    /// Mark this message as critical (builder pattern).
    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    /// Attach an artifact-type hint for eviction (builder pattern).
    pub fn with_artifact_hint(mut self, hint: ArtifactType) -> Self {
        self.artifact_hint = Some(hint);
        self
    }

    /// Override the token estimate (builder pattern, mostly for tests).
    pub fn with_token_estimate(mut self, tokens: u64) -> Self {
        self.token_estimate = tokens;
        self
    }
}

/// Estimate the token cost of a string (`len / CHARS_PER_TOKEN`).
pub fn estimate_tokens(content: &str) -> u64 {
    content.len() as u64 / CHARS_PER_TOKEN
}

/// Estimate the token cost of a JSON value when serialized.
pub fn estimate_json_tokens(value: &serde_json::Value) -> u64 {
    serde_json::to_string(value)
        .map(|s| s.len() as u64 / CHARS_PER_TOKEN)
        .unwrap_or(0)
}

// ── Phase payloads ─────────────────────────────────────────────────

/// Task priority in a plan.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

/// Qualitative likelihood / impact rating for a risk.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// Overall plan complexity.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Low,
    Medium,
    High,
    VeryHigh,
}

/// Builder's self-reported completion state.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CompletionStatus {
    Success,
    Partial,
    Blocked,
    Failed,
}

/// Per-task build outcome.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskOutcome {
    Completed,
    Failed,
    Skipped,
}

/// Scout stage output: what the codebase is and how well we understand it.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug, PartialEq)]
pub struct ScoutReport {
    pub project_type: String,
    pub tech_stack: Vec<String>,
    #[serde(default)]
    pub unknowns: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    pub confidence: f64,
}

/// A single task in a plan.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug, PartialEq)]
pub struct PlannedTask {
    pub id: u32,
    pub title: String,
    pub priority: Priority,
}

/// A risk identified during planning.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug, PartialEq)]
pub struct Risk {
    pub description: String,
    pub likelihood: Severity,
    pub impact: Severity,
    pub mitigation: String,
}

/// Planner stage output: the implementation plan awaiting user approval.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug, PartialEq)]
pub struct PlanReport {
    pub task_count: u32,
    pub tasks: Vec<PlannedTask>,
    #[serde(default)]
    pub risks: Vec<Risk>,
    pub complexity: Complexity,
    pub requires_user_approval: bool,
}

/// A single task result from the builder.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug, PartialEq)]
pub struct BuildTask {
    pub id: u32,
    pub name: String,
    pub outcome: TaskOutcome,
}

/// An unresolved obstacle the builder could not work around.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug, PartialEq)]
pub struct Blocker {
    pub kind: String,
    pub description: String,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Builder stage output: execution results and completion assessment.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug, PartialEq)]
pub struct BuildReport {
    pub tasks: Vec<BuildTask>,
    pub tasks_completed: u32,
    pub total_tasks: u32,
    pub tests_passing: bool,
    pub completion_status: CompletionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocker: Option<Blocker>,
}

/// Context-manager output: budget usage observed at a checkpoint.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug, PartialEq)]
pub struct ContextReport {
    pub current_tokens: u64,
    pub max_tokens: u64,
    pub usage_pct: f64,
    pub action: String,
}

/// Typed per-phase handoff payload.
///
/// A closed sum: each pipeline phase has exactly one payload shape, and the
/// validator's phase-schema check is exhaustive pattern matching over this
/// enum rather than ad hoc key lookups.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "phase", rename_all = "lowercase")]
pub enum HandoffPayload {
    Scout(ScoutReport),
    Plan(PlanReport),
    Build(BuildReport),
    Context(ContextReport),
}

impl HandoffPayload {
    pub fn phase(&self) -> Phase {
        match self {
            HandoffPayload::Scout(_) => Phase::Scout,
            HandoffPayload::Plan(_) => Phase::Plan,
            HandoffPayload::Build(_) => Phase::Build,
            HandoffPayload::Context(_) => Phase::Context,
        }
    }

    /// Estimated token cost of the serialized payload.
    pub fn token_estimate(&self) -> u64 {
        serde_json::to_value(self).map(|v| estimate_json_tokens(&v)).unwrap_or(0)
    }

    /// The artifact category this payload's content belongs to if it is
    /// evicted during compaction.
    pub fn artifact_hint(&self) -> ArtifactType {
        match self {
            HandoffPayload::Scout(_) => ArtifactType::ResearchReport,
            HandoffPayload::Plan(_) => ArtifactType::ArchitectureDiagram,
            HandoffPayload::Build(_) => ArtifactType::TestResults,
            HandoffPayload::Context(_) => ArtifactType::ConversationLog,
        }
    }
}

// ── Handoffs ───────────────────────────────────────────────────────

/// One accepted agent-to-agent transfer of control and data.
///
/// Created once per successful agent completion and never mutated: the
/// store's handoff log is append-only.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Handoff {
    pub id: String,
    pub workflow_id: String,
    pub from_agent: AgentRole,
    pub to_agent: AgentRole,
    pub phase: Phase,
    pub summary: String,
    pub payload: HandoffPayload,
    pub confidence: f64,
    pub warnings: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// An unvalidated handoff as submitted by an agent, before the validator
/// has checked its contract. The payload is raw JSON; it only becomes a
/// typed [`HandoffPayload`] once validation succeeds.
#[derive(Clone, Debug)]
pub struct HandoffDraft {
    pub from: AgentRole,
    pub to: AgentRole,
    pub workflow_id: String,
    pub phase: Phase,
    pub summary: String,
    pub payload: serde_json::Value,
    pub confidence: Option<f64>,
    pub warnings: Vec<String>,
    pub timestamp: Option<DateTime<Utc>>,
}
