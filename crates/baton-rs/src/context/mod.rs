//! Context budget management: usage classification and compaction.
//!
//! The context window is the scarcest resource in a multi-agent pipeline.
//! This module keeps each workflow under its configured ceiling:
//!
//! 1. **[`monitor`]** — pure classification of `(current_tokens, max_tokens)`
//!    into an action tier (none / warn / compact / emergency_compact),
//!    re-evaluated after every accepted handoff.
//!
//! 2. **[`compaction`]** — the engine that actually recovers tokens:
//!    snapshot, evict oversized payloads to the artifact store, partition
//!    history into preserved / summarized / archived, and verify critical
//!    context survived before committing anything.
//!
//! 3. **[`digest`]** — bookkeeping digests for summarized message blocks.
//!    No LLM involved: agent reasoning is outside this crate's scope, so
//!    the digest is a deterministic factual reduction.
//!
//! Compaction is synchronous with respect to the coordinator — the next
//! agent invocation always sees the already-reduced context.

pub mod compaction;
pub mod digest;
pub mod monitor;

pub use compaction::{CompactionEngine, CompactionEvent, CompactionMode};
pub use monitor::{BudgetAction, BudgetThresholds, ContextState};
