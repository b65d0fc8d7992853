//! Compaction engine: recover context headroom without losing critical state.
//!
//! A compaction run works over a workflow's conversational history:
//!
//! 1. Capture a [`Snapshot`] of the pre-compaction state, tagged with the
//!    triggering mode.
//! 2. Evict oversized payload messages (research reports, code blocks) to
//!    the typed artifact store, leaving a one-line reference in context —
//!    this is where most tokens are actually recovered.
//! 3. Partition the remaining history: the most recent messages (and every
//!    critical message, wherever it sits) are **preserved** verbatim; a
//!    contiguous older block is **summarized** into a terse digest; the
//!    oldest block is **archived** whole to a conversation-log artifact and
//!    referenced by id. The three counts always sum to the pre-compaction
//!    message total.
//! 4. Quality gate: if any critical message would stop being directly
//!    inspectable, the run aborts with `CompactionIntegrity` and no state
//!    changes — an oversized context beats a lossy one.
//!
//! Emergency mode skips the digest step (the whole older block is archived)
//! to guarantee headroom. The engine itself mutates nothing: it returns the
//! replacement history plus the records to persist, and the coordinator
//! commits them under the workflow's lock.

use crate::context::digest::{DigestConfig, digest_block};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::store::artifact::{Artifact, ArtifactStore};
use crate::store::Snapshot;
use crate::{ArtifactType, Message};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info};

// ── Types ──────────────────────────────────────────────────────────

/// What triggered a compaction run.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompactionMode {
    /// Automatic, crossed the compact threshold.
    #[serde(rename = "auto_80pct")]
    Auto,
    /// Crossed the emergency threshold; optional preservation steps skipped.
    #[serde(rename = "emergency")]
    Emergency,
    /// Operator-requested.
    #[serde(rename = "manual")]
    Manual,
}

impl CompactionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompactionMode::Auto => "auto_80pct",
            CompactionMode::Emergency => "emergency",
            CompactionMode::Manual => "manual",
        }
    }
}

impl std::fmt::Display for CompactionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable record of one compaction run.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CompactionEvent {
    pub original_tokens: u64,
    pub compacted_tokens: u64,
    /// `1 − compacted/original`; reported, not asserted — whatever eviction
    /// and summarization achieved.
    pub reduction_ratio: f64,
    pub artifacts_created: usize,
    pub snapshot_id: String,
    pub duration_ms: u64,
    pub messages_preserved: usize,
    pub messages_summarized: usize,
    pub messages_archived: usize,
}

impl CompactionEvent {
    /// Pre-compaction message total implied by the preservation breakdown.
    pub fn message_total(&self) -> usize {
        self.messages_preserved + self.messages_summarized + self.messages_archived
    }
}

/// Everything a successful run produces. Nothing has been committed yet:
/// the caller swaps in `history`, persists `snapshot` and the event, and
/// resets the context state to `event.compacted_tokens`.
#[derive(Debug)]
pub struct CompactionOutcome {
    pub history: Vec<Message>,
    pub snapshot: Snapshot,
    pub event: CompactionEvent,
    pub artifacts: Vec<Artifact>,
}

/// Tunables for the engine.
#[derive(Debug, Clone)]
pub struct CompactionConfig {
    /// Most recent messages preserved verbatim.
    pub preserved_recent: usize,
    /// Minimum token estimate for payload eviction.
    pub evictable_min_tokens: u64,
    pub digest: DigestConfig,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            preserved_recent: 20,
            evictable_min_tokens: 1_000,
            digest: DigestConfig::default(),
        }
    }
}

// ── Engine ─────────────────────────────────────────────────────────

/// The compaction engine. Borrows the artifact store; holds no workflow
/// state of its own.
pub struct CompactionEngine<'a> {
    artifacts: &'a ArtifactStore,
    config: CompactionConfig,
}

impl<'a> CompactionEngine<'a> {
    pub fn new(artifacts: &'a ArtifactStore, config: CompactionConfig) -> Self {
        Self { artifacts, config }
    }

    /// Run a compaction over `history`. Side effects are limited to
    /// artifact writes (immutable, deduplicated); all workflow state
    /// changes are left to the caller via the returned outcome.
    pub fn compact(
        &self,
        workflow_id: &str,
        history: &[Message],
        mode: CompactionMode,
    ) -> OrchestratorResult<CompactionOutcome> {
        let started = Instant::now();
        let total = history.len();
        let original_tokens: u64 = history.iter().map(|m| m.token_estimate).sum();

        let snapshot = Snapshot {
            id: crate::snapshot_id(),
            workflow_id: workflow_id.to_string(),
            token_count: original_tokens,
            compaction_type: mode,
            state: serde_json::to_value(history)
                .map_err(|e| OrchestratorError::Store(format!("snapshot serialization: {e}")))?,
            created_at: Utc::now(),
        };

        debug!(
            "compaction ({mode}) for {workflow_id}: {total} messages, {original_tokens} tokens"
        );

        // Partition indices: the recent tail and criticals anywhere are
        // preserved; the rest is the middle, eligible for eviction,
        // summarization, and archival.
        let tail_start = total.saturating_sub(self.config.preserved_recent);
        let mut preserved_front: Vec<Message> = Vec::new();
        let mut middle: Vec<Message> = Vec::new();
        for msg in history.iter().take(tail_start) {
            if msg.critical {
                preserved_front.push(msg.clone());
            } else {
                middle.push(msg.clone());
            }
        }
        let tail: Vec<Message> = history.iter().skip(tail_start).cloned().collect();
        let preserved_count = preserved_front.len() + tail.len();

        // Step 2/3: evict oversized payload messages out of the middle,
        // replacing each with a reference line.
        let mut created: Vec<Artifact> = Vec::new();
        let mut eviction_refs: Vec<Message> = Vec::new();
        let mut remaining: Vec<Message> = Vec::new();
        for msg in middle {
            let evictable = msg.artifact_hint.is_some()
                && msg.token_estimate >= self.config.evictable_min_tokens;
            if evictable {
                let hint = msg.artifact_hint.unwrap_or(ArtifactType::ConversationLog);
                let artifact = self.artifacts.put(workflow_id, hint, msg.content.as_bytes())?;
                eviction_refs.push(Message::system(format!(
                    "[archived to {}: {}, ~{} tokens]",
                    artifact.id, artifact.artifact_type, artifact.token_estimate
                )));
                created.push(artifact);
            } else {
                remaining.push(msg);
            }
        }
        let evicted_count = eviction_refs.len();

        // Step 4: split what's left of the middle into an archived block
        // (oldest) and a summarized block. Emergency mode archives the
        // whole block — digest construction is the optional step it skips.
        let split = match mode {
            CompactionMode::Emergency => remaining.len(),
            CompactionMode::Auto | CompactionMode::Manual => remaining.len() / 2,
        };
        let summarized_block: Vec<Message> = remaining.split_off(split);
        let archive_block = remaining;

        let archived_count = evicted_count + archive_block.len();
        let summarized_count = summarized_block.len();

        let mut new_history: Vec<Message> = Vec::new();

        if !archive_block.is_empty() {
            let serialized = serde_json::to_vec(&archive_block)
                .map_err(|e| OrchestratorError::Store(format!("archive serialization: {e}")))?;
            let artifact =
                self.artifacts
                    .put(workflow_id, ArtifactType::ConversationLog, &serialized)?;
            new_history.push(Message::system(format!(
                "[archived {} older messages to {}]",
                archive_block.len(),
                artifact.id
            )));
            created.push(artifact);
        }

        new_history.extend(eviction_refs);

        if !summarized_block.is_empty() {
            let digest = digest_block(&summarized_block, &self.config.digest);
            new_history.push(Message::system(digest));
        }

        new_history.extend(preserved_front);
        new_history.extend(tail);

        // Quality gate: every critical message must still be directly
        // inspectable, and the preservation breakdown must account for
        // every pre-compaction message. Nothing has been committed yet,
        // so failing here leaves the workflow's context untouched.
        for msg in history.iter().filter(|m| m.critical) {
            if !new_history.iter().any(|m| m.content == msg.content) {
                return Err(OrchestratorError::CompactionIntegrity(format!(
                    "critical message no longer inspectable after {mode} compaction"
                )));
            }
        }
        if preserved_count + summarized_count + archived_count != total {
            return Err(OrchestratorError::CompactionIntegrity(format!(
                "preservation breakdown {preserved_count}+{summarized_count}+{archived_count} \
                 does not sum to {total}"
            )));
        }

        let compacted_tokens: u64 = new_history.iter().map(|m| m.token_estimate).sum();
        let reduction_ratio = if original_tokens > 0 {
            1.0 - (compacted_tokens as f64 / original_tokens as f64)
        } else {
            0.0
        };

        let event = CompactionEvent {
            original_tokens,
            compacted_tokens,
            reduction_ratio,
            artifacts_created: created.len(),
            snapshot_id: snapshot.id.clone(),
            duration_ms: started.elapsed().as_millis() as u64,
            messages_preserved: preserved_count,
            messages_summarized: summarized_count,
            messages_archived: archived_count,
        };

        info!(
            "compaction ({mode}) complete for {workflow_id}: {} → {} tokens \
             ({:.1}% reduction), {} preserved / {} summarized / {} archived, {} artifact(s)",
            event.original_tokens,
            event.compacted_tokens,
            event.reduction_ratio * 100.0,
            event.messages_preserved,
            event.messages_summarized,
            event.messages_archived,
            event.artifacts_created,
        );

        Ok(CompactionOutcome {
            history: new_history,
            snapshot,
            event,
            artifacts: created,
        })
    }
}
