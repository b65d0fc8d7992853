//! The workflow coordinator: a per-workflow state machine that sequences
//! the agent pipeline, validates handoffs, tracks the context budget, and
//! recovers from failure.
//!
//! Pipeline order is fixed: `scout → planner → builder`, with a mandatory
//! user approval gate after the planner. Every mutating operation on a
//! workflow — `advance`, `approve`, `reject`, `resolve_blocker`, compaction —
//! is serialized behind that workflow's own async lock (single writer per
//! workflow id); independent workflows never contend.
//!
//! Agent invocation is the only long-blocking operation. [`Coordinator::run_stage`]
//! wraps each attempt in the stage's deadline; a timeout counts against the
//! stage's retry budget exactly like a failed attempt, and an exhausted
//! budget moves the workflow to `blocked` — never a crash, never a silent
//! loop. Cancellation is checked after every invocation returns: a late
//! result for a cancelled workflow is discarded, and no partial handoff is
//! ever visible.

use crate::context::compaction::{
    CompactionConfig, CompactionEngine, CompactionEvent, CompactionMode,
};
use crate::context::monitor::{self, BudgetAction, ContextState};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::events::{EventHandler, NoopHandler, OrchestratorEvent};
use crate::handoff::validator;
use crate::invoke::{AgentInvoker, AgentReply, InvocationRequest};
use crate::store::artifact::ArtifactStore;
use crate::store::{EventRecord, WorkflowRecord, WorkflowStore};
use crate::workflow::config::CoordinatorConfig;
use crate::workflow::status::WorkflowStatus;
use crate::{AgentRole, CompletionStatus, Handoff, HandoffDraft, HandoffPayload, Message, Phase};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

// ── Outcomes ───────────────────────────────────────────────────────

/// What a successful `advance`/`run_stage` call did to the workflow.
#[derive(Debug, Clone, PartialEq)]
pub enum AdvanceOutcome {
    /// A handoff was accepted and the pipeline moved to the next stage.
    Advanced {
        handoff_id: String,
        next_stage: AgentRole,
    },
    /// The plan was accepted; the workflow now waits on the user.
    AwaitingApproval { handoff_id: String },
    /// The builder's output was accepted but incomplete without a blocker;
    /// the stage will be retried.
    RetryStage { stage: AgentRole, attempts_used: u32 },
    /// The payload was already accepted earlier — no new handoff recorded.
    Duplicate { handoff_id: String },
    /// The workflow moved to `blocked`.
    Blocked { reason: String },
    /// Terminal: the workflow completed.
    Completed { handoff_id: String },
    /// Terminal: the workflow failed.
    Failed { reason: String },
    /// The workflow was cancelled; the triggering result was discarded.
    Cancelled,
}

/// How to resolve a blocked workflow.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockerResolution {
    /// Return to `in_progress` and retry the stage that blocked.
    Retry,
    /// The blocker is unrecoverable; fail the workflow.
    Abandon { reason: String },
}

// ── Internal state ─────────────────────────────────────────────────

/// Digest + handoff id for an accepted phase payload (duplicate guard).
#[derive(Debug, Clone)]
struct AcceptedPhase {
    digest: String,
    handoff_id: String,
}

/// Mutable per-workflow state, reachable only through the workflow's lock.
struct WorkflowCell {
    record: WorkflowRecord,
    context: ContextState,
    history: Vec<Message>,
    /// Spent invocation/validation attempts per stage.
    attempts: HashMap<AgentRole, u32>,
    /// Accepted payload digests per phase.
    accepted: HashMap<Phase, AcceptedPhase>,
    /// Stage to resume at when a blocker is resolved.
    resume_stage: Option<AgentRole>,
    /// Rejection feedback for the next planner invocation.
    feedback: Option<String>,
}

/// Map entry: the cell plus a cancellation flag that can be raised without
/// taking the cell lock (so `cancel` never waits behind an in-flight agent
/// call).
#[derive(Clone)]
struct WorkflowEntry {
    cell: Arc<tokio::sync::Mutex<WorkflowCell>>,
    cancelled: Arc<AtomicBool>,
}

// ── Coordinator ────────────────────────────────────────────────────

/// The top-level driver. Owns workflow lifecycle; everything else —
/// persistence, artifact blobs, agent reasoning, event consumption — is
/// injected.
pub struct Coordinator {
    store: Arc<dyn WorkflowStore>,
    artifacts: Arc<ArtifactStore>,
    invoker: Arc<dyn AgentInvoker>,
    handler: Arc<dyn EventHandler>,
    config: CoordinatorConfig,
    entries: Mutex<HashMap<String, WorkflowEntry>>,
}

impl Coordinator {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        artifacts: Arc<ArtifactStore>,
        invoker: Arc<dyn AgentInvoker>,
    ) -> Self {
        Self {
            store,
            artifacts,
            invoker,
            handler: Arc::new(NoopHandler),
            config: CoordinatorConfig::default(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Override the configuration (builder pattern).
    pub fn with_config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Attach an event handler (builder pattern).
    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handler = handler;
        self
    }

    // ── Lifecycle operations ───────────────────────────────────────

    /// Create a workflow for a user request and enter the pipeline at the
    /// scout stage.
    pub fn start(&self, user_request: &str) -> OrchestratorResult<WorkflowRecord> {
        let user_request = user_request.trim();
        if user_request.is_empty() {
            return Err(OrchestratorError::InvalidRequest(
                "user_request must not be empty".into(),
            ));
        }

        let now = Utc::now();
        let mut record = WorkflowRecord {
            id: crate::workflow_id(),
            status: WorkflowStatus::Pending,
            current_agent: None,
            user_request: user_request.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.store.insert_workflow(record.clone())?;

        // Created `pending`, immediately handed to the first stage.
        transition(&mut record, WorkflowStatus::InProgress, "start")?;
        record.current_agent = Some(AgentRole::Scout);
        self.store.update_workflow(&record)?;

        let request_message = Message::user(user_request).critical();
        let mut context = ContextState::new(self.config.max_tokens);
        context.add_tokens(request_message.token_estimate);

        let cell = WorkflowCell {
            record: record.clone(),
            context,
            history: vec![request_message],
            attempts: HashMap::new(),
            accepted: HashMap::new(),
            resume_stage: None,
            feedback: None,
        };
        self.entries
            .lock()
            .map_err(|_| OrchestratorError::Store("coordinator registry lock poisoned".into()))?
            .insert(
                record.id.clone(),
                WorkflowEntry {
                    cell: Arc::new(tokio::sync::Mutex::new(cell)),
                    cancelled: Arc::new(AtomicBool::new(false)),
                },
            );

        info!("[{}] workflow started: {:?}", record.id, user_request);
        self.handler
            .on_event(&OrchestratorEvent::WorkflowStarted { workflow_id: &record.id });
        Ok(record)
    }

    /// Consume a completed agent's raw output: validate, record the
    /// handoff, advance the pipeline, and re-evaluate the context budget.
    ///
    /// Validation failures spend one of the stage's attempts and leave the
    /// workflow otherwise unchanged; once the budget is exhausted the
    /// workflow moves to `blocked`.
    pub async fn advance(
        &self,
        workflow_id: &str,
        reply: AgentReply,
    ) -> OrchestratorResult<AdvanceOutcome> {
        let entry = self.entry(workflow_id)?;
        let mut cell = entry.cell.lock().await;
        if entry.cancelled.load(Ordering::SeqCst) {
            return self.finalize_cancelled(&mut cell).map(|_| AdvanceOutcome::Cancelled);
        }
        self.advance_locked(&mut cell, reply)
    }

    /// Invoke the current stage's agent through the boundary, then advance
    /// with its output. Retries with backoff up to the stage's attempt
    /// budget; timeouts count as failed attempts.
    pub async fn run_stage(&self, workflow_id: &str) -> OrchestratorResult<AdvanceOutcome> {
        let entry = self.entry(workflow_id)?;
        let mut cell = entry.cell.lock().await;

        loop {
            if entry.cancelled.load(Ordering::SeqCst) {
                self.finalize_cancelled(&mut cell)?;
                return Ok(AdvanceOutcome::Cancelled);
            }

            let stage = self.require_stage(&cell, "run_stage")?;
            let policy = self
                .config
                .stage_policy(stage)
                .ok_or_else(|| self.invalid_state(&cell, "run_stage"))?
                .clone();

            let spent = *cell.attempts.get(&stage).unwrap_or(&0);
            if spent >= policy.max_attempts {
                let reason = format!("{stage} attempts exhausted ({spent})");
                self.block(&mut cell, stage, &reason)?;
                return Ok(AdvanceOutcome::Blocked { reason });
            }

            self.handler.on_event(&OrchestratorEvent::StageStarted {
                workflow_id: &cell.record.id,
                stage,
                attempt: spent + 1,
                max_attempts: policy.max_attempts,
            });

            let request = InvocationRequest {
                workflow_id: cell.record.id.clone(),
                stage,
                user_request: cell.record.user_request.clone(),
                context: cell.history.clone(),
                feedback: (stage == AgentRole::Planner)
                    .then(|| cell.feedback.clone())
                    .flatten(),
                target_output_tokens: policy.target_output_tokens,
                timeout: policy.timeout,
            };

            let invoked = tokio::time::timeout(policy.timeout, self.invoker.invoke(request)).await;

            // Cancellation checkpoint: a result that arrives for a
            // cancelled workflow is discarded, whole.
            if entry.cancelled.load(Ordering::SeqCst) {
                self.finalize_cancelled(&mut cell)?;
                return Ok(AdvanceOutcome::Cancelled);
            }

            let failure = match invoked {
                Err(_elapsed) => Some(OrchestratorError::AgentTimeout {
                    role: stage,
                    seconds: policy.timeout.as_secs(),
                    attempt: spent + 1,
                }),
                Ok(Err(invoke_error)) => Some(OrchestratorError::AgentFailure {
                    role: stage,
                    reason: invoke_error.to_string(),
                }),
                Ok(Ok(reply)) => {
                    match self.advance_locked(&mut cell, reply) {
                        Ok(outcome) => return Ok(outcome),
                        // A validation failure already spent an attempt
                        // inside advance_locked; retry unless it tipped the
                        // workflow into `blocked`.
                        Err(OrchestratorError::Validation(err)) => {
                            if cell.record.status == WorkflowStatus::Blocked {
                                return Ok(AdvanceOutcome::Blocked {
                                    reason: err.to_string(),
                                });
                            }
                            None
                        }
                        Err(other) => return Err(other),
                    }
                }
            };

            if let Some(error) = failure {
                warn!("[{}] {stage} attempt {} failed: {error}", cell.record.id, spent + 1);
                self.spend_attempt(&mut cell, stage);
                self.store.append_event(EventRecord::new(
                    &cell.record.id,
                    stage,
                    "agent_failure",
                    serde_json::json!({ "attempt": spent + 1, "error": error.to_string() }),
                ))?;

                if *cell.attempts.get(&stage).unwrap_or(&0) >= policy.max_attempts {
                    let reason = format!("{stage} failed after {} attempts: {error}", spent + 1);
                    self.block(&mut cell, stage, &reason)?;
                    return Ok(AdvanceOutcome::Blocked { reason });
                }
            }

            let backoff = self.config.retry.delay_for_attempt(*cell.attempts.get(&stage).unwrap_or(&0));
            debug!("[{}] retrying {stage} in {backoff:?}", cell.record.id);
            tokio::time::sleep(backoff).await;
        }
    }

    /// Drive the pipeline until it needs outside input: approval, blocker
    /// resolution, or a terminal state.
    pub async fn run(&self, workflow_id: &str) -> OrchestratorResult<AdvanceOutcome> {
        loop {
            let outcome = self.run_stage(workflow_id).await?;
            match outcome {
                AdvanceOutcome::Advanced { .. } | AdvanceOutcome::RetryStage { .. } => continue,
                other => return Ok(other),
            }
        }
    }

    /// Approve a plan: only valid from `awaiting_approval`; moves to the
    /// builder stage.
    pub async fn approve(&self, workflow_id: &str) -> OrchestratorResult<()> {
        let entry = self.entry(workflow_id)?;
        let mut cell = entry.cell.lock().await;
        if entry.cancelled.load(Ordering::SeqCst) {
            return self.finalize_cancelled(&mut cell);
        }

        if cell.record.status != WorkflowStatus::AwaitingApproval {
            return Err(self.invalid_state(&cell, "approve"));
        }
        transition(&mut cell.record, WorkflowStatus::InProgress, "approve")?;
        cell.record.current_agent = Some(AgentRole::Builder);
        cell.feedback = None;
        self.touch(&mut cell)?;

        self.store.append_event(EventRecord::new(
            &cell.record.id,
            AgentRole::Orchestrator,
            "approved",
            serde_json::Value::Null,
        ))?;
        info!("[{}] plan approved — handing off to builder", cell.record.id);
        Ok(())
    }

    /// Reject a plan with feedback: returns to the planner stage, carrying
    /// the feedback as context for the next planner invocation.
    pub async fn reject(&self, workflow_id: &str, feedback: &str) -> OrchestratorResult<()> {
        let entry = self.entry(workflow_id)?;
        let mut cell = entry.cell.lock().await;
        if entry.cancelled.load(Ordering::SeqCst) {
            return self.finalize_cancelled(&mut cell);
        }

        if cell.record.status != WorkflowStatus::AwaitingApproval {
            return Err(self.invalid_state(&cell, "reject"));
        }
        transition(&mut cell.record, WorkflowStatus::InProgress, "reject")?;
        cell.record.current_agent = Some(AgentRole::Planner);
        cell.feedback = Some(feedback.to_string());
        // A fresh plan is expected; the rejected one no longer guards
        // against resubmission.
        cell.accepted.remove(&Phase::Plan);

        let note = Message::user(format!("plan rejected: {feedback}")).critical();
        cell.context.add_tokens(note.token_estimate);
        cell.history.push(note);
        self.monitor_and_compact(&mut cell)?;
        self.touch(&mut cell)?;

        self.store.append_event(EventRecord::new(
            &cell.record.id,
            AgentRole::Orchestrator,
            "rejected",
            serde_json::json!({ "feedback": feedback }),
        ))?;
        info!("[{}] plan rejected — returning to planner", cell.record.id);
        Ok(())
    }

    /// Resolve a blocked workflow: retry the stage that blocked, or fail
    /// the workflow if the blocker is unrecoverable.
    pub async fn resolve_blocker(
        &self,
        workflow_id: &str,
        resolution: BlockerResolution,
    ) -> OrchestratorResult<()> {
        let entry = self.entry(workflow_id)?;
        let mut cell = entry.cell.lock().await;
        if entry.cancelled.load(Ordering::SeqCst) {
            return self.finalize_cancelled(&mut cell);
        }

        if cell.record.status != WorkflowStatus::Blocked {
            return Err(self.invalid_state(&cell, "resolve_blocker"));
        }

        match resolution {
            BlockerResolution::Retry => {
                let stage = cell.resume_stage.unwrap_or(AgentRole::Scout);
                transition(&mut cell.record, WorkflowStatus::InProgress, "resolve_blocker")?;
                cell.record.current_agent = Some(stage);
                cell.attempts.remove(&stage);
                self.touch(&mut cell)?;
                info!("[{}] blocker resolved — retrying {stage}", cell.record.id);
                Ok(())
            }
            BlockerResolution::Abandon { reason } => self.fail(&mut cell, &reason),
        }
    }

    /// Cancel a workflow. Safe to call while an agent invocation or
    /// compaction is in flight: the flag is raised without waiting on the
    /// workflow lock, and the in-flight operation discards its result at
    /// the next checkpoint.
    pub fn cancel(&self, workflow_id: &str) -> OrchestratorResult<()> {
        let entry = self.entry(workflow_id)?;
        entry.cancelled.store(true, Ordering::SeqCst);

        // If nothing is in flight, finalize immediately.
        if let Ok(mut cell) = entry.cell.try_lock() {
            self.finalize_cancelled(&mut cell)?;
        }
        Ok(())
    }

    /// Run a manual compaction immediately, regardless of usage tier.
    pub async fn compact_now(&self, workflow_id: &str) -> OrchestratorResult<CompactionEvent> {
        let entry = self.entry(workflow_id)?;
        let mut cell = entry.cell.lock().await;
        let outcome = self.compaction_engine().compact(
            &cell.record.id,
            &cell.history,
            CompactionMode::Manual,
        )?;
        let event = outcome.event.clone();
        self.commit_compaction(&mut cell, outcome, BudgetAction::Compact)?;
        self.touch(&mut cell)?;
        Ok(event)
    }

    // ── Read surface ───────────────────────────────────────────────

    /// The workflow's persisted row.
    pub fn workflow(&self, workflow_id: &str) -> Option<WorkflowRecord> {
        self.store.workflow(workflow_id)
    }

    /// All known workflows (read-only; no workflow lock taken).
    pub fn list_workflows(&self) -> Vec<WorkflowRecord> {
        self.store.list_workflows()
    }

    /// Current token accounting for a workflow.
    pub async fn context_state(&self, workflow_id: &str) -> OrchestratorResult<ContextState> {
        let entry = self.entry(workflow_id)?;
        let cell = entry.cell.lock().await;
        Ok(cell.context)
    }

    // ── Core transition operator ───────────────────────────────────

    fn advance_locked(
        &self,
        cell: &mut WorkflowCell,
        reply: AgentReply,
    ) -> OrchestratorResult<AdvanceOutcome> {
        if cell.record.status.is_terminal() {
            return Err(self.invalid_state(cell, "advance"));
        }

        // Duplicate-submission guard: an identical, already-accepted
        // payload is acknowledged with its original handoff id and appends
        // nothing.
        let digest = payload_digest(&reply.payload);
        if let Some(accepted) = cell.accepted.values().find(|a| a.digest == digest) {
            debug!(
                "[{}] duplicate payload ignored (handoff {})",
                cell.record.id, accepted.handoff_id
            );
            return Ok(AdvanceOutcome::Duplicate {
                handoff_id: accepted.handoff_id.clone(),
            });
        }

        let stage = self.require_stage(cell, "advance")?;
        let phase = stage.phase().ok_or_else(|| self.invalid_state(cell, "advance"))?;

        let draft = HandoffDraft {
            from: stage,
            to: stage.handoff_target(),
            workflow_id: cell.record.id.clone(),
            phase,
            summary: reply.summary.clone(),
            payload: reply.payload.clone(),
            confidence: reply.confidence,
            warnings: reply.warnings.clone(),
            timestamp: Some(Utc::now()),
        };

        let payload = match validator::validate(&draft) {
            Ok(payload) => payload,
            Err(validation) => {
                self.handler.on_event(&OrchestratorEvent::HandoffRejected {
                    workflow_id: &cell.record.id,
                    reason: &validation,
                });
                self.store.append_event(EventRecord::new(
                    &cell.record.id,
                    stage,
                    "handoff_rejected",
                    serde_json::json!({ "reason": validation.to_string() }),
                ))?;

                self.spend_attempt(cell, stage);
                let max_attempts = self
                    .config
                    .stage_policy(stage)
                    .map_or(u32::MAX, |p| p.max_attempts);
                if *cell.attempts.get(&stage).unwrap_or(&0) >= max_attempts {
                    let reason =
                        format!("{stage} output failed validation {max_attempts} times");
                    self.block(cell, stage, &reason)?;
                }
                return Err(validation.into());
            }
        };

        // Accepted: record the handoff and merge the output into context.
        let handoff = Handoff {
            id: crate::handoff_id(),
            workflow_id: cell.record.id.clone(),
            from_agent: draft.from,
            to_agent: draft.to,
            phase,
            summary: draft.summary.clone(),
            payload: payload.clone(),
            confidence: draft.confidence.unwrap_or(0.9),
            warnings: draft.warnings.clone(),
            timestamp: draft.timestamp.unwrap_or_else(Utc::now),
        };
        let handoff_id = handoff.id.clone();
        self.store.append_handoff(handoff)?;
        cell.accepted.insert(
            phase,
            AcceptedPhase {
                digest,
                handoff_id: handoff_id.clone(),
            },
        );

        let digest_message = Message::system(format!(
            "handoff {phase}: {} → {}: {}",
            draft.from, draft.to, draft.summary
        ))
        .critical();
        let payload_message = Message::agent(
            serde_json::to_string_pretty(&reply.payload).unwrap_or_default(),
        )
        .with_artifact_hint(payload.artifact_hint());
        cell.context.add_tokens(digest_message.token_estimate);
        cell.context.add_tokens(payload_message.token_estimate);
        cell.history.push(digest_message);
        cell.history.push(payload_message);

        self.handler.on_event(&OrchestratorEvent::HandoffAccepted {
            workflow_id: &cell.record.id,
            handoff_id: &handoff_id,
            phase,
        });
        info!(
            "[{}] handoff accepted: {handoff_id} ({phase}, confidence {:.2})",
            cell.record.id,
            draft.confidence.unwrap_or(0.9),
        );

        // Stage-specific pipeline transition.
        let outcome = match &payload {
            HandoffPayload::Scout(_) => {
                cell.attempts.remove(&stage);
                cell.record.current_agent = Some(AgentRole::Planner);
                AdvanceOutcome::Advanced {
                    handoff_id,
                    next_stage: AgentRole::Planner,
                }
            }
            HandoffPayload::Plan(_) => {
                // The approval gate is unconditional after planning.
                cell.attempts.remove(&stage);
                cell.feedback = None;
                transition(&mut cell.record, WorkflowStatus::AwaitingApproval, "advance")?;
                cell.record.current_agent = None;
                self.handler.on_event(&OrchestratorEvent::AwaitingApproval {
                    workflow_id: &cell.record.id,
                });
                self.store.append_event(EventRecord::new(
                    &cell.record.id,
                    AgentRole::Orchestrator,
                    "awaiting_approval",
                    serde_json::Value::Null,
                ))?;
                AdvanceOutcome::AwaitingApproval { handoff_id }
            }
            HandoffPayload::Build(report) => self.assess_build(cell, report, handoff_id)?,
            HandoffPayload::Context(_) => {
                // Context reports never arrive through the pipeline stages.
                return Err(self.invalid_state(cell, "advance"));
            }
        };

        // Budget re-evaluation happens on the same logical thread as the
        // triggering advance: the next invocation must see reduced context.
        if !cell.record.status.is_terminal() {
            self.monitor_and_compact(cell)?;
        }

        self.touch(cell)?;
        Ok(outcome)
    }

    /// Apply the builder completion rule: an explicit blocker blocks the
    /// workflow; incomplete work without a blocker retries until the stage
    /// budget is spent, then fails.
    fn assess_build(
        &self,
        cell: &mut WorkflowCell,
        report: &crate::BuildReport,
        handoff_id: String,
    ) -> OrchestratorResult<AdvanceOutcome> {
        let complete = report.completion_status == CompletionStatus::Success
            && report.tasks_completed == report.total_tasks;

        if complete {
            cell.attempts.remove(&AgentRole::Builder);
            transition(&mut cell.record, WorkflowStatus::Completed, "advance")?;
            cell.record.current_agent = None;
            self.handler.on_event(&OrchestratorEvent::WorkflowCompleted {
                workflow_id: &cell.record.id,
            });
            self.store.append_event(EventRecord::new(
                &cell.record.id,
                AgentRole::Orchestrator,
                "completed",
                serde_json::json!({
                    "tasks_completed": report.tasks_completed,
                    "total_tasks": report.total_tasks,
                }),
            ))?;
            info!("[{}] workflow completed", cell.record.id);
            return Ok(AdvanceOutcome::Completed { handoff_id });
        }

        if let Some(blocker) = &report.blocker {
            let reason = format!("{}: {}", blocker.kind, blocker.description);
            self.block(cell, AgentRole::Builder, &reason)?;
            return Ok(AdvanceOutcome::Blocked { reason });
        }

        // Incomplete without a blocker: spend an attempt and retry, or
        // fail once the budget is gone. `partial` alone never completes.
        self.spend_attempt(cell, AgentRole::Builder);
        let spent = *cell.attempts.get(&AgentRole::Builder).unwrap_or(&0);
        let budget = self.config.builder.max_attempts;
        if spent >= budget {
            let reason = format!(
                "builder finished {}/{} tasks with no blocker after {budget} attempts",
                report.tasks_completed, report.total_tasks,
            );
            self.fail(cell, &reason)?;
            return Ok(AdvanceOutcome::Failed { reason });
        }

        warn!(
            "[{}] builder incomplete ({}/{} tasks, no blocker) — retrying (attempt {spent}/{budget})",
            cell.record.id, report.tasks_completed, report.total_tasks,
        );
        Ok(AdvanceOutcome::RetryStage {
            stage: AgentRole::Builder,
            attempts_used: spent,
        })
    }

    // ── Budget / compaction ────────────────────────────────────────

    fn monitor_and_compact(&self, cell: &mut WorkflowCell) -> OrchestratorResult<()> {
        let action = monitor::classify(&cell.context, &self.config.thresholds);
        match action {
            BudgetAction::None => Ok(()),
            BudgetAction::Warn => {
                let usage_pct = cell.context.usage_pct();
                self.handler.on_event(&OrchestratorEvent::BudgetWarning {
                    workflow_id: &cell.record.id,
                    usage_pct,
                });
                self.store.append_event(EventRecord::new(
                    &cell.record.id,
                    AgentRole::ContextManager,
                    "warn",
                    serde_json::json!({
                        "current_tokens": cell.context.current_tokens,
                        "max_tokens": cell.context.max_tokens,
                        "usage_pct": usage_pct,
                    }),
                ))?;
                Ok(())
            }
            BudgetAction::Compact | BudgetAction::EmergencyCompact => {
                let mode = if action == BudgetAction::EmergencyCompact {
                    CompactionMode::Emergency
                } else {
                    CompactionMode::Auto
                };
                match self
                    .compaction_engine()
                    .compact(&cell.record.id, &cell.history, mode)
                {
                    Ok(outcome) => self.commit_compaction(cell, outcome, action),
                    Err(OrchestratorError::CompactionIntegrity(reason)) => {
                        // The workflow proceeds with its unreduced context.
                        warn!("[{}] compaction aborted: {reason}", cell.record.id);
                        self.handler.on_event(&OrchestratorEvent::CompactionAborted {
                            workflow_id: &cell.record.id,
                            reason: &reason,
                        });
                        self.store.append_event(EventRecord::new(
                            &cell.record.id,
                            AgentRole::ContextManager,
                            "compaction_aborted",
                            serde_json::json!({ "reason": reason }),
                        ))?;
                        Ok(())
                    }
                    Err(other) => Err(other),
                }
            }
        }
    }

    fn compaction_engine(&self) -> CompactionEngine<'_> {
        CompactionEngine::new(
            &self.artifacts,
            CompactionConfig {
                preserved_recent: self.config.preserved_recent,
                evictable_min_tokens: self.config.evictable_min_tokens,
                ..CompactionConfig::default()
            },
        )
    }

    fn commit_compaction(
        &self,
        cell: &mut WorkflowCell,
        outcome: crate::context::compaction::CompactionOutcome,
        action: BudgetAction,
    ) -> OrchestratorResult<()> {
        self.store.append_snapshot(outcome.snapshot)?;
        self.store.append_event(EventRecord::new(
            &cell.record.id,
            AgentRole::ContextManager,
            action.as_str(),
            serde_json::to_value(&outcome.event)
                .map_err(|e| OrchestratorError::Store(e.to_string()))?,
        ))?;
        cell.history = outcome.history;
        cell.context.set_tokens(outcome.event.compacted_tokens);
        self.handler.on_event(&OrchestratorEvent::CompactionCompleted {
            workflow_id: &cell.record.id,
            event: &outcome.event,
        });
        Ok(())
    }

    // ── Internal helpers ───────────────────────────────────────────

    fn entry(&self, workflow_id: &str) -> OrchestratorResult<WorkflowEntry> {
        self.entries
            .lock()
            .map_err(|_| OrchestratorError::Store("coordinator registry lock poisoned".into()))?
            .get(workflow_id)
            .cloned()
            .ok_or_else(|| OrchestratorError::UnknownWorkflow(workflow_id.to_string()))
    }

    fn require_stage(
        &self,
        cell: &WorkflowCell,
        operation: &'static str,
    ) -> OrchestratorResult<AgentRole> {
        if cell.record.status != WorkflowStatus::InProgress {
            return Err(self.invalid_state(cell, operation));
        }
        cell.record
            .current_agent
            .ok_or_else(|| self.invalid_state(cell, operation))
    }

    fn invalid_state(&self, cell: &WorkflowCell, operation: &'static str) -> OrchestratorError {
        OrchestratorError::InvalidState {
            id: cell.record.id.clone(),
            status: cell.record.status,
            operation,
        }
    }

    fn spend_attempt(&self, cell: &mut WorkflowCell, stage: AgentRole) {
        *cell.attempts.entry(stage).or_insert(0) += 1;
    }

    fn block(
        &self,
        cell: &mut WorkflowCell,
        stage: AgentRole,
        reason: &str,
    ) -> OrchestratorResult<()> {
        transition(&mut cell.record, WorkflowStatus::Blocked, "block")?;
        cell.resume_stage = Some(stage);
        cell.record.current_agent = None;
        self.handler.on_event(&OrchestratorEvent::WorkflowBlocked {
            workflow_id: &cell.record.id,
            reason,
        });
        self.store.append_event(EventRecord::new(
            &cell.record.id,
            AgentRole::Orchestrator,
            "blocked",
            serde_json::json!({ "stage": stage, "reason": reason }),
        ))?;
        warn!("[{}] blocked at {stage}: {reason}", cell.record.id);
        self.touch(cell)
    }

    fn fail(&self, cell: &mut WorkflowCell, reason: &str) -> OrchestratorResult<()> {
        transition(&mut cell.record, WorkflowStatus::Failed, "fail")?;
        cell.record.current_agent = None;
        self.handler.on_event(&OrchestratorEvent::WorkflowFailed {
            workflow_id: &cell.record.id,
            reason,
        });
        self.store.append_event(EventRecord::new(
            &cell.record.id,
            AgentRole::Orchestrator,
            "failed",
            serde_json::json!({ "reason": reason }),
        ))?;
        warn!("[{}] failed: {reason}", cell.record.id);
        self.touch(cell)
    }

    fn finalize_cancelled(&self, cell: &mut WorkflowCell) -> OrchestratorResult<()> {
        if cell.record.status.is_terminal() {
            return Ok(());
        }
        self.fail(cell, "cancelled by user")
    }

    fn touch(&self, cell: &mut WorkflowCell) -> OrchestratorResult<()> {
        cell.record.updated_at = Utc::now();
        self.store.update_workflow(&cell.record)
    }
}

/// Apply a status transition, enforcing the graph.
fn transition(
    record: &mut WorkflowRecord,
    next: WorkflowStatus,
    operation: &'static str,
) -> OrchestratorResult<()> {
    if !record.status.can_transition_to(next) {
        return Err(OrchestratorError::InvalidState {
            id: record.id.clone(),
            status: record.status,
            operation,
        });
    }
    record.status = next;
    Ok(())
}

/// SHA-256 digest of a payload's canonical JSON rendering.
fn payload_digest(payload: &serde_json::Value) -> String {
    let canonical = serde_json::to_string(payload).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}
