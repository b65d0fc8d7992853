//! Lifecycle events emitted by the [`Coordinator`](crate::workflow::machine::Coordinator).
//!
//! The coordinator communicates with embedders through [`OrchestratorEvent`]
//! variants covering the full workflow lifecycle — stage starts, accepted
//! and rejected handoffs, budget warnings, compactions, the approval gate,
//! and terminal transitions. Callers implement [`EventHandler`] to observe
//! them for logging, metrics, UI updates, or alerting.
//!
//! # Choosing an event handler
//!
//! | Handler | Use case |
//! |---------|----------|
//! | [`NoopHandler`] | Tests or fire-and-forget runs |
//! | [`LoggingHandler`] | Structured logging via `tracing` |
//! | [`FnEventHandler`] | Quick closures for simple callbacks |
//! | [`CompositeEventHandler`] | Compose multiple handlers in order |
//! | Custom `impl EventHandler` | Full control (metrics, alerting) |

use crate::context::compaction::CompactionEvent;
use crate::error::ValidationError;
use crate::{AgentRole, Phase};
use tracing::{debug, info, warn};

// ── Events ─────────────────────────────────────────────────────────

/// Events emitted during a workflow's life.
#[derive(Debug)]
pub enum OrchestratorEvent<'a> {
    /// A workflow was created and entered the pipeline.
    WorkflowStarted { workflow_id: &'a str },
    /// A stage invocation attempt is starting.
    StageStarted {
        workflow_id: &'a str,
        stage: AgentRole,
        attempt: u32,
        max_attempts: u32,
    },
    /// An agent output passed validation and was recorded.
    HandoffAccepted {
        workflow_id: &'a str,
        handoff_id: &'a str,
        phase: Phase,
    },
    /// An agent output failed validation (one attempt spent).
    HandoffRejected {
        workflow_id: &'a str,
        reason: &'a ValidationError,
    },
    /// Usage crossed the warning threshold (advisory, non-blocking).
    BudgetWarning {
        workflow_id: &'a str,
        usage_pct: f64,
    },
    /// A compaction run finished and its result was committed.
    CompactionCompleted {
        workflow_id: &'a str,
        event: &'a CompactionEvent,
    },
    /// A compaction run aborted; the workflow continues uncompacted.
    CompactionAborted {
        workflow_id: &'a str,
        reason: &'a str,
    },
    /// The plan is waiting on the user.
    AwaitingApproval { workflow_id: &'a str },
    /// The workflow hit a blocker or exhausted a stage's attempts.
    WorkflowBlocked {
        workflow_id: &'a str,
        reason: &'a str,
    },
    /// Terminal: completed successfully.
    WorkflowCompleted { workflow_id: &'a str },
    /// Terminal: failed or abandoned.
    WorkflowFailed {
        workflow_id: &'a str,
        reason: &'a str,
    },
}

// ── Handler trait ──────────────────────────────────────────────────

/// Observer for coordinator events. Handlers must be cheap and must not
/// block — they run inline on the workflow's critical path.
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &OrchestratorEvent<'_>);
}

/// Handler that ignores all events.
pub struct NoopHandler;

impl EventHandler for NoopHandler {
    fn on_event(&self, _event: &OrchestratorEvent<'_>) {}
}

/// Handler that logs every event through `tracing`.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &OrchestratorEvent<'_>) {
        match event {
            OrchestratorEvent::WorkflowStarted { workflow_id } => {
                info!("[{workflow_id}] workflow started");
            }
            OrchestratorEvent::StageStarted {
                workflow_id,
                stage,
                attempt,
                max_attempts,
            } => {
                info!("[{workflow_id}] invoking {stage} (attempt {attempt}/{max_attempts})");
            }
            OrchestratorEvent::HandoffAccepted {
                workflow_id,
                handoff_id,
                phase,
            } => {
                info!("[{workflow_id}] handoff accepted: {handoff_id} ({phase})");
            }
            OrchestratorEvent::HandoffRejected {
                workflow_id,
                reason,
            } => {
                warn!("[{workflow_id}] handoff rejected: {reason}");
            }
            OrchestratorEvent::BudgetWarning {
                workflow_id,
                usage_pct,
            } => {
                warn!("[{workflow_id}] context usage at {usage_pct:.1}% — approaching compaction threshold");
            }
            OrchestratorEvent::CompactionCompleted {
                workflow_id,
                event,
            } => {
                info!(
                    "[{workflow_id}] compacted {} → {} tokens ({:.1}% reduction)",
                    event.original_tokens,
                    event.compacted_tokens,
                    event.reduction_ratio * 100.0,
                );
            }
            OrchestratorEvent::CompactionAborted {
                workflow_id,
                reason,
            } => {
                warn!("[{workflow_id}] compaction aborted: {reason}");
            }
            OrchestratorEvent::AwaitingApproval { workflow_id } => {
                info!("[{workflow_id}] plan ready — awaiting user approval");
            }
            OrchestratorEvent::WorkflowBlocked {
                workflow_id,
                reason,
            } => {
                warn!("[{workflow_id}] blocked: {reason}");
            }
            OrchestratorEvent::WorkflowCompleted { workflow_id } => {
                info!("[{workflow_id}] completed");
            }
            OrchestratorEvent::WorkflowFailed {
                workflow_id,
                reason,
            } => {
                warn!("[{workflow_id}] failed: {reason}");
            }
        }
        debug!("event: {event:?}");
    }
}

/// Handler backed by a closure.
pub struct FnEventHandler<F>
where
    F: Fn(&OrchestratorEvent<'_>) + Send + Sync,
{
    f: F,
}

impl<F> FnEventHandler<F>
where
    F: Fn(&OrchestratorEvent<'_>) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> EventHandler for FnEventHandler<F>
where
    F: Fn(&OrchestratorEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &OrchestratorEvent<'_>) {
        (self.f)(event)
    }
}

/// Dispatches each event to multiple handlers in registration order.
#[derive(Default)]
pub struct CompositeEventHandler {
    handlers: Vec<Box<dyn EventHandler>>,
}

impl CompositeEventHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler to the chain. Handlers are called in registration order.
    pub fn with(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }
}

impl EventHandler for CompositeEventHandler {
    fn on_event(&self, event: &OrchestratorEvent<'_>) {
        for handler in &self.handlers {
            handler.on_event(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn fn_handler_invokes_closure() {
        let count = AtomicUsize::new(0);
        let handler = FnEventHandler::new(|_| {
            count.fetch_add(1, Ordering::SeqCst);
        });

        handler.on_event(&OrchestratorEvent::WorkflowStarted { workflow_id: "wf_a" });
        handler.on_event(&OrchestratorEvent::WorkflowCompleted { workflow_id: "wf_a" });
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn composite_dispatches_in_order() {
        use std::sync::Arc;

        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let a = {
            let first = Arc::clone(&first);
            FnEventHandler::new(move |_| {
                first.fetch_add(1, Ordering::SeqCst);
            })
        };
        let b = {
            let second = Arc::clone(&second);
            FnEventHandler::new(move |_| {
                second.fetch_add(1, Ordering::SeqCst);
            })
        };

        let composite = CompositeEventHandler::new().with(a).with(b);
        composite.on_event(&OrchestratorEvent::WorkflowStarted { workflow_id: "wf_a" });

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn noop_handler_accepts_everything() {
        NoopHandler.on_event(&OrchestratorEvent::BudgetWarning {
            workflow_id: "wf_a",
            usage_pct: 75.0,
        });
    }
}
