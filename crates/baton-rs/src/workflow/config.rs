//! Configuration for the [`Coordinator`](super::machine::Coordinator).
//!
//! Everything the state machine consults at a decision point lives here:
//! the context ceiling, the budget-tier thresholds, per-stage deadlines and
//! attempt budgets, and the compaction preservation counts. Nothing is
//! hardcoded into the machine logic — tune per deployment.
//!
//! # Examples
//!
//! Minimal configuration — everything uses defaults:
//!
//! ```ignore
//! let config = CoordinatorConfig::default();
//! ```
//!
//! Customized configuration with builder methods:
//!
//! ```ignore
//! let config = CoordinatorConfig::default()
//!     .with_max_tokens(128_000)
//!     .with_thresholds(65.0, 75.0, 90.0)
//!     .with_preserved_recent(30)
//!     .with_stage_attempts(2);
//! ```

use crate::AgentRole;
use crate::context::monitor::BudgetThresholds;
use crate::invoke::RetryConfig;
use std::time::Duration;

/// Per-stage invocation policy: how long to wait, how often to retry, and
/// how large an output to ask for.
#[derive(Debug, Clone)]
pub struct StagePolicy {
    /// Deadline for a single invocation attempt.
    pub timeout: Duration,
    /// Attempt budget for this stage. Exhausting it blocks the workflow.
    pub max_attempts: u32,
    /// Target output size hint passed to the agent, in tokens.
    pub target_output_tokens: u64,
}

impl StagePolicy {
    pub fn new(timeout: Duration, max_attempts: u32, target_output_tokens: u64) -> Self {
        Self {
            timeout,
            max_attempts,
            target_output_tokens,
        }
    }
}

/// Configuration for a [`Coordinator`](super::machine::Coordinator).
///
/// Stage deadlines scale with how much reasoning each stage does: the scout
/// skims, the planner thinks, the builder executes task by task.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Context ceiling per workflow, in tokens.
    pub max_tokens: u64,
    /// Budget tier thresholds (warn / compact / emergency), in percent.
    pub thresholds: BudgetThresholds,
    /// Most recent messages preserved verbatim through compaction.
    pub preserved_recent: usize,
    /// Minimum token estimate for a payload message to be evicted to the
    /// artifact store ahead of ordinary turns.
    pub evictable_min_tokens: u64,
    /// Backoff schedule between invocation attempts.
    pub retry: RetryConfig,
    /// Scout stage policy (short deadline — exploration is cheap).
    pub scout: StagePolicy,
    /// Planner stage policy (long deadline — deeper reasoning).
    pub planner: StagePolicy,
    /// Builder stage policy (longest deadline — per-task execution).
    pub builder: StagePolicy,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_tokens: crate::DEFAULT_MAX_TOKENS,
            thresholds: BudgetThresholds::default(),
            preserved_recent: 20,
            evictable_min_tokens: 1_000,
            retry: RetryConfig::default(),
            scout: StagePolicy::new(Duration::from_secs(180), 3, 2_000),
            planner: StagePolicy::new(Duration::from_secs(300), 3, 3_000),
            builder: StagePolicy::new(Duration::from_secs(600), 3, 8_000),
        }
    }
}

impl CoordinatorConfig {
    /// Override the context ceiling (in tokens).
    pub fn with_max_tokens(mut self, max: u64) -> Self {
        self.max_tokens = max;
        self
    }

    /// Override the budget tier thresholds, in percent.
    pub fn with_thresholds(mut self, warn: f64, compact: f64, emergency: f64) -> Self {
        self.thresholds = BudgetThresholds {
            warn_pct: warn,
            compact_pct: compact,
            emergency_pct: emergency,
        };
        self
    }

    /// Override the preserved-message count for compaction.
    pub fn with_preserved_recent(mut self, n: usize) -> Self {
        self.preserved_recent = n;
        self
    }

    /// Override the eviction size threshold (in tokens).
    pub fn with_evictable_min_tokens(mut self, tokens: u64) -> Self {
        self.evictable_min_tokens = tokens;
        self
    }

    /// Set the same attempt budget for all three stages.
    pub fn with_stage_attempts(mut self, attempts: u32) -> Self {
        self.scout.max_attempts = attempts;
        self.planner.max_attempts = attempts;
        self.builder.max_attempts = attempts;
        self
    }

    /// Override one stage's invocation deadline.
    pub fn with_stage_timeout(mut self, stage: AgentRole, timeout: Duration) -> Self {
        if let Some(policy) = self.stage_policy_mut(stage) {
            policy.timeout = timeout;
        }
        self
    }

    /// The invocation policy for a pipeline stage. Non-stage roles
    /// (orchestrator, context manager) have no policy.
    pub fn stage_policy(&self, stage: AgentRole) -> Option<&StagePolicy> {
        match stage {
            AgentRole::Scout => Some(&self.scout),
            AgentRole::Planner => Some(&self.planner),
            AgentRole::Builder => Some(&self.builder),
            _ => None,
        }
    }

    fn stage_policy_mut(&mut self, stage: AgentRole) -> Option<&mut StagePolicy> {
        match stage {
            AgentRole::Scout => Some(&mut self.scout),
            AgentRole::Planner => Some(&mut self.planner),
            AgentRole::Builder => Some(&mut self.builder),
            _ => None,
        }
    }
}
