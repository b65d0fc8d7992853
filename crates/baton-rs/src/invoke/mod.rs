//! Agent invocation boundary: the only place the orchestrator talks to
//! actual agent reasoning.
//!
//! Agents are opaque, possibly slow, possibly failing remote calls. The
//! [`AgentInvoker`] trait models their input/output contract and nothing
//! else; the coordinator wraps every call in a stage deadline and counts
//! timeouts and failures identically against the stage's retry budget.
//!
//! Two implementations ship with the crate:
//!
//! | Implementation | Use case |
//! |----------------|----------|
//! | [`ScriptedInvoker`](scripted::ScriptedInvoker) | Deterministic canned replies for the test suite |
//! | [`HttpInvoker`](http::HttpInvoker) | JSON POST to a remote agent service |

pub mod http;
pub mod scripted;

use crate::{AgentRole, Message};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

pub use http::HttpInvoker;
pub use scripted::ScriptedInvoker;

// ── Request / reply ────────────────────────────────────────────────

/// What the coordinator hands an agent: the workflow's (already compacted)
/// context slice plus stage-specific parameters.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct InvocationRequest {
    pub workflow_id: String,
    pub stage: AgentRole,
    pub user_request: String,
    /// Conversational context visible to the agent.
    pub context: Vec<Message>,
    /// Rejection feedback from the approval gate, when re-planning.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    /// Target output size hint, in tokens.
    pub target_output_tokens: u64,
    /// Deadline the agent should respect (also enforced by the caller).
    pub timeout: Duration,
}

/// A raw agent output, pre-validation. The payload is untyped JSON until
/// the handoff validator accepts it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AgentReply {
    pub summary: String,
    pub payload: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// Failure modes the boundary may raise. The coordinator maps all of them
/// into the stage retry budget — none is fatal to the workflow on its own.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum InvokeError {
    #[error("invocation timed out")]
    Timeout,
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("agent reported an internal error: {0}")]
    Agent(String),
    #[error("malformed agent output: {0}")]
    Malformed(String),
}

/// Boxed future returned by [`AgentInvoker::invoke`].
pub type InvokeFuture<'a> = Pin<Box<dyn Future<Output = Result<AgentReply, InvokeError>> + Send + 'a>>;

/// The abstract agent capability. Implementations must be cancel-safe:
/// the coordinator may drop the future on timeout or workflow cancellation
/// and the result, if any, is discarded.
pub trait AgentInvoker: Send + Sync {
    fn invoke(&self, request: InvocationRequest) -> InvokeFuture<'_>;
}

// ── Retry / backoff ────────────────────────────────────────────────

/// Backoff schedule between invocation attempts for one stage.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Ceiling on any single delay.
    pub max_delay: Duration,
    /// Backoff multiplier (2.0 = exponential doubling).
    pub multiplier: f64,
    /// Whether to shave delays to avoid thundering herd.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Delay before retrying after the given failed attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());

        if self.jitter {
            // Deterministic jitter keyed off the attempt number — enough to
            // decorrelate workflows without pulling in rand.
            let jitter_factor = match attempt % 4 {
                0 => 0.75,
                1 => 0.90,
                2 => 0.60,
                _ => 0.85,
            };
            Duration::from_secs_f64(capped * jitter_factor)
        } else {
            Duration::from_secs_f64(capped)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_increases_exponentially() {
        let config = RetryConfig {
            jitter: false,
            ..RetryConfig::default()
        };
        let d0 = config.delay_for_attempt(0);
        let d1 = config.delay_for_attempt(1);
        let d2 = config.delay_for_attempt(2);
        assert!(d1 > d0);
        assert!(d2 > d1);
    }

    #[test]
    fn delay_capped_at_max() {
        let config = RetryConfig {
            jitter: false,
            max_delay: Duration::from_secs(2),
            ..RetryConfig::default()
        };
        assert!(config.delay_for_attempt(10) <= Duration::from_secs(2));
    }

    #[test]
    fn jitter_never_lengthens_delay() {
        let jittered = RetryConfig::default();
        let plain = RetryConfig {
            jitter: false,
            ..RetryConfig::default()
        };
        for attempt in 0..6 {
            assert!(jittered.delay_for_attempt(attempt) <= plain.delay_for_attempt(attempt));
        }
    }

    #[test]
    fn reply_serde_defaults_warnings() {
        let json = r#"{"summary": "done", "payload": {"k": 1}}"#;
        let reply: AgentReply = serde_json::from_str(json).unwrap();
        assert!(reply.warnings.is_empty());
        assert!(reply.confidence.is_none());
    }
}
