//! Deterministic scripted invoker for tests.
//!
//! Queue up replies (or failures) in the order the coordinator will request
//! them; each invocation pops the front of the queue. Requests are recorded
//! so tests can assert on what each stage actually received.

use super::{AgentInvoker, AgentReply, InvocationRequest, InvokeError, InvokeFuture};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Scripted [`AgentInvoker`]: replays canned outputs, records requests.
#[derive(Default)]
pub struct ScriptedInvoker {
    script: Mutex<VecDeque<Result<AgentReply, InvokeError>>>,
    seen: Mutex<Vec<InvocationRequest>>,
}

impl ScriptedInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful reply (builder pattern).
    pub fn with_reply(self, reply: AgentReply) -> Self {
        self.push_reply(reply);
        self
    }

    /// Queue a failure (builder pattern).
    pub fn with_failure(self, error: InvokeError) -> Self {
        self.push_failure(error);
        self
    }

    /// Queue a successful reply.
    pub fn push_reply(&self, reply: AgentReply) {
        self.script.lock().unwrap().push_back(Ok(reply));
    }

    /// Queue a failure.
    pub fn push_failure(&self, error: InvokeError) {
        self.script.lock().unwrap().push_back(Err(error));
    }

    /// Requests received so far, in order.
    pub fn requests(&self) -> Vec<InvocationRequest> {
        self.seen.lock().unwrap().clone()
    }

    /// Number of scripted entries not yet consumed.
    pub fn remaining(&self) -> usize {
        self.script.lock().unwrap().len()
    }
}

impl AgentInvoker for ScriptedInvoker {
    fn invoke(&self, request: InvocationRequest) -> InvokeFuture<'_> {
        self.seen.lock().unwrap().push(request);
        let next = self.script.lock().unwrap().pop_front();
        Box::pin(async move {
            next.unwrap_or_else(|| {
                Err(InvokeError::Agent("scripted invoker exhausted".into()))
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AgentRole;
    use std::time::Duration;

    fn request(stage: AgentRole) -> InvocationRequest {
        InvocationRequest {
            workflow_id: "wf_test".into(),
            stage,
            user_request: "do the thing".into(),
            context: vec![],
            feedback: None,
            target_output_tokens: 2_000,
            timeout: Duration::from_secs(180),
        }
    }

    #[tokio::test]
    async fn replays_in_order() {
        let invoker = ScriptedInvoker::new()
            .with_reply(AgentReply {
                summary: "first".into(),
                payload: serde_json::json!({}),
                confidence: None,
                warnings: vec![],
            })
            .with_failure(InvokeError::Timeout);

        let first = invoker.invoke(request(AgentRole::Scout)).await.unwrap();
        assert_eq!(first.summary, "first");

        let second = invoker.invoke(request(AgentRole::Scout)).await;
        assert_eq!(second, Err(InvokeError::Timeout));

        assert_eq!(invoker.remaining(), 0);
        assert_eq!(invoker.requests().len(), 2);
    }

    #[tokio::test]
    async fn exhausted_script_reports_agent_error() {
        let invoker = ScriptedInvoker::new();
        let result = invoker.invoke(request(AgentRole::Builder)).await;
        assert!(matches!(result, Err(InvokeError::Agent(_))));
    }
}
