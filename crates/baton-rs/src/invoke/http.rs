//! HTTP implementation of the agent invocation boundary.
//!
//! Posts the invocation request as JSON to a remote agent service and
//! expects an [`AgentReply`] JSON body back. Transport-level failures,
//! non-2xx statuses, and unparseable bodies map onto the [`InvokeError`]
//! taxonomy; the coordinator treats all of them as a spent attempt.

use super::{AgentInvoker, AgentReply, InvocationRequest, InvokeError, InvokeFuture};
use std::time::{Duration, Instant};
use tracing::debug;

/// Remote agent service client.
pub struct HttpInvoker {
    client: reqwest::Client,
    endpoint: String,
    auth_token: Option<String>,
}

impl HttpInvoker {
    /// Create a client for the given endpoint. The HTTP-level timeout is a
    /// transport backstop; per-stage deadlines are enforced by the
    /// coordinator on top of it.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, InvokeError> {
        let client = reqwest::Client::builder()
            .user_agent("baton-invoker/0.1")
            .timeout(Duration::from_secs(660))
            .build()
            .map_err(|e| InvokeError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            auth_token: None,
        })
    }

    /// Attach a bearer token (builder pattern).
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    async fn post(&self, request: InvocationRequest) -> Result<AgentReply, InvokeError> {
        let stage = request.stage;
        debug!(
            "agent request: stage={}, workflow={}, context={} message(s), target={} tokens",
            stage,
            request.workflow_id,
            request.context.len(),
            request.target_output_tokens,
        );

        let start = Instant::now();

        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(ref token) = self.auth_token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }

        let resp = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                InvokeError::Timeout
            } else {
                InvokeError::Transport(format!("request failed: {e}"))
            }
        })?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| InvokeError::Transport(format!("failed to read response: {e}")))?;

        debug!(
            "agent response: stage={}, HTTP {} in {:.1}s ({} bytes)",
            stage,
            status,
            start.elapsed().as_secs_f64(),
            text.len(),
        );

        if !status.is_success() {
            return Err(InvokeError::Agent(format!("HTTP {status}: {text}")));
        }

        serde_json::from_str(&text)
            .map_err(|e| InvokeError::Malformed(format!("failed to parse agent reply: {e}")))
    }
}

impl AgentInvoker for HttpInvoker {
    fn invoke(&self, request: InvocationRequest) -> InvokeFuture<'_> {
        Box::pin(self.post(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructs_with_auth_token() {
        let invoker = HttpInvoker::new("http://localhost:9999/agents")
            .unwrap()
            .with_auth_token("secret");
        assert_eq!(invoker.endpoint, "http://localhost:9999/agents");
        assert_eq!(invoker.auth_token.as_deref(), Some("secret"));
    }

    #[tokio::test]
    async fn unreachable_endpoint_maps_to_transport_error() {
        let invoker = HttpInvoker::new("http://127.0.0.1:1/agents").unwrap();
        let request = InvocationRequest {
            workflow_id: "wf_test".into(),
            stage: crate::AgentRole::Scout,
            user_request: "explore".into(),
            context: vec![],
            feedback: None,
            target_output_tokens: 2_000,
            timeout: Duration::from_secs(1),
        };

        let result = invoker.invoke(request).await;
        assert!(matches!(
            result,
            Err(InvokeError::Transport(_)) | Err(InvokeError::Timeout)
        ));
    }
}
