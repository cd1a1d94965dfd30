//! AI-in-the-loop reviewer — an ephemeral, single-turn LLM call that
//! judges whether a tool invocation should proceed, used for the `aitl`
//! strategy tier.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// AI reviewer calls are bounded to 60s; a timeout or malformed verdict
/// falls through to HITL rather than silently approving.
pub const AITL_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum AitlError {
    #[error("ai reviewer timed out")]
    Timeout,
    #[error("ai reviewer returned a malformed verdict: {0}")]
    Malformed(String),
    #[error("ai reviewer call failed: {0}")]
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AitlVerdict {
    pub approved: bool,
    pub reason: String,
}

/// Reviews a proposed tool call and renders a verdict. Implementations
/// wrap whatever model/provider a deployment configures; the runtime only
/// needs this one-shot request/response shape.
#[async_trait]
pub trait AiReviewer: Send + Sync {
    async fn review(&self, tool_name: &str, tool_args: &str) -> Result<AitlVerdict, AitlError>;
}

/// Runs `reviewer.review` under [`AITL_TIMEOUT`], converting a timeout or
/// a propagated error into the fall-through-to-HITL outcome (`Ok(None)`)
/// the interceptor expects, rather than surfacing it as a hard failure.
pub async fn review_with_fallback(
    reviewer: &dyn AiReviewer,
    tool_name: &str,
    tool_args: &str,
) -> Option<AitlVerdict> {
    match tokio::time::timeout(AITL_TIMEOUT, reviewer.review(tool_name, tool_args)).await {
        Ok(Ok(verdict)) => Some(verdict),
        Ok(Err(err)) => {
            tracing::warn!(error = %err, tool_name, "aitl review failed, falling through to hitl");
            None
        }
        Err(_) => {
            tracing::warn!(tool_name, "aitl review timed out, falling through to hitl");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysApprove;

    #[async_trait]
    impl AiReviewer for AlwaysApprove {
        async fn review(&self, _tool_name: &str, _tool_args: &str) -> Result<AitlVerdict, AitlError> {
            Ok(AitlVerdict { approved: true, reason: "looks safe".to_string() })
        }
    }

    struct NeverResponds;

    #[async_trait]
    impl AiReviewer for NeverResponds {
        async fn review(&self, _tool_name: &str, _tool_args: &str) -> Result<AitlVerdict, AitlError> {
            tokio::time::sleep(Duration::from_secs(600)).await;
            unreachable!()
        }
    }

    #[tokio::test]
    async fn approving_reviewer_returns_verdict() {
        let verdict = review_with_fallback(&AlwaysApprove, "send_email", "{}").await;
        assert_eq!(verdict, Some(AitlVerdict { approved: true, reason: "looks safe".to_string() }));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_falls_through_to_none() {
        let handle = tokio::spawn(async {
            review_with_fallback(&NeverResponds, "send_email", "{}").await
        });
        tokio::time::advance(AITL_TIMEOUT + Duration::from_secs(1)).await;
        let verdict = handle.await.unwrap();
        assert_eq!(verdict, None);
    }
}
