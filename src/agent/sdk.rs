//! The Agent SDK consumed collaborator.
//!
//! The runtime does not implement an LLM reasoning loop: the interceptor,
//! scheduler, and proactive loop all drive an externally-supplied agent
//! session through this trait. Implementations wrap whatever concrete SDK
//! (a hosted API, a local harness) a deployment wires in; the runtime only
//! needs the lifecycle and event stream described here.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One tool call the agent wants to make, surfaced to the pre-tool-use hook
/// before the interceptor decides whether it may run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub tool_name: String,
    pub call_id: String,
    pub tool_args: String,
    #[serde(default)]
    pub mcp_server: Option<String>,
}

/// Events an [`AgentSession`] emits while it runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    Started,
    ToolCall(ToolInvocation),
    ToolResult { call_id: String, result: String },
    Message { content: String },
    Complete { summary: String },
    Error { message: String },
}

/// Decision returned by the pre-tool-use hook: whether the call proceeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookDecision {
    Allow,
    Deny,
}

/// A single running conversation with the agent.
#[async_trait]
pub trait AgentSession: Send + Sync {
    fn session_id(&self) -> &str;

    /// Send a user message into the session and await its next response.
    async fn send(&self, content: &str) -> Result<String, String>;

    /// Subscribe to this session's event stream.
    fn events(&self) -> tokio::sync::broadcast::Receiver<SessionEvent>;

    /// Abort the session, cancelling any in-flight turn.
    async fn abort(&self);
}

/// Entry point for creating and driving agent sessions.
///
/// `create_session` takes the [`PreToolUseHook`] the new session must
/// invoke before executing any tool call, honoring [`HookDecision::Deny`]
/// by failing that call without running it — the caller (gateway,
/// scheduler) builds this hook around a [`ToolInterceptor`] scoped to its
/// own [`ExecutionContext`](crate::guardrails::ExecutionContext).
#[async_trait]
pub trait AgentSdk: Send + Sync {
    async fn start(&self) -> Result<(), String>;
    async fn stop(&self) -> Result<(), String>;

    async fn create_session(
        &self,
        session_id: &str,
        hook: Arc<dyn PreToolUseHook>,
    ) -> Result<Box<dyn AgentSession>, String>;
}

/// Callback invoked by the concrete SDK before a tool executes.
#[async_trait]
pub trait PreToolUseHook: Send + Sync {
    async fn on_tool_use(&self, invocation: &ToolInvocation) -> HookDecision;
}
