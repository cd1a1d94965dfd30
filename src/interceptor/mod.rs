//! Tool Interceptor — the gating pipeline every tool call passes through.
//!
//! Grounded on `hitl.py::HitlInterceptor`. Order of operations for a call
//! that is not in the always-approved set:
//!
//! 1. Record the call as `started` in the Tool Activity Store.
//! 2. Resolve the [`Strategy`] for `(tool_name, channel, execution_context)`.
//! 3. `deny` short-circuits: record `denied`, emit `ToolDenied`, return.
//! 4. `allow` short-circuits: let the call proceed.
//! 5. Otherwise run the prompt shield against the call arguments. An
//!    attack verdict denies the call outright regardless of strategy.
//! 6. Dispatch on strategy: `aitl` consults the AI reviewer (falling
//!    through to `hitl` on timeout/malformed verdict), `pitl` places a
//!    phone call (falling through to `hitl` if no phone verifier is
//!    configured), `filter` runs but is flagged for audit without gating,
//!    `hitl` solicits a human approval on the best available channel
//!    (phone > bot > web, else deny).
//! 7. Record the resolution.

use std::sync::Arc;

use async_trait::async_trait;

use crate::activity::ToolActivityStore;
use crate::agent::sdk::{HookDecision, PreToolUseHook, ToolInvocation};
use crate::aitl::{review_with_fallback, AiReviewer};
use crate::approval::{ApprovalBroker, APPROVAL_TIMEOUT};
use crate::channels::ChannelManager;
use crate::event_bus::{AppEvent, EventBus};
use crate::guardrails::{Channel, ExecutionContext, GuardrailsEngine, Strategy};
use crate::pitl::PhoneVerifier;
use crate::shield::ShieldClient;

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Allowed,
    Denied { reason: String },
}

#[derive(Clone)]
pub struct InterceptorDeps {
    pub guardrails: Arc<GuardrailsEngine>,
    pub activity: Arc<ToolActivityStore>,
    pub approvals: Arc<ApprovalBroker>,
    pub events: Arc<dyn EventBus>,
    pub channels: Arc<ChannelManager>,
    pub shield: Option<Arc<ShieldClient>>,
    pub ai_reviewer: Option<Arc<dyn AiReviewer>>,
    pub phone_verifier: Option<Arc<PhoneVerifier>>,
}

/// Drives one call through the gating pipeline. One instance is shared by
/// the interactive session; the scheduler constructs a fresh instance per
/// scheduled run that borrows the same `Arc<dyn …>` auxiliaries (AI
/// reviewer, shield client, phone verifier) rather than owning them — see
/// `scheduler::tokio_scheduler`'s background-hook composition.
pub struct ToolInterceptor {
    deps: InterceptorDeps,
    execution_context: ExecutionContext,
}

impl ToolInterceptor {
    pub fn new(deps: InterceptorDeps, execution_context: ExecutionContext) -> Self {
        Self { deps, execution_context }
    }

    /// Gate a single tool call. `session_id` scopes the audit entry and bot
    /// channel resolution; `mcp_server`/`model` are match dimensions for the
    /// guardrails rule engine (and are recorded for audit purposes).
    pub async fn intercept(
        &self,
        session_id: &str,
        tool_name: &str,
        call_id: &str,
        arguments: &str,
        mcp_server: Option<&str>,
        model: &str,
    ) -> Verdict {
        if self.deps.guardrails.is_always_approved(tool_name) {
            let _ = self.deps.activity.record_start(
                session_id, tool_name, call_id, arguments, None, model, "",
            );
            let _ = self.deps.activity.record_complete(call_id, "", "completed");
            return Verdict::Allowed;
        }

        let entry_result = self.deps.activity.record_start(
            session_id, tool_name, call_id, arguments, None, model, "",
        );
        if let Err(err) = &entry_result {
            tracing::error!(error = %err, tool_name, "failed to record tool activity start");
        }

        let resolution = self.deps.guardrails.resolve(
            tool_name,
            mcp_server,
            self.execution_context,
            Some(model).filter(|m| !m.is_empty()),
        );
        let strategy = resolution.strategy;
        let channel = resolution.channel;

        if strategy == Strategy::Deny {
            return self.deny(call_id, tool_name, "denied by guardrails rule").await;
        }
        if strategy == Strategy::Allow {
            let _ = self.deps.activity.record_complete(call_id, "", "completed");
            return Verdict::Allowed;
        }

        if let Some(shield) = &self.deps.shield {
            let result = shield.check(arguments).await;
            self.deps.activity.update_shield_result(
                call_id,
                if result.attack_detected { "attack" } else { "clean" },
                &result.detail,
                Some(result.elapsed_ms),
            );
            if result.attack_detected {
                return self
                    .deny(call_id, tool_name, "prompt shield flagged this content")
                    .await;
            }
        }

        match strategy {
            Strategy::Aitl => self.dispatch_aitl(session_id, call_id, tool_name, arguments, channel).await,
            Strategy::Pitl => self.dispatch_pitl(session_id, call_id, tool_name, arguments, channel).await,
            Strategy::Filter => {
                // Filtered calls proceed but remain flagged in the audit trail.
                if let Ok(entry) = &entry_result {
                    let _ = self.deps.activity.flag_entry(&entry.id, "filter strategy: audited, not gated");
                }
                let _ = self.deps.activity.record_complete(call_id, "", "completed");
                Verdict::Allowed
            }
            Strategy::Hitl => self.dispatch_hitl(session_id, call_id, tool_name, arguments, channel).await,
            Strategy::Allow | Strategy::Deny => unreachable!("handled above"),
        }
    }

    /// §4.2 step 7: resolve `preferred` to an actually-usable channel by
    /// availability, falling back in priority order `phone > bot > web`,
    /// `None` if nothing is available (the caller must deny rather than
    /// silently hang).
    async fn resolve_channel(&self, preferred: Channel) -> Option<Channel> {
        let phone_available = self.deps.phone_verifier.is_some();
        let bot_available = self.deps.channels.channel_names().await.iter().any(|n| n == "bot");
        // No user is watching a scheduled run's web UI; interactive/bot
        // contexts are assumed to have a live event-bus subscriber.
        let web_available = !matches!(self.execution_context, ExecutionContext::Scheduler);

        let available = |c: Channel| match c {
            Channel::Phone => phone_available,
            Channel::Bot => bot_available,
            Channel::Web => web_available,
        };

        if available(preferred) {
            return Some(preferred);
        }
        [Channel::Phone, Channel::Bot, Channel::Web].into_iter().find(|c| available(*c))
    }

    async fn dispatch_aitl(
        &self,
        session_id: &str,
        call_id: &str,
        tool_name: &str,
        arguments: &str,
        channel: Channel,
    ) -> Verdict {
        let Some(reviewer) = &self.deps.ai_reviewer else {
            return self.dispatch_hitl(session_id, call_id, tool_name, arguments, channel).await;
        };
        let _ = self.deps.events.publish(AppEvent::AitlReviewStarted {
            call_id: call_id.to_string(),
            tool: tool_name.to_string(),
        });
        match review_with_fallback(reviewer.as_ref(), tool_name, arguments).await {
            Some(verdict) => {
                let _ = self.deps.events.publish(AppEvent::AitlReviewComplete {
                    call_id: call_id.to_string(),
                    tool: tool_name.to_string(),
                    approved: verdict.approved,
                    reason: verdict.reason.clone(),
                });
                if verdict.approved {
                    let _ = self.deps.activity.record_complete(call_id, "", "completed");
                    Verdict::Allowed
                } else {
                    self.deny(call_id, tool_name, &verdict.reason).await
                }
            }
            None => self.dispatch_hitl(session_id, call_id, tool_name, arguments, channel).await,
        }
    }

    async fn dispatch_pitl(
        &self,
        session_id: &str,
        call_id: &str,
        tool_name: &str,
        arguments: &str,
        channel: Channel,
    ) -> Verdict {
        let Some(verifier) = &self.deps.phone_verifier else {
            return self.dispatch_hitl(session_id, call_id, tool_name, arguments, channel).await;
        };
        self.solicit_phone(verifier, call_id, tool_name, arguments).await
    }

    /// Place a verification call and wait for accept/decline — the
    /// mechanism both `pitl` and a `hitl` resolved to the phone channel
    /// use.
    async fn solicit_phone(
        &self,
        verifier: &PhoneVerifier,
        call_id: &str,
        tool_name: &str,
        arguments: &str,
    ) -> Verdict {
        let _ = self.deps.events.publish(AppEvent::PhoneVerificationStarted {
            call_id: call_id.to_string(),
            tool: tool_name.to_string(),
            arguments: arguments.to_string(),
        });
        match verifier.verify(tool_name, arguments).await {
            Ok(approved) => {
                let _ = self.deps.events.publish(AppEvent::PhoneVerificationComplete {
                    call_id: call_id.to_string(),
                    tool: tool_name.to_string(),
                    approved,
                });
                if approved {
                    let _ = self.deps.activity.record_complete(call_id, "", "completed");
                    Verdict::Allowed
                } else {
                    self.deny(call_id, tool_name, "declined over phone").await
                }
            }
            Err(err) => self.deny(call_id, tool_name, &format!("phone verification failed: {err}")).await,
        }
    }

    async fn dispatch_hitl(
        &self,
        session_id: &str,
        call_id: &str,
        tool_name: &str,
        arguments: &str,
        channel: Channel,
    ) -> Verdict {
        let Some(channel) = self.resolve_channel(channel).await else {
            return self.deny(call_id, tool_name, "no approval channel available").await;
        };

        if channel == Channel::Phone {
            if let Some(verifier) = &self.deps.phone_verifier {
                return self.solicit_phone(verifier, call_id, tool_name, arguments).await;
            }
        }

        let rx = self.deps.approvals.register(call_id, tool_name);
        let _ = self.deps.events.publish(AppEvent::ApprovalRequest {
            call_id: call_id.to_string(),
            tool: tool_name.to_string(),
            arguments: arguments.to_string(),
        });

        if channel == Channel::Bot {
            let message = format!(
                "The agent wants to use the tool **{tool_name}**.\n\nArguments: `{}`\n\nReply **y** to approve or anything else to deny.",
                truncate(arguments, 500),
            );
            let _ = self.deps.channels.send("bot", &message, Some(session_id)).await;
        }

        let approved = match tokio::time::timeout(APPROVAL_TIMEOUT, rx).await {
            Ok(Ok(outcome)) => outcome.approved,
            Ok(Err(_)) | Err(_) => false,
        };

        let _ = self.deps.events.publish(AppEvent::ApprovalResolved {
            call_id: call_id.to_string(),
            tool: tool_name.to_string(),
            approved,
        });

        if channel == Channel::Bot {
            let outcome_msg = format!(
                "Tool **{tool_name}** {}.",
                if approved { "approved" } else { "denied" }
            );
            let _ = self.deps.channels.send("bot", &outcome_msg, Some(session_id)).await;
        }

        if approved {
            let _ = self.deps.activity.record_complete(call_id, "", "completed");
            Verdict::Allowed
        } else {
            self.deny(call_id, tool_name, "denied by human reviewer").await
        }
    }

    async fn deny(&self, call_id: &str, tool_name: &str, reason: &str) -> Verdict {
        let _ = self.deps.activity.record_complete(call_id, reason, "denied");
        let _ = self.deps.events.publish(AppEvent::ToolDenied {
            call_id: call_id.to_string(),
            tool: tool_name.to_string(),
            reason: reason.to_string(),
        });
        Verdict::Denied { reason: reason.to_string() }
    }
}

/// Adapts a [`ToolInterceptor`] to the Agent SDK's [`PreToolUseHook`]
/// boundary — what a concrete SDK implementation calls before running a
/// tool, for the execution contexts the scheduler's own background hook
/// doesn't cover (interactive web sessions, bot-processor sessions).
pub struct InterceptorHook {
    interceptor: Arc<ToolInterceptor>,
    session_id: String,
    model: String,
}

impl InterceptorHook {
    pub fn new(interceptor: Arc<ToolInterceptor>, session_id: impl Into<String>) -> Self {
        Self { interceptor, session_id: session_id.into(), model: String::new() }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[async_trait]
impl PreToolUseHook for InterceptorHook {
    async fn on_tool_use(&self, invocation: &ToolInvocation) -> HookDecision {
        let verdict = self
            .interceptor
            .intercept(
                &self.session_id,
                &invocation.tool_name,
                &invocation.call_id,
                &invocation.tool_args,
                invocation.mcp_server.as_deref(),
                &self.model,
            )
            .await;
        match verdict {
            Verdict::Allowed => HookDecision::Allow,
            Verdict::Denied { .. } => HookDecision::Deny,
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{truncated}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::TokioBroadcastBus;
    use std::time::Duration;
    use tempfile::TempDir;

    fn deps() -> (TempDir, InterceptorDeps) {
        let dir = TempDir::new().unwrap();
        let guardrails = Arc::new(GuardrailsEngine::new(dir.path().join("guardrails.json")).unwrap());
        let activity = Arc::new(ToolActivityStore::new(dir.path().join("activity.jsonl")).unwrap());
        let approvals = Arc::new(ApprovalBroker::new());
        let events: Arc<dyn EventBus> = Arc::new(TokioBroadcastBus::new());
        let channels = Arc::new(ChannelManager::new());
        (
            dir,
            InterceptorDeps {
                guardrails,
                activity,
                approvals,
                events,
                channels,
                shield: None,
                ai_reviewer: None,
                phone_verifier: None,
            },
        )
    }

    fn rule(tool_name: Option<&str>, strategy: Strategy) -> crate::guardrails::GuardrailsRule {
        crate::guardrails::GuardrailsRule {
            tool_name: tool_name.map(str::to_string),
            mcp_server: None,
            execution_context: None,
            model: None,
            strategy,
            channel: None,
        }
    }

    #[tokio::test]
    async fn always_approved_tool_bypasses_gating() {
        let (_dir, deps) = deps();
        deps.guardrails.add_rule(rule(None, Strategy::Deny)).unwrap();
        let interceptor = ToolInterceptor::new(deps, ExecutionContext::Interactive);
        let verdict = interceptor
            .intercept("s1", "report_intent", "c1", "{}", None, "gpt-4o")
            .await;
        assert_eq!(verdict, Verdict::Allowed);
    }

    #[tokio::test]
    async fn deny_strategy_short_circuits() {
        let (_dir, deps) = deps();
        deps.guardrails.add_rule(rule(Some("rm_rf"), Strategy::Deny)).unwrap();
        let activity = Arc::clone(&deps.activity);
        let interceptor = ToolInterceptor::new(deps, ExecutionContext::Interactive);
        let verdict = interceptor
            .intercept("s1", "rm_rf", "c1", "/", None, "")
            .await;
        assert!(matches!(verdict, Verdict::Denied { .. }));
        let entry = activity.get_entry("ta-1").unwrap();
        assert_eq!(entry.status, "denied");
    }

    #[tokio::test]
    async fn allow_strategy_proceeds() {
        let (_dir, deps) = deps();
        deps.guardrails.add_rule(rule(Some("read_file"), Strategy::Allow)).unwrap();
        let interceptor = ToolInterceptor::new(deps, ExecutionContext::Interactive);
        let verdict = interceptor
            .intercept("s1", "read_file", "c1", "README.md", None, "")
            .await;
        assert_eq!(verdict, Verdict::Allowed);
    }

    #[tokio::test]
    async fn hitl_approval_resolved_externally_unblocks() {
        let (_dir, deps) = deps();
        deps.guardrails.add_rule(rule(Some("send_email"), Strategy::Hitl)).unwrap();
        let approvals = Arc::clone(&deps.approvals);
        let interceptor = Arc::new(ToolInterceptor::new(deps, ExecutionContext::Interactive));
        let i2 = interceptor.clone();
        let handle = tokio::spawn(async move {
            i2.intercept("s1", "send_email", "c1", "{}", None, "").await
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        approvals.resolve("c1", true).unwrap();
        let verdict = handle.await.unwrap();
        assert_eq!(verdict, Verdict::Allowed);
    }

    #[tokio::test]
    async fn filter_strategy_allows_but_flags() {
        let (_dir, deps) = deps();
        deps.guardrails.add_rule(rule(Some("query_db"), Strategy::Filter)).unwrap();
        let activity = Arc::clone(&deps.activity);
        let interceptor = ToolInterceptor::new(deps, ExecutionContext::Interactive);
        let verdict = interceptor
            .intercept("s1", "query_db", "c1", "SELECT 1", None, "")
            .await;
        assert_eq!(verdict, Verdict::Allowed);
        let entry = activity.get_entry("ta-1").unwrap();
        assert!(entry.flagged);
    }

    #[tokio::test]
    async fn pitl_without_verifier_falls_through_to_hitl() {
        let (_dir, deps) = deps();
        deps.guardrails.add_rule(rule(Some("wire_transfer"), Strategy::Pitl)).unwrap();
        let approvals = Arc::clone(&deps.approvals);
        let interceptor = Arc::new(ToolInterceptor::new(deps, ExecutionContext::Interactive));
        let i2 = interceptor.clone();
        let handle = tokio::spawn(async move {
            i2.intercept("s1", "wire_transfer", "c1", "{}", None, "").await
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        approvals.resolve("c1", true).unwrap();
        let verdict = handle.await.unwrap();
        assert_eq!(verdict, Verdict::Allowed);
    }

    #[tokio::test]
    async fn interceptor_hook_maps_verdict_to_hook_decision() {
        let (_dir, deps) = deps();
        deps.guardrails.add_rule(rule(Some("delete_file"), Strategy::Deny)).unwrap();
        deps.guardrails.add_rule(rule(Some("read_file"), Strategy::Allow)).unwrap();
        let interceptor = Arc::new(ToolInterceptor::new(deps, ExecutionContext::Interactive));
        let hook = InterceptorHook::new(interceptor, "s1");

        let denied = hook
            .on_tool_use(&crate::agent::sdk::ToolInvocation {
                tool_name: "delete_file".to_string(),
                call_id: "c1".to_string(),
                tool_args: "/etc/passwd".to_string(),
                mcp_server: None,
            })
            .await;
        assert_eq!(denied, HookDecision::Deny);

        let allowed = hook
            .on_tool_use(&crate::agent::sdk::ToolInvocation {
                tool_name: "read_file".to_string(),
                call_id: "c2".to_string(),
                tool_args: "README.md".to_string(),
                mcp_server: None,
            })
            .await;
        assert_eq!(allowed, HookDecision::Allow);
    }

    #[tokio::test]
    async fn hitl_denies_when_no_channel_is_available() {
        let (_dir, deps) = deps();
        deps.guardrails.add_rule(rule(Some("send_email"), Strategy::Hitl)).unwrap();
        let interceptor = ToolInterceptor::new(deps, ExecutionContext::Scheduler);
        let verdict = interceptor
            .intercept("s1", "send_email", "c1", "{}", None, "")
            .await;
        assert!(matches!(verdict, Verdict::Denied { .. }));
    }
}
