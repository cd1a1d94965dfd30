//! Guarded agent orchestration runtime.
//!
//! This crate wires together the gating pipeline (guardrails → shield →
//! aitl/pitl/hitl), the tool activity audit store, the scheduler, the
//! channel layer, and the web gateway. It does not implement an LLM
//! reasoning loop: the Agent SDK (`agent::sdk::AgentSdk`), the AI reviewer
//! (`aitl::AiReviewer`), the phone dialer (`pitl::PhoneDialer`), and the
//! proactive-loop generator/deliverer (`proactive::{ProactiveGenerator,
//! ProactiveDeliverer}`) are consumed collaborators a deployment supplies
//! via [`WardenloopApp`]'s setters.

pub mod activity;
pub mod agent;
pub mod aitl;
pub mod approval;
pub mod channels;
pub mod config;
pub mod event_bus;
pub mod gateway;
pub mod guardrails;
pub mod interceptor;
pub mod pitl;
pub mod plugins;
pub mod proactive;
pub mod scheduler;
pub mod security;
pub mod services;
pub mod shield;

pub mod prelude {
    pub use crate::activity::{ActivityQuery, ToolActivityStore};
    pub use crate::agent::sdk::{AgentSdk, AgentSession};
    pub use crate::approval::ApprovalBroker;
    pub use crate::channels::{Channel as ChannelAdapter, ChannelManager};
    pub use crate::config::AppConfig;
    pub use crate::event_bus::{AppEvent, EventBus, TokioBroadcastBus};
    pub use crate::guardrails::{Channel as GuardrailsChannel, ExecutionContext, GuardrailsEngine, Strategy};
    pub use crate::interceptor::{InterceptorDeps, ToolInterceptor};
    pub use crate::scheduler::{Scheduler, TokioScheduler};
}

use std::sync::Arc;

use agent::sdk::AgentSdk;
use aitl::AiReviewer;
use approval::ApprovalBroker;
use channels::ChannelManager;
use event_bus::{AppEvent, EventBus, TokioBroadcastBus};
use guardrails::GuardrailsEngine;
use pitl::{PhoneDialer, PhoneVerifier};
use scheduler::{SchedulerAuxiliaries, Scheduler, TaskRunner, TokioScheduler};
use security::policy::{AutonomyLevel, SecurityPolicy};
use services::NotificationService;
use shield::{ShieldClient, StaticTokenProvider, TokenProvider};

/// Everything the runtime needs to persist state, keyed off `~/.wardenloop`.
struct StatePaths {
    guardrails_rules: std::path::PathBuf,
    activity_log: std::path::PathBuf,
    scheduler_tasks: std::path::PathBuf,
}

fn resolve_state_paths(config: &config::AppConfig) -> StatePaths {
    let home = dirs::home_dir().unwrap_or_else(std::env::temp_dir);
    let base = home.join(".wardenloop");
    StatePaths {
        guardrails_rules: config
            .guardrails
            .rules_path
            .clone()
            .map(std::path::PathBuf::from)
            .unwrap_or_else(|| base.join("guardrails.json")),
        activity_log: config
            .activity
            .path
            .clone()
            .map(std::path::PathBuf::from)
            .unwrap_or_else(|| base.join("tool_activity.jsonl")),
        scheduler_tasks: config
            .scheduler
            .tasks_path
            .clone()
            .map(std::path::PathBuf::from)
            .unwrap_or_else(|| base.join("scheduler_tasks.json")),
    }
}

fn parse_autonomy_level(s: &str) -> AutonomyLevel {
    match s {
        "readonly" => AutonomyLevel::ReadOnly,
        "full" | "autonomous" => AutonomyLevel::Full,
        _ => AutonomyLevel::Supervised,
    }
}

/// The assembled runtime: every component the guarded agent orchestration
/// system owns outright, ready to be driven by an externally-supplied
/// Agent SDK.
pub struct WardenloopApp {
    pub config: config::AppConfig,
    pub events: Arc<dyn EventBus>,
    pub guardrails: Arc<GuardrailsEngine>,
    pub activity: Arc<activity::ToolActivityStore>,
    pub approvals: Arc<ApprovalBroker>,
    pub channels: Arc<ChannelManager>,
    pub security: Arc<SecurityPolicy>,
    pub shield: Option<Arc<ShieldClient>>,
    pub notifications: Arc<NotificationService>,
    ai_reviewer: Option<Arc<dyn AiReviewer>>,
    phone_verifier: Option<Arc<PhoneVerifier>>,
    agent_sdk: Option<Arc<dyn AgentSdk>>,
    scheduler: Option<Arc<TokioScheduler>>,
}

impl WardenloopApp {
    /// Assemble the runtime from a loaded [`config::AppConfig`]. Does not
    /// start any background loops — call [`Self::start_gateway`] /
    /// [`Self::start_scheduler`] / [`Self::start_notifications`] separately.
    pub fn build(config: config::AppConfig) -> Result<Self, String> {
        let paths = resolve_state_paths(&config);

        let events: Arc<dyn EventBus> = Arc::new(TokioBroadcastBus::new());

        let guardrails = Arc::new(
            GuardrailsEngine::new(paths.guardrails_rules)
                .map_err(|e| format!("failed to initialise guardrails engine: {e}"))?,
        );

        let activity = Arc::new(
            activity::ToolActivityStore::new(paths.activity_log)
                .map_err(|e| format!("failed to initialise activity store: {e}"))?,
        );

        let approvals = Arc::new(ApprovalBroker::new());
        let channels = Arc::new(ChannelManager::new());

        let security = Arc::new(SecurityPolicy::new(
            parse_autonomy_level(&config.security.autonomy_level),
            config.security.workspace_root.clone().map(std::path::PathBuf::from),
            security::policy::default_blocked_dirs(),
            3600,
            config.security.rate_limit_per_hour as usize,
        ));

        let shield = config.shield.endpoint.clone().map(|endpoint| {
            let token_provider: Box<dyn TokenProvider> = Box::new(StaticTokenProvider(
                std::env::var("WARDENLOOP_SHIELD_TOKEN").unwrap_or_default(),
            ));
            Arc::new(ShieldClient::new(endpoint, token_provider))
        });

        let notifications = Arc::new(NotificationService::with_config(
            events.clone(),
            channels.clone(),
            config.notifications.clone(),
        ));

        Ok(Self {
            config,
            events,
            guardrails,
            activity,
            approvals,
            channels,
            security,
            shield,
            notifications,
            ai_reviewer: None,
            phone_verifier: None,
            agent_sdk: None,
            scheduler: None,
        })
    }

    /// Supply the AI reviewer used for the `aitl` guardrails strategy.
    /// Without one, `aitl`-gated calls fall through to `hitl`.
    pub fn with_ai_reviewer(mut self, reviewer: Arc<dyn AiReviewer>) -> Self {
        self.ai_reviewer = Some(reviewer);
        self
    }

    /// Supply the phone dialer used for the `pitl` guardrails strategy,
    /// wired up with the configured target number.
    pub fn with_phone_dialer(mut self, dialer: Box<dyn PhoneDialer>) -> Self {
        self.phone_verifier = Some(Arc::new(PhoneVerifier::new(
            self.config.pitl.target_number.clone(),
            dialer,
        )));
        self
    }

    /// Supply the Agent SDK that drives interactive (web gateway) and
    /// bot-processor sessions. Without one, the gateway's WebSocket `Send`
    /// handler only republishes a `ChannelMessage` and never opens an
    /// agent turn.
    pub fn with_agent_sdk(mut self, sdk: Arc<dyn AgentSdk>) -> Self {
        self.agent_sdk = Some(sdk);
        self
    }

    /// Shared auxiliaries every `ToolInterceptor` built for an interactive
    /// session should borrow.
    pub fn interceptor_deps(&self) -> interceptor::InterceptorDeps {
        interceptor::InterceptorDeps {
            guardrails: self.guardrails.clone(),
            activity: self.activity.clone(),
            approvals: self.approvals.clone(),
            events: self.events.clone(),
            channels: self.channels.clone(),
            shield: self.shield.clone(),
            ai_reviewer: self.ai_reviewer.clone(),
            phone_verifier: self.phone_verifier.clone(),
        }
    }

    fn scheduler_auxiliaries(&self) -> SchedulerAuxiliaries {
        SchedulerAuxiliaries {
            guardrails: self.guardrails.clone(),
            activity: self.activity.clone(),
            approvals: self.approvals.clone(),
            events: self.events.clone(),
            channels: self.channels.clone(),
            shield: self.shield.clone(),
            ai_reviewer: self.ai_reviewer.clone(),
            phone_verifier: self.phone_verifier.clone(),
        }
    }

    /// Build and start the background scheduler, driven by `runner`
    /// (the Agent SDK wrapper that actually executes a task's prompt).
    pub async fn start_scheduler(&mut self, runner: Arc<dyn TaskRunner>) -> Result<Arc<TokioScheduler>, String> {
        let paths = resolve_state_paths(&self.config);
        let scheduler = TokioScheduler::new(paths.scheduler_tasks, self.scheduler_auxiliaries(), runner)
            .map_err(|e| format!("failed to initialise scheduler: {e}"))?;
        scheduler.start().await;
        self.scheduler = Some(scheduler.clone());
        Ok(scheduler)
    }

    /// Start the notification-routing background loop.
    pub fn start_notifications(&self) {
        self.notifications.clone().start();
    }

    /// Start the HTTP/WebSocket gateway. Blocks until the server shuts down.
    #[cfg(feature = "gateway")]
    pub async fn start_gateway(&self) -> Result<(), String> {
        gateway::start_gateway(
            self.events.clone(),
            self.activity.clone(),
            self.approvals.clone(),
            self.guardrails.clone(),
            self.agent_sdk.clone(),
            Some(self.interceptor_deps()),
        )
        .await
    }

    pub fn publish(&self, event: AppEvent) -> Result<(), String> {
        self.events.publish(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_assembles_from_default_config() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = config::AppConfig::default();
        config.guardrails.rules_path = Some(dir.path().join("guardrails.json").to_string_lossy().into_owned());
        config.activity.path = Some(dir.path().join("activity.jsonl").to_string_lossy().into_owned());
        config.scheduler.tasks_path = Some(dir.path().join("tasks.json").to_string_lossy().into_owned());

        let app = WardenloopApp::build(config).unwrap();
        assert!(app.shield.is_none(), "no shield endpoint configured by default");
        assert_eq!(app.guardrails.default_strategy(), guardrails::Strategy::Hitl);
    }

    #[test]
    fn build_wires_shield_when_endpoint_configured() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = config::AppConfig::default();
        config.guardrails.rules_path = Some(dir.path().join("guardrails.json").to_string_lossy().into_owned());
        config.activity.path = Some(dir.path().join("activity.jsonl").to_string_lossy().into_owned());
        config.scheduler.tasks_path = Some(dir.path().join("tasks.json").to_string_lossy().into_owned());
        config.shield.endpoint = Some("https://example.cognitiveservices.azure.com".to_string());

        let app = WardenloopApp::build(config).unwrap();
        assert!(app.shield.is_some());
    }
}
