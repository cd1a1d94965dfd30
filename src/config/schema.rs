//! TOML configuration schema for the guarded agent orchestration runtime.
//!
//! All fields have `#[serde(default)]` so a partially-filled `config.toml`
//! works correctly.  Missing sections fall back to their `Default` impl.
//!
//! Example `~/.wardenloop/config.toml`:
//! ```toml
//! [provider]
//! default_id = "openai"
//! default_model = "gpt-4o-mini"
//!
//! [security]
//! autonomy_level = "supervised"
//!
//! [guardrails]
//! default_strategy = "hitl"
//! default_channel = "web"
//!
//! [shield]
//! endpoint = "https://my-resource.cognitiveservices.azure.com"
//!
//! [notifications]
//! enabled = true
//! do_not_disturb = false
//! ```

use serde::{Deserialize, Serialize};

use crate::guardrails::{Channel, Strategy};

// ─── ProviderConfig ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderConfig {
    /// ID of the default LLM provider (e.g. `"openai"`, `"anthropic"`).
    pub default_id: String,
    /// Default model identifier (e.g. `"gpt-4o-mini"`, `"claude-3-haiku"`).
    pub default_model: String,
    /// Request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Maximum retry attempts on transient errors.
    pub max_retries: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            default_id: "openai".to_owned(),
            default_model: "gpt-4o-mini".to_owned(),
            request_timeout_secs: 60,
            max_retries: 3,
        }
    }
}

// ─── SecurityConfig ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SecurityConfig {
    /// Autonomy level: `"readonly"`, `"supervised"`, or `"autonomous"`.
    pub autonomy_level: String,
    /// Optional workspace root path (restricts file tool access).
    pub workspace_root: Option<String>,
    /// Commands blocked regardless of autonomy level.
    pub blocked_commands: Vec<String>,
    /// Rate limit: max tool calls per minute.
    pub rate_limit_per_minute: u32,
    /// Rate limit: max tool calls per hour.
    pub rate_limit_per_hour: u32,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            autonomy_level: "supervised".to_owned(),
            workspace_root: None,
            blocked_commands: Vec::new(),
            rate_limit_per_minute: 60,
            rate_limit_per_hour: 600,
        }
    }
}

// ─── SchedulerConfig ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Path to the persisted task table.
    pub tasks_path: Option<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { tasks_path: None }
    }
}

// ─── GuardrailsConfig ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GuardrailsConfig {
    /// Strategy applied when no rule matches.
    pub default_strategy: Strategy,
    /// Channel assumed when a scheduled/background run has no channel context.
    pub default_channel: Channel,
    /// Tools that always resolve to `allow`, bypassing the rule table.
    pub always_approved: Vec<String>,
    /// Path to the persisted rule table.
    pub rules_path: Option<String>,
}

impl Default for GuardrailsConfig {
    fn default() -> Self {
        Self {
            default_strategy: Strategy::Hitl,
            default_channel: Channel::Web,
            always_approved: vec!["report_intent".to_string()],
            rules_path: None,
        }
    }
}

// ─── ShieldConfig ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ShieldConfig {
    /// Content-Safety endpoint base URL. `None` disables the shield
    /// pre-check (strategies still gate, they just skip step 5).
    pub endpoint: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ShieldConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: 10,
        }
    }
}

// ─── AitlConfig ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AitlConfig {
    pub enabled: bool,
    pub model: Option<String>,
    pub timeout_secs: u64,
}

impl Default for AitlConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            model: None,
            timeout_secs: 60,
        }
    }
}

// ─── PitlConfig ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PitlConfig {
    pub target_number: Option<String>,
    pub timeout_secs: u64,
}

impl Default for PitlConfig {
    fn default() -> Self {
        Self {
            target_number: None,
            timeout_secs: 300,
        }
    }
}

// ─── ActivityConfig ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ActivityConfig {
    /// Path to the JSONL audit log.
    pub path: Option<String>,
    pub flag_threshold: u8,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            path: None,
            flag_threshold: 40,
        }
    }
}

// ─── NotificationsConfig ──────────────────────────────────────────────────────

fn default_dnd_start() -> u8 {
    22 // 10 pm
}

fn default_dnd_end() -> u8 {
    7 // 7 am
}

fn bool_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NotificationsConfig {
    /// Whether notifications are routed to channels at all.
    pub enabled: bool,
    /// Global Do Not Disturb mode (boolean toggle, env-var controlled).
    pub do_not_disturb: bool,
    /// When `true`, the DND time-window is enforced.  Default `false` (opt-in).
    pub dnd_schedule_enabled: bool,
    /// DND window start hour (0–23), inclusive. Default 22 (10 pm).
    #[serde(default = "default_dnd_start")]
    pub dnd_start_hour: u8,
    /// DND window end hour (0–23), exclusive. Default 7 (7 am).
    #[serde(default = "default_dnd_end")]
    pub dnd_end_hour: u8,
    /// Per-category enable flags (category name → enabled).
    pub categories: std::collections::HashMap<String, bool>,
    /// Notify when a scheduled task fires.
    #[serde(default = "bool_true")]
    pub notify_scheduler: bool,
    /// Notify when an agent task completes.
    #[serde(default = "bool_true")]
    pub notify_agent_complete: bool,
    /// Notify when an approval is requested.
    #[serde(default = "bool_true")]
    pub notify_approval_request: bool,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            do_not_disturb: false,
            dnd_schedule_enabled: false,
            dnd_start_hour: default_dnd_start(),
            dnd_end_hour: default_dnd_end(),
            categories: std::collections::HashMap::new(),
            notify_scheduler: true,
            notify_agent_complete: true,
            notify_approval_request: true,
        }
    }
}

// ─── AppConfig ────────────────────────────────────────────────────────────────

/// Top-level application configuration.
///
/// Loaded from `~/.wardenloop/config.toml`, falling back to defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AppConfig {
    pub provider: ProviderConfig,
    pub security: SecurityConfig,
    pub scheduler: SchedulerConfig,
    pub guardrails: GuardrailsConfig,
    pub shield: ShieldConfig,
    pub aitl: AitlConfig,
    pub pitl: PitlConfig,
    pub activity: ActivityConfig,
    pub notifications: NotificationsConfig,
}
