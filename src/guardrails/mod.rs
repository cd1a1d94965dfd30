//! Guardrails Rule Engine — resolves which gating [`Strategy`] applies to a
//! tool invocation, given its channel, execution context, and tool name.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GuardrailsError {
    #[error("failed to read rules file: {0}")]
    Read(#[source] std::io::Error),
    #[error("failed to write rules file: {0}")]
    Write(#[source] std::io::Error),
    #[error("malformed rules file: {0}")]
    Malformed(#[source] serde_json::Error),
}

/// Gating outcome for a tool invocation. Ordered by precedence, strongest
/// first: `deny > pitl > aitl > filter > hitl > allow`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Allow,
    Deny,
    Filter,
    Aitl,
    Pitl,
    Hitl,
}

impl Strategy {
    /// Lower is stronger. Used to pick the winning rule when several match.
    fn precedence(self) -> u8 {
        match self {
            Strategy::Deny => 0,
            Strategy::Pitl => 1,
            Strategy::Aitl => 2,
            Strategy::Filter => 3,
            Strategy::Hitl => 4,
            Strategy::Allow => 5,
        }
    }
}

impl Default for Strategy {
    fn default() -> Self {
        Strategy::Hitl
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Web,
    Bot,
    Phone,
}

impl Default for Channel {
    fn default() -> Self {
        Channel::Web
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionContext {
    Interactive,
    Scheduler,
    BotProcessor,
    Custom,
}

/// A single row in the rule table. `tool_name`/`mcp_server`/
/// `execution_context`/`model` are the match dimensions — `None` is a
/// wildcard (matches any value). A rule's specificity is the count of
/// non-wildcard match fields; the most specific matching rule wins, ties
/// broken by [`Strategy::precedence`]. `channel` is not a match field: it
/// is this rule's *result*, alongside `strategy` — `None` defers to the
/// rule table's `default_channel`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailsRule {
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub mcp_server: Option<String>,
    #[serde(default)]
    pub execution_context: Option<ExecutionContext>,
    #[serde(default)]
    pub model: Option<String>,
    pub strategy: Strategy,
    #[serde(default)]
    pub channel: Option<Channel>,
}

impl GuardrailsRule {
    fn specificity(&self) -> u8 {
        [
            self.tool_name.is_some(),
            self.mcp_server.is_some(),
            self.execution_context.is_some(),
            self.model.is_some(),
        ]
        .iter()
        .filter(|b| **b)
        .count() as u8
    }

    fn matches(
        &self,
        tool_name: &str,
        mcp_server: Option<&str>,
        execution_context: ExecutionContext,
        model: Option<&str>,
    ) -> bool {
        self.tool_name.as_deref().is_none_or(|t| t == tool_name)
            && self.mcp_server.as_deref().is_none_or(|m| Some(m) == mcp_server)
            && self.execution_context.is_none_or(|c| c == execution_context)
            && self.model.as_deref().is_none_or(|m| Some(m) == model)
    }
}

/// The resolved gating outcome: the `strategy` to dispatch and the
/// `channel` to prefer for `hitl` solicitation (subject to the
/// interceptor's availability-based fallback — see
/// `interceptor::ToolInterceptor::resolve_channel`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub strategy: Strategy,
    pub channel: Channel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RulesFile {
    rules: Vec<GuardrailsRule>,
    #[serde(default)]
    always_approved: Vec<String>,
    #[serde(default = "default_strategy")]
    default_strategy: Strategy,
    #[serde(default)]
    default_channel: Channel,
}

fn default_strategy() -> Strategy {
    Strategy::Hitl
}

/// Resolution engine over a persisted rule table.
pub struct GuardrailsEngine {
    path: PathBuf,
    rules: std::sync::RwLock<RulesFile>,
}

impl GuardrailsEngine {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, GuardrailsError> {
        let path = path.into();
        let rules = if path.exists() {
            Self::load(&path)?
        } else {
            RulesFile {
                rules: Vec::new(),
                always_approved: vec!["report_intent".to_string()],
                default_strategy: Strategy::Hitl,
                default_channel: Channel::Web,
            }
        };
        Ok(Self {
            path,
            rules: std::sync::RwLock::new(rules),
        })
    }

    fn load(path: &Path) -> Result<RulesFile, GuardrailsError> {
        let content = std::fs::read_to_string(path).map_err(GuardrailsError::Read)?;
        serde_json::from_str(&content).map_err(GuardrailsError::Malformed)
    }

    fn save(&self, rules: &RulesFile) -> Result<(), GuardrailsError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(GuardrailsError::Write)?;
        }
        let json = serde_json::to_string_pretty(rules).map_err(GuardrailsError::Malformed)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(GuardrailsError::Write)?;
        std::fs::rename(&tmp, &self.path).map_err(GuardrailsError::Write)?;
        Ok(())
    }

    /// Tools in the always-approved set bypass every rule and resolve to
    /// [`Strategy::Allow`] unconditionally.
    pub fn is_always_approved(&self, tool_name: &str) -> bool {
        let rules = self.rules.read().unwrap_or_else(|e| e.into_inner());
        rules.always_approved.iter().any(|t| t == tool_name)
    }

    /// Resolve the strategy and preferred channel for a tool invocation:
    /// always-approved bypass, then most-specific matching rule over
    /// `(tool_name, mcp_server, execution_context, model)`, then the
    /// configured default.
    pub fn resolve(
        &self,
        tool_name: &str,
        mcp_server: Option<&str>,
        execution_context: ExecutionContext,
        model: Option<&str>,
    ) -> Resolution {
        let rules = self.rules.read().unwrap_or_else(|e| e.into_inner());
        if rules.always_approved.iter().any(|t| t == tool_name) {
            return Resolution { strategy: Strategy::Allow, channel: rules.default_channel };
        }
        rules
            .rules
            .iter()
            .filter(|r| r.matches(tool_name, mcp_server, execution_context, model))
            .max_by_key(|r| (r.specificity(), std::cmp::Reverse(r.strategy.precedence())))
            .map(|r| Resolution {
                strategy: r.strategy,
                channel: r.channel.unwrap_or(rules.default_channel),
            })
            .unwrap_or(Resolution { strategy: rules.default_strategy, channel: rules.default_channel })
    }

    pub fn add_rule(&self, rule: GuardrailsRule) -> Result<(), GuardrailsError> {
        let mut rules = self.rules.write().unwrap_or_else(|e| e.into_inner());
        rules.rules.push(rule);
        self.save(&rules)
    }

    pub fn list_rules(&self) -> Vec<GuardrailsRule> {
        self.rules.read().unwrap_or_else(|e| e.into_inner()).rules.clone()
    }

    pub fn default_strategy(&self) -> Strategy {
        self.rules.read().unwrap_or_else(|e| e.into_inner()).default_strategy
    }
}
