//! Wardenloop CLI — headless interface to the guarded agent orchestration
//! daemon.
//!
//! Provides subcommands for managing the daemon, guardrails rules, pending
//! approvals, the tool activity audit log, scheduled tasks, channels, and
//! configuration. When invoked with no subcommand the CLI enters an
//! interactive chat shell that streams responses over the gateway
//! WebSocket.
use std::{
    fs,
    io::{self, BufRead, IsTerminal, Write},
    path::PathBuf,
};

use clap::{Parser, Subcommand};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

use wardenloop::{
    config::{loader, schema::AppConfig},
    guardrails::{Channel as GuardrailsChannel, ExecutionContext, GuardrailsEngine, GuardrailsRule, Strategy},
    gateway::auth::token_path,
    scheduler::traits::ScheduledTask,
};

// ---------------------------------------------------------------------------
// Top-level CLI struct
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "wardenloop",
    about = "Guarded agent orchestration runtime CLI",
    version,
    long_about = "Headless interface to the Wardenloop guarded agent orchestration daemon.\n\
                  Run without a subcommand to enter the interactive chat shell."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Output raw text without formatting.
    #[arg(long, global = true)]
    raw: bool,

    /// Output results as JSON.
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start or manage the background daemon process.
    Daemon(DaemonArgs),
    /// Inspect and edit the guardrails rule table.
    Guardrails(GuardrailsArgs),
    /// Resolve a pending human-in-the-loop approval.
    Approval(ApprovalArgs),
    /// Query the tool activity audit log.
    Activity(ActivityArgs),
    /// Manage scheduled cron/one-shot agent invocations.
    Schedule(ScheduleArgs),
    /// Inspect configured communication channels.
    Channel(ChannelArgs),
    /// View and edit application configuration.
    Config(ConfigArgs),
}

#[derive(Parser, Debug)]
struct DaemonArgs {
    /// Daemon action: start | stop | status.
    #[arg(default_value = "status")]
    action: String,

    /// Run the daemon in the foreground without detaching. Used internally
    /// when the binary self-spawns for background execution.
    #[arg(long, hide = true)]
    foreground: bool,
}

#[derive(Parser, Debug)]
struct GuardrailsArgs {
    /// Guardrails action: list | add.
    #[arg(default_value = "list")]
    action: String,
    /// Tool name to match (omit for a wildcard rule). Required for `add`.
    tool: Option<String>,
    /// Strategy to apply: allow | deny | filter | aitl | pitl | hitl.
    #[arg(long)]
    strategy: Option<String>,
    /// Preferred channel for hitl solicitation: web | bot | phone.
    #[arg(long)]
    channel: Option<String>,
    /// Restrict the rule to an execution context: interactive | scheduler | bot_processor.
    #[arg(long)]
    context: Option<String>,
    /// Restrict the rule to an MCP server name (omit for a wildcard).
    #[arg(long = "mcp-server")]
    mcp_server: Option<String>,
    /// Restrict the rule to a model name (omit for a wildcard).
    #[arg(long)]
    model: Option<String>,
}

#[derive(Parser, Debug)]
struct ApprovalArgs {
    /// Pending call ID to resolve.
    call_id: String,
    /// Approve the call. Mutually exclusive with `--deny`.
    #[arg(long)]
    approve: bool,
    /// Deny the call. Mutually exclusive with `--approve`.
    #[arg(long)]
    deny: bool,
}

#[derive(Parser, Debug)]
struct ActivityArgs {
    /// Activity action: list | summary | timeline | show | flag | unflag | export.
    #[arg(default_value = "list")]
    action: String,
    /// Entry ID (for show, flag, unflag).
    id: Option<String>,
    /// Filter by session ID (for list/export).
    #[arg(long)]
    session: Option<String>,
    /// Filter by tool name (for list/export).
    #[arg(long)]
    tool: Option<String>,
    /// Filter by status (for list/export).
    #[arg(long)]
    status: Option<String>,
    /// Only show flagged entries (for list/export).
    #[arg(long, default_value_t = false)]
    flagged_only: bool,
    /// Timeline bucket size in minutes (for timeline).
    #[arg(long, default_value_t = 60)]
    bucket: i64,
    /// Reason text (for flag).
    #[arg(long, default_value = "")]
    reason: String,
}

#[derive(Parser, Debug)]
struct ScheduleArgs {
    /// Schedule action: list | add | toggle | remove | history.
    #[arg(default_value = "list")]
    action: String,
    /// Task ID (for toggle, remove, history).
    id: Option<String>,
    /// Human-readable task description (for add).
    #[arg(long)]
    description: Option<String>,
    /// Cron expression, e.g. "0 9 * * 1-5" (for add; mutually exclusive with --run-at).
    #[arg(long)]
    cron: Option<String>,
    /// One-shot ISO-8601 fire time (for add; mutually exclusive with --cron).
    #[arg(long)]
    run_at: Option<String>,
    /// Prompt text sent to the agent when the task fires (for add).
    #[arg(long)]
    prompt: Option<String>,
}

#[derive(Parser, Debug)]
struct ChannelArgs {
    /// Channel action: list.
    #[arg(default_value = "list")]
    action: String,
}

#[derive(Parser, Debug)]
struct ConfigArgs {
    /// Config action: show | path | set-strategy | set-security-level.
    #[arg(default_value = "show")]
    action: String,
    /// Value for `set-strategy` / `set-security-level`.
    value: Option<String>,
}

// ---------------------------------------------------------------------------
// Local state paths (mirrors `wardenloop::resolve_state_paths`, which is
// private to the composition root — the CLI works against the same files).
// ---------------------------------------------------------------------------

fn config_path() -> PathBuf {
    std::env::var("WARDENLOOP_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| loader::default_config_path().unwrap_or_else(|_| PathBuf::from("config.toml")))
}

fn state_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(std::env::temp_dir).join(".wardenloop")
}

fn guardrails_path(config: &AppConfig) -> PathBuf {
    config
        .guardrails
        .rules_path
        .clone()
        .map(PathBuf::from)
        .unwrap_or_else(|| state_dir().join("guardrails.json"))
}

fn scheduler_path(config: &AppConfig) -> PathBuf {
    config
        .scheduler
        .tasks_path
        .clone()
        .map(PathBuf::from)
        .unwrap_or_else(|| state_dir().join("scheduler_tasks.json"))
}

fn load_scheduled_tasks(path: &std::path::Path) -> Vec<ScheduledTask> {
    fs::read_to_string(path)
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

fn save_scheduled_tasks(path: &std::path::Path, tasks: &[ScheduledTask]) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("failed to create state dir: {e}"))?;
    }
    let json = serde_json::to_string_pretty(tasks).map_err(|e| format!("failed to serialise tasks: {e}"))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).map_err(|e| format!("failed to write tasks: {e}"))?;
    fs::rename(&tmp, path).map_err(|e| format!("failed to replace tasks file: {e}"))
}

// ---------------------------------------------------------------------------
// Gateway client
// ---------------------------------------------------------------------------

fn daemon_pid_path() -> PathBuf {
    state_dir().join("daemon.pid")
}

fn read_pid_and_port() -> Option<(u32, u16)> {
    let content = fs::read_to_string(daemon_pid_path()).ok()?;
    let mut lines = content.lines();
    let pid: u32 = lines.next()?.trim().parse().ok()?;
    let port: u16 = lines.next()?.trim().parse().ok()?;
    Some((pid, port))
}

fn read_token() -> Option<String> {
    fs::read_to_string(token_path()).ok().map(|s| s.trim().to_string())
}

fn is_daemon_running() -> Option<u16> {
    let (pid, port) = read_pid_and_port()?;
    #[cfg(unix)]
    {
        use std::process::Command;
        let alive = Command::new("kill")
            .args(["-0", &pid.to_string()])
            .status()
            .map(|s| s.success())
            .unwrap_or(false);
        if alive { Some(port) } else { None }
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        Some(port)
    }
}

struct GatewayClient {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

impl GatewayClient {
    fn new(port: u16, token: String) -> Self {
        Self {
            base_url: format!("http://127.0.0.1:{port}"),
            token,
            client: reqwest::Client::new(),
        }
    }

    fn auth_header(&self) -> String {
        format!("Bearer {}", self.token)
    }

    async fn get(&self, path: &str) -> reqwest::Result<Value> {
        self.client
            .get(format!("{}{path}", self.base_url))
            .header("Authorization", self.auth_header())
            .send()
            .await?
            .json::<Value>()
            .await
    }

    async fn get_text(&self, path: &str) -> reqwest::Result<String> {
        self.client
            .get(format!("{}{path}", self.base_url))
            .header("Authorization", self.auth_header())
            .send()
            .await?
            .text()
            .await
    }

    async fn post(&self, path: &str, body: Value) -> reqwest::Result<Value> {
        self.client
            .post(format!("{}{path}", self.base_url))
            .header("Authorization", self.auth_header())
            .json(&body)
            .send()
            .await?
            .json::<Value>()
            .await
    }

    async fn health(&self) -> reqwest::Result<Value> {
        self.client
            .get(format!("{}/api/v1/health", self.base_url))
            .send()
            .await?
            .json::<Value>()
            .await
    }
}

/// Resolve or start the gateway, returning a ready client.
async fn require_gateway() -> Option<GatewayClient> {
    if let Some(port) = is_daemon_running()
        && let Some(token) = read_token()
    {
        return Some(GatewayClient::new(port, token));
    }
    eprintln!("Gateway is not running.\nStart it with: wardenloop daemon start");
    None
}

// ---------------------------------------------------------------------------
// Output helpers
// ---------------------------------------------------------------------------

fn print_value(value: &Value) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

fn print_err(msg: &str) {
    eprintln!("\x1b[31merror\x1b[0m: {msg}");
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

async fn dispatch(command: &Commands, raw: bool, json_mode: bool) {
    match command {
        Commands::Daemon(args) => handle_daemon(args).await,
        Commands::Guardrails(args) => handle_guardrails(args, json_mode),
        Commands::Approval(args) => handle_approval(args).await,
        Commands::Activity(args) => handle_activity(args, raw, json_mode).await,
        Commands::Schedule(args) => handle_schedule(args, raw, json_mode),
        Commands::Channel(args) => handle_channel(args),
        Commands::Config(args) => handle_config(args, json_mode),
    }
}

async fn handle_daemon(args: &DaemonArgs) {
    match args.action.as_str() {
        "status" => match is_daemon_running() {
            Some(port) => {
                if let Some(client) = require_gateway().await {
                    match client.health().await {
                        Ok(v) => println!("daemon: running on port {port} — {v}"),
                        Err(e) => println!("daemon: port {port} (health check failed: {e})"),
                    }
                }
            }
            None => println!("daemon: not running"),
        },
        "start" => {
            if let Some(port) = is_daemon_running() {
                println!("daemon: already running on port {port}");
                return;
            }
            #[cfg(feature = "gateway")]
            {
                if !args.foreground {
                    let exe = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("wardenloop"));
                    match std::process::Command::new(&exe)
                        .arg("daemon")
                        .arg("start")
                        .arg("--foreground")
                        .stdin(std::process::Stdio::null())
                        .stdout(std::process::Stdio::null())
                        .stderr(std::process::Stdio::null())
                        .spawn()
                    {
                        Ok(_) => println!("daemon: starting in background"),
                        Err(e) => print_err(&format!("failed to start daemon: {e}")),
                    }
                    return;
                }

                let config = loader::load_config(&config_path()).unwrap_or_default();
                let app = match wardenloop::WardenloopApp::build(config) {
                    Ok(app) => app,
                    Err(e) => {
                        print_err(&format!("daemon: failed to assemble runtime: {e}"));
                        return;
                    }
                };
                app.start_notifications();
                tracing::info!("daemon: running in foreground");
                if let Err(e) = app.start_gateway().await {
                    print_err(&format!("daemon failed: {e}"));
                }
            }
            #[cfg(not(feature = "gateway"))]
            {
                eprintln!("Gateway feature not compiled in. Rebuild with --features gateway.");
            }
        }
        "stop" => {
            if let Some((pid, _)) = read_pid_and_port() {
                #[cfg(unix)]
                {
                    use std::process::Command;
                    let _ = Command::new("kill").arg(pid.to_string()).status();
                    println!("daemon: sent SIGTERM to PID {pid}");
                }
                #[cfg(not(unix))]
                {
                    println!("daemon stop: not implemented on this platform (PID {pid})");
                }
            } else {
                println!("daemon: not running");
            }
        }
        other => println!("daemon: unknown action '{other}'. Use start | stop | status"),
    }
}

// ---------------------------------------------------------------------------
// Guardrails — operates directly on the persisted rule table; the running
// daemon reloads it on its own restart, matching the "reloaded at startup"
// persistence model.
// ---------------------------------------------------------------------------

fn parse_strategy(s: &str) -> Option<Strategy> {
    match s.to_lowercase().as_str() {
        "allow" => Some(Strategy::Allow),
        "deny" => Some(Strategy::Deny),
        "filter" => Some(Strategy::Filter),
        "aitl" => Some(Strategy::Aitl),
        "pitl" => Some(Strategy::Pitl),
        "hitl" => Some(Strategy::Hitl),
        _ => None,
    }
}

fn parse_channel(s: &str) -> Option<GuardrailsChannel> {
    match s.to_lowercase().as_str() {
        "web" => Some(GuardrailsChannel::Web),
        "bot" => Some(GuardrailsChannel::Bot),
        "phone" => Some(GuardrailsChannel::Phone),
        _ => None,
    }
}

fn parse_context(s: &str) -> Option<ExecutionContext> {
    match s.to_lowercase().as_str() {
        "interactive" => Some(ExecutionContext::Interactive),
        "scheduler" => Some(ExecutionContext::Scheduler),
        "bot_processor" | "bot-processor" => Some(ExecutionContext::BotProcessor),
        "custom" => Some(ExecutionContext::Custom),
        _ => None,
    }
}

fn handle_guardrails(args: &GuardrailsArgs, json_mode: bool) {
    let config = loader::load_config(&config_path()).unwrap_or_default();
    let path = guardrails_path(&config);
    let engine = match GuardrailsEngine::new(&path) {
        Ok(e) => e,
        Err(e) => {
            print_err(&format!("failed to open guardrails rules at {path:?}: {e}"));
            return;
        }
    };

    match args.action.as_str() {
        "list" => {
            let rules = engine.list_rules();
            if json_mode {
                print_value(&json!({ "rules": rules, "default_strategy": engine.default_strategy() }));
                return;
            }
            if rules.is_empty() {
                println!("No guardrails rules configured. Default strategy: {:?}", engine.default_strategy());
                return;
            }
            println!(
                "{:<24} {:<12} {:<14} {:<10} {:<8} {:<8}",
                "Tool", "MCP server", "Context", "Model", "Strategy", "Channel"
            );
            println!("{}", "-".repeat(80));
            for rule in &rules {
                println!(
                    "{:<24} {:<12} {:<14} {:<10} {:<8} {:<8}",
                    rule.tool_name.as_deref().unwrap_or("*"),
                    rule.mcp_server.as_deref().unwrap_or("*"),
                    rule.execution_context.map(|c| format!("{c:?}")).unwrap_or_else(|| "*".to_string()),
                    rule.model.as_deref().unwrap_or("*"),
                    format!("{:?}", rule.strategy),
                    rule.channel.map(|c| format!("{c:?}")).unwrap_or_else(|| "default".to_string()),
                );
            }
        }
        "add" => {
            let Some(strategy_str) = &args.strategy else {
                print_err("--strategy is required for 'add'");
                return;
            };
            let Some(strategy) = parse_strategy(strategy_str) else {
                print_err(&format!("unknown strategy '{strategy_str}'. Use: allow | deny | filter | aitl | pitl | hitl"));
                return;
            };
            let channel = match &args.channel {
                Some(c) => match parse_channel(c) {
                    Some(c) => Some(c),
                    None => {
                        print_err(&format!("unknown channel '{c}'. Use: web | bot | phone"));
                        return;
                    }
                },
                None => None,
            };
            let context = match &args.context {
                Some(c) => match parse_context(c) {
                    Some(c) => Some(c),
                    None => {
                        print_err(&format!("unknown execution context '{c}'"));
                        return;
                    }
                },
                None => None,
            };
            let rule = GuardrailsRule {
                tool_name: args.tool.clone(),
                mcp_server: args.mcp_server.clone(),
                execution_context: context,
                model: args.model.clone(),
                strategy,
                channel,
            };
            match engine.add_rule(rule) {
                Ok(()) => println!(
                    "Added rule: {} → {strategy_str} (takes effect on next daemon restart)",
                    args.tool.as_deref().unwrap_or("*")
                ),
                Err(e) => print_err(&format!("failed to save rule: {e}")),
            }
        }
        other => print_err(&format!("unknown guardrails action '{other}'. Use: list | add")),
    }
}

// ---------------------------------------------------------------------------
// Approval
// ---------------------------------------------------------------------------

async fn handle_approval(args: &ApprovalArgs) {
    if args.approve == args.deny {
        print_err("exactly one of --approve or --deny is required");
        return;
    }
    let Some(client) = require_gateway().await else {
        return;
    };
    let body = json!({ "approved": args.approve });
    match client.post(&format!("/api/v1/approvals/{}", args.call_id), body).await {
        Ok(_) => println!(
            "{} call {}.",
            if args.approve { "Approved" } else { "Denied" },
            args.call_id
        ),
        Err(e) => print_err(&format!("failed to resolve approval: {e}")),
    }
}

// ---------------------------------------------------------------------------
// Activity
// ---------------------------------------------------------------------------

fn activity_query_string(args: &ActivityArgs) -> String {
    let mut parts = Vec::new();
    if let Some(s) = &args.session {
        parts.push(format!("session_id={s}"));
    }
    if let Some(t) = &args.tool {
        parts.push(format!("tool={t}"));
    }
    if let Some(s) = &args.status {
        parts.push(format!("status={s}"));
    }
    if args.flagged_only {
        parts.push("flagged_only=true".to_string());
    }
    if parts.is_empty() { String::new() } else { format!("?{}", parts.join("&")) }
}

async fn handle_activity(args: &ActivityArgs, raw: bool, json_mode: bool) {
    let Some(client) = require_gateway().await else {
        return;
    };

    match args.action.as_str() {
        "list" => match client.get(&format!("/api/v1/tool-activity{}", activity_query_string(args))).await {
            Ok(v) => {
                if json_mode || raw {
                    print_value(&v);
                    return;
                }
                let entries = v.get("entries").and_then(|e| e.as_array()).cloned().unwrap_or_default();
                if entries.is_empty() {
                    println!("No tool activity.");
                    return;
                }
                println!("{:<14} {:<20} {:<10} {:<18} Risk", "ID", "Tool", "Status", "Session");
                println!("{}", "-".repeat(70));
                for e in &entries {
                    println!(
                        "{:<14} {:<20} {:<10} {:<18} {}",
                        e.get("id").and_then(|v| v.as_str()).unwrap_or("-"),
                        e.get("tool").and_then(|v| v.as_str()).unwrap_or("-"),
                        e.get("status").and_then(|v| v.as_str()).unwrap_or("-"),
                        e.get("session_id").and_then(|v| v.as_str()).unwrap_or("-"),
                        e.get("risk_score").and_then(|v| v.as_u64()).unwrap_or(0),
                    );
                }
            }
            Err(e) => print_err(&format!("failed to list activity: {e}")),
        },
        "summary" => match client.get("/api/v1/tool-activity/summary").await {
            Ok(v) => print_value(&v),
            Err(e) => print_err(&format!("failed to fetch summary: {e}")),
        },
        "timeline" => match client.get(&format!("/api/v1/tool-activity/timeline?bucket={}", args.bucket)).await {
            Ok(v) => print_value(&v),
            Err(e) => print_err(&format!("failed to fetch timeline: {e}")),
        },
        "export" => match client.get_text(&format!("/api/v1/tool-activity/export{}", activity_query_string(args))).await {
            Ok(csv) => print!("{csv}"),
            Err(e) => print_err(&format!("failed to export activity: {e}")),
        },
        "show" => {
            let Some(id) = &args.id else {
                print_err("provide entry id: wardenloop activity show <id>");
                return;
            };
            match client.get(&format!("/api/v1/tool-activity/{id}")).await {
                Ok(v) => print_value(&v),
                Err(e) => print_err(&format!("failed to fetch entry: {e}")),
            }
        }
        "flag" => {
            let Some(id) = &args.id else {
                print_err("provide entry id: wardenloop activity flag <id>");
                return;
            };
            match client
                .post(&format!("/api/v1/tool-activity/{id}/flag"), json!({ "reason": args.reason }))
                .await
            {
                Ok(_) => println!("Flagged {id}."),
                Err(e) => print_err(&format!("failed to flag entry: {e}")),
            }
        }
        "unflag" => {
            let Some(id) = &args.id else {
                print_err("provide entry id: wardenloop activity unflag <id>");
                return;
            };
            match client.post(&format!("/api/v1/tool-activity/{id}/unflag"), json!({})).await {
                Ok(_) => println!("Unflagged {id}."),
                Err(e) => print_err(&format!("failed to unflag entry: {e}")),
            }
        }
        other => print_err(&format!(
            "unknown activity action '{other}'. Use: list | summary | timeline | show | flag | unflag | export"
        )),
    }
}

// ---------------------------------------------------------------------------
// Schedule — operates directly on the persisted task table (same JSON
// format and path the daemon's `TokioScheduler` reads at startup).
// ---------------------------------------------------------------------------

fn handle_schedule(args: &ScheduleArgs, raw: bool, json_mode: bool) {
    let config = loader::load_config(&config_path()).unwrap_or_default();
    let path = scheduler_path(&config);

    match args.action.as_str() {
        "list" => {
            let tasks = load_scheduled_tasks(&path);
            if json_mode || raw {
                print_value(&json!(tasks));
                return;
            }
            if tasks.is_empty() {
                println!("No scheduled tasks.");
                return;
            }
            println!("{:<38} {:<10} Description", "ID", "Enabled");
            println!("{}", "-".repeat(70));
            for t in &tasks {
                println!("{:<38} {:<10} {}", t.id, if t.enabled { "yes" } else { "no" }, t.description);
            }
        }
        "add" => {
            let Some(description) = &args.description else {
                print_err("--description is required for 'add'");
                return;
            };
            let Some(prompt) = &args.prompt else {
                print_err("--prompt is required for 'add'");
                return;
            };
            if let Some(cron) = &args.cron {
                if let Err(e) = wardenloop::scheduler::tokio_scheduler::validate_cron_interval(cron) {
                    print_err(&e);
                    return;
                }
            } else if args.run_at.is_none() {
                print_err("either --cron or --run-at is required for 'add'");
                return;
            }
            let run_at = match &args.run_at {
                Some(s) => match chrono::DateTime::parse_from_rfc3339(s) {
                    Ok(dt) => Some(dt.with_timezone(&chrono::Utc)),
                    Err(e) => {
                        print_err(&format!("invalid --run-at timestamp: {e}"));
                        return;
                    }
                },
                None => None,
            };
            let mut tasks = load_scheduled_tasks(&path);
            let task = ScheduledTask {
                id: uuid::Uuid::new_v4().to_string(),
                description: description.clone(),
                prompt: prompt.clone(),
                cron: args.cron.clone(),
                run_at,
                last_run: None,
                enabled: true,
                created_at: chrono::Utc::now(),
            };
            let id = task.id.clone();
            tasks.push(task);
            match save_scheduled_tasks(&path, &tasks) {
                Ok(()) => println!("Created task {id}."),
                Err(e) => print_err(&e),
            }
        }
        "toggle" => {
            let Some(id) = &args.id else {
                print_err("provide task id: wardenloop schedule toggle <id>");
                return;
            };
            let mut tasks = load_scheduled_tasks(&path);
            match tasks.iter_mut().find(|t| &t.id == id) {
                Some(t) => {
                    t.enabled = !t.enabled;
                    let enabled = t.enabled;
                    match save_scheduled_tasks(&path, &tasks) {
                        Ok(()) => println!("Task {id} is now {}.", if enabled { "enabled" } else { "disabled" }),
                        Err(e) => print_err(&e),
                    }
                }
                None => print_err(&format!("task '{id}' not found")),
            }
        }
        "remove" => {
            let Some(id) = &args.id else {
                print_err("provide task id: wardenloop schedule remove <id>");
                return;
            };
            let mut tasks = load_scheduled_tasks(&path);
            let before = tasks.len();
            tasks.retain(|t| &t.id != id);
            if tasks.len() == before {
                print_err(&format!("task '{id}' not found"));
                return;
            }
            match save_scheduled_tasks(&path, &tasks) {
                Ok(()) => println!("Removed task {id}."),
                Err(e) => print_err(&e),
            }
        }
        "history" => {
            print_err("task run history is only tracked in-memory by a running daemon; use `activity list` for the durable audit trail");
        }
        other => print_err(&format!("unknown schedule action '{other}'. Use: list | add | toggle | remove | history")),
    }
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

fn handle_channel(args: &ChannelArgs) {
    match args.action.as_str() {
        "list" => {
            let mut compiled = Vec::new();
            if cfg!(feature = "channels-telegram") {
                compiled.push("telegram");
            }
            if cfg!(feature = "channels-discord") {
                compiled.push("discord");
            }
            if cfg!(feature = "channels-matrix") {
                compiled.push("matrix");
            }
            if cfg!(feature = "channels-slack") {
                compiled.push("slack");
            }
            if compiled.is_empty() {
                println!("No channel adapters compiled in. Rebuild with --features channels-telegram (or -discord/-matrix/-slack).");
            } else {
                println!("Compiled-in channel adapters: {}", compiled.join(", "));
            }
            println!("Channels are registered with the running daemon's ChannelManager by the host integration.");
        }
        other => print_err(&format!("unknown channel action '{other}'. Use: list")),
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

fn handle_config(args: &ConfigArgs, json_mode: bool) {
    let path = config_path();
    let config = loader::load_config(&path).unwrap_or_default();

    match args.action.as_str() {
        "show" => {
            if json_mode {
                print_value(&serde_json::to_value(&config).unwrap_or_default());
            } else {
                println!("{}", toml::to_string_pretty(&config).unwrap_or_default());
            }
        }
        "path" => println!("{}", path.display()),
        "set-strategy" => {
            let Some(value) = &args.value else {
                print_err("provide a strategy: wardenloop config set-strategy <allow|deny|filter|aitl|pitl|hitl>");
                return;
            };
            let Some(strategy) = parse_strategy(value) else {
                print_err(&format!("unknown strategy '{value}'"));
                return;
            };
            let mut config = config;
            config.guardrails.default_strategy = strategy;
            match loader::save_config(&path, &config) {
                Ok(()) => println!("Default strategy set to {value}."),
                Err(e) => print_err(&e),
            }
        }
        "set-security-level" => {
            let Some(value) = &args.value else {
                print_err("provide a level: wardenloop config set-security-level <readonly|supervised|full>");
                return;
            };
            let mut config = config;
            config.security.autonomy_level = value.clone();
            match loader::save_config(&path, &config) {
                Ok(()) => println!("Security level set to {value}."),
                Err(e) => print_err(&e),
            }
        }
        other => print_err(&format!(
            "unknown config action '{other}'. Use: show | path | set-strategy | set-security-level"
        )),
    }
}

// ---------------------------------------------------------------------------
// Interactive chat shell
// ---------------------------------------------------------------------------

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

async fn stream_chat_reply(text: &str, ws: &mut WsStream) {
    let msg = json!({ "type": "send", "text": text }).to_string();
    if ws.send(Message::Text(msg)).await.is_err() {
        print_err("WebSocket send failed — is the daemon still running?");
        return;
    }

    while let Some(frame) = ws.next().await {
        let text = match frame {
            Ok(Message::Text(t)) => t,
            Ok(Message::Close(_)) | Err(_) => break,
            _ => continue,
        };
        let v: Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(_) => continue,
        };
        match v.get("type").and_then(|t| t.as_str()).unwrap_or("") {
            "message" => {
                if let Some(content) = v.get("content").and_then(|m| m.as_str()) {
                    println!("{content}");
                }
                break;
            }
            "delta" => {
                if let Some(content) = v.get("content").and_then(|m| m.as_str()) {
                    print!("{content}");
                    let _ = io::stdout().flush();
                }
            }
            "done" => break,
            "event" => {
                let kind = v.get("event").and_then(|e| e.get("event")).and_then(|k| k.as_str()).unwrap_or("event");
                eprintln!("\x1b[2m[{kind}]\x1b[0m");
            }
            "error" => {
                let msg = v.get("content").and_then(|s| s.as_str()).unwrap_or("unknown error");
                print_err(msg);
                break;
            }
            _ => {}
        }
    }
}

async fn run_repl() {
    let is_tty = io::stdin().is_terminal();

    if is_tty {
        println!("Wardenloop interactive chat shell. Type 'help' for commands, 'exit' to quit.");
    }

    let conn_info = if let Some(port) = is_daemon_running() {
        read_token().map(|token| (format!("http://127.0.0.1:{port}"), token))
    } else {
        if is_tty {
            eprintln!("Gateway not running. Start it with: wardenloop daemon start");
        }
        None
    };

    let mut ws_stream: Option<WsStream> = None;
    if let Some((ref base_url, ref token)) = conn_info {
        let ws_url = format!("{}/api/v1/ws?token={}", base_url.replace("http://", "ws://"), token);
        match connect_async(&ws_url).await {
            Ok((stream, _)) => {
                if is_tty {
                    println!("Connected to daemon. Streaming enabled.\n");
                }
                ws_stream = Some(stream);
            }
            Err(e) => {
                if is_tty {
                    eprintln!("WebSocket connect failed: {e}. Subcommands still work.\n");
                }
            }
        }
    }

    if !is_tty {
        let mut input = String::new();
        for line in io::stdin().lock().lines() {
            match line {
                Ok(l) => {
                    input.push_str(&l);
                    input.push('\n');
                }
                Err(_) => break,
            }
        }
        if let Some(ref mut ws) = ws_stream {
            stream_chat_reply(input.trim(), ws).await;
        } else {
            print!("{input}");
        }
        return;
    }

    let stdin = io::stdin();
    loop {
        print!("wardenloop> ");
        io::stdout().flush().unwrap_or_default();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                eprintln!("read error: {e}");
                break;
            }
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match trimmed {
            "exit" | "quit" | "q" => {
                println!("Goodbye.");
                break;
            }
            "help" | "?" => print_help(),
            _ => {
                let parts: Vec<&str> = std::iter::once("wardenloop").chain(trimmed.split_whitespace()).collect();
                match Cli::try_parse_from(&parts) {
                    Ok(cli) => {
                        if let Some(cmd) = &cli.command {
                            dispatch(cmd, cli.raw, cli.json).await;
                        }
                    }
                    Err(_) => match &mut ws_stream {
                        Some(ws) => stream_chat_reply(trimmed, ws).await,
                        None => eprintln!("Not connected to gateway. Start daemon: wardenloop daemon start"),
                    },
                }
            }
        }
    }
}

fn print_help() {
    println!(
        "Commands: daemon | guardrails | approval | activity | schedule | channel | config | exit\n\
         \n\
         guardrails list                                         — list the rule table\n\
         guardrails add <tool> --strategy <s> [--channel <c>] [--context <c>]\n\
         approval <call_id> --approve | --deny                   — resolve a pending approval\n\
         activity list | summary | timeline | show <id> | flag <id> | export\n\
         schedule list | add --description <d> --prompt <p> (--cron <expr> | --run-at <iso8601>)\n\
         schedule toggle <id> | remove <id>"
    );
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    let _ = rustls::crypto::ring::default_provider().install_default();
    wardenloop::plugins::logging::init();

    let cli = Cli::parse();

    match &cli.command {
        Some(command) => dispatch(command, cli.raw, cli.json).await,
        None => run_repl().await,
    }
}
