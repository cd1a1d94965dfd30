use std::{
    fs,
    net::SocketAddr,
    path::PathBuf,
    sync::Arc,
};

use axum::{
    Router,
    middleware,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

use crate::{
    activity::ToolActivityStore, agent::sdk::AgentSdk, approval::ApprovalBroker,
    event_bus::EventBus, guardrails::GuardrailsEngine, interceptor::InterceptorDeps,
};

use super::{
    auth::{auth_middleware, load_or_create_token},
    routes::{
        GatewayState, activity_sessions, activity_summary, activity_timeline, export_activity,
        flag_activity_entry, get_activity_entry, health, import_activity, list_activity,
        list_guardrails_rules, resolve_approval, unflag_activity_entry,
    },
    ws::ws_handler,
};

const DEFAULT_PORT: u16 = 18790;
const MAX_PORT_ATTEMPTS: u16 = 10;

/// Path to the PID file written on daemon start.
pub fn pid_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".wardenloop")
        .join("daemon.pid")
}

/// Start the HTTP gateway daemon, binding to `127.0.0.1` starting at port
/// [`DEFAULT_PORT`]. If that port is taken, increments up to
/// [`MAX_PORT_ATTEMPTS`] times before returning an error.
///
/// Writes `daemon.pid` on successful bind. Blocks until the server shuts down.
pub async fn start_gateway(
    bus: Arc<dyn EventBus>,
    activity: Arc<ToolActivityStore>,
    approvals: Arc<ApprovalBroker>,
    guardrails: Arc<GuardrailsEngine>,
    agent_sdk: Option<Arc<dyn AgentSdk>>,
    interceptor_deps: Option<InterceptorDeps>,
) -> Result<(), String> {
    // Ensure the token exists before accepting connections.
    load_or_create_token()?;

    let state = GatewayState {
        bus,
        activity,
        approvals,
        guardrails,
        agent_sdk,
        interceptor_deps,
    };

    let protected = Router::new()
        .route("/api/v1/ws", get(ws_handler))
        .route("/api/v1/tool-activity", get(list_activity).post(import_activity))
        .route("/api/v1/tool-activity/summary", get(activity_summary))
        .route("/api/v1/tool-activity/timeline", get(activity_timeline))
        .route("/api/v1/tool-activity/sessions", get(activity_sessions))
        .route("/api/v1/tool-activity/export", get(export_activity))
        .route(
            "/api/v1/tool-activity/{id}",
            get(get_activity_entry),
        )
        .route("/api/v1/tool-activity/{id}/flag", post(flag_activity_entry))
        .route("/api/v1/tool-activity/{id}/unflag", post(unflag_activity_entry))
        .route("/api/v1/guardrails/rules", get(list_guardrails_rules))
        .route("/api/v1/approvals/{call_id}", post(resolve_approval))
        .layer(middleware::from_fn(auth_middleware))
        .with_state(state.clone());

    let public = Router::new()
        .route("/api/v1/health", get(health))
        .with_state(state);

    let app = Router::new()
        .merge(public)
        .merge(protected)
        .layer(CorsLayer::permissive()); // Restrict to localhost in production.

    let listener = bind_with_fallback(DEFAULT_PORT).await?;
    let addr = listener.local_addr().map_err(|e| e.to_string())?;

    write_pid_file(addr.port())?;
    log::info!("Wardenloop daemon listening on {addr}");

    axum::serve(listener, app)
        .await
        .map_err(|e| format!("daemon error: {e}"))
}

async fn bind_with_fallback(start_port: u16) -> Result<TcpListener, String> {
    for offset in 0..MAX_PORT_ATTEMPTS {
        let port = start_port + offset;
        let addr: SocketAddr = format!("127.0.0.1:{port}").parse().expect("valid addr");
        match TcpListener::bind(addr).await {
            Ok(listener) => return Ok(listener),
            Err(_) if offset + 1 < MAX_PORT_ATTEMPTS => continue,
            Err(e) => {
                return Err(format!(
                    "could not bind to any port in {start_port}–{}: {e}",
                    start_port + MAX_PORT_ATTEMPTS - 1
                ));
            }
        }
    }
    unreachable!()
}

fn write_pid_file(port: u16) -> Result<(), String> {
    let path = pid_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("failed to create .wardenloop dir: {e}"))?;
    }
    let content = format!("{}\n{}\n", std::process::id(), port);
    fs::write(&path, content)
        .map_err(|e| format!("failed to write PID file: {e}"))
}
