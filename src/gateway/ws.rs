use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;

use crate::agent::{demux::DemuxOutput, sdk::AgentSession, EventDemux};
use crate::event_bus::AppEvent;
use crate::guardrails::ExecutionContext;
use crate::interceptor::{InterceptorHook, ToolInterceptor};

use super::routes::GatewayState;

/// §5: "response timeout at 360 seconds" — bounds one turn's `send()` call
/// so a hung agent session cannot wedge the WebSocket handler forever.
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(360);

/// WebSocket upgrade handler at `GET /api/v1/ws` — the Chat protocol.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<GatewayState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

// ─── Incoming command types ──────────────────────────────────────────────────

/// Envelope for all WebSocket commands sent by clients.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsCommand {
    NewSession,
    ResumeSession {
        session_id: String,
    },
    Send {
        text: String,
        session_id: Option<String>,
    },
    ApproveTool {
        call_id: String,
        response: bool,
    },
    Ping,
}

// ─── Socket handler ──────────────────────────────────────────────────────────

async fn handle_socket(mut socket: WebSocket, state: GatewayState) {
    let mut rx = state.bus.subscribe();
    // One agent session per connection, created lazily on the first `Send`
    // and reused across subsequent sends so the conversation keeps context.
    let mut session: Option<Box<dyn AgentSession>> = None;

    loop {
        tokio::select! {
            // Forward bus events to the client, near-verbatim per the
            // AppEvent/event-subtype mapping.
            event = rx.recv() => {
                match event {
                    Ok(ev) => {
                        let Some(payload) = to_ws_frame(&ev) else { continue };
                        if socket.send(Message::Text(payload)).await.is_err() {
                            break; // Client disconnected.
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        log::warn!("ws handler lagged, missed {n} events");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            // Parse and dispatch commands from the client.
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_client_command(&text, &state, &mut socket, &mut session).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    _ => {}
                }
            }
        }
    }
}

/// Drive one turn of the interactive agent session, if `state` has an
/// [`AgentSdk`](crate::agent::sdk::AgentSdk) wired in. Creates the session
/// lazily (and wires a [`ToolInterceptor`] scoped to
/// `ExecutionContext::Interactive` through [`InterceptorHook`]), sends
/// `text`, drains its per-turn event stream through the
/// [`EventDemux`](crate::agent::EventDemux), then forwards the final reply.
/// A no-op if no Agent SDK is configured — the bare `ChannelMessage`
/// published by the caller is the only effect in that case.
async fn drive_agent_turn(
    text: &str,
    session_id: &str,
    state: &GatewayState,
    socket: &mut WebSocket,
    session: &mut Option<Box<dyn AgentSession>>,
) {
    let (Some(sdk), Some(deps)) = (state.agent_sdk.as_ref(), state.interceptor_deps.as_ref()) else {
        return;
    };

    if session.is_none() {
        let interceptor = Arc::new(ToolInterceptor::new(deps.clone(), ExecutionContext::Interactive));
        let hook: Arc<dyn crate::agent::sdk::PreToolUseHook> =
            Arc::new(InterceptorHook::new(interceptor, session_id.to_string()));
        match sdk.create_session(session_id, hook).await {
            Ok(s) => *session = Some(s),
            Err(e) => {
                let _ = socket.send(Message::Text(error_frame(&format!("failed to start agent session: {e}")))).await;
                return;
            }
        }
    }

    let active = session.as_ref().expect("populated above if absent");
    let demux_rx = active.events();

    let reply = match tokio::time::timeout(RESPONSE_TIMEOUT, active.send(text)).await {
        Ok(Ok(reply)) => reply,
        Ok(Err(e)) => {
            let _ = socket.send(Message::Text(error_frame(&format!("agent session error: {e}")))).await;
            return;
        }
        Err(_) => {
            active.abort().await;
            *session = None;
            let _ = socket
                .send(Message::Text(error_frame("response timed out after 360s, session reset")))
                .await;
            return;
        }
    };

    // Drain this turn's deduplicated events, bounded so a session that
    // never emits a terminal event can't wedge the handler after `send`
    // has already resolved.
    let (out_tx, mut out_rx) = mpsc::unbounded_channel();
    tokio::spawn(EventDemux::run(demux_rx, out_tx));
    loop {
        match tokio::time::timeout(Duration::from_millis(200), out_rx.recv()).await {
            Ok(Some(item)) => {
                let frame = match item {
                    DemuxOutput::Delta(chunk) => json!({ "type": "message_delta", "content": chunk }),
                    DemuxOutput::Event(ev) => json!({ "type": "event", "event": ev }),
                };
                if socket.send(Message::Text(frame.to_string())).await.is_err() {
                    return;
                }
            }
            Ok(None) | Err(_) => break,
        }
    }

    let final_frame = json!({ "type": "message", "content": reply });
    let _ = socket.send(Message::Text(final_frame.to_string())).await;
}

fn error_frame(message: &str) -> String {
    json!({ "type": "error", "content": message }).to_string()
}

/// Wrap an [`AppEvent`] in the Chat protocol's `event{event:<name>,…}`
/// outgoing envelope. `SystemReady`/`HeartbeatTick` are transport-internal
/// and are not forwarded to clients.
fn to_ws_frame(event: &AppEvent) -> Option<String> {
    match event {
        AppEvent::SystemReady | AppEvent::HeartbeatTick { .. } => None,
        AppEvent::AgentComplete { message, .. } => {
            Some(serde_json::json!({ "type": "message", "content": message }).to_string())
        }
        AppEvent::SystemError { message } => {
            Some(serde_json::json!({ "type": "error", "content": message }).to_string())
        }
        other => serde_json::to_value(other).ok().map(|mut v| {
            if let Some(obj) = v.as_object_mut() {
                if let Some(kind) = obj.remove("type") {
                    obj.insert("event".to_string(), kind);
                }
            }
            serde_json::json!({ "type": "event", "event": v }).to_string()
        }),
    }
}

/// Parse a JSON command from the client and act on it.
async fn handle_client_command(
    raw: &str,
    state: &GatewayState,
    socket: &mut WebSocket,
    session: &mut Option<Box<dyn AgentSession>>,
) {
    let cmd: WsCommand = match serde_json::from_str(raw) {
        Ok(c) => c,
        Err(e) => {
            let err_msg = serde_json::json!({
                "type": "error",
                "content": format!("invalid command: {e}"),
            });
            let _ = socket.send(Message::Text(err_msg.to_string())).await;
            return;
        }
    };

    match cmd {
        WsCommand::NewSession => {
            let session_id = uuid::Uuid::new_v4().to_string();
            let ack = serde_json::json!({ "type": "session_created", "session_id": session_id });
            let _ = socket.send(Message::Text(ack.to_string())).await;
        }
        WsCommand::ResumeSession { session_id } => {
            let ack = serde_json::json!({ "type": "session_resumed", "session_id": session_id });
            let _ = socket.send(Message::Text(ack.to_string())).await;
        }
        WsCommand::Send { text, session_id } => {
            let sid = session_id.unwrap_or_default();
            let event = AppEvent::ChannelMessage {
                channel: "web".to_string(),
                from: sid.clone(),
                content: text.clone(),
                metadata: Default::default(),
            };
            if let Err(e) = state.bus.publish(event) {
                log::warn!("ws: failed to publish channel message: {e}");
            }
            drive_agent_turn(&text, &sid, state, socket, session).await;
        }
        WsCommand::ApproveTool { call_id, response } => {
            if let Err(e) = state.approvals.resolve(&call_id, response) {
                log::warn!("ws: approve_tool for unknown call_id {call_id}: {e}");
            }
        }
        WsCommand::Ping => {
            let pong = serde_json::json!({ "type": "pong" });
            let _ = socket.send(Message::Text(pong.to_string())).await;
        }
    }
}
