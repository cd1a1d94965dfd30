//! HTTP handlers: the Tool Activity audit API and daemon health.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    activity::{ActivityQuery, ToolActivityStore},
    agent::sdk::AgentSdk,
    approval::ApprovalBroker,
    event_bus::EventBus,
    guardrails::GuardrailsEngine,
    interceptor::InterceptorDeps,
};

/// Shared state handed to every gateway handler.
#[derive(Clone)]
pub struct GatewayState {
    pub bus: Arc<dyn EventBus>,
    pub activity: Arc<ToolActivityStore>,
    pub approvals: Arc<ApprovalBroker>,
    pub guardrails: Arc<GuardrailsEngine>,
    /// The Agent SDK driving interactive WebSocket sessions. `None` means
    /// the deployment hasn't wired one in — `Send` commands fall back to
    /// publishing a bare `ChannelMessage` with no agent turn.
    pub agent_sdk: Option<Arc<dyn AgentSdk>>,
    /// Shared auxiliaries for building a per-session `ExecutionContext::Interactive`
    /// `ToolInterceptor`, mirroring `SchedulerAuxiliaries`.
    pub interceptor_deps: Option<InterceptorDeps>,
}

// ─── Health ───────────────────────────────────────────────────────────────────

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "service": "wardenloop-daemon" }))
}

// ─── Tool Activity: list / filter ────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ActivityListParams {
    pub session_id: Option<String>,
    pub tool: Option<String>,
    pub category: Option<String>,
    pub status: Option<String>,
    #[serde(default)]
    pub flagged_only: bool,
    pub since: Option<f64>,
    pub model: Option<String>,
    pub interaction_type: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl From<ActivityListParams> for ActivityQuery {
    fn from(p: ActivityListParams) -> Self {
        let mut q = ActivityQuery {
            session_id: p.session_id,
            tool: p.tool,
            category: p.category,
            status: p.status,
            flagged_only: p.flagged_only,
            since: p.since,
            model: p.model,
            interaction_type: p.interaction_type,
            ..Default::default()
        };
        if let Some(limit) = p.limit {
            q.limit = limit;
        }
        if let Some(offset) = p.offset {
            q.offset = offset;
        }
        q
    }
}

pub async fn list_activity(
    State(state): State<GatewayState>,
    Query(params): Query<ActivityListParams>,
) -> impl IntoResponse {
    let query: ActivityQuery = params.into();
    let result = state.activity.query(&query);
    Json(json!({
        "status": "ok",
        "entries": result.entries,
        "total": result.total,
        "offset": result.offset,
        "limit": result.limit,
    }))
}

pub async fn activity_summary(State(state): State<GatewayState>) -> impl IntoResponse {
    Json(state.activity.get_summary())
}

#[derive(Debug, Deserialize)]
pub struct TimelineParams {
    #[serde(default = "default_bucket_minutes")]
    pub bucket: i64,
    pub since: Option<f64>,
    pub until: Option<f64>,
}

fn default_bucket_minutes() -> i64 {
    60
}

pub async fn activity_timeline(
    State(state): State<GatewayState>,
    Query(params): Query<TimelineParams>,
) -> impl IntoResponse {
    Json(state.activity.get_timeline(params.bucket, params.since, params.until))
}

pub async fn activity_sessions(State(state): State<GatewayState>) -> impl IntoResponse {
    let summary = state.activity.get_summary();
    Json(json!({ "sessions_with_activity": summary.sessions_with_activity }))
}

pub async fn export_activity(
    State(state): State<GatewayState>,
    Query(params): Query<ActivityListParams>,
) -> Response {
    let query: ActivityQuery = params.into();
    let csv = state.activity.export_csv(&query);
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"tool-activity.csv\"",
            ),
        ],
        csv,
    )
        .into_response()
}

pub async fn get_activity_entry(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> Response {
    match state.activity.get_entry(&id) {
        Some(entry) => Json(entry).into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({ "error": "not found" }))).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct FlagRequest {
    #[serde(default)]
    pub reason: String,
}

pub async fn flag_activity_entry(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
    Json(req): Json<FlagRequest>,
) -> Response {
    match state.activity.flag_entry(&id, &req.reason) {
        Ok(true) => Json(json!({ "status": "flagged" })).into_response(),
        Ok(false) => (StatusCode::NOT_FOUND, Json(json!({ "error": "not found" }))).into_response(),
        Err(e) => {
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() }))).into_response()
        }
    }
}

pub async fn unflag_activity_entry(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> Response {
    match state.activity.unflag_entry(&id) {
        Ok(true) => Json(json!({ "status": "unflagged" })).into_response(),
        Ok(false) => (StatusCode::NOT_FOUND, Json(json!({ "error": "not found" }))).into_response(),
        Err(e) => {
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() }))).into_response()
        }
    }
}

// ─── Tool Activity: backfill import ──────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct ImportEntry {
    pub session_id: String,
    pub tool: String,
    pub call_id: String,
    pub arguments: String,
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub interaction_type: String,
}

#[derive(Debug, Deserialize)]
pub struct ImportRequest {
    pub entries: Vec<ImportEntry>,
}

/// Backfill past tool calls a session already ran outside the gateway
/// (e.g. replayed from a transcript) into the activity store.
pub async fn import_activity(
    State(state): State<GatewayState>,
    Json(req): Json<ImportRequest>,
) -> Response {
    let mut imported = 0usize;
    for entry in req.entries {
        if state
            .activity
            .record_start(
                &entry.session_id,
                &entry.tool,
                &entry.call_id,
                &entry.arguments,
                None,
                &entry.model,
                &entry.interaction_type,
            )
            .is_err()
        {
            continue;
        }
        if state
            .activity
            .record_complete(&entry.call_id, &entry.result, "completed")
            .is_ok()
        {
            imported += 1;
        }
    }
    Json(json!({ "status": "ok", "imported": imported })).into_response()
}

// ─── Guardrails rule inspection ───────────────────────────────────────────────

pub async fn list_guardrails_rules(State(state): State<GatewayState>) -> impl IntoResponse {
    Json(json!({
        "rules": state.guardrails.list_rules(),
        "default_strategy": state.guardrails.default_strategy(),
    }))
}

// ─── Approvals ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ApprovalResponse {
    pub approved: bool,
}

pub async fn resolve_approval(
    State(state): State<GatewayState>,
    Path(call_id): Path<String>,
    Json(req): Json<ApprovalResponse>,
) -> Response {
    match state.approvals.resolve(&call_id, req.approved) {
        Ok(()) => Json(json!({ "status": "resolved" })).into_response(),
        Err(e) => (StatusCode::NOT_FOUND, Json(json!({ "error": e.to_string() }))).into_response(),
    }
}
