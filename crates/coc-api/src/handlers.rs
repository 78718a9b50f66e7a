//! Request handlers, pagination, and error-to-status mapping.

use std::fs;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use coc_core::event::ProtocolEvent;
use coc_core::ledger::Ledger;
use coc_core::schema::HEX_64;
use coc_core::trace::{TraceSession, TraceStatus, TraceStore};
use coc_core::verifier::{Verifier, VerifyOptions};
use coc_core::{artifact::ArtifactStore, policy::PolicyProfile};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::ApiState;

/// Default page size for event listings.
const DEFAULT_LIMIT: usize = 100;

/// Maximum page size for event listings.
const MAX_LIMIT: usize = 1000;

/// API error with an HTTP status mapping.
#[derive(Debug, thiserror::Error)]
pub(crate) enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(message) => {
                warn!(error = %message, "internal API error");
                StatusCode::INTERNAL_SERVER_ERROR
            },
        };
        let body = Json(serde_json::json!({"error": self.to_string()}));
        (status, body).into_response()
    }
}

/// One row of `GET /api/traces`.
#[derive(Debug, Serialize)]
pub(crate) struct TraceListEntry {
    trace_id: String,
    task_id: String,
    started_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    ended_at: Option<String>,
    status: TraceStatus,
    head_event_hash: String,
    event_count: u64,
    artifact_count: u64,
    policy_profile: PolicyProfile,
}

impl From<TraceSession> for TraceListEntry {
    fn from(session: TraceSession) -> Self {
        Self {
            trace_id: session.trace_id,
            task_id: session.task_id,
            started_at: session.started_at,
            ended_at: session.ended_at,
            status: session.status,
            head_event_hash: session.head_event_hash,
            event_count: session.event_count,
            artifact_count: session.artifact_count,
            policy_profile: session.policy_profile,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct TraceListResponse {
    items: Vec<TraceListEntry>,
}

/// Query parameters of `GET /api/traces/{trace_id}/events`.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct EventsQuery {
    cursor: Option<String>,
    limit: Option<usize>,
    #[serde(rename = "type")]
    event_type: Option<String>,
    role: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct EventsPage {
    items: Vec<ProtocolEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_cursor: Option<String>,
}

/// Body of `POST /api/traces/{trace_id}/verify`.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct VerifyRequest {
    #[serde(default)]
    policy_profile: Option<PolicyProfile>,
    #[serde(default)]
    allow_incomplete_finalization: bool,
}

fn load_session(state: &ApiState, trace_id: &str) -> Result<TraceSession, ApiError> {
    TraceStore::new(&state.home)
        .load_trace(trace_id)
        .map_err(|e| match e {
            coc_core::trace::TraceStoreError::NotFound { trace_id } => {
                ApiError::NotFound(format!("trace {trace_id} not found"))
            },
            other => ApiError::Internal(other.to_string()),
        })
}

/// Encodes a decimal event offset as an opaque cursor.
fn encode_cursor(offset: usize) -> String {
    URL_SAFE_NO_PAD.encode(offset.to_string())
}

/// Decodes an opaque cursor back into an event offset.
fn decode_cursor(cursor: &str) -> Result<usize, ApiError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(cursor)
        .map_err(|_| ApiError::BadRequest("malformed cursor".to_string()))?;
    let decimal = String::from_utf8(bytes)
        .map_err(|_| ApiError::BadRequest("malformed cursor".to_string()))?;
    decimal
        .parse()
        .map_err(|_| ApiError::BadRequest("malformed cursor".to_string()))
}

/// `GET /api/traces`
pub(crate) async fn list_traces(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<TraceListResponse>, ApiError> {
    let sessions = TraceStore::new(&state.home)
        .list_traces()
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(TraceListResponse {
        items: sessions.into_iter().map(TraceListEntry::from).collect(),
    }))
}

/// `GET /api/traces/{trace_id}`
pub(crate) async fn get_trace(
    State(state): State<Arc<ApiState>>,
    Path(trace_id): Path<String>,
) -> Result<Json<TraceSession>, ApiError> {
    load_session(&state, &trace_id).map(Json)
}

/// `GET /api/traces/{trace_id}/events`
pub(crate) async fn list_events(
    State(state): State<Arc<ApiState>>,
    Path(trace_id): Path<String>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<EventsPage>, ApiError> {
    load_session(&state, &trace_id)?;
    let events = Ledger::new(&state.home)
        .read_events(&trace_id, false)
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    // Pre-filter by type and role before slicing the page.
    let filtered: Vec<ProtocolEvent> = events
        .into_iter()
        .filter(|e| {
            query
                .event_type
                .as_deref()
                .is_none_or(|t| e.event_type.as_str() == t)
        })
        .filter(|e| {
            query
                .role
                .as_deref()
                .is_none_or(|r| e.actor.role.to_string() == r)
        })
        .collect();

    let offset = match &query.cursor {
        Some(cursor) => decode_cursor(cursor)?,
        None => 0,
    };
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);

    let next_offset = offset.saturating_add(limit);
    let next_cursor = (next_offset < filtered.len()).then(|| encode_cursor(next_offset));
    let items: Vec<ProtocolEvent> = filtered
        .into_iter()
        .skip(offset)
        .take(limit)
        .collect();

    Ok(Json(EventsPage { items, next_cursor }))
}

/// `GET /api/traces/{trace_id}/events/{event_id}`
pub(crate) async fn get_event(
    State(state): State<Arc<ApiState>>,
    Path((trace_id, event_id)): Path<(String, String)>,
) -> Result<Json<ProtocolEvent>, ApiError> {
    load_session(&state, &trace_id)?;
    let events = Ledger::new(&state.home)
        .read_events(&trace_id, false)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    events
        .into_iter()
        .find(|e| e.event_id == event_id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("event {event_id} not found")))
}

/// `GET /api/artifacts/{artifact_hash}/metadata`
pub(crate) async fn get_artifact_metadata(
    State(state): State<Arc<ApiState>>,
    Path(artifact_hash): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if !HEX_64.is_match(&artifact_hash) {
        return Err(ApiError::BadRequest(
            "artifact hash must be lowercase 64-char hex".to_string(),
        ));
    }
    let store = ArtifactStore::new(&state.home);
    let sidecar = store.read_descriptor(&artifact_hash).map_err(|e| match e {
        coc_core::artifact::ArtifactStoreError::NotFound { hash } => {
            ApiError::NotFound(format!("artifact {hash} not found"))
        },
        other => ApiError::Internal(other.to_string()),
    })?;
    serde_json::to_value(sidecar)
        .map(Json)
        .map_err(|e| ApiError::Internal(e.to_string()))
}

/// `GET /api/traces/{trace_id}/reports/latest`
pub(crate) async fn get_latest_report(
    State(state): State<Arc<ApiState>>,
    Path(trace_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    load_session(&state, &trace_id)?;
    let path = TraceStore::new(&state.home).latest_report_path(&trace_id);
    read_report_file(&path)
}

/// `GET /api/traces/{trace_id}/reports/{report_id}`
pub(crate) async fn get_report(
    State(state): State<Arc<ApiState>>,
    Path((trace_id, report_id)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    load_session(&state, &trace_id)?;
    // Report ids are `report_<ULID>`; anything else cannot name a report
    // file and is rejected before touching the filesystem.
    let well_formed = report_id
        .strip_prefix("report_")
        .is_some_and(|ulid| ulid.len() == 26 && ulid.chars().all(|c| c.is_ascii_alphanumeric()));
    if !well_formed {
        return Err(ApiError::BadRequest("malformed report id".to_string()));
    }
    let path = TraceStore::new(&state.home)
        .reports_dir(&trace_id)
        .join(format!("{report_id}.json"));
    read_report_file(&path)
}

fn read_report_file(path: &std::path::Path) -> Result<Json<Value>, ApiError> {
    if !path.exists() {
        return Err(ApiError::NotFound("report not found".to_string()));
    }
    let contents = fs::read_to_string(path).map_err(|e| ApiError::Internal(e.to_string()))?;
    serde_json::from_str(&contents)
        .map(Json)
        .map_err(|e| ApiError::Internal(e.to_string()))
}

/// `POST /api/traces/{trace_id}/verify`
pub(crate) async fn verify_trace(
    State(state): State<Arc<ApiState>>,
    Path(trace_id): Path<String>,
    body: Option<Json<VerifyRequest>>,
) -> Result<Json<Value>, ApiError> {
    load_session(&state, &trace_id)?;
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let home = state.home.clone();

    // The verifier is CPU- and file-bound; keep it off the async runtime.
    let report = tokio::task::spawn_blocking(move || {
        Verifier::new(&home).verify(
            &trace_id,
            &VerifyOptions {
                policy_profile: request.policy_profile,
                allow_incomplete_finalization: request.allow_incomplete_finalization,
                ..VerifyOptions::default()
            },
        )
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))?
    .map_err(|e| ApiError::Internal(e.to_string()))?;

    serde_json::to_value(report)
        .map(Json)
        .map_err(|e| ApiError::Internal(e.to_string()))
}
