use axum::Json;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, header};
use chrono::{DateTime, SecondsFormat};
use persona_relay_model::{ChatLogEntry, SessionSummary};
use serde::{Deserialize, Serialize};

use super::{ApiError, AppState};

/// Sessions listed when no valid `limit` is given.
pub const DEFAULT_SESSION_LIMIT: usize = 50;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct LogsQuery {
    session_id: Option<String>,
    limit: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionMessages {
    session_id: String,
    messages: Vec<ChatLogEntry>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionListItem {
    session_id: String,
    last_active: String,
}

#[derive(Serialize)]
struct SessionList {
    total: usize,
    sessions: Vec<SessionListItem>,
}

pub(super) async fn logs(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<LogsQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !is_authorized(&headers, state.logs_secret.as_deref()) {
        return Err(ApiError::unauthorized());
    }
    let Some(reader) = &state.logs else {
        error!("chat log store is not configured");
        return Err(ApiError::internal("Log store not configured"));
    };

    let body = match query.session_id.filter(|id| !id.is_empty()) {
        Some(session_id) => {
            let messages =
                reader.session_messages(&session_id).await.map_err(|err| {
                    error!("failed to read session {session_id}: {err}");
                    ApiError::internal("Internal server error")
                })?;
            serde_json::to_value(SessionMessages {
                session_id,
                messages,
            })
        }
        None => {
            let limit = parse_limit(query.limit.as_deref());
            let sessions =
                reader.recent_sessions(limit).await.map_err(|err| {
                    error!("failed to list sessions: {err}");
                    ApiError::internal("Internal server error")
                })?;
            let sessions: Vec<_> =
                sessions.into_iter().map(list_item).collect();
            serde_json::to_value(SessionList {
                total: sessions.len(),
                sessions,
            })
        }
    };
    body.map(Json)
        .map_err(|_| ApiError::internal("Internal server error"))
}

fn is_authorized(headers: &HeaderMap, secret: Option<&str>) -> bool {
    let Some(secret) = secret else {
        return false;
    };
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .is_some_and(|token| token == secret)
}

/// Parses the `limit` parameter. Missing, invalid or zero means the
/// default.
pub(super) fn parse_limit(limit: Option<&str>) -> usize {
    limit
        .and_then(|limit| limit.trim().parse::<usize>().ok())
        .filter(|limit| *limit > 0)
        .unwrap_or(DEFAULT_SESSION_LIMIT)
}

fn list_item(summary: SessionSummary) -> SessionListItem {
    let last_active = DateTime::from_timestamp_millis(summary.last_active_ms)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true);
    SessionListItem {
        session_id: summary.session_id,
        last_active,
    }
}
