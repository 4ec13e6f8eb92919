use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use persona_relay_core::conversation::ConversationRequest;
use persona_relay_model::ChatTurn;
use serde::Deserialize;

use super::{ApiError, AppState};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ChatBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    history: Option<Vec<ChatTurn>>,
    #[serde(default)]
    session_id: Option<String>,
}

pub(super) async fn chat(
    State(state): State<AppState>,
    body: Result<Json<ChatBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = body.map_err(|err| {
        debug!("rejecting chat body: {err}");
        ApiError::bad_request("Invalid request body")
    })?;

    let mut req = ConversationRequest::new(body.message)
        .with_history(body.history.unwrap_or_default());
    if let Some(session_id) = body.session_id {
        req = req.with_session_id(session_id);
    }

    let stream = state.chat.start(req).await?;
    let headers = [
        (header::CONTENT_TYPE, "text/event-stream"),
        (header::CACHE_CONTROL, "no-cache"),
    ];
    Ok((headers, Body::from_stream(stream)).into_response())
}
