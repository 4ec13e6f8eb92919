use std::time::{SystemTime, UNIX_EPOCH};

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderMap, header};
use persona_relay_model::{ContactMessage, ErrorKind};
use serde::Deserialize;
use serde_json::{Value, json};

use super::{ApiError, AppState};

#[derive(Deserialize)]
pub(super) struct ContactBody {
    #[serde(default)]
    message: String,
}

pub(super) async fn contact(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<ContactBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) =
        body.map_err(|_| ApiError::bad_request("Invalid request body"))?;
    if body.message.trim().is_empty() {
        return Err(ApiError::bad_request("message is required"));
    }
    let Some(mailer) = &state.mailer else {
        error!("mail provider is not configured");
        return Err(ApiError::internal("Server configuration error"));
    };

    let message = ContactMessage {
        body: body.message,
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .map(ToOwned::to_owned),
        received_at_ms: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as i64)
            .unwrap_or_default(),
    };
    match mailer.send_contact(&message).await {
        Ok(()) => Ok(Json(json!({ "success": true }))),
        Err(err) if err.kind() == ErrorKind::Rejected => {
            error!("mail provider rejected a contact message: {err}");
            Err(ApiError::bad_gateway("Email send failed"))
        }
        Err(err) => {
            error!("failed to send a contact message: {err}");
            Err(ApiError::internal("Internal server error"))
        }
    }
}
