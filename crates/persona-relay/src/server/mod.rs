//! The HTTP surface: `/chat`, `/logs` and `/contact`.

mod chat;
mod contact;
mod error;
mod logs;

use std::sync::Arc;

use axum::Router;
use axum::http::{Method, StatusCode, header};
use axum::routing::{get, post};
use persona_relay_core::{ChatService, LogFailure};
use persona_relay_model::{ChatLogReader, Mailer};
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use error::ApiError;

/// Everything the handlers share. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    chat: ChatService,
    logs: Option<Arc<dyn ChatLogReader>>,
    logs_secret: Option<Arc<str>>,
    mailer: Option<Arc<dyn Mailer>>,
}

impl AppState {
    /// Creates a state with only the chat endpoint configured.
    pub fn new(chat: ChatService) -> Self {
        Self {
            chat,
            logs: None,
            logs_secret: None,
            mailer: None,
        }
    }

    /// Enables reading the chat logs.
    pub fn with_logs(mut self, logs: Arc<dyn ChatLogReader>) -> Self {
        self.logs = Some(logs);
        self
    }

    /// Sets the bearer secret guarding `/logs`. Without it, every
    /// request to `/logs` is unauthorized.
    pub fn with_logs_secret(mut self, secret: &str) -> Self {
        self.logs_secret = (!secret.is_empty()).then(|| secret.into());
        self
    }

    /// Enables the contact form.
    pub fn with_mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = Some(mailer);
        self
    }
}

/// Builds the router with permissive CORS on every response.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .route(
            "/chat",
            post(chat::chat)
                .options(preflight)
                .fallback(method_not_allowed),
        )
        .route(
            "/logs",
            get(logs::logs)
                .options(preflight)
                .fallback(method_not_allowed),
        )
        .route(
            "/contact",
            post(contact::contact)
                .options(preflight)
                .fallback(method_not_allowed),
        )
        .fallback(not_found)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Logs every failed chat log write until all senders are gone.
pub async fn drain_log_failures(
    mut failures: mpsc::UnboundedReceiver<LogFailure>,
) {
    while let Some(LogFailure { session_id, error }) = failures.recv().await {
        error!("failed to log an exchange of session {session_id}: {error}");
    }
}

async fn preflight() -> StatusCode {
    StatusCode::OK
}

async fn method_not_allowed() -> ApiError {
    ApiError::method_not_allowed()
}

async fn not_found() -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, "Not found")
}
