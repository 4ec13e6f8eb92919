use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use axum::response::Response;
use persona_relay::core::prompt::Persona;
use persona_relay::core::{ChatServiceBuilder, LogSink};
use persona_relay::server::{AppState, router};
use persona_relay_model::{ChatLogEntry, ErrorKind, Role};
use persona_relay_test_model::{
    MemoryLogStore, PresetChunk, PresetResponse, RecordingMailer,
    TestCompletionProvider,
};
use serde_json::{Value, json};
use tower::ServiceExt;

const ORIGIN: &str = "https://site.example.com";

fn hello_provider() -> TestCompletionProvider {
    TestCompletionProvider::new(PresetResponse::with_chunks([
        PresetChunk::delta("He"),
        PresetChunk::delta("llo"),
    ]))
}

fn chat_state(store: &MemoryLogStore) -> AppState {
    let chat = ChatServiceBuilder::with_persona(Persona::new("I am Kai."))
        .with_provider(hello_provider())
        .with_log_sink(LogSink::new(Arc::new(store.clone())))
        .build();
    AppState::new(chat)
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::ORIGIN, ORIGIN)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::USER_AGENT, "test-agent/1.0")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get_request(uri: &str, auth: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("GET")
        .uri(uri)
        .header(header::ORIGIN, ORIGIN);
    if let Some(auth) = auth {
        builder = builder.header(header::AUTHORIZATION, auth);
    }
    builder.body(Body::empty()).unwrap()
}

async fn send(app: &Router, req: Request<Body>) -> (Response<()>, Vec<u8>) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let (parts, body) = resp.into_parts();
    let bytes = to_bytes(body, usize::MAX).await.unwrap();
    (Response::from_parts(parts, ()), bytes.to_vec())
}

async fn send_json(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let (resp, body) = send(app, req).await;
    (resp.status(), serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_chat_streams_and_logs() {
    let store = MemoryLogStore::default();
    let app = router(chat_state(&store));

    let req = json_request(
        "POST",
        "/chat",
        json!({
            "message": "hi",
            "history": [{"role": "user", "content": "earlier"}],
            "sessionId": "abc",
        }),
    );
    let (resp, body) = send(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/event-stream");
    assert_eq!(resp.headers()[header::CACHE_CONTROL], "no-cache");
    assert_eq!(resp.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");

    let expected = format!(
        "{}{}data: [DONE]\n\n",
        PresetChunk::delta("He").raw,
        PresetChunk::delta("llo").raw,
    );
    assert_eq!(String::from_utf8(body).unwrap(), expected);

    assert!(store.wait_for_attempts(1, Duration::from_secs(1)).await);
    let exchanges = store.exchanges();
    assert_eq!(exchanges[0].0, "abc");
    assert_eq!(exchanges[0].1.user, "hi");
    assert_eq!(exchanges[0].1.assistant, "Hello");
}

#[tokio::test]
async fn test_chat_accepts_null_optionals() {
    let store = MemoryLogStore::default();
    let app = router(chat_state(&store));

    let req = json_request(
        "POST",
        "/chat",
        json!({"message": "hi", "history": null, "sessionId": null}),
    );
    let (resp, body) = send(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(body.ends_with(b"data: [DONE]\n\n"));
    assert_eq!(store.attempts(), 0);
}

#[tokio::test]
async fn test_chat_rejects_bad_input() {
    let store = MemoryLogStore::default();
    let app = router(chat_state(&store));

    for body in [json!({}), json!({"message": ""}), json!({"message": 42})] {
        let (status, body) =
            send_json(&app, json_request("POST", "/chat", body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    let req = Request::builder()
        .method("POST")
        .uri("/chat")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, _) = send_json(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(store.attempts(), 0);
}

#[tokio::test]
async fn test_wrong_method_and_preflight() {
    let app = router(chat_state(&MemoryLogStore::default()));

    let (status, body) = send_json(&app, get_request("/chat", None)).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(body, json!({"error": "Method not allowed"}));

    for uri in ["/chat", "/logs", "/contact"] {
        let req = Request::builder()
            .method("OPTIONS")
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let (resp, body) = send(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(body.is_empty());
    }

    let req = Request::builder()
        .method("OPTIONS")
        .uri("/chat")
        .header(header::ORIGIN, ORIGIN)
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .body(Body::empty())
        .unwrap();
    let (resp, _) = send(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
}

#[tokio::test]
async fn test_chat_without_credentials() {
    let chat = ChatServiceBuilder::with_persona(Persona::new("p")).build();
    let app = router(AppState::new(chat));
    let (status, body) =
        send_json(&app, json_request("POST", "/chat", json!({"message": "hi"})))
            .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_chat_upstream_rejection() {
    let chat = ChatServiceBuilder::with_persona(Persona::new("p"))
        .with_provider(TestCompletionProvider::new(PresetResponse::rejected(
            401,
            "Authentication Fails",
        )))
        .build();
    let app = router(AppState::new(chat));
    let (status, body) =
        send_json(&app, json_request("POST", "/chat", json!({"message": "hi"})))
            .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(
        body,
        json!({"error": "Upstream API error", "detail": "Authentication Fails"})
    );
}

fn logs_app(store: Option<&MemoryLogStore>, secret: Option<&str>) -> Router {
    let chat = ChatServiceBuilder::with_persona(Persona::new("p")).build();
    let mut state = AppState::new(chat);
    if let Some(store) = store {
        state = state.with_logs(Arc::new(store.clone()));
    }
    if let Some(secret) = secret {
        state = state.with_logs_secret(secret);
    }
    router(state)
}

#[tokio::test]
async fn test_logs_requires_secret() {
    let store = MemoryLogStore::default();

    let app = logs_app(Some(&store), Some("s3cret"));
    let (status, body) = send_json(&app, get_request("/logs", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({"error": "Unauthorized"}));
    let (status, _) =
        send_json(&app, get_request("/logs", Some("Bearer wrong"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let app = logs_app(Some(&store), None);
    let (status, _) =
        send_json(&app, get_request("/logs", Some("Bearer "))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let app = logs_app(None, Some("s3cret"));
    let (status, _) =
        send_json(&app, get_request("/logs", Some("Bearer s3cret"))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_logs_lists_and_reads_sessions() {
    let store = MemoryLogStore::default();
    let entry = |role, content: &str| ChatLogEntry {
        role,
        content: content.to_owned(),
        ts: 1_704_067_200_000,
    };
    store.insert_session(
        "old",
        vec![entry(Role::User, "a"), entry(Role::Assistant, "b")],
        1_704_067_200_000,
    );
    store.insert_session(
        "new",
        vec![entry(Role::User, "hi"), entry(Role::Assistant, "Hello")],
        1_704_067_260_500,
    );
    let app = logs_app(Some(&store), Some("s3cret"));
    let auth = Some("Bearer s3cret");

    let (status, body) = send_json(&app, get_request("/logs", auth)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "total": 2,
            "sessions": [
                {"sessionId": "new", "lastActive": "2024-01-01T00:01:00.500Z"},
                {"sessionId": "old", "lastActive": "2024-01-01T00:00:00.000Z"},
            ],
        })
    );

    for uri in ["/logs?limit=1", "/logs?limit=1&foo=bar"] {
        let (_, body) = send_json(&app, get_request(uri, auth)).await;
        assert_eq!(body["total"], 1);
        assert_eq!(body["sessions"][0]["sessionId"], "new");
    }
    let (_, body) = send_json(&app, get_request("/logs?limit=zero", auth)).await;
    assert_eq!(body["total"], 2);

    let (status, body) =
        send_json(&app, get_request("/logs?sessionId=new", auth)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sessionId"], "new");
    assert_eq!(
        body["messages"],
        json!([
            {"role": "user", "content": "hi", "ts": 1_704_067_200_000i64},
            {"role": "assistant", "content": "Hello", "ts": 1_704_067_200_000i64},
        ])
    );

    let (_, body) =
        send_json(&app, get_request("/logs?sessionId=missing", auth)).await;
    assert_eq!(body["messages"], json!([]));
}

fn contact_app(mailer: Option<RecordingMailer>) -> Router {
    let chat = ChatServiceBuilder::with_persona(Persona::new("p")).build();
    let mut state = AppState::new(chat);
    if let Some(mailer) = mailer {
        state = state.with_mailer(Arc::new(mailer));
    }
    router(state)
}

#[tokio::test]
async fn test_contact() {
    let mailer = RecordingMailer::default();
    let app = contact_app(Some(mailer.clone()));

    let (status, body) = send_json(
        &app,
        json_request("POST", "/contact", json!({"message": "Nice site <3"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"success": true}));

    let sent = mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].body, "Nice site <3");
    assert_eq!(sent[0].user_agent.as_deref(), Some("test-agent/1.0"));
    assert!(sent[0].received_at_ms > 0);

    let (status, _) = send_json(
        &app,
        json_request("POST", "/contact", json!({"message": "  \n "})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(mailer.sent().len(), 1);
}

#[tokio::test]
async fn test_contact_failures() {
    let req = || json_request("POST", "/contact", json!({"message": "hello"}));

    let (status, _) = send_json(&contact_app(None), req()).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    let rejecting = RecordingMailer::failing(ErrorKind::Rejected);
    let (status, body) = send_json(&contact_app(Some(rejecting)), req()).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body, json!({"error": "Email send failed"}));

    let unreachable = RecordingMailer::failing(ErrorKind::Transport);
    let (status, _) = send_json(&contact_app(Some(unreachable)), req()).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}
