use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use persona_relay_model::{
    ChatTurn, ErrorKind as ServiceErrorKind, RetrievedItem, Role,
};
use persona_relay_test_model::{
    MemoryLogStore, PresetChunk, PresetEnding, PresetResponse,
    StaticRetriever, TestCompletionProvider,
};

use super::*;
use crate::error::ErrorKind;
use crate::relay::{RelayOptions, TERMINAL_EVENT};

fn hello_provider() -> TestCompletionProvider {
    TestCompletionProvider::new(PresetResponse::with_chunks([
        PresetChunk::delta("He"),
        PresetChunk::delta("llo"),
    ]))
}

async fn drain(mut stream: RelayStream) -> Vec<u8> {
    let mut body = Vec::new();
    while let Some(Ok(bytes)) = stream.next().await {
        body.extend_from_slice(&bytes);
    }
    body
}

#[tokio::test]
async fn test_chat_end_to_end() {
    let provider = hello_provider();
    let store = MemoryLogStore::default();
    let retriever = StaticRetriever::with_items([
        RetrievedItem {
            text: "Q: hi\nA: yo".to_owned(),
            score: 0.9,
        },
        RetrievedItem {
            text: "unrelated".to_owned(),
            score: 0.2,
        },
    ]);
    let service = ChatServiceBuilder::with_persona(Persona::new("I am Kai."))
        .with_provider(provider.clone())
        .with_retriever(Arc::new(retriever))
        .with_log_sink(LogSink::new(Arc::new(store.clone())))
        .build();

    let req = ConversationRequest::new("hi")
        .with_history(vec![
            ChatTurn::user("earlier"),
            ChatTurn::assistant("sure"),
        ])
        .with_session_id("abc");
    let body = drain(service.start(req).await.unwrap()).await;
    assert!(body.ends_with(TERMINAL_EVENT));

    assert!(store.wait_for_attempts(1, Duration::from_secs(1)).await);
    let exchanges = store.exchanges();
    assert_eq!(exchanges.len(), 1);
    assert_eq!(exchanges[0].0, "abc");
    assert_eq!(exchanges[0].1.user, "hi");
    assert_eq!(exchanges[0].1.assistant, "Hello");

    let requests = provider.requests();
    assert_eq!(requests.len(), 1);
    let turns = &requests[0].turns;
    let roles: Vec<_> = turns.iter().map(|t| t.role).collect();
    assert_eq!(roles, [Role::System, Role::User, Role::Assistant, Role::User]);
    assert!(turns[0].content.starts_with("I am Kai."));
    assert!(turns[0].content.contains("Q: hi\nA: yo"));
    assert!(!turns[0].content.contains("unrelated"));
    assert_eq!(turns[3].content, "hi");
}

#[tokio::test]
async fn test_empty_message_is_rejected_first() {
    let provider = hello_provider();
    let retriever = StaticRetriever::default();
    let service = ChatServiceBuilder::with_persona(Persona::new("p"))
        .with_provider(provider.clone())
        .with_retriever(Arc::new(retriever.clone()))
        .build();

    for message in ["", "   "] {
        let err = service
            .start(ConversationRequest::new(message))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }
    assert_eq!(retriever.calls(), 0);
    assert!(provider.requests().is_empty());
}

#[tokio::test]
async fn test_missing_provider() {
    let service = ChatServiceBuilder::with_persona(Persona::new("p")).build();
    let err = service
        .start(ConversationRequest::new("hi"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[tokio::test]
async fn test_upstream_rejection() {
    let provider = TestCompletionProvider::new(PresetResponse::rejected(
        429,
        r#"{"error":"rate limited"}"#,
    ));
    let service = ChatServiceBuilder::with_persona(Persona::new("p"))
        .with_provider(provider)
        .build();
    let err = service
        .start(ConversationRequest::new("hi"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Upstream);
    assert_eq!(err.detail(), Some(r#"{"error":"rate limited"}"#));
}

#[tokio::test(start_paused = true)]
async fn test_slow_retrieval_is_skipped() {
    let provider = hello_provider();
    let retriever = StaticRetriever::with_items([RetrievedItem {
        text: "too late".to_owned(),
        score: 0.9,
    }])
    .with_delay(Duration::from_secs(60));
    let service = ChatServiceBuilder::with_persona(Persona::new("p"))
        .with_provider(provider.clone())
        .with_retriever(Arc::new(retriever))
        .with_retrieval_timeout(Duration::from_secs(5))
        .build();

    let body = drain(
        service
            .start(ConversationRequest::new("hi"))
            .await
            .unwrap(),
    )
    .await;
    assert!(body.ends_with(TERMINAL_EVENT));
    let requests = provider.requests();
    let system = &requests[0].turns[0].content;
    assert!(!system.contains("too late"));
}

#[tokio::test]
async fn test_no_session_means_no_log() {
    let store = MemoryLogStore::default();
    let service = ChatServiceBuilder::with_persona(Persona::new("p"))
        .with_provider(hello_provider())
        .with_log_sink(LogSink::new(Arc::new(store.clone())))
        .build();
    let stream = service
        .start(ConversationRequest::new("hi"))
        .await
        .unwrap();
    drain(stream).await;

    assert!(!store.wait_for_attempts(1, Duration::from_millis(50)).await);
    assert_eq!(store.attempts(), 0);
}

#[tokio::test]
async fn test_failing_store_does_not_affect_response() {
    let store = MemoryLogStore::failing();
    let service = ChatServiceBuilder::with_persona(Persona::new("p"))
        .with_provider(hello_provider())
        .with_log_sink(LogSink::new(Arc::new(store.clone())))
        .build();
    let stream = service
        .start(ConversationRequest::new("hi").with_session_id("abc"))
        .await
        .unwrap();
    let body = drain(stream).await;

    assert!(body.ends_with(TERMINAL_EVENT));
    assert!(store.wait_for_attempts(1, Duration::from_secs(1)).await);
    assert!(store.exchanges().is_empty());
}

#[tokio::test]
async fn test_interrupted_stream_is_not_logged() {
    let provider = TestCompletionProvider::new(
        PresetResponse::with_chunks([PresetChunk::delta("par")])
            .with_ending(PresetEnding::Interrupt),
    );
    let store = MemoryLogStore::default();
    let service = ChatServiceBuilder::with_persona(Persona::new("p"))
        .with_provider(provider)
        .with_relay_options(RelayOptions::default())
        .with_log_sink(LogSink::new(Arc::new(store.clone())))
        .build();
    let stream = service
        .start(ConversationRequest::new("hi").with_session_id("abc"))
        .await
        .unwrap();
    let body = drain(stream).await;

    assert!(!body.ends_with(TERMINAL_EVENT));
    assert!(!store.wait_for_attempts(1, Duration::from_millis(50)).await);
}

#[tokio::test]
async fn test_retrieval_failure_is_tolerated() {
    let provider = hello_provider();
    let service = ChatServiceBuilder::with_persona(Persona::new("p"))
        .with_provider(provider.clone())
        .with_retriever(Arc::new(StaticRetriever::failing(
            ServiceErrorKind::Transport,
        )))
        .build();
    let stream = service
        .start(ConversationRequest::new("hi"))
        .await
        .unwrap();
    assert!(drain(stream).await.ends_with(TERMINAL_EVENT));
    assert_eq!(provider.requests().len(), 1);
}
