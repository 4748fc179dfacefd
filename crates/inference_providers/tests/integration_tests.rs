//! Integration tests for the backend adapters
//!
//! The binary backend runs against a local httpmock server; session backends
//! run against the scripted session factory.
//! Run with: `cargo test --test integration_tests -- --nocapture`

use futures_util::StreamExt;
use httpmock::{Method::POST, MockServer};
use inference_providers::{
    cursor::{checksum, StreamChatResponse, STREAM_CHAT_PATH},
    frame::{encode_frame, FLAG_COMPRESSED, FLAG_END_STREAM},
    session::{SessionMessage, SessionUpdate},
    ChatBackend, ChatMessage, ChatRequest, CompletionError, CursorBackend, CursorBackendConfig,
    MockSessionFactory, SessionBackend, SessionBackendConfig, SessionRegistry,
};
use prost::Message;
use std::io::Write;
use std::sync::Arc;

const TOKEN: &str = "header.payload.signature";

fn backend_for(server: &MockServer) -> CursorBackend {
    CursorBackend::new(CursorBackendConfig {
        base_url: server.base_url(),
        ..Default::default()
    })
    .unwrap()
}

fn text_frame(text: &str) -> Vec<u8> {
    let payload = StreamChatResponse {
        text: text.to_string(),
    }
    .encode_to_vec();
    encode_frame(0, &payload).to_vec()
}

fn request(prompt: &str) -> ChatRequest {
    ChatRequest::new(
        "conv-1",
        "claude-3.5-sonnet",
        vec![
            ChatMessage::user("earlier"),
            ChatMessage::assistant("reply"),
            ChatMessage::user(prompt),
        ],
    )
}

#[tokio::test]
async fn test_fetch_sends_protocol_headers() {
    let server = MockServer::start_async().await;

    let mut body = text_frame("po");
    body.extend(text_frame("ng"));
    body.extend(encode_frame(FLAG_END_STREAM, b"{}").to_vec());

    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path(STREAM_CHAT_PATH)
                .header("authorization", format!("Bearer {TOKEN}"))
                .header("content-type", "application/connect+proto")
                .header("connect-protocol-version", "1")
                .header("connect-accept-encoding", "gzip")
                .header("user-agent", "connect-es/1.4.0")
                .header("x-cursor-checksum", checksum(TOKEN))
                .header("x-cursor-client-version", "0.42.3")
                .header("x-cursor-timezone", "Asia/Shanghai");
            then.status(200)
                .header("content-type", "application/connect+proto")
                .body(body);
        })
        .await;

    let backend = backend_for(&server);
    let translator = backend.chat_stream(TOKEN, request("ping")).await.unwrap();
    let text = translator.collect_text().await.unwrap();

    mock.assert_async().await;
    assert_eq!(text, "pong");
}

#[tokio::test]
async fn test_fetch_rejects_non_success_status() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path(STREAM_CHAT_PATH);
            then.status(401).body("unauthorized");
        })
        .await;

    let backend = backend_for(&server);
    let error = backend
        .chat_stream(TOKEN, request("ping"))
        .await
        .err()
        .unwrap();

    assert_eq!(
        error,
        CompletionError::HttpStatus {
            status: 401,
            body: "unauthorized".to_string()
        }
    );
    assert!(error.implicates_credential());
}

#[tokio::test]
async fn test_fetch_maps_too_many_requests_to_rate_limit() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path(STREAM_CHAT_PATH);
            then.status(429);
        })
        .await;

    let backend = backend_for(&server);
    assert_eq!(
        backend.chat_stream(TOKEN, request("ping")).await.err(),
        Some(CompletionError::RateLimited)
    );
}

#[tokio::test]
async fn test_compressed_frames_and_trailer_error() {
    let server = MockServer::start_async().await;

    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder
        .write_all(
            &StreamChatResponse {
                text: "zipped ".to_string(),
            }
            .encode_to_vec(),
        )
        .unwrap();
    let compressed = encoder.finish().unwrap();

    let mut body = encode_frame(FLAG_COMPRESSED, &compressed).to_vec();
    body.extend(
        encode_frame(
            FLAG_END_STREAM,
            br#"{"error":{"code":"unauthenticated","message":"Not logged in"}}"#,
        )
        .to_vec(),
    );

    server
        .mock_async(|when, then| {
            when.method(POST).path(STREAM_CHAT_PATH);
            then.status(200).body(body);
        })
        .await;

    let backend = backend_for(&server);
    let items: Vec<_> = backend
        .chat_stream(TOKEN, request("ping"))
        .await
        .unwrap()
        .into_stream()
        .collect()
        .await;

    assert_eq!(items.len(), 2);
    assert_eq!(items[0], Ok("zipped ".to_string()));
    assert!(matches!(
        items[1],
        Err(CompletionError::HttpStatus { status: 401, .. })
    ));
}

#[tokio::test]
async fn test_session_backend_conversation_lifecycle() {
    let factory = Arc::new(MockSessionFactory::new());
    factory.script(vec![
        SessionUpdate::Text("Sure".into()),
        SessionUpdate::Text("Sure, here".into()),
        SessionUpdate::Text("Sure, here you go.".into()),
    ]);
    let registry = Arc::new(SessionRegistry::new(factory.clone(), true));
    let backend = SessionBackend::new(registry.clone(), SessionBackendConfig::default());

    let mut deltas = Vec::new();
    let mut stream = backend
        .chat_stream("cookie", request("write"))
        .await
        .unwrap()
        .into_stream();
    while let Some(delta) = stream.next().await {
        deltas.push(delta.unwrap());
    }
    assert_eq!(deltas, vec!["Sure", ", here", " you go."]);

    // Follow-up and sub-conversation reuse / create sessions
    backend
        .chat_stream("cookie", request("more"))
        .await
        .unwrap()
        .collect_text()
        .await
        .unwrap();
    let mut child = request("branch");
    child.conversation_id = "conv-1$1".to_string();
    backend
        .chat_stream("cookie", child)
        .await
        .unwrap()
        .collect_text()
        .await
        .unwrap();
    assert_eq!(factory.created(), vec!["conv-1", "conv-1$1"]);

    assert!(backend.end_conversation("conv-1").await);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_session_backend_disengage_starts_fresh_session() {
    let factory = Arc::new(MockSessionFactory::new());
    factory.script(vec![SessionUpdate::Item {
        text: "I'd prefer not to.".into(),
        messages: vec![SessionMessage {
            message_type: "Disengaged".into(),
            text: String::new(),
        }],
        throttling: None,
    }]);
    let registry = Arc::new(SessionRegistry::new(factory.clone(), false));
    let backend = SessionBackend::new(registry, SessionBackendConfig::default());

    for _ in 0..2 {
        let text = backend
            .chat_stream("cookie", request("again"))
            .await
            .unwrap()
            .collect_text()
            .await
            .unwrap();
        assert_eq!(text, "I'd prefer not to.");
    }

    assert_eq!(factory.created().len(), 2);
}
