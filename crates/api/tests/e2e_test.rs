mod common;

use common::*;
use inference_providers::{
    CompletionError, RequestMatcher, ResponseTemplate, SessionUpdate,
};
use serde_json::{json, Value};

#[tokio::test]
async fn test_chat_completion_non_streaming() {
    let (server, backends) = setup_test_server();
    backends
        .cursor
        .set_default_response(ResponseTemplate::new("Hello from the gateway"))
        .await;

    let response = server
        .post("/v1/chat/completions")
        .json(&json!({
            "model": "cursor/claude-3.5-sonnet",
            "messages": [{"role": "user", "content": "hi"}],
            "temperature": 0.7
        }))
        .await;

    assert_eq!(response.status_code(), 200);
    let body: Value = response.json();
    assert_eq!(body["object"], "chat.completion");
    assert_eq!(body["model"], "cursor/claude-3.5-sonnet");
    assert_eq!(
        body["choices"][0]["message"]["content"],
        "Hello from the gateway"
    );
    assert_eq!(body["choices"][0]["finish_reason"], "stop");
    assert!(body["id"].as_str().unwrap().starts_with("chatcmpl-"));

    let requests = backends.cursor.requests().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].token, "token-a");
    assert_eq!(requests[0].request.model, "claude-3.5-sonnet");
    assert_eq!(
        body["conversation_id"].as_str().unwrap(),
        requests[0].request.conversation_id
    );
}

#[tokio::test]
async fn test_chat_completion_streaming() {
    let (server, backends) = setup_test_server();
    backends
        .cursor
        .set_default_response(ResponseTemplate::new("one two three"))
        .await;

    let response = server
        .post("/v1/chat/completions")
        .json(&json!({
            "model": "cursor/gpt-4o",
            "messages": [{"role": "user", "content": "count"}],
            "stream": true,
            "conversation_id": "conv-stream"
        }))
        .await;

    assert_eq!(response.status_code(), 200);
    let data = sse_data(&response.text());
    assert_eq!(data.last().map(String::as_str), Some("[DONE]"));

    let chunks: Vec<Value> = data[..data.len() - 1]
        .iter()
        .map(|d| serde_json::from_str(d).unwrap())
        .collect();
    assert_eq!(chunks[0]["choices"][0]["delta"]["role"], "assistant");
    assert!(chunks
        .iter()
        .all(|c| c["object"] == "chat.completion.chunk" && c["conversation_id"] == "conv-stream"));

    let content: String = chunks
        .iter()
        .filter_map(|c| c["choices"][0]["delta"]["content"].as_str())
        .collect();
    assert_eq!(content, "one two three");
    assert_eq!(
        chunks.last().unwrap()["choices"][0]["finish_reason"],
        "stop"
    );
}

#[tokio::test]
async fn test_streaming_error_is_sent_before_done() {
    let (server, backends) = setup_test_server();
    backends
        .cursor
        .when(RequestMatcher::Token("token-a".into()))
        .respond_with(
            ResponseTemplate::new("partial ")
                .with_stream_error(CompletionError::BannedContent("banned".into())),
        )
        .await;

    let response = server
        .post("/v1/chat/completions")
        .json(&json!({
            "model": "cursor/gpt-4o",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": true
        }))
        .await;

    assert_eq!(response.status_code(), 200);
    let data = sse_data(&response.text());
    assert_eq!(data.last().map(String::as_str), Some("[DONE]"));

    let error: Value = serde_json::from_str(&data[data.len() - 2]).unwrap();
    assert_eq!(error["error"]["type"], "provider_error");
    assert_eq!(error["error"]["code"], "banned_content");
    assert!(!data
        .iter()
        .any(|d| d.contains("\"finish_reason\":\"stop\"")));
}

#[tokio::test]
async fn test_banned_credential_is_skipped_on_next_request() {
    let (server, backends) = setup_test_server();
    backends
        .cursor
        .when(RequestMatcher::Token("token-a".into()))
        .respond_with(
            ResponseTemplate::new("")
                .with_stream_error(CompletionError::BannedContent("banned".into())),
        )
        .await;

    let first = server
        .post("/v1/chat/completions")
        .json(&json!({
            "model": "cursor/gpt-4o",
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .await;
    assert_eq!(first.status_code(), 502);

    // The failure is reported on a background task
    for _ in 0..50 {
        if backends.cursor_pool.live_count().await == 1 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    let second = server
        .post("/v1/chat/completions")
        .json(&json!({
            "model": "cursor/gpt-4o",
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .await;
    assert_eq!(second.status_code(), 200);

    let tokens: Vec<String> = backends
        .cursor
        .requests()
        .await
        .into_iter()
        .map(|r| r.token)
        .collect();
    assert_eq!(tokens, vec!["token-a", "token-b"]);
}

#[tokio::test]
async fn test_error_mapping() {
    let (server, _) = setup_test_server_with(&[]);

    let invalid = server
        .post("/v1/chat/completions")
        .json(&json!({"model": "cursor/gpt-4o", "messages": []}))
        .await;
    assert_eq!(invalid.status_code(), 400);
    let body: Value = invalid.json();
    assert_eq!(body["error"]["type"], "invalid_request_error");
    assert_eq!(body["error"]["message"], "messages cannot be empty");

    let unknown = server
        .post("/v1/chat/completions")
        .json(&json!({
            "model": "other/gpt-4o",
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .await;
    assert_eq!(unknown.status_code(), 400);
    let body: Value = unknown.json();
    assert_eq!(body["error"]["code"], "model_not_found");
    assert_eq!(body["error"]["param"], "model");

    let empty_pool = server
        .post("/v1/chat/completions")
        .json(&json!({
            "model": "cursor/gpt-4o",
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .await;
    assert_eq!(empty_pool.status_code(), 503);
    let body: Value = empty_pool.json();
    assert_eq!(body["error"]["type"], "service_unavailable");
}

#[tokio::test]
async fn test_rate_limit_maps_to_429() {
    let (server, backends) = setup_test_server();
    backends
        .cursor
        .set_default_response(ResponseTemplate::rejecting(CompletionError::RateLimited))
        .await;

    let response = server
        .post("/v1/chat/completions")
        .json(&json!({
            "model": "cursor/gpt-4o",
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .await;

    assert_eq!(response.status_code(), 429);
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "rate_limit_exceeded");
}

#[tokio::test]
async fn test_session_conversation_and_cascade_delete() {
    let (server, backends) = setup_test_server();
    backends.sessions.script(vec![
        SessionUpdate::Text("Sure".into()),
        SessionUpdate::Text("Sure thing".into()),
    ]);

    for conversation_id in ["conv-1", "conv-1$1", "conv-2"] {
        let response = server
            .post("/v1/chat/completions")
            .json(&json!({
                "model": "session/creative",
                "messages": [{"role": "user", "content": "hello"}],
                "conversation_id": conversation_id
            }))
            .await;
        assert_eq!(response.status_code(), 200);
        let body: Value = response.json();
        assert_eq!(body["choices"][0]["message"]["content"], "Sure thing");
    }
    assert_eq!(backends.registry.len(), 3);

    let response = server.delete("/v1/conversations/conv-1").await;
    assert_eq!(response.status_code(), 200);
    let body: Value = response.json();
    assert_eq!(body["id"], "conv-1");
    assert_eq!(body["object"], "conversation.deleted");
    assert_eq!(body["deleted"], true);

    assert_eq!(backends.registry.ids(), vec!["conv-2"]);
    assert_eq!(backends.cursor.ended_conversations().await, vec!["conv-1"]);
}

#[tokio::test]
async fn test_health_reports_routes() {
    let (server, _) = setup_test_server_with(&[]);

    let response = server.get("/health").await;
    assert_eq!(response.status_code(), 200);

    let body: Value = response.json();
    assert_eq!(body["status"], "degraded");
    let routes = body["routes"].as_array().unwrap();
    assert_eq!(routes.len(), 2);
    assert_eq!(routes[0]["name"], "cursor");
    assert_eq!(routes[0]["credentials"], 0);
    assert_eq!(routes[1]["backend"], "session");
    assert_eq!(routes[1]["live"], 1);
}
