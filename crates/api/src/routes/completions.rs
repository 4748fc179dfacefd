use crate::{
    models::*,
    routes::common::{map_completion_error_to_status, provider_error_response},
    AppState,
};
use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json as ResponseJson, Response,
    },
};
use futures::stream::{self, StreamExt};
use inference_providers::ChatMessage;
use services::completions::CompletionRequest as ServiceCompletionRequest;
use std::{convert::Infallible, time::Duration};
use tracing::debug;

fn convert_chat_request_to_service(request: &ChatCompletionRequest) -> ServiceCompletionRequest {
    ServiceCompletionRequest {
        model: request.model.clone(),
        messages: request.messages.iter().map(ChatMessage::from).collect(),
        conversation_id: request.conversation_id.clone(),
    }
}

fn json_event<T: serde::Serialize>(value: &T) -> Event {
    Event::default().data(serde_json::to_string(value).unwrap_or_default())
}

/// Create a chat completion
///
/// With `stream: true` the reply is sent as `chat.completion.chunk` SSE events
/// terminated by `[DONE]`. A backend failure after the stream started is sent
/// as an error envelope before `[DONE]`.
pub async fn chat_completions(
    State(app_state): State<AppState>,
    Json(request): Json<ChatCompletionRequest>,
) -> Response {
    debug!(
        model = %request.model,
        stream = request.is_stream(),
        messages = request.messages.len(),
        conversation_id = request.conversation_id.as_deref().unwrap_or("-"),
        "Chat completions request"
    );

    if let Err(error) = request.validate() {
        return (
            StatusCode::BAD_REQUEST,
            ResponseJson(ErrorResponse::new(
                error,
                "invalid_request_error".to_string(),
            )),
        )
            .into_response();
    }

    let service_request = convert_chat_request_to_service(&request);

    if !request.is_stream() {
        return match app_state
            .completion_service
            .create_chat_completion(service_request)
            .await
        {
            Ok(result) => {
                let response = ChatCompletionResponse {
                    id: generate_completion_id(),
                    object: "chat.completion".to_string(),
                    created: chrono::Utc::now().timestamp(),
                    model: result.model,
                    conversation_id: result.conversation_id,
                    choices: vec![ChatChoice {
                        index: 0,
                        message: Message {
                            role: "assistant".to_string(),
                            content: Some(MessageContent::Text(result.content)),
                            name: None,
                        },
                        finish_reason: Some("stop".to_string()),
                    }],
                    usage: Usage::default(),
                };
                (StatusCode::OK, ResponseJson(response)).into_response()
            }
            Err(error) => {
                tracing::warn!(error = %error, "Chat completion failed");
                (
                    map_completion_error_to_status(&error),
                    ResponseJson(ErrorResponse::from(&error)),
                )
                    .into_response()
            }
        };
    }

    let completion = match app_state
        .completion_service
        .create_chat_completion_stream(service_request)
        .await
    {
        Ok(completion) => completion,
        Err(error) => {
            tracing::warn!(error = %error, "Failed to open completion stream");
            return (
                map_completion_error_to_status(&error),
                ResponseJson(ErrorResponse::from(&error)),
            )
                .into_response();
        }
    };

    let context = ChunkContext::new(completion.model, completion.conversation_id);
    let head = stream::once({
        let chunk = context.role_chunk();
        async move { json_event(&chunk) }
    });

    // The deltas end after their first error; a clean end gets a finish chunk
    let body = stream::unfold(
        (completion.deltas, context, false),
        |(mut deltas, context, done)| async move {
            if done {
                return None;
            }
            match deltas.next().await {
                Some(Ok(text)) => {
                    let event = json_event(&context.text_chunk(text));
                    Some((event, (deltas, context, false)))
                }
                Some(Err(e)) => {
                    tracing::error!(error = %e, "Completion stream error");
                    let event = json_event(&provider_error_response(&e));
                    Some((event, (deltas, context, true)))
                }
                None => {
                    let event = json_event(&context.finish_chunk());
                    Some((event, (deltas, context, true)))
                }
            }
        },
    );
    let tail = stream::once(async { Event::default().data("[DONE]") });

    let sse_stream = head.chain(body).chain(tail).map(Ok::<_, Infallible>);

    Sse::new(sse_stream)
        .keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(30))
                .text("keep-alive-text"),
        )
        .into_response()
}
