use crate::{
    models::{DeleteConversationResponse, ErrorResponse},
    AppState,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json as ResponseJson, Response},
};

/// End a conversation
///
/// Removes the conversation and its sub-conversations from every backend.
pub async fn delete_conversation(
    State(app_state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Response {
    if conversation_id.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            ResponseJson(ErrorResponse::with_param(
                "conversation id is required".to_string(),
                "invalid_request_error".to_string(),
                "id".to_string(),
            )),
        )
            .into_response();
    }

    let deleted = app_state
        .completion_service
        .end_conversation(&conversation_id)
        .await;
    tracing::info!(%conversation_id, deleted, "Conversation ended");

    (
        StatusCode::OK,
        ResponseJson(DeleteConversationResponse {
            id: conversation_id,
            object: "conversation.deleted".to_string(),
            deleted,
        }),
    )
        .into_response()
}
