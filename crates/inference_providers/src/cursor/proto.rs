//! Protobuf messages of the `StreamChat` RPC and request encoding.

use crate::{frame::encode_frame, ChatMessage};
use bytes::Bytes;
use prost::Message;

/// Project path reported for every request; the backend only checks presence
pub const PROJECT_PATH: &str = "/path/to/project";

pub const ROLE_USER: i32 = 1;
pub const ROLE_ASSISTANT: i32 = 2;

#[derive(Clone, PartialEq, Message)]
pub struct StreamChatRequest {
    #[prost(message, repeated, tag = "2")]
    pub messages: Vec<UserMessage>,
    #[prost(message, optional, tag = "4")]
    pub instructions: Option<Instructions>,
    #[prost(string, tag = "5")]
    pub project_path: String,
    #[prost(message, optional, tag = "7")]
    pub model: Option<ModelSpec>,
    #[prost(string, tag = "9")]
    pub request_id: String,
    #[prost(string, tag = "11")]
    pub summary: String,
    #[prost(string, tag = "15")]
    pub conversation_id: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct UserMessage {
    #[prost(string, tag = "1")]
    pub content: String,
    #[prost(int32, tag = "2")]
    pub role: i32,
    #[prost(string, tag = "13")]
    pub message_id: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct Instructions {
    #[prost(string, tag = "1")]
    pub instruction: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct ModelSpec {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "4")]
    pub empty: String,
}

/// Data frame payload of the response stream
#[derive(Clone, PartialEq, Message)]
pub struct StreamChatResponse {
    #[prost(string, tag = "1")]
    pub text: String,
}

/// Build the request message for `model` from the conversation history.
///
/// Every message and the envelope get fresh random identifiers.
pub fn build_request(model: &str, messages: &[ChatMessage]) -> StreamChatRequest {
    let messages = messages
        .iter()
        .map(|message| UserMessage {
            content: message.content.clone(),
            role: if message.is_user() {
                ROLE_USER
            } else {
                ROLE_ASSISTANT
            },
            message_id: uuid::Uuid::new_v4().to_string(),
        })
        .collect();

    StreamChatRequest {
        messages,
        instructions: Some(Instructions::default()),
        project_path: PROJECT_PATH.to_string(),
        model: Some(ModelSpec {
            name: model.to_string(),
            empty: String::new(),
        }),
        request_id: uuid::Uuid::new_v4().to_string(),
        summary: String::new(),
        conversation_id: uuid::Uuid::new_v4().to_string(),
    }
}

/// Serialize the request and wrap it in an uncompressed frame
pub fn encode_request(model: &str, messages: &[ChatMessage]) -> Bytes {
    let payload = build_request(model, messages).encode_to_vec();
    encode_frame(0, &payload)
}
