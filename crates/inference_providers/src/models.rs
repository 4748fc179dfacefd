use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::sentinel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    pub fn is_user(&self) -> bool {
        self.role == MessageRole::User
    }
}

/// A chat turn addressed to one backend conversation
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Conversation the turn belongs to. Session backends key their state on it.
    pub conversation_id: String,
    /// Backend-native model name (route prefix already stripped)
    pub model: String,
    /// Full history; the last message is the prompt
    pub messages: Vec<ChatMessage>,
}

impl ChatRequest {
    pub fn new(
        conversation_id: impl Into<String>,
        model: impl Into<String>,
        messages: Vec<ChatMessage>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            model: model.into(),
            messages,
        }
    }

    /// Text of the final message, empty when there is none
    pub fn prompt(&self) -> &str {
        self.messages
            .last()
            .map(|m| m.content.as_str())
            .unwrap_or_default()
    }

    /// Messages preceding the prompt
    pub fn history(&self) -> &[ChatMessage] {
        match self.messages.split_last() {
            Some((_, history)) => history,
            None => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    Open,
    Closed,
}

/// One step of a translated stream: the text observed since the previous poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta {
    pub text: String,
    pub status: StreamStatus,
}

impl Delta {
    pub fn open(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            status: StreamStatus::Open,
        }
    }

    pub fn closed() -> Self {
        Self {
            text: String::new(),
            status: StreamStatus::Closed,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.status == StreamStatus::Closed
    }
}

/// Backend stream events after per-backend normalization
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    /// The complete text produced so far
    Snapshot(String),
    /// Text produced since the previous event
    Append(String),
    /// The backend ended the conversation; carries the snapshot text, possibly empty
    Disengaged(String),
    Failed(CompletionError),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompletionError {
    #[error("The backend ended this conversation")]
    SessionDisengaged,
    #[error("{0}")]
    PolicyViolation(String),
    #[error("{0}")]
    BannedContent(String),
    #[error("{0}")]
    HarmContent(String),
    /// Displays as the exact rate-limit sentinel so it can be fed back to the pool
    #[error("{}", sentinel::RATE_LIMITED)]
    RateLimited,
    #[error("Transport error: {0}")]
    TransportError(String),
    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("Backend did not finish within {0:?}")]
    Timeout(Duration),
    #[error("Invalid response format: {0}")]
    InvalidResponse(String),
    #[error("Failed to perform completion: {0}")]
    CompletionError(String),
}

impl CompletionError {
    /// Whether the failure says something about the credential used for the request
    pub fn implicates_credential(&self) -> bool {
        match self {
            Self::PolicyViolation(_)
            | Self::BannedContent(_)
            | Self::HarmContent(_)
            | Self::RateLimited => true,
            Self::HttpStatus { status, .. } => matches!(status, 401 | 403),
            _ => false,
        }
    }
}
