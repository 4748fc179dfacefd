use crate::credential_pool::PoolError;
use async_trait::async_trait;
use inference_providers::{ChatMessage, DeltaStream};

#[cfg(any(test, feature = "test-mocks"))]
use mockall::automock;

#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("Invalid model: {0}")]
    InvalidModel(String),

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("No credential available: {0}")]
    Unavailable(#[from] PoolError),

    #[error("Provider error: {0}")]
    Provider(#[from] inference_providers::CompletionError),
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Gateway model name, `<route prefix><backend model>`
    pub model: String,
    pub messages: Vec<ChatMessage>,
    /// Continue an existing conversation; a fresh id is minted when absent
    pub conversation_id: Option<String>,
}

/// An open reply stream
pub struct CompletionStream {
    pub conversation_id: String,
    pub model: String,
    pub deltas: DeltaStream,
}

impl std::fmt::Debug for CompletionStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionStream")
            .field("conversation_id", &self.conversation_id)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

/// A fully collected reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionResult {
    pub conversation_id: String,
    pub model: String,
    pub content: String,
}

/// Health of one backend route's credential pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteStatus {
    pub name: String,
    pub backend: String,
    pub credentials: usize,
    pub live: usize,
    pub self_healing: bool,
}

#[cfg_attr(any(test, feature = "test-mocks"), automock)]
#[async_trait]
pub trait CompletionServiceTrait: Send + Sync {
    /// Create a streaming completion
    async fn create_chat_completion_stream(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionStream, CompletionError>;

    /// Create a completion and wait for the full reply
    async fn create_chat_completion(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResult, CompletionError>;

    /// Tear down a conversation and its sub-conversations on every backend
    async fn end_conversation(&self, conversation_id: &str) -> bool;

    async fn route_status(&self) -> Vec<RouteStatus>;
}
