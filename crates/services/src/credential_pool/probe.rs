use super::ports::{CredentialProbe, ProbeError};
use async_trait::async_trait;
use inference_providers::{ChatBackend, ChatMessage, ChatRequest};
use std::{sync::Arc, time::Duration};

pub const PROBE_PROMPT: &str = "I say ping, You say pong";

/// Probe sending a throw-away ping conversation through a backend.
///
/// The reply is drained so sentinel text fails the probe; the conversation
/// is ended afterwards whatever the outcome.
pub struct ChatProbe {
    backend: Arc<dyn ChatBackend>,
    model: String,
    timeout: Duration,
}

impl ChatProbe {
    pub fn new(backend: Arc<dyn ChatBackend>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            backend,
            model: model.into(),
            timeout,
        }
    }
}

#[async_trait]
impl CredentialProbe for ChatProbe {
    async fn probe(&self, token: &str) -> Result<(), ProbeError> {
        let conversation_id = format!("probe-{}", uuid::Uuid::new_v4());
        let request = ChatRequest::new(
            conversation_id.clone(),
            self.model.clone(),
            vec![ChatMessage::user(PROBE_PROMPT)],
        );

        let result = match self.backend.chat_stream(token, request).await {
            Ok(translator) => translator
                .with_timeout(self.timeout)
                .collect_text()
                .await
                .map(|_| ()),
            Err(e) => Err(e),
        };

        self.backend.end_conversation(&conversation_id).await;
        result
    }
}
