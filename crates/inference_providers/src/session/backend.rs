use super::{SessionCookies, SessionRegistry, SessionRequest, SessionUpdate};
use crate::{
    sentinel, BackendEvent, ChatBackend, ChatRequest, CompletionError, StreamTranslator,
};
use async_trait::async_trait;
use std::{
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct SessionBackendConfig {
    pub cookies: SessionCookies,
    pub proxy: Option<String>,
    /// Passed to the native client for each reply
    pub reply_timeout: Duration,
}

impl Default for SessionBackendConfig {
    fn default() -> Self {
        Self {
            cookies: SessionCookies::default(),
            proxy: None,
            reply_timeout: Duration::from_secs(120),
        }
    }
}

/// [`ChatBackend`] over a registry of stateful backend sessions
pub struct SessionBackend {
    registry: Arc<SessionRegistry>,
    config: SessionBackendConfig,
    /// Last advertised per-conversation message limit, 0 until known
    max_messages: Arc<AtomicU32>,
}

impl SessionBackend {
    pub fn new(registry: Arc<SessionRegistry>, config: SessionBackendConfig) -> Self {
        Self {
            registry,
            config,
            max_messages: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Message limit per conversation as last advertised by the backend
    pub fn max_messages(&self) -> Option<u32> {
        match self.max_messages.load(Ordering::Relaxed) {
            0 => None,
            max => Some(max),
        }
    }
}

/// Normalize one native update
fn update_event(update: SessionUpdate, max_messages: &AtomicU32) -> BackendEvent {
    match update {
        SessionUpdate::Text(text) => BackendEvent::Snapshot(text),
        SessionUpdate::Item {
            text,
            messages,
            throttling,
        } => {
            if let Some(throttling) = throttling {
                max_messages.store(throttling.max_messages, Ordering::Relaxed);
            }
            let disengaged = messages
                .iter()
                .any(|m| m.message_type == sentinel::DISENGAGED_MESSAGE_TYPE);
            if disengaged {
                BackendEvent::Disengaged(text)
            } else {
                BackendEvent::Snapshot(text)
            }
        }
        SessionUpdate::Error(message) => {
            BackendEvent::Failed(sentinel::classify_error_message(&message))
        }
    }
}

async fn relay_updates(
    mut updates: mpsc::Receiver<SessionUpdate>,
    tx: mpsc::Sender<BackendEvent>,
    max_messages: Arc<AtomicU32>,
) {
    while let Some(update) = updates.recv().await {
        let event = update_event(update, &max_messages);
        let terminal = matches!(event, BackendEvent::Failed(_));
        if tx.send(event).await.is_err() || terminal {
            return;
        }
    }
}

#[async_trait]
impl ChatBackend for SessionBackend {
    fn backend_type(&self) -> &'static str {
        "session"
    }

    async fn chat_stream(
        &self,
        token: &str,
        request: ChatRequest,
    ) -> Result<StreamTranslator, CompletionError> {
        let session = self.registry.get_or_create(&SessionRequest {
            conversation_id: request.conversation_id.clone(),
            token: token.to_string(),
            model: request.model.clone(),
            proxy: self.config.proxy.clone(),
            cookies: self.config.cookies.clone(),
        })?;

        let updates = session
            .reply(self.config.reply_timeout, request.prompt(), request.history())
            .await?;

        let (tx, translator) = StreamTranslator::channel();
        tokio::spawn(relay_updates(updates, tx, self.max_messages.clone()));

        let registry = self.registry.clone();
        let conversation_id = request.conversation_id;
        Ok(translator.on_disengaged(move || {
            registry.evict(&conversation_id);
        }))
    }

    async fn end_conversation(&self, conversation_id: &str) -> bool {
        self.registry.remove(conversation_id)
    }
}
