//! Session-oriented backends.
//!
//! These backends keep server-side conversational state per conversation id
//! and report progress as cumulative text snapshots. The native client is
//! reached through the [`SessionFactory`] / [`BackendSession`] ports.

pub mod backend;
pub mod registry;

pub use backend::{SessionBackend, SessionBackendConfig};
pub use registry::SessionRegistry;

use crate::{ChatMessage, CompletionError};
use async_trait::async_trait;
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;

/// Joins a parent conversation id and a sub-conversation suffix
pub const SUB_CONVERSATION_SEPARATOR: char = '$';

/// Cookies some session backends require besides the token
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionCookies {
    pub kiev_rps_sec_auth: String,
    pub rw_bf: String,
}

/// Everything needed to open a backend session
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub conversation_id: String,
    pub token: String,
    pub model: String,
    pub proxy: Option<String>,
    pub cookies: SessionCookies,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionMessage {
    /// Backend-native message type, e.g. `Disengaged`
    pub message_type: String,
    pub text: String,
}

/// Per-conversation message quota advertised by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Throttling {
    pub max_messages: u32,
    pub used: u32,
}

/// Native progress update of a session reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    /// Cumulative reply text
    Text(String),
    /// Structured update carrying the cumulative text plus bookkeeping
    Item {
        text: String,
        messages: Vec<SessionMessage>,
        throttling: Option<Throttling>,
    },
    Error(String),
}

/// A live conversational context on the backend
#[async_trait]
pub trait BackendSession: Send + Sync {
    /// Start a reply; updates arrive on the returned channel until it closes
    async fn reply(
        &self,
        timeout: Duration,
        prompt: &str,
        history: &[ChatMessage],
    ) -> Result<mpsc::Receiver<SessionUpdate>, CompletionError>;

    /// Delete the conversation history on the backend
    async fn delete(&self) -> Result<(), CompletionError>;
}

pub trait SessionFactory: Send + Sync {
    fn create(&self, request: &SessionRequest) -> Result<Arc<dyn BackendSession>, CompletionError>;
}
