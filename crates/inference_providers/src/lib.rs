//! Backend adapters for the chat gateway
//!
//! Every backend speaks its own protocol: session backends report cumulative
//! text snapshots, the binary backend streams length-prefixed protobuf frames.
//! Each adapter normalizes its native stream into [`BackendEvent`]s that a
//! [`StreamTranslator`] turns into ordered, non-overlapping text deltas.
//!
//! # Usage
//!
//! ```rust,ignore
//! use inference_providers::{ChatBackend, ChatMessage, ChatRequest};
//! use futures_util::StreamExt;
//!
//! async fn example<B: ChatBackend>(backend: B, token: &str) {
//!     let request = ChatRequest::new("conv-1", "claude-3.5-sonnet", vec![ChatMessage::user("hi")]);
//!     let mut stream = backend.chat_stream(token, request).await?.into_stream();
//!     while let Some(delta) = stream.next().await {
//!         match delta {
//!             Ok(text) => print!("{text}"),
//!             Err(e) => eprintln!("Stream error: {e}"),
//!         }
//!     }
//! }
//! ```

pub mod cursor;
pub mod frame;
pub mod mock;
pub mod models;
pub mod sentinel;
pub mod session;
pub mod translator;

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;

pub use cursor::{CursorBackend, CursorBackendConfig};
pub use frame::{Frame, FrameDecoder, FrameParser};
pub use mock::{MockBackend, MockSessionFactory, RequestMatcher, ResponseTemplate};
pub use models::{
    BackendEvent, ChatMessage, ChatRequest, CompletionError, Delta, MessageRole, StreamStatus,
};
pub use session::{
    BackendSession, SessionBackend, SessionBackendConfig, SessionCookies, SessionFactory,
    SessionRegistry, SessionRequest, SessionUpdate,
};
pub use translator::StreamTranslator;

/// Stream of text deltas; an `Err` item is terminal
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<String, CompletionError>> + Send>>;

#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Short identifier used in logs
    fn backend_type(&self) -> &'static str;

    /// Open a reply stream for `request` authenticated with `token`
    async fn chat_stream(
        &self,
        token: &str,
        request: ChatRequest,
    ) -> Result<StreamTranslator, CompletionError>;

    /// Tear down backend state kept for a conversation and its sub-conversations.
    ///
    /// Stateless backends keep nothing, so the default just reports success.
    async fn end_conversation(&self, conversation_id: &str) -> bool {
        let _ = conversation_id;
        true
    }
}
