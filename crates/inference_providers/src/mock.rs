//! Scripted backends for testing
//!
//! [`MockBackend`] implements [`ChatBackend`] without any network access and
//! [`MockSessionFactory`] stands in for a native session client.

use crate::{
    session::{BackendSession, SessionFactory, SessionRequest, SessionUpdate},
    BackendEvent, ChatBackend, ChatMessage, ChatRequest, CompletionError, StreamTranslator,
};
use async_trait::async_trait;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Request matcher for conditional responses
#[derive(Clone, Debug)]
pub enum RequestMatcher {
    /// Match any request
    Any,
    /// Match requests whose prompt equals the given text
    ExactPrompt(String),
    /// Match requests sent with the given token
    Token(String),
}

impl RequestMatcher {
    pub fn matches(&self, token: &str, request: &ChatRequest) -> bool {
        match self {
            Self::Any => true,
            Self::ExactPrompt(prompt) => request.prompt() == prompt,
            Self::Token(expected) => expected == token,
        }
    }
}

/// Template for generating replies
#[derive(Clone, Debug)]
pub struct ResponseTemplate {
    content: String,
    /// Error emitted after the content, terminating the stream
    stream_error: Option<CompletionError>,
    /// Error returned instead of opening a stream
    rejection: Option<CompletionError>,
    /// Delay before each chunk
    chunk_delay: Option<Duration>,
}

impl ResponseTemplate {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            stream_error: None,
            rejection: None,
            chunk_delay: None,
        }
    }

    /// Fail the stream after the content was sent
    pub fn with_stream_error(mut self, error: CompletionError) -> Self {
        self.stream_error = Some(error);
        self
    }

    /// Fail `chat_stream` itself
    pub fn rejecting(error: CompletionError) -> Self {
        Self {
            rejection: Some(error),
            ..Self::new("")
        }
    }

    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    /// Split content into word chunks, keeping whitespace attached
    fn chunks(&self) -> Vec<String> {
        self.content
            .split_inclusive(' ')
            .map(str::to_string)
            .collect()
    }
}

struct MockExpectation {
    matcher: RequestMatcher,
    response: ResponseTemplate,
}

struct MockConfig {
    expectations: Vec<MockExpectation>,
    default_response: ResponseTemplate,
}

/// Builder for configuring a single expectation
pub struct MockExpectationBuilder {
    config: Arc<Mutex<MockConfig>>,
    matcher: RequestMatcher,
}

impl MockExpectationBuilder {
    pub async fn respond_with(self, response: ResponseTemplate) {
        let mut config = self.config.lock().await;
        config.expectations.push(MockExpectation {
            matcher: self.matcher,
            response,
        });
    }
}

/// A request observed by [`MockBackend`]
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub token: String,
    pub request: ChatRequest,
}

/// Chat backend answering from configured templates
pub struct MockBackend {
    config: Arc<Mutex<MockConfig>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    ended: Arc<Mutex<Vec<String>>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::with_default_response(ResponseTemplate::new("pong"))
    }

    pub fn with_default_response(response: ResponseTemplate) -> Self {
        Self {
            config: Arc::new(Mutex::new(MockConfig {
                expectations: Vec::new(),
                default_response: response,
            })),
            requests: Arc::new(Mutex::new(Vec::new())),
            ended: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Add a conditional response; the first matching expectation wins
    pub fn when(&self, matcher: RequestMatcher) -> MockExpectationBuilder {
        MockExpectationBuilder {
            config: self.config.clone(),
            matcher,
        }
    }

    pub async fn set_default_response(&self, response: ResponseTemplate) {
        self.config.lock().await.default_response = response;
    }

    pub async fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().await.clone()
    }

    pub async fn ended_conversations(&self) -> Vec<String> {
        self.ended.lock().await.clone()
    }

    async fn find_response(&self, token: &str, request: &ChatRequest) -> ResponseTemplate {
        let config = self.config.lock().await;
        config
            .expectations
            .iter()
            .find(|e| e.matcher.matches(token, request))
            .map(|e| e.response.clone())
            .unwrap_or_else(|| config.default_response.clone())
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatBackend for MockBackend {
    fn backend_type(&self) -> &'static str {
        "mock"
    }

    async fn chat_stream(
        &self,
        token: &str,
        request: ChatRequest,
    ) -> Result<StreamTranslator, CompletionError> {
        let response = self.find_response(token, &request).await;
        self.requests.lock().await.push(RecordedRequest {
            token: token.to_string(),
            request,
        });

        if let Some(error) = response.rejection {
            return Err(error);
        }

        let (tx, translator) = StreamTranslator::channel();
        tokio::spawn(async move {
            for chunk in response.chunks() {
                if let Some(delay) = response.chunk_delay {
                    tokio::time::sleep(delay).await;
                }
                if tx.send(BackendEvent::Append(chunk)).await.is_err() {
                    return;
                }
            }
            if let Some(error) = response.stream_error {
                let _ = tx.send(BackendEvent::Failed(error)).await;
            }
        });
        Ok(translator)
    }

    async fn end_conversation(&self, conversation_id: &str) -> bool {
        self.ended.lock().await.push(conversation_id.to_string());
        true
    }
}

#[derive(Default)]
struct SessionLog {
    created: StdMutex<Vec<String>>,
    deleted: StdMutex<Vec<String>>,
    prompts: StdMutex<Vec<String>>,
    script: StdMutex<Vec<SessionUpdate>>,
}

/// Session factory whose sessions replay a fixed script of updates
#[derive(Default)]
pub struct MockSessionFactory {
    log: Arc<SessionLog>,
}

impl MockSessionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Updates every reply emits, in order
    pub fn script(&self, updates: Vec<SessionUpdate>) {
        *lock(&self.log.script) = updates;
    }

    /// Conversation ids sessions were created for
    pub fn created(&self) -> Vec<String> {
        lock(&self.log.created).clone()
    }

    /// Conversation ids whose remote history was deleted
    pub fn deleted(&self) -> Vec<String> {
        lock(&self.log.deleted).clone()
    }

    pub fn prompts(&self) -> Vec<String> {
        lock(&self.log.prompts).clone()
    }
}

impl SessionFactory for MockSessionFactory {
    fn create(&self, request: &SessionRequest) -> Result<Arc<dyn BackendSession>, CompletionError> {
        lock(&self.log.created).push(request.conversation_id.clone());
        Ok(Arc::new(MockSession {
            conversation_id: request.conversation_id.clone(),
            log: self.log.clone(),
        }))
    }
}

struct MockSession {
    conversation_id: String,
    log: Arc<SessionLog>,
}

#[async_trait]
impl BackendSession for MockSession {
    async fn reply(
        &self,
        _timeout: Duration,
        prompt: &str,
        _history: &[ChatMessage],
    ) -> Result<mpsc::Receiver<SessionUpdate>, CompletionError> {
        lock(&self.log.prompts).push(prompt.to_string());
        let updates = lock(&self.log.script).clone();

        let (tx, rx) = mpsc::channel(updates.len().max(1));
        tokio::spawn(async move {
            for update in updates {
                if tx.send(update).await.is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }

    async fn delete(&self) -> Result<(), CompletionError> {
        lock(&self.log.deleted).push(self.conversation_id.clone());
        Ok(())
    }
}
