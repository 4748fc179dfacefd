pub mod ports;

pub use ports::{
    CompletionError, CompletionRequest, CompletionResult, CompletionServiceTrait,
    CompletionStream, RouteStatus,
};

#[cfg(any(test, feature = "test-mocks"))]
pub use ports::MockCompletionServiceTrait;

use crate::credential_pool::CredentialPool;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use inference_providers::{ChatBackend, ChatRequest, DeltaStream};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

/// A backend reachable under a model-name prefix, with its own credentials
#[derive(Clone)]
pub struct BackendRoute {
    pub name: String,
    /// Stripped from the requested model before it reaches the backend
    pub model_prefix: String,
    pub backend: Arc<dyn ChatBackend>,
    pub pool: Arc<CredentialPool>,
}

// Passes deltas through unchanged; failures that say something about the
// credential are fed back to the pool it came from
struct InterceptStream {
    inner: DeltaStream,
    pool: Arc<CredentialPool>,
    token: String,
    route: String,
}

impl Stream for InterceptStream {
    type Item = Result<String, inference_providers::CompletionError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let poll = self.inner.as_mut().poll_next(cx);
        if let Poll::Ready(Some(Err(ref error))) = poll {
            if error.implicates_credential() {
                let pool = self.pool.clone();
                let token = self.token.clone();
                let message = error.to_string();
                tracing::warn!(route = %self.route, error = %message, "Stream failed on credential");
                tokio::spawn(async move {
                    pool.report_failure_for(&token, &message).await;
                });
            } else {
                tracing::warn!(route = %self.route, error = %error, "Stream failed");
            }
        }
        poll
    }
}

pub struct CompletionServiceImpl {
    routes: Vec<BackendRoute>,
    request_timeout: Duration,
}

impl CompletionServiceImpl {
    pub fn new(routes: Vec<BackendRoute>, request_timeout: Duration) -> Self {
        Self {
            routes,
            request_timeout,
        }
    }

    pub fn routes(&self) -> &[BackendRoute] {
        &self.routes
    }

    /// Pick the route with the longest matching prefix and strip it
    fn resolve<'a>(&self, model: &'a str) -> Result<(&BackendRoute, &'a str), CompletionError> {
        let route = self
            .routes
            .iter()
            .filter(|route| model.starts_with(&route.model_prefix))
            .max_by_key(|route| route.model_prefix.len())
            .ok_or_else(|| CompletionError::InvalidModel(model.to_string()))?;

        let native = &model[route.model_prefix.len()..];
        if native.is_empty() {
            return Err(CompletionError::InvalidModel(model.to_string()));
        }
        Ok((route, native))
    }

    fn validate(request: &CompletionRequest) -> Result<(), CompletionError> {
        if request.messages.is_empty() {
            return Err(CompletionError::InvalidParams(
                "messages must not be empty".to_string(),
            ));
        }
        if let Some(id) = &request.conversation_id {
            if id.is_empty() {
                return Err(CompletionError::InvalidParams(
                    "conversation_id must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CompletionServiceTrait for CompletionServiceImpl {
    async fn create_chat_completion_stream(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionStream, CompletionError> {
        Self::validate(&request)?;
        let (route, native_model) = self.resolve(&request.model)?;
        let conversation_id = request
            .conversation_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let token = route.pool.acquire().await?;
        tracing::debug!(
            route = %route.name,
            backend = route.backend.backend_type(),
            %conversation_id,
            model = native_model,
            "Dispatching completion"
        );

        let chat_request = ChatRequest::new(
            conversation_id.clone(),
            native_model,
            request.messages,
        );
        let opened = tokio::time::timeout(
            self.request_timeout,
            route.backend.chat_stream(&token, chat_request),
        )
        .await;

        let translator = match opened {
            Ok(Ok(translator)) => translator,
            Ok(Err(e)) => {
                if e.implicates_credential() {
                    route.pool.report_failure_for(&token, &e.to_string()).await;
                }
                tracing::warn!(route = %route.name, error = %e, "Backend rejected completion");
                return Err(e.into());
            }
            Err(_) => {
                return Err(inference_providers::CompletionError::Timeout(
                    self.request_timeout,
                )
                .into())
            }
        };

        let deltas = translator.with_timeout(self.request_timeout).into_stream();
        Ok(CompletionStream {
            conversation_id,
            model: request.model,
            deltas: Box::pin(InterceptStream {
                inner: deltas,
                pool: route.pool.clone(),
                token,
                route: route.name.clone(),
            }),
        })
    }

    async fn create_chat_completion(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResult, CompletionError> {
        let CompletionStream {
            conversation_id,
            model,
            mut deltas,
        } = self.create_chat_completion_stream(request).await?;

        let mut content = String::new();
        while let Some(delta) = deltas.next().await {
            content.push_str(&delta?);
        }

        Ok(CompletionResult {
            conversation_id,
            model,
            content,
        })
    }

    async fn end_conversation(&self, conversation_id: &str) -> bool {
        for route in &self.routes {
            route.backend.end_conversation(conversation_id).await;
        }
        true
    }

    async fn route_status(&self) -> Vec<RouteStatus> {
        let mut statuses = Vec::with_capacity(self.routes.len());
        for route in &self.routes {
            statuses.push(RouteStatus {
                name: route.name.clone(),
                backend: route.backend.backend_type().to_string(),
                credentials: route.pool.len().await,
                live: route.pool.live_count().await,
                self_healing: route.pool.supports_regeneration(),
            });
        }
        statuses
    }
}
