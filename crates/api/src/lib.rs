pub mod models;
pub mod routes;

use crate::routes::{chat_completions, delete_conversation, health_check};
use axum::{
    routing::{delete, get, post},
    Router,
};
use config::{LoggingConfig, SessionConfig};
use inference_providers::{
    SessionBackend, SessionBackendConfig, SessionCookies, SessionFactory, SessionRegistry,
};
use services::{completions::CompletionServiceTrait, BackendRoute, CredentialPool};
use std::{sync::Arc, time::Duration};

#[derive(Clone)]
pub struct AppState {
    pub completion_service: Arc<dyn CompletionServiceTrait>,
}

/// Build the complete application router
pub fn build_app(completion_service: Arc<dyn CompletionServiceTrait>) -> Router {
    let app_state = AppState { completion_service };

    let v1 = Router::new()
        .route("/chat/completions", post(chat_completions))
        .route("/conversations/{id}", delete(delete_conversation));

    Router::new()
        .nest("/v1", v1)
        .route("/health", get(health_check))
        .with_state(app_state)
}

/// Mount a session-oriented backend under `model_prefix`.
///
/// Returns the registry as well so callers can inspect live sessions.
pub fn session_route(
    name: &str,
    model_prefix: &str,
    factory: Arc<dyn SessionFactory>,
    config: &SessionConfig,
    pool: Arc<CredentialPool>,
    reply_timeout: Duration,
) -> (BackendRoute, Arc<SessionRegistry>) {
    let registry = Arc::new(SessionRegistry::new(factory, config.delete_history));
    let backend = SessionBackend::new(
        registry.clone(),
        SessionBackendConfig {
            cookies: SessionCookies {
                kiev_rps_sec_auth: config.kiev_rps_sec_auth.clone().unwrap_or_default(),
                rw_bf: config.rw_bf.clone().unwrap_or_default(),
            },
            proxy: config.proxy.clone(),
            reply_timeout,
        },
    );

    let route = BackendRoute {
        name: name.to_string(),
        model_prefix: model_prefix.to_string(),
        backend: Arc::new(backend),
        pool,
    };
    (route, registry)
}

pub fn init_tracing(logging_config: &LoggingConfig) {
    let filter = logging_config.filter_directive();

    // try_init: tests may install a subscriber first
    let result = match logging_config.format.as_str() {
        "json" => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init(),
        "compact" => tracing_subscriber::fmt()
            .compact()
            .with_env_filter(filter)
            .try_init(),
        _ => tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(filter)
            .try_init(),
    };

    if let Err(e) = result {
        eprintln!("Tracing already initialized: {e}");
    }
}
