use anyhow::Context;
use api::{build_app, init_tracing};
use config::GatewayConfig;
use inference_providers::{ChatBackend, CursorBackend, CursorBackendConfig};
use services::{
    credential_pool::{start_pool, ChatProbe, CredentialProbe},
    BackendRoute, CompletionServiceImpl,
};
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;

/// Model prefix routed to the binary protocol backend
const CURSOR_MODEL_PREFIX: &str = "cursor/";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration first to get logging settings
    let config = GatewayConfig::load().unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {e}");
        eprintln!("Application cannot start without a valid configuration.");
        std::process::exit(1);
    });

    init_tracing(&config.logging);

    let request_timeout = Duration::from_secs(config.request_timeout_secs);
    let cancel = CancellationToken::new();

    let cursor: Arc<dyn ChatBackend> = Arc::new(
        CursorBackend::new(CursorBackendConfig {
            base_url: config.cursor.base_url.clone(),
            client_version: config.cursor.client_version.clone(),
            timezone: config.cursor.timezone.clone(),
            checksum: config.cursor.checksum.clone(),
            proxy: config.cursor.proxy.clone(),
            timeout_seconds: config.request_timeout_secs,
        })
        .context("Failed to create cursor backend")?,
    );

    let probe: Arc<dyn CredentialProbe> = Arc::new(ChatProbe::new(
        cursor.clone(),
        config.cursor.probe_model.clone(),
        request_timeout,
    ));
    // Fixed pool: no LoginFlow is wired into this binary. Passing one here
    // makes the pool self-healing and spawns the reconciler.
    let cursor_pool = start_pool(&config.pool, probe, None, cancel.clone());
    tracing::info!(
        credentials = cursor_pool.pool.len().await,
        self_healing = cursor_pool.pool.supports_regeneration(),
        "Cursor credential pool ready"
    );

    let completion_service = Arc::new(CompletionServiceImpl::new(
        vec![BackendRoute {
            name: "cursor".to_string(),
            model_prefix: CURSOR_MODEL_PREFIX.to_string(),
            backend: cursor,
            pool: cursor_pool.pool.clone(),
        }],
        request_timeout,
    ));

    let app = build_app(completion_service);

    let bind_address = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind {bind_address}"))?;

    tracing::info!(address = %bind_address, "Server started successfully");
    tracing::info!("API Endpoints:");
    tracing::info!("  - POST /v1/chat/completions (Chat Completions)");
    tracing::info!("  - DELETE /v1/conversations/{{id}} (End Conversation)");
    tracing::info!("  - GET /health (Health)");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await
        .context("Server error")?;

    cancel.cancel();
    if let Some(reconciler) = cursor_pool.reconciler {
        if let Err(e) = reconciler.await {
            tracing::error!(error = %e, "Credential reconciler panicked");
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");
    cancel.cancel();
}
