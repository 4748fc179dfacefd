#![allow(dead_code)]

use api::{build_app, session_route};
use inference_providers::{MockBackend, MockSessionFactory, SessionRegistry};
use services::{
    credential_pool::{ports::MockCredentialProbe, CredentialPool},
    BackendRoute, CompletionServiceImpl,
};
use std::{sync::Arc, time::Duration};

/// Backends behind a test server, kept for assertions
pub struct TestBackends {
    pub cursor: Arc<MockBackend>,
    pub cursor_pool: Arc<CredentialPool>,
    pub sessions: Arc<MockSessionFactory>,
    pub registry: Arc<SessionRegistry>,
}

pub fn pool(tokens: &[&str]) -> Arc<CredentialPool> {
    let mut probe = MockCredentialProbe::new();
    probe.expect_probe().returning(|_| Ok(()));
    Arc::new(CredentialPool::new(
        tokens.iter().map(|t| t.to_string()).collect(),
        Arc::new(probe),
    ))
}

/// Setup a test server with a mock binary backend under `cursor/` and a
/// session backend under `session/`
pub fn setup_test_server_with(cursor_tokens: &[&str]) -> (axum_test::TestServer, TestBackends) {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::level_filters::LevelFilter::DEBUG)
        .try_init();

    let cursor = Arc::new(MockBackend::new());
    let cursor_pool = pool(cursor_tokens);

    let sessions = Arc::new(MockSessionFactory::new());
    let (session, registry) = session_route(
        "session",
        "session/",
        sessions.clone(),
        &config::SessionConfig {
            delete_history: true,
            ..Default::default()
        },
        pool(&["cookie"]),
        Duration::from_secs(5),
    );

    let service = Arc::new(CompletionServiceImpl::new(
        vec![
            BackendRoute {
                name: "cursor".to_string(),
                model_prefix: "cursor/".to_string(),
                backend: cursor.clone(),
                pool: cursor_pool.clone(),
            },
            session,
        ],
        Duration::from_secs(5),
    ));

    let server = axum_test::TestServer::new(build_app(service)).unwrap();
    (
        server,
        TestBackends {
            cursor,
            cursor_pool,
            sessions,
            registry,
        },
    )
}

pub fn setup_test_server() -> (axum_test::TestServer, TestBackends) {
    setup_test_server_with(&["token-a", "token-b"])
}

/// Parse an SSE body into its `data:` payloads
pub fn sse_data(body: &str) -> Vec<String> {
    body.split("\n\n")
        .filter_map(|event| {
            event
                .lines()
                .find_map(|line| line.strip_prefix("data: "))
                .map(str::to_string)
        })
        .collect()
}
