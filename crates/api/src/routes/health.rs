use crate::AppState;
use axum::{extract::State, http::StatusCode, response::Json as ResponseJson};
use serde::{Deserialize, Serialize};

/// Credential health of one backend route
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteHealth {
    pub name: String,
    pub backend: String,
    pub credentials: usize,
    pub live: usize,
    pub self_healing: bool,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// "ok" when every route has a live credential or can mint one, else "degraded"
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub routes: Vec<RouteHealth>,
}

/// Health check endpoint
///
/// Always answers 200 so load balancers keep routing while pools recover.
pub async fn health_check(
    State(app_state): State<AppState>,
) -> (StatusCode, ResponseJson<HealthResponse>) {
    let routes: Vec<RouteHealth> = app_state
        .completion_service
        .route_status()
        .await
        .into_iter()
        .map(|status| RouteHealth {
            name: status.name,
            backend: status.backend,
            credentials: status.credentials,
            live: status.live,
            self_healing: status.self_healing,
        })
        .collect();

    let healthy = routes
        .iter()
        .all(|route| route.live > 0 || route.self_healing);

    (
        StatusCode::OK,
        ResponseJson(HealthResponse {
            status: if healthy { "ok" } else { "degraded" }.to_string(),
            version: option_env!("CARGO_PKG_VERSION").map(|v| v.to_string()),
            routes,
        }),
    )
}
