//! HTTP route definitions

use axum::{
    extract::{Extension, Path, State},
    http::{header, Method, StatusCode},
    middleware,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::app::AppState;
use crate::game::{valid_score_limit, MatchId, MatchStatus, RegisterError};
use crate::http::middleware::{require_auth, AuthenticatedUser};
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    // CORS configuration - support multiple origins (comma-separated in CLIENT_ORIGIN)
    let allowed_origins: Vec<header::HeaderValue> = state
        .config
        .client_origin
        .split(',')
        .filter_map(|s| s.trim().parse::<header::HeaderValue>().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true);

    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route("/matches/:match_id", post(init_match_handler))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    active_matches: usize,
    connected_sessions: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let registry = state.engine.registry();

    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        active_matches: registry.active_matches(),
        connected_sessions: registry.total_subscribers(),
    })
}

// ============================================================================
// Match initialization
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct InitMatchRequest {
    score_limit: Option<u32>,
}

#[derive(Serialize)]
struct InitMatchResponse {
    match_id: MatchId,
    status: MatchStatus,
    score_limit: u32,
}

async fn init_match_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(match_id): Path<MatchId>,
    body: Option<Json<InitMatchRequest>>,
) -> Result<Json<InitMatchResponse>, AppError> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    if req.score_limit.is_some_and(|limit| !valid_score_limit(limit)) {
        return Err(AppError::BadRequest(
            "score_limit must be between 1 and 2147483647".to_string(),
        ));
    }

    let entry = state
        .engine
        .init_match(match_id, req.score_limit)
        .map_err(|e| match e {
            RegisterError::MatchOver => AppError::Conflict(format!("match {} is already over", match_id)),
            other => AppError::Internal(other.to_string()),
        })?;

    let (status, score_limit) = entry.with_state(|s| (s.status, s.score.limit));
    info!(match_id, requested_by = %auth.user_id, "Match initialization requested");

    Ok(Json(InitMatchResponse {
        match_id,
        status,
        score_limit,
    }))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
