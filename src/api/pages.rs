use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;
use std::sync::Arc;

use super::{ApiResponse, AppState, HealthResponse, MessageResponse};
use crate::auth::CurrentUser;
use crate::models::Role;

#[derive(Debug, Serialize)]
pub struct Greeting {
    pub message: String,
    pub username: String,
    pub role: Role,
}

/// GET /
pub async fn home(user: CurrentUser) -> Json<ApiResponse<Greeting>> {
    Json(ApiResponse::success(Greeting {
        message: format!("Welcome back, {}", user.username),
        username: user.username.clone(),
        role: user.role,
    }))
}

/// GET /about
pub async fn about() -> Json<ApiResponse<MessageResponse>> {
    Json(ApiResponse::success(MessageResponse::new(
        "Turnstile guards this application with session logins and role checks.",
    )))
}

/// GET /admin
pub async fn admin_panel(user: CurrentUser) -> Json<ApiResponse<MessageResponse>> {
    Json(ApiResponse::success(MessageResponse::new(format!(
        "Admin area. Signed in as {}",
        user.username
    ))))
}

/// GET /manager
pub async fn manager_view(user: CurrentUser) -> Json<ApiResponse<MessageResponse>> {
    Json(ApiResponse::success(MessageResponse::new(format!(
        "Manager area. Signed in as {} ({})",
        user.username, user.role
    ))))
}

/// GET /health
pub async fn health(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<ApiResponse<HealthResponse>>) {
    let database_ok = state.store.ping().await.is_ok();
    let status = if database_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ApiResponse::success(HealthResponse {
            status: if database_ok { "ok" } else { "degraded" },
            database: if database_ok { "connected" } else { "unreachable" },
            uptime_seconds: state.start_time.elapsed().as_secs(),
            version: env!("CARGO_PKG_VERSION"),
        })),
    )
}
