use axum::{Router, middleware, routing::get};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;
use tower_sessions::{Expiry, MemoryStore, SessionManagerLayer, cookie::SameSite};

use crate::auth::AuthManager;
use crate::config::Config;
use crate::db::Store;
use crate::models::Role;

pub mod admin;
pub mod auth;
mod error;
mod observability;
mod pages;
pub mod profile;
mod types;
pub mod validation;

pub use error::ApiError;
pub use types::*;

/// Paths the demo application serves without a login, on top of the
/// configured ones.
pub const HOST_PUBLIC_PATHS: [&str; 2] = ["/about", "/health"];

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,

    pub store: Store,

    pub auth: Arc<AuthManager>,

    pub start_time: Instant,

    pub prometheus_handle: Option<PrometheusHandle>,
}

/// Connects to storage, runs migrations and seeds the default admin if needed.
pub async fn create_app_state(
    config: Config,
    prometheus_handle: Option<PrometheusHandle>,
) -> anyhow::Result<Arc<AppState>> {
    let store = Store::with_pool_options(
        &config.general.database_path,
        config.general.max_db_connections,
        config.general.min_db_connections,
    )
    .await?;

    create_app_state_with_store(config, store, prometheus_handle).await
}

pub async fn create_app_state_with_store(
    config: Config,
    store: Store,
    prometheus_handle: Option<PrometheusHandle>,
) -> anyhow::Result<Arc<AppState>> {
    let auth = Arc::new(AuthManager::new(
        store,
        config.auth.clone(),
        &config.security,
    ));
    let store = auth.initialize().await?;

    Ok(Arc::new(AppState {
        config: Arc::new(config),
        store,
        auth,
        start_time: Instant::now(),
        prometheus_handle,
    }))
}

pub fn router(state: Arc<AppState>) -> Router {
    let server = &state.config.server;

    let session_layer = SessionManagerLayer::new(MemoryStore::default())
        .with_name(server.session_cookie_name.clone())
        .with_secure(server.secure_cookies)
        .with_same_site(SameSite::Lax)
        .with_http_only(true)
        .with_expiry(Expiry::OnInactivity(time::Duration::minutes(
            server.session_expiry_minutes,
        )));

    let auth = &state.auth;

    let app = Router::new()
        .route("/", get(pages::home))
        .route("/about", get(pages::about))
        .route("/health", get(pages::health))
        .route(
            "/admin",
            get(pages::admin_panel).route_layer(auth.require_admin()),
        )
        .route(
            "/manager",
            get(pages::manager_view).route_layer(auth.require_role([Role::Manager, Role::Admin])),
        )
        .route(
            "/metrics",
            get(observability::get_metrics).route_layer(auth.require_admin()),
        )
        .with_state(state.clone());

    let app = auth.register_routes(app, state.config.auth.include_admin);
    let gate = auth.create_beforeware(HOST_PUBLIC_PATHS);

    gate.protect(app)
        .layer(session_layer)
        .layer(middleware::from_fn(observability::logging_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(
            observability::security_headers_middleware,
        ))
}
