use axum::{
    Form, Json, Router,
    extract::{Query, State},
    response::Redirect,
    routing::get,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_sessions::Session;
use tracing::info;

use super::validation::{safe_next, validate_email, validate_password, validate_username};
use super::{ApiError, ApiResponse, LoginPage, MessageResponse, RegisterPage, profile};
use crate::auth::{AuthManager, session};
use crate::db::CreateUserError;
use crate::models::Role;

// ============================================================================
// Request Types
// ============================================================================

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct PageQuery {
    pub error: Option<String>,
    pub next: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
    pub next: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct RegisterForm {
    pub username: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

// ============================================================================
// Routes
// ============================================================================

/// Login, logout and profile always; registration and the reset stub when enabled.
pub fn router(auth: Arc<AuthManager>) -> Router {
    let config = auth.config();

    let mut router = Router::new()
        .route("/login", get(login_page).post(login))
        .route("/logout", get(logout).post(logout))
        .route("/profile", get(profile::get_profile).post(profile::update_profile));

    if config.allow_registration {
        router = router.route("/register", get(register_page).post(register));
    }

    if config.allow_password_reset {
        router = router.route("/forgot", get(forgot_password));
    }

    router.with_state(auth)
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /auth/login
pub async fn login_page(
    State(auth): State<Arc<AuthManager>>,
    Query(query): Query<PageQuery>,
) -> Json<ApiResponse<LoginPage>> {
    let config = auth.config();

    Json(ApiResponse::success(LoginPage {
        error: query.error.as_deref().map(describe_error),
        next: query.next.as_deref().and_then(safe_next).map(str::to_string),
        allow_registration: config.allow_registration,
        allow_password_reset: config.allow_password_reset,
    }))
}

/// POST /auth/login
/// Both outcomes redirect; a failure never says which part was wrong.
pub async fn login(
    State(auth): State<Arc<AuthManager>>,
    session: Session,
    Form(form): Form<LoginForm>,
) -> Result<Redirect, ApiError> {
    let next = form.next.as_deref().and_then(safe_next);
    let username = form.username.trim();

    let user = if username.is_empty() || form.password.is_empty() {
        None
    } else {
        auth.users()
            .authenticate(username, &form.password)
            .await
            .map_err(|e| ApiError::DatabaseError(format!("Authentication error: {e}")))?
    };

    let Some(user) = user else {
        metrics::counter!("auth_login_attempts_total", "outcome" => "failure").increment(1);
        info!(username, "Login failed");

        let mut target = format!("{}?error=invalid", auth.config().login_path);
        if let Some(next) = next {
            target.push_str("&next=");
            target.push_str(&urlencoding::encode(next));
        }
        return Ok(Redirect::to(&target));
    };

    session::log_in(&session, &user)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to create session: {e}")))?;

    metrics::counter!("auth_login_attempts_total", "outcome" => "success").increment(1);
    info!(username = %user.username, role = %user.role, "User logged in");

    Ok(Redirect::to(next.unwrap_or("/")))
}

/// GET|POST /auth/logout
pub async fn logout(
    State(auth): State<Arc<AuthManager>>,
    session: Session,
) -> Result<Redirect, ApiError> {
    if let Ok(Some(user)) = session::load(&session).await {
        info!(username = %user.username, "User logged out");
    }

    session::clear(&session)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to clear session: {e}")))?;

    Ok(Redirect::to(&auth.config().login_path))
}

/// GET /auth/register
pub async fn register_page(Query(query): Query<PageQuery>) -> Json<ApiResponse<RegisterPage>> {
    Json(ApiResponse::success(RegisterPage {
        error: query.error.as_deref().map(describe_error),
    }))
}

/// POST /auth/register
/// Self-registration always yields a plain user, logged in on success.
pub async fn register(
    State(auth): State<Arc<AuthManager>>,
    session: Session,
    Form(form): Form<RegisterForm>,
) -> Result<Redirect, ApiError> {
    let fail = |code: &str| -> Result<Redirect, ApiError> {
        Ok(Redirect::to(&format!(
            "{}/register?error={code}",
            auth.config().route_prefix
        )))
    };

    if form.password != form.confirm_password {
        return fail("password_mismatch");
    }

    let Ok(username) = validate_username(&form.username) else {
        return fail("invalid_username");
    };

    if validate_password(&form.password).is_err() {
        return fail("weak_password");
    }

    let Ok(email) = validate_email(&form.email) else {
        return fail("invalid_email");
    };

    let user = match auth
        .users()
        .create(username, email, &form.password, Role::User)
        .await
    {
        Ok(user) => user,
        Err(CreateUserError::Conflict(_)) => return fail("username_taken"),
        Err(CreateUserError::Storage(e)) => {
            tracing::error!("Registration failed for {username}: {e:#}");
            return fail("creation_failed");
        }
    };

    session::log_in(&session, &user)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to create session: {e}")))?;

    info!(username = %user.username, "User registered");
    Ok(Redirect::to("/"))
}

/// GET /auth/forgot
pub async fn forgot_password() -> Json<ApiResponse<MessageResponse>> {
    Json(ApiResponse::success(MessageResponse::new(
        "Password reset is handled by an administrator. Please contact one to regain access.",
    )))
}

fn describe_error(code: &str) -> String {
    match code {
        "invalid" => "Invalid username or password",
        "password_mismatch" => "Passwords do not match",
        "username_taken" => "Username is already taken",
        "invalid_username" => {
            "Username can only contain letters, numbers, dots, hyphens, and underscores"
        }
        "weak_password" => "Password must be at least 8 characters",
        "invalid_email" => "Email address is not valid",
        "creation_failed" => "Account could not be created, please try again",
        _ => "Something went wrong, please try again",
    }
    .to_string()
}
