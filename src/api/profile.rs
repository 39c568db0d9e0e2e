use axum::{Json, extract::State};
use std::sync::Arc;
use tokio::task;

use super::validation::{validate_email, validate_password};
use super::{ApiError, ApiResponse, ProfileUpdateRequest};
use crate::auth::{AuthManager, CurrentUser};
use crate::models::{User, UserUpdate};

/// GET /auth/profile
pub async fn get_profile(user: CurrentUser) -> Json<ApiResponse<User>> {
    Json(ApiResponse::success(user.into_inner()))
}

/// POST /auth/profile
/// Users may change their own email and password, never their role or status.
pub async fn update_profile(
    State(auth): State<Arc<AuthManager>>,
    user: CurrentUser,
    Json(payload): Json<ProfileUpdateRequest>,
) -> Result<Json<ApiResponse<User>>, ApiError> {
    let mut changes = UserUpdate::default();

    if let Some(email) = payload.email.as_deref() {
        changes.email = Some(validate_email(email)?.to_string());
    }

    if let Some(new_password) = payload.new_password {
        validate_password(&new_password)?;

        let Some(current_password) = payload.current_password else {
            return Err(ApiError::validation(
                "Current password is required to set a new one",
            ));
        };

        if current_password == new_password {
            return Err(ApiError::validation(
                "New password must be different from current password",
            ));
        }

        let stored = user.password.clone();
        let is_valid = task::spawn_blocking(move || stored.verify(&current_password))
            .await
            .map_err(|e| ApiError::internal(format!("Password verification error: {e}")))?;

        if !is_valid {
            return Err(ApiError::validation("Current password is incorrect"));
        }

        changes.password = Some(new_password);
    }

    if changes.is_empty() {
        return Ok(Json(ApiResponse::success(user.into_inner())));
    }

    let password_changed = changes.password.is_some();

    if !auth.users().update(user.id, changes).await? {
        return Err(ApiError::user_not_found(user.id));
    }

    if password_changed {
        tracing::info!("Password changed for user: {}", user.username);
    }

    let updated = auth
        .users()
        .get_by_id(user.id)
        .await?
        .ok_or_else(|| ApiError::user_not_found(user.id))?;

    Ok(Json(ApiResponse::success(updated)))
}
