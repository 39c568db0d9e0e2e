use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
};
use serde::Deserialize;
use std::sync::Arc;

use super::validation::{validate_email, validate_limit, validate_password, validate_user_id, validate_username};
use super::{
    ApiError, ApiResponse, CreateUserRequest, DashboardStats, MessageResponse, UpdateUserRequest,
    UserListResponse,
};
use crate::auth::{AuthManager, CurrentUser};
use crate::models::{NewUser, Role, User, UserUpdate};

const DEFAULT_PER_PAGE: usize = 25;

/// Admin user management. Callers mount this behind an admin guard.
pub fn router(auth: Arc<AuthManager>) -> Router {
    Router::new()
        .route("/", get(dashboard))
        .route("/users", get(list_users).post(create_user))
        .route(
            "/users/{id}",
            get(get_user).put(update_user).delete(delete_user),
        )
        .with_state(auth)
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct UserListQuery {
    pub search: Option<String>,
    pub role: Option<String>,
    pub status: Option<String>,
    pub page: Option<usize>,
    pub per_page: Option<usize>,
}

/// Parsed listing filters. Every set field must match.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UserFilter {
    pub search: Option<String>,
    pub role: Option<Role>,
    pub active: Option<bool>,
}

impl UserFilter {
    fn from_query(query: &UserListQuery) -> Result<Self, ApiError> {
        let search = query
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);

        let role = match query.role.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(raw.parse::<Role>().map_err(|e| ApiError::validation(e.to_string()))?),
        };

        let active = match query.status.as_deref().map(str::trim) {
            None | Some("") => None,
            Some("active") => Some(true),
            Some("inactive") => Some(false),
            Some(other) => {
                return Err(ApiError::validation(format!(
                    "Invalid status '{other}'. Expected 'active' or 'inactive'"
                )));
            }
        };

        Ok(Self {
            search,
            role,
            active,
        })
    }

    fn matches(&self, user: &User) -> bool {
        let search_ok = self.search.as_deref().is_none_or(|needle| {
            user.username.to_lowercase().contains(needle) || user.email.to_lowercase().contains(needle)
        });

        search_ok
            && self.role.is_none_or(|role| user.role == role)
            && self.active.is_none_or(|active| user.active == active)
    }
}

#[must_use]
pub fn filter_users(users: Vec<User>, filter: &UserFilter) -> Vec<User> {
    users.into_iter().filter(|u| filter.matches(u)).collect()
}

/// GET /auth/admin
pub async fn dashboard(
    State(auth): State<Arc<AuthManager>>,
) -> Result<Json<ApiResponse<DashboardStats>>, ApiError> {
    let by_role = auth.users().count_by_role().await?;
    let users = auth.users().list_all().await?;

    let total_users = users.len() as u64;
    let active_users = users.iter().filter(|u| u.active).count() as u64;

    Ok(Json(ApiResponse::success(DashboardStats {
        total_users,
        active_users,
        inactive_users: total_users - active_users,
        by_role,
    })))
}

/// GET /auth/admin/users
pub async fn list_users(
    State(auth): State<Arc<AuthManager>>,
    Query(query): Query<UserListQuery>,
) -> Result<Json<ApiResponse<UserListResponse>>, ApiError> {
    let filter = UserFilter::from_query(&query)?;
    let per_page = validate_limit(query.per_page.unwrap_or(DEFAULT_PER_PAGE))?;
    let page = query.page.unwrap_or(1).max(1);

    let matching = filter_users(auth.users().list_all().await?, &filter);
    let total = matching.len();

    let users = matching
        .into_iter()
        .skip((page - 1).saturating_mul(per_page))
        .take(per_page)
        .collect();

    Ok(Json(ApiResponse::success(UserListResponse {
        users,
        total,
        page,
        per_page,
    })))
}

/// POST /auth/admin/users
pub async fn create_user(
    State(auth): State<Arc<AuthManager>>,
    admin: CurrentUser,
    Json(payload): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<ApiResponse<User>>), ApiError> {
    let username = validate_username(&payload.username)?;
    let email = validate_email(&payload.email)?;
    validate_password(&payload.password)?;

    let new_user = NewUser::new(username, email, &payload.password, payload.role)
        .with_active(payload.active);
    let user = auth.users().insert(new_user).await?;

    tracing::info!(
        admin = %admin.username,
        username = %user.username,
        role = %user.role,
        "Admin created user"
    );

    Ok((StatusCode::CREATED, Json(ApiResponse::success(user))))
}

/// GET /auth/admin/users/{id}
pub async fn get_user(
    State(auth): State<Arc<AuthManager>>,
    Path(id): Path<i32>,
) -> Result<Json<ApiResponse<User>>, ApiError> {
    let id = validate_user_id(id)?;

    let user = auth
        .users()
        .get_by_id(id)
        .await?
        .ok_or_else(|| ApiError::user_not_found(id))?;

    Ok(Json(ApiResponse::success(user)))
}

/// PUT /auth/admin/users/{id}
pub async fn update_user(
    State(auth): State<Arc<AuthManager>>,
    admin: CurrentUser,
    Path(id): Path<i32>,
    Json(payload): Json<UpdateUserRequest>,
) -> Result<Json<ApiResponse<User>>, ApiError> {
    let id = validate_user_id(id)?;

    // An admin locking themselves out leaves nobody to undo it
    if id == admin.id
        && (payload.active == Some(false) || payload.role.is_some_and(|r| r != Role::Admin))
    {
        return Err(ApiError::validation(
            "You cannot deactivate or demote your own account",
        ));
    }

    let email = payload
        .email
        .as_deref()
        .map(validate_email)
        .transpose()?
        .map(str::to_string);

    if let Some(password) = payload.password.as_deref() {
        validate_password(password)?;
    }

    let changes = UserUpdate {
        email,
        role: payload.role,
        active: payload.active,
        password: payload.password,
    };

    if !auth.users().update(id, changes).await? {
        return Err(ApiError::user_not_found(id));
    }

    let user = auth
        .users()
        .get_by_id(id)
        .await?
        .ok_or_else(|| ApiError::user_not_found(id))?;

    tracing::info!(admin = %admin.username, username = %user.username, "Admin updated user");

    Ok(Json(ApiResponse::success(user)))
}

/// DELETE /auth/admin/users/{id}
pub async fn delete_user(
    State(auth): State<Arc<AuthManager>>,
    admin: CurrentUser,
    Path(id): Path<i32>,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    let id = validate_user_id(id)?;

    if id == admin.id {
        return Err(ApiError::validation("You cannot delete your own account"));
    }

    if !auth.users().delete(id).await? {
        return Err(ApiError::user_not_found(id));
    }

    tracing::info!(admin = %admin.username, user_id = id, "Admin deleted user");

    Ok(Json(ApiResponse::success(MessageResponse::new(format!(
        "User {id} deleted"
    )))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HashedPassword;

    fn user(id: i32, username: &str, email: &str, role: Role, active: bool) -> User {
        User {
            id,
            username: username.to_string(),
            email: email.to_string(),
            password: HashedPassword::normalize(
                "$argon2id$v=19$m=64,t=1,p=1$c2FsdHNhbHRzYWx0$aGFzaGhhc2hoYXNoaGFzaA",
                None,
            )
            .unwrap(),
            role,
            active,
            created_at: String::new(),
            last_login: String::new(),
        }
    }

    fn sample() -> Vec<User> {
        vec![
            user(1, "admin", "admin@localhost", Role::Admin, true),
            user(2, "alice", "alice@example.com", Role::User, true),
            user(3, "bob", "bob@corp.test", Role::Manager, true),
            user(4, "carol", "carol@example.com", Role::User, false),
        ]
    }

    fn usernames(users: &[User]) -> Vec<&str> {
        users.iter().map(|u| u.username.as_str()).collect()
    }

    #[test]
    fn test_empty_filter_keeps_everything() {
        let filtered = filter_users(sample(), &UserFilter::default());
        assert_eq!(filtered.len(), 4);
    }

    #[test]
    fn test_search_matches_username_or_email_case_insensitively() {
        let filter = UserFilter {
            search: Some("example".to_string()),
            ..Default::default()
        };
        assert_eq!(usernames(&filter_users(sample(), &filter)), ["alice", "carol"]);

        let query = UserListQuery {
            search: Some("  BOB ".to_string()),
            ..Default::default()
        };
        let filter = UserFilter::from_query(&query).unwrap();
        assert_eq!(usernames(&filter_users(sample(), &filter)), ["bob"]);
    }

    #[test]
    fn test_filters_combine() {
        let query = UserListQuery {
            search: Some("example.com".to_string()),
            role: Some("user".to_string()),
            status: Some("active".to_string()),
            ..Default::default()
        };
        let filter = UserFilter::from_query(&query).unwrap();
        assert_eq!(usernames(&filter_users(sample(), &filter)), ["alice"]);

        let query = UserListQuery {
            status: Some("inactive".to_string()),
            ..Default::default()
        };
        let filter = UserFilter::from_query(&query).unwrap();
        assert_eq!(usernames(&filter_users(sample(), &filter)), ["carol"]);
    }

    #[test]
    fn test_blank_query_values_are_ignored() {
        let query = UserListQuery {
            search: Some("   ".to_string()),
            role: Some(String::new()),
            status: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(UserFilter::from_query(&query).unwrap(), UserFilter::default());
    }

    #[test]
    fn test_invalid_filters_are_rejected() {
        let query = UserListQuery {
            role: Some("superuser".to_string()),
            ..Default::default()
        };
        assert!(UserFilter::from_query(&query).is_err());

        let query = UserListQuery {
            status: Some("banned".to_string()),
            ..Default::default()
        };
        assert!(UserFilter::from_query(&query).is_err());
    }
}
