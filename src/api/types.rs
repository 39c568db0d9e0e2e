use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::{Role, User};

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub const fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LoginPage {
    pub error: Option<String>,
    pub next: Option<String>,
    pub allow_registration: bool,
    pub allow_password_reset: bool,
}

#[derive(Debug, Serialize)]
pub struct RegisterPage {
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DashboardStats {
    pub total_users: u64,
    pub active_users: u64,
    pub inactive_users: u64,
    pub by_role: BTreeMap<Role, u64>,
}

#[derive(Debug, Serialize)]
pub struct UserListResponse {
    pub users: Vec<User>,
    pub total: usize,
    pub page: usize,
    pub per_page: usize,
}

/// Admin-side create request. Unlike self-registration the role is chosen here.
#[derive(Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    #[serde(default)]
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default = "default_true")]
    pub active: bool,
}

#[derive(Deserialize, Default)]
pub struct UpdateUserRequest {
    pub email: Option<String>,
    pub role: Option<Role>,
    pub active: Option<bool>,
    pub password: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct ProfileUpdateRequest {
    pub email: Option<String>,
    pub current_password: Option<String>,
    pub new_password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
    pub uptime_seconds: u64,
    pub version: &'static str,
}

const fn default_true() -> bool {
    true
}
