//! Login state kept in the cookie-backed session.
//!
//! Only these three keys are ever written; everything else about the session
//! belongs to the session layer.

use anyhow::Result;
use tower_sessions::Session;

use crate::models::{Role, User};

pub const USERNAME_KEY: &str = "auth";
pub const USER_ID_KEY: &str = "user_id";
pub const ROLE_KEY: &str = "role";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUser {
    pub username: String,
    pub user_id: i32,
    /// Informational only; access checks use the role read from storage.
    pub role: Option<Role>,
}

/// Returns `None` unless both the username and the user id are present.
pub async fn load(session: &Session) -> Result<Option<SessionUser>> {
    let Some(user_id) = session.get::<i32>(USER_ID_KEY).await? else {
        return Ok(None);
    };
    let Some(username) = session.get::<String>(USERNAME_KEY).await? else {
        return Ok(None);
    };
    let role = session.get::<Role>(ROLE_KEY).await?;

    Ok(Some(SessionUser {
        username,
        user_id,
        role,
    }))
}

/// Issues a fresh session id before writing, so a pre-login id cannot be reused.
pub async fn log_in(session: &Session, user: &User) -> Result<()> {
    session.cycle_id().await?;
    session.insert(USERNAME_KEY, &user.username).await?;
    session.insert(USER_ID_KEY, user.id).await?;
    session.insert(ROLE_KEY, user.role).await?;
    Ok(())
}

pub async fn refresh_role(session: &Session, role: Role) -> Result<()> {
    session.insert(ROLE_KEY, role).await?;
    Ok(())
}

pub async fn clear(session: &Session) -> Result<()> {
    session.flush().await?;
    Ok(())
}
