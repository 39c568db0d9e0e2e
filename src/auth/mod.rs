//! Pluggable authentication for an axum application.
//!
//! [`AuthManager`] owns the user repository and hands out the pieces a host
//! application wires in: an [`AccessGate`] that runs before every handler,
//! [`RoleGuard`] layers for individual routes, and the login/profile/admin
//! route surface.

use anyhow::Result;
use axum::Router;
use rand::{Rng, distr::Alphanumeric};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{AuthConfig, SecurityConfig};
use crate::db::{CreateUserError, Store, UserRepository};
use crate::models::{Role, User};

mod current_user;
pub mod gate;
pub mod guard;
pub mod session;

pub use current_user::CurrentUser;
pub use gate::{Access, AccessGate, PrincipalResolver, PublicPaths};
pub use guard::{RoleGuard, RoleGuarded};

const GENERATED_PASSWORD_LEN: usize = 20;

pub struct AuthManager {
    store: Store,
    users: UserRepository,
    config: AuthConfig,
}

impl AuthManager {
    #[must_use]
    pub fn new(store: Store, config: AuthConfig, security: &SecurityConfig) -> Self {
        let users = store.user_repo(security);
        Self {
            store,
            users,
            config,
        }
    }

    /// Brings the schema up to date, hashes any plaintext passwords left in
    /// storage and seeds an admin into an empty database.
    pub async fn initialize(&self) -> Result<Store> {
        self.store.migrate().await?;

        let rehashed = self.users.rehash_plaintext_passwords().await?;
        if rehashed > 0 {
            info!(count = rehashed, "Rehashed stored plaintext passwords");
        }

        if self.users.count().await? == 0 {
            self.seed_default_admin().await?;
        }

        Ok(self.store.clone())
    }

    async fn seed_default_admin(&self) -> Result<()> {
        let username = self.config.default_admin_username.as_str();
        let (password, generated) = match &self.config.default_admin_password {
            Some(password) => (password.clone(), false),
            None => (generate_password(), true),
        };

        match self
            .users
            .create(username, "admin@localhost", &password, Role::Admin)
            .await
        {
            Ok(_) => {}
            // Another process seeded first
            Err(CreateUserError::Conflict(_)) => return Ok(()),
            Err(CreateUserError::Storage(e)) => return Err(e),
        }

        if generated {
            warn!(
                "Created default admin '{}' with generated password: {}",
                username, password
            );
            warn!("Change this password after the first login");
        } else {
            info!("Created default admin '{}' from configuration", username);
        }

        Ok(())
    }

    #[must_use]
    pub const fn users(&self) -> &UserRepository {
        &self.users
    }

    #[must_use]
    pub const fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub const fn store(&self) -> &Store {
        &self.store
    }

    pub async fn get_user(&self, username: &str) -> Result<Option<User>> {
        self.users.get_by_username(username).await
    }

    /// Builds the access gate from the auth route surface, the configured
    /// public paths and `additional`.
    pub fn create_beforeware<I, P>(&self, additional: I) -> AccessGate
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        let mut public_paths = PublicPaths::new(self.route_surface_paths());
        public_paths.extend(self.config.public_paths.iter().cloned());
        public_paths.extend(additional);

        AccessGate::new(
            Arc::new(self.users.clone()),
            &self.config.login_path,
            public_paths,
        )
    }

    /// Auth routes an anonymous visitor must reach. The login path is added
    /// by the gate itself.
    fn route_surface_paths(&self) -> Vec<String> {
        let prefix = self.config.route_prefix.as_str();
        let mut paths = vec![format!("{prefix}/logout"), format!("{prefix}/forgot")];
        if self.config.allow_registration {
            paths.push(format!("{prefix}/register"));
        }
        paths
    }

    pub fn require_role(&self, roles: impl IntoIterator<Item = Role>) -> RoleGuard {
        RoleGuard::new(roles)
    }

    #[must_use]
    pub fn require_admin(&self) -> RoleGuard {
        RoleGuard::admin()
    }

    /// Mounts the login, profile and (optionally) admin routes under the
    /// configured prefix.
    pub fn register_routes(self: &Arc<Self>, app: Router, include_admin: bool) -> Router {
        let mut routes = crate::api::auth::router(self.clone());

        if include_admin {
            routes = routes.nest(
                "/admin",
                crate::api::admin::router(self.clone()).route_layer(self.require_admin()),
            );
        }

        app.nest(&self.config.route_prefix, routes)
    }
}

fn generate_password() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_PASSWORD_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn manager(config: AuthConfig) -> AuthManager {
        let store = Store::in_memory().await.unwrap();
        let security = SecurityConfig {
            argon2_memory_cost_kib: 64,
            argon2_time_cost: 1,
            argon2_parallelism: 1,
        };
        AuthManager::new(store, config, &security)
    }

    fn with_admin_password(password: &str) -> AuthConfig {
        AuthConfig {
            default_admin_password: Some(password.to_string()),
            ..AuthConfig::default()
        }
    }

    #[tokio::test]
    async fn test_initialize_seeds_admin_once() {
        let auth = manager(with_admin_password("admin-pass-1")).await;

        auth.initialize().await.unwrap();
        auth.initialize().await.unwrap();

        assert_eq!(auth.users().count().await.unwrap(), 1);

        let admin = auth.get_user("admin").await.unwrap().unwrap();
        assert_eq!(admin.role, Role::Admin);
        assert!(admin.active);

        let authed = auth
            .users()
            .authenticate("admin", "admin-pass-1")
            .await
            .unwrap();
        assert!(authed.is_some());
    }

    #[tokio::test]
    async fn test_initialize_skips_seed_when_users_exist() {
        let auth = manager(with_admin_password("admin-pass-1")).await;
        auth.store().migrate().await.unwrap();
        auth.users()
            .create("existing", "e@example.com", "password1", Role::User)
            .await
            .unwrap();

        auth.initialize().await.unwrap();

        assert_eq!(auth.users().count().await.unwrap(), 1);
        assert!(auth.get_user("admin").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_generated_admin_password_is_not_guessable() {
        let auth = manager(AuthConfig::default()).await;
        auth.initialize().await.unwrap();

        for guess in ["admin", "admin123", "password", ""] {
            assert!(
                auth.users()
                    .authenticate("admin", guess)
                    .await
                    .unwrap()
                    .is_none()
            );
        }
    }

    #[tokio::test]
    async fn test_count_by_role_after_seeding() {
        let auth = manager(with_admin_password("admin-pass-1")).await;
        auth.initialize().await.unwrap();

        let users = auth.users();
        users
            .create("user1", "u1@example.com", "password1", Role::User)
            .await
            .unwrap();
        users
            .create("user2", "u2@example.com", "password2", Role::User)
            .await
            .unwrap();
        users
            .create("manager1", "m1@example.com", "password3", Role::Manager)
            .await
            .unwrap();
        users
            .create("admin2", "a2@example.com", "password4", Role::Admin)
            .await
            .unwrap();

        let counts = users.count_by_role().await.unwrap();
        assert_eq!(counts[&Role::User], 2);
        assert_eq!(counts[&Role::Manager], 1);
        assert_eq!(counts[&Role::Admin], 2);
    }

    #[tokio::test]
    async fn test_beforeware_merges_public_paths() {
        let auth = manager(AuthConfig::default()).await;
        let gate = auth.create_beforeware(["/about", "/pricing/"]);

        assert!(gate.is_public("/auth/login"));
        assert!(gate.is_public("/static/app.css"));
        assert!(gate.is_public("/about"));
        assert!(gate.is_public("/pricing/enterprise"));
        assert!(!gate.is_public("/"));
        assert!(!gate.is_public("/admin"));
        assert!(!gate.is_public("/auth/register"));
    }

    #[tokio::test]
    async fn test_configured_public_paths_add_to_auth_routes() {
        let auth = manager(AuthConfig {
            route_prefix: "/account".to_string(),
            login_path: "/account/login".to_string(),
            public_paths: vec!["/about".to_string(), "/contact".to_string()],
            allow_registration: true,
            ..AuthConfig::default()
        })
        .await;
        let gate = auth.create_beforeware(Vec::<String>::new());

        for path in [
            "/account/login",
            "/account/logout",
            "/account/forgot",
            "/account/register",
            "/about",
            "/contact",
        ] {
            assert!(gate.is_public(path), "{path}");
        }
        assert!(!gate.is_public("/account/profile"));
        assert!(!gate.is_public("/static/app.css"));
    }

    #[test]
    fn test_generated_password_shape() {
        let password = generate_password();
        assert_eq!(password.len(), GENERATED_PASSWORD_LEN);
        assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(password, generate_password());
    }
}
