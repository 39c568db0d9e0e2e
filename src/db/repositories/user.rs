use anyhow::{Context, Result};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, SqlErr, sea_query::Expr,
};
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tokio::task;
use tracing::{debug, info, warn};

use crate::config::SecurityConfig;
use crate::entities::users;
use crate::models::{
    HashedPassword, NewUser, Role, User, UserUpdate, hash_password, is_hashed, verify_password,
};

#[derive(Debug, Error)]
pub enum CreateUserError {
    #[error("Username '{0}' already exists")]
    Conflict(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

#[derive(Clone)]
pub struct UserRepository {
    conn: DatabaseConnection,
    security: SecurityConfig,
    /// Verified against when the username does not exist, so a miss costs
    /// the same as a wrong password under this repository's Argon2 params.
    dummy_hash: Arc<OnceLock<String>>,
}

impl UserRepository {
    #[must_use]
    pub fn new(conn: DatabaseConnection, security: SecurityConfig) -> Self {
        Self {
            conn,
            security,
            dummy_hash: Arc::new(OnceLock::new()),
        }
    }

    pub async fn create(
        &self,
        username: &str,
        email: &str,
        password: &str,
        role: Role,
    ) -> Result<User, CreateUserError> {
        self.insert(NewUser::new(username, email, password, role))
            .await
    }

    /// Inserts `new_user` in its final state with a single write.
    pub async fn insert(&self, new_user: NewUser) -> Result<User, CreateUserError> {
        let username = new_user.username.clone();
        if self.find_model_by_username(&username).await?.is_some() {
            return Err(CreateUserError::Conflict(username));
        }

        let config = self.security.clone();
        // Argon2 is CPU-bound, keep it off the async workers
        let active = task::spawn_blocking(move || new_user.into_active_model(&config))
            .await
            .context("Password hashing task panicked")??;

        let model = match active.insert(&self.conn).await {
            Ok(model) => model,
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                return Err(CreateUserError::Conflict(username));
            }
            Err(e) => return Err(anyhow::Error::new(e).context("Failed to insert user").into()),
        };

        info!(username = %model.username, role = %model.role, "User created");
        Ok(User::try_from(model)?)
    }

    /// Get user by ID
    pub async fn get_by_id(&self, id: i32) -> Result<Option<User>> {
        users::Entity::find_by_id(id)
            .one(&self.conn)
            .await
            .context("Failed to query user by ID")?
            .map(User::try_from)
            .transpose()
    }

    /// Get user by username (exact, case-sensitive)
    pub async fn get_by_username(&self, username: &str) -> Result<Option<User>> {
        self.find_model_by_username(username)
            .await?
            .map(User::try_from)
            .transpose()
    }

    /// Returns the user only when it exists, is active and the password
    /// verifies. All three failures look the same to the caller.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<Option<User>> {
        let model = self.find_model_by_username(username).await?;

        let (hash, active) = match &model {
            Some(m) => (m.password_hash.clone(), m.active),
            None => (self.dummy_hash(), false),
        };

        let password = password.to_string();
        let verified = task::spawn_blocking(move || verify_password(&password, &hash))
            .await
            .context("Password verification task panicked")?;

        let Some(model) = model else {
            return Ok(None);
        };

        if !(verified && active) {
            debug!(username, "Authentication rejected");
            return Ok(None);
        }

        let mut active_model: users::ActiveModel = model.into();
        active_model.last_login = Set(chrono::Utc::now().to_rfc3339());
        let updated = active_model
            .update(&self.conn)
            .await
            .context("Failed to record last login")?;

        Ok(Some(User::try_from(updated)?))
    }

    /// Partial update. Returns false when the user does not exist.
    pub async fn update(&self, id: i32, changes: UserUpdate) -> Result<bool> {
        let Some(model) = users::Entity::find_by_id(id)
            .one(&self.conn)
            .await
            .context("Failed to query user for update")?
        else {
            return Ok(false);
        };

        if changes.is_empty() {
            return Ok(true);
        }

        let mut active: users::ActiveModel = model.into();

        if let Some(email) = changes.email {
            active.email = Set(email);
        }
        if let Some(role) = changes.role {
            active.role = Set(role);
        }
        if let Some(is_active) = changes.active {
            active.active = Set(is_active);
        }
        if let Some(password) = changes.password {
            let config = self.security.clone();
            let hashed =
                task::spawn_blocking(move || HashedPassword::normalize(&password, Some(&config)))
                    .await
                    .context("Password hashing task panicked")??;
            active.password_hash = Set(hashed.into_string());
        }

        active
            .update(&self.conn)
            .await
            .context("Failed to update user")?;

        debug!(user_id = id, "User updated");
        Ok(true)
    }

    /// Hard delete. Returns false when nothing was removed.
    pub async fn delete(&self, id: i32) -> Result<bool> {
        let result = users::Entity::delete_by_id(id)
            .exec(&self.conn)
            .await
            .context("Failed to delete user")?;

        if result.rows_affected > 0 {
            info!(user_id = id, "User deleted");
        }

        Ok(result.rows_affected > 0)
    }

    /// Every known role is present, with zero when nobody holds it.
    pub async fn count_by_role(&self) -> Result<BTreeMap<Role, u64>> {
        let roles: Vec<Role> = users::Entity::find()
            .select_only()
            .column(users::Column::Role)
            .into_tuple()
            .all(&self.conn)
            .await
            .context("Failed to scan user roles")?;

        let mut counts: BTreeMap<Role, u64> = Role::ALL.into_iter().map(|r| (r, 0)).collect();
        for role in roles {
            *counts.entry(role).or_insert(0) += 1;
        }

        Ok(counts)
    }

    pub async fn list_all(&self) -> Result<Vec<User>> {
        users::Entity::find()
            .order_by_asc(users::Column::Id)
            .all(&self.conn)
            .await
            .context("Failed to list users")?
            .into_iter()
            .map(User::try_from)
            .collect()
    }

    pub async fn count(&self) -> Result<u64> {
        users::Entity::find()
            .count(&self.conn)
            .await
            .context("Failed to count users")
    }

    /// Hashes and persists any password column still holding plaintext.
    /// Returns how many rows were rewritten.
    pub async fn rehash_plaintext_passwords(&self) -> Result<u64> {
        let rows: Vec<(i32, String)> = users::Entity::find()
            .select_only()
            .column(users::Column::Id)
            .column(users::Column::PasswordHash)
            .into_tuple()
            .all(&self.conn)
            .await
            .context("Failed to scan stored passwords")?;

        let mut rewritten = 0;
        for (id, stored) in rows.into_iter().filter(|(_, stored)| !is_hashed(stored)) {
            let config = self.security.clone();
            let hashed = task::spawn_blocking(move || hash_password(&stored, Some(&config)))
                .await
                .context("Password hashing task panicked")??;

            users::Entity::update_many()
                .col_expr(users::Column::PasswordHash, Expr::value(hashed))
                .filter(users::Column::Id.eq(id))
                .exec(&self.conn)
                .await
                .context("Failed to persist rehashed password")?;

            warn!(user_id = id, "Rehashed plaintext password found in storage");
            rewritten += 1;
        }

        Ok(rewritten)
    }

    async fn find_model_by_username(&self, username: &str) -> Result<Option<users::Model>> {
        users::Entity::find()
            .filter(users::Column::Username.eq(username))
            .one(&self.conn)
            .await
            .context("Failed to query user by username")
    }

    fn dummy_hash(&self) -> String {
        self.dummy_hash
            .get_or_init(|| {
                hash_password("turnstile-timing-equalizer", Some(&self.security)).unwrap_or_default()
            })
            .clone()
    }
}
