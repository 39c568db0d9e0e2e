//! Credential model: a user identity and the Argon2 handling of its password.
//!
//! Nothing in here performs I/O. Hashing is CPU-heavy, so async callers run
//! these functions on a blocking thread.

use anyhow::Result;
use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use sea_orm::Set;
use serde::Serialize;
use std::fmt;

use super::Role;
use crate::config::SecurityConfig;
use crate::entities::users;

const HASH_PREFIXES: [&str; 3] = ["$argon2id$", "$argon2i$", "$argon2d$"];

/// Shortest PHC string that can still hold a salt and a digest.
const MIN_HASH_LEN: usize = 50;

/// Structural check for an Argon2 PHC string. Does not verify anything.
#[must_use]
pub fn is_hashed(value: &str) -> bool {
    HASH_PREFIXES.iter().any(|prefix| value.starts_with(prefix))
        && value.len() >= MIN_HASH_LEN
        // "$argon2id$v=19$m=..,t=..,p=..$salt$hash", older hashes omit the version
        && matches!(value.split('$').count(), 5 | 6)
}

/// Hash a password using Argon2id with optional custom params.
/// If config is None, uses the argon2 crate defaults.
pub fn hash_password(password: &str, config: Option<&SecurityConfig>) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);

    let argon2 = if let Some(cfg) = config {
        let params = Params::new(
            cfg.argon2_memory_cost_kib,
            cfg.argon2_time_cost,
            cfg.argon2_parallelism,
            None,
        )
        .map_err(|e| anyhow::anyhow!("Invalid Argon2 params: {e}"))?;
        Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
    } else {
        Argon2::default()
    };

    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {e}"))?;

    Ok(hash.to_string())
}

/// Constant-time verification. Malformed hashes simply fail.
#[must_use]
pub fn verify_password(plain: &str, hashed: &str) -> bool {
    PasswordHash::new(hashed).is_ok_and(|parsed| {
        // Verification uses the params embedded in the hash itself
        Argon2::default()
            .verify_password(plain.as_bytes(), &parsed)
            .is_ok()
    })
}

/// A password that is guaranteed to be stored as a hash.
#[derive(Clone, PartialEq, Eq)]
pub struct HashedPassword(String);

impl HashedPassword {
    /// Hashes `input` unless it already looks like a hash, which makes
    /// reloading a stored value a no-op.
    pub fn normalize(input: &str, config: Option<&SecurityConfig>) -> Result<Self> {
        if is_hashed(input) {
            Ok(Self(input.to_string()))
        } else {
            hash_password(input, config).map(Self)
        }
    }

    /// Wraps a value read back from storage, which must already be a hash.
    pub fn from_stored(stored: &str) -> Result<Self> {
        if !is_hashed(stored) {
            anyhow::bail!("Stored password is not an Argon2 hash");
        }
        Ok(Self(stored.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn verify(&self, plain: &str) -> bool {
        verify_password(plain, &self.0)
    }

    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Debug for HashedPassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HashedPassword(<redacted>)")
    }
}

/// A stored user. The password hash is never serialized.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i32,
    pub username: String,
    pub email: String,
    #[serde(skip)]
    pub password: HashedPassword,
    pub role: Role,
    pub active: bool,
    pub created_at: String,
    pub last_login: String,
}

impl User {
    #[must_use]
    pub fn check_password(&self, plain: &str) -> bool {
        self.password.verify(plain)
    }

    #[must_use]
    pub fn has_role(&self, allowed: &[Role]) -> bool {
        allowed.contains(&self.role)
    }

    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl TryFrom<users::Model> for User {
    type Error = anyhow::Error;

    fn try_from(model: users::Model) -> Result<Self> {
        let password = HashedPassword::from_stored(&model.password_hash)
            .map_err(|e| e.context(format!("User {} has an unusable password", model.id)))?;

        Ok(Self {
            id: model.id,
            username: model.username,
            email: model.email,
            password,
            role: model.role,
            active: model.active,
            created_at: model.created_at,
            last_login: model.last_login,
        })
    }
}

/// Input for creating a user. Holds plaintext and has no `Debug`.
#[derive(Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: String,
    pub role: Role,
    pub active: bool,
}

impl NewUser {
    pub fn new(
        username: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
        role: Role,
    ) -> Self {
        Self {
            username: username.into(),
            email: email.into(),
            password: password.into(),
            role,
            active: true,
        }
    }

    #[must_use]
    pub const fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    /// Normalizes the password and stamps both timestamps.
    pub fn into_active_model(self, config: &SecurityConfig) -> Result<users::ActiveModel> {
        let password = HashedPassword::normalize(&self.password, Some(config))?;
        let now = chrono::Utc::now().to_rfc3339();

        Ok(users::ActiveModel {
            username: Set(self.username),
            email: Set(self.email),
            password_hash: Set(password.into_string()),
            role: Set(self.role),
            active: Set(self.active),
            created_at: Set(now.clone()),
            last_login: Set(now),
            ..Default::default()
        })
    }
}

/// Partial update; `None` leaves the column untouched.
#[derive(Clone, Default)]
pub struct UserUpdate {
    pub email: Option<String>,
    pub role: Option<Role>,
    pub active: Option<bool>,
    pub password: Option<String>,
}

impl UserUpdate {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.email.is_none() && self.role.is_none() && self.active.is_none() && self.password.is_none()
    }
}
