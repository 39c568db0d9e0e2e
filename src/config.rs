use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,

    pub server: ServerConfig,

    pub auth: AuthConfig,

    pub security: SecurityConfig,

    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Argon2 memory cost in KiB (default: 8192 = 8MB)
    pub argon2_memory_cost_kib: u32,

    /// Argon2 time cost (iterations)
    pub argon2_time_cost: u32,

    /// Argon2 parallelism (default: 1)
    pub argon2_parallelism: u32,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            argon2_memory_cost_kib: 8192,
            argon2_time_cost: 3,
            argon2_parallelism: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Where unauthenticated requests are redirected. Always public.
    pub login_path: String,

    /// Mount point of the login/logout/register/profile routes.
    pub route_prefix: String,

    /// Additional paths reachable without a session. Each entry matches
    /// exactly or as a path-segment prefix; entries ending in `/` match
    /// anything below them. The login, logout, forgot and (when enabled)
    /// register routes are always public on top of these.
    pub public_paths: Vec<String>,

    pub allow_registration: bool,

    /// Only exposes the forgot-password stub; no reset mail is ever sent.
    pub allow_password_reset: bool,

    /// Mount the admin user-management API under `<route_prefix>/admin`.
    pub include_admin: bool,

    pub default_admin_username: String,

    /// Password for the account seeded into an empty database.
    /// When unset a random one is generated and logged once.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_admin_password: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            login_path: "/auth/login".to_string(),
            route_prefix: "/auth".to_string(),
            public_paths: vec!["/static/".to_string(), "/favicon.ico".to_string()],
            allow_registration: false,
            allow_password_reset: false,
            include_admin: true,
            default_admin_username: "admin".to_string(),
            default_admin_password: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub metrics_enabled: bool,

    pub loki_enabled: bool,

    pub loki_url: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
            loki_enabled: false,
            loki_url: "http://localhost:3100".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub enabled: bool,

    pub port: u16,

    /// Whether to set the Secure flag on session cookies.
    /// Set to false for local development without HTTPS.
    pub secure_cookies: bool,

    pub session_cookie_name: String,

    /// Sessions expire after this many minutes without a request.
    pub session_expiry_minutes: i64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 5001,
            secure_cookies: true,
            session_cookie_name: "turnstile_session".to_string(),
            session_expiry_minutes: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub database_path: String,

    pub log_level: String,

    /// Number of tokio worker threads (default: 2)
    /// Set to 0 to use the number of CPU cores
    pub worker_threads: usize,

    /// Maximum database connections (default: 5)
    pub max_db_connections: u32,

    /// Minimum database connections (default: 1)
    pub min_db_connections: u32,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            database_path: "sqlite:data/turnstile.db".to_string(),
            log_level: "info".to_string(),
            worker_threads: 2,
            max_db_connections: 5,
            min_db_connections: 1,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let paths = Self::config_paths();

        for path in &paths {
            if path.exists() {
                info!("Loading config from: {}", path.display());
                return Self::load_from_path(path);
            }
        }

        info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Config saved to: {}", path.display());
        Ok(())
    }

    fn config_paths() -> Vec<PathBuf> {
        let mut paths = vec![];

        paths.push(PathBuf::from("config.toml"));

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("turnstile").join("config.toml"));
        }

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".turnstile").join("config.toml"));
        }

        paths
    }

    fn default_config_path() -> PathBuf {
        PathBuf::from("config.toml")
    }

    pub fn create_default_if_missing() -> Result<bool> {
        let path = Self::default_config_path();
        if path.exists() {
            Ok(false)
        } else {
            let config = Self::default();
            config.save_to_path(&path)?;
            info!("Created default config file: {}", path.display());
            Ok(true)
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.auth.login_path.starts_with('/') {
            anyhow::bail!("auth.login_path must start with '/'");
        }

        if !self.auth.route_prefix.starts_with('/') || self.auth.route_prefix.ends_with('/') {
            anyhow::bail!("auth.route_prefix must start with '/' and must not end with '/'");
        }

        if let Some(bad) = self.auth.public_paths.iter().find(|p| !p.starts_with('/')) {
            anyhow::bail!("Public path '{bad}' must start with '/'");
        }

        if self.auth.default_admin_username.trim().is_empty() {
            anyhow::bail!("auth.default_admin_username cannot be empty");
        }

        if self.security.argon2_memory_cost_kib < 8 * self.security.argon2_parallelism.max(1) {
            anyhow::bail!("security.argon2_memory_cost_kib must be at least 8 x parallelism");
        }

        if self.server.session_expiry_minutes <= 0 {
            anyhow::bail!("server.session_expiry_minutes must be > 0");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.auth.login_path, "/auth/login");
        assert_eq!(config.auth.default_admin_username, "admin");
        assert!(!config.auth.allow_registration);
        assert!(config.auth.include_admin);
        assert_eq!(config.server.port, 5001);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[general]"));
        assert!(toml_str.contains("[auth]"));
        assert!(toml_str.contains("[security]"));
        assert!(!toml_str.contains("default_admin_password"));
    }

    #[test]
    fn test_config_deserialization() {
        let toml_str = r#"
            [general]
            log_level = "debug"

            [auth]
            public_paths = ["/about", "/contact"]
            allow_registration = true
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.auth.public_paths, vec!["/about", "/contact"]);
        assert!(config.auth.allow_registration);

        assert_eq!(config.auth.login_path, "/auth/login");
    }

    #[test]
    fn test_validate_rejects_relative_paths() {
        let mut config = Config::default();
        config.auth.public_paths.push("about".to_string());
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.auth.login_path = "login".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.auth.route_prefix = "/auth/".to_string();
        assert!(config.validate().is_err());
    }
}
