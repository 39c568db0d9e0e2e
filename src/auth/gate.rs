//! Request interceptor that decides, before any handler runs, whether a
//! request may proceed and on whose behalf.

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    Router,
    extract::{Request, State},
    http::Uri,
    middleware::{self, Next},
    response::{IntoResponse, Redirect, Response},
};
use std::sync::Arc;
use tower_sessions::Session;
use tracing::{debug, warn};

use super::current_user::CurrentUser;
use super::session::{self, SessionUser};
use crate::api::ApiError;
use crate::db::UserRepository;
use crate::models::User;

/// Looks up the principal behind a session.
#[async_trait]
pub trait PrincipalResolver: Send + Sync {
    async fn resolve(&self, user_id: i32) -> Result<Option<User>>;
}

#[async_trait]
impl PrincipalResolver for UserRepository {
    async fn resolve(&self, user_id: i32) -> Result<Option<User>> {
        self.get_by_id(user_id).await
    }
}

/// Paths reachable without a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublicPaths {
    patterns: Vec<String>,
}

impl PublicPaths {
    pub fn new<I, P>(patterns: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        let mut paths = Self::default();
        paths.extend(patterns);
        paths
    }

    pub fn extend<I, P>(&mut self, patterns: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        for pattern in patterns {
            let pattern = pattern.into();
            if !pattern.is_empty() && !self.patterns.contains(&pattern) {
                self.patterns.push(pattern);
            }
        }
    }

    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        self.patterns
            .iter()
            .any(|pattern| pattern_matches(pattern, path))
    }

    #[must_use]
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

fn pattern_matches(pattern: &str, path: &str) -> bool {
    if pattern == "/" {
        return path == "/";
    }

    if pattern.ends_with('/') {
        return path.starts_with(pattern);
    }

    // "/static" covers "/static/app.css" but not "/staticfoo"
    path.strip_prefix(pattern)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

/// Result of running a request through the gate.
#[derive(Debug)]
pub enum Access {
    Public,
    /// `stale` is set when the session named a user that no longer qualifies.
    Unauthenticated { stale: bool },
    Authenticated(User),
}

impl Access {
    const fn label(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Unauthenticated { stale: false } => "unauthenticated",
            Self::Unauthenticated { stale: true } => "stale_session",
            Self::Authenticated(_) => "authenticated",
        }
    }
}

#[derive(Clone)]
pub struct AccessGate {
    resolver: Arc<dyn PrincipalResolver>,
    public_paths: Arc<PublicPaths>,
    login_path: Arc<str>,
}

impl AccessGate {
    /// The login path is always added to the public set.
    pub fn new(
        resolver: Arc<dyn PrincipalResolver>,
        login_path: &str,
        mut public_paths: PublicPaths,
    ) -> Self {
        public_paths.extend([login_path]);

        Self {
            resolver,
            public_paths: Arc::new(public_paths),
            login_path: Arc::from(login_path),
        }
    }

    #[must_use]
    pub fn is_public(&self, path: &str) -> bool {
        self.public_paths.matches(path)
    }

    #[must_use]
    pub fn public_paths(&self) -> &PublicPaths {
        &self.public_paths
    }

    #[must_use]
    pub fn login_path(&self) -> &str {
        &self.login_path
    }

    pub async fn classify(&self, path: &str, session_user: Option<&SessionUser>) -> Result<Access> {
        if self.is_public(path) {
            return Ok(Access::Public);
        }

        let Some(session_user) = session_user else {
            return Ok(Access::Unauthenticated { stale: false });
        };

        match self.resolver.resolve(session_user.user_id).await? {
            Some(user) if user.active && user.username == session_user.username => {
                Ok(Access::Authenticated(user))
            }
            _ => Ok(Access::Unauthenticated { stale: true }),
        }
    }

    /// `303` to the login page carrying the original path and query as `next`.
    #[must_use]
    pub fn login_redirect(&self, uri: &Uri) -> Redirect {
        let original = uri
            .path_and_query()
            .map_or_else(|| uri.path(), |pq| pq.as_str());

        Redirect::to(&format!(
            "{}?next={}",
            self.login_path,
            urlencoding::encode(original)
        ))
    }

    /// Applies the gate to every route already registered on `router`.
    pub fn protect(self, router: Router) -> Router {
        router.layer(middleware::from_fn_with_state(self, access_gate))
    }
}

pub async fn access_gate(
    State(gate): State<AccessGate>,
    session: Session,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let path = request.uri().path().to_string();

    // Public paths never touch the session or the database
    if gate.is_public(&path) {
        record_decision(&Access::Public);
        return Ok(next.run(request).await);
    }

    let session_user = session::load(&session)
        .await
        .map_err(|e| ApiError::internal(format!("Session error: {e}")))?;

    let access = gate
        .classify(&path, session_user.as_ref())
        .await
        .map_err(|e| ApiError::DatabaseError(e.to_string()))?;

    record_decision(&access);

    match access {
        Access::Public => Ok(next.run(request).await),
        Access::Unauthenticated { stale } => {
            if stale {
                if let Some(user) = &session_user {
                    warn!(
                        user_id = user.user_id,
                        username = %user.username,
                        "Session refers to a missing or inactive user, clearing it"
                    );
                }
                session::clear(&session)
                    .await
                    .map_err(|e| ApiError::internal(format!("Session error: {e}")))?;
            } else {
                debug!(path = %path, "No session, redirecting to login");
            }

            Ok(gate.login_redirect(request.uri()).into_response())
        }
        Access::Authenticated(user) => {
            if session_user.as_ref().and_then(|s| s.role) != Some(user.role) {
                session::refresh_role(&session, user.role)
                    .await
                    .map_err(|e| ApiError::internal(format!("Session error: {e}")))?;
            }

            tracing::Span::current().record("user_id", user.username.as_str());
            request.extensions_mut().insert(CurrentUser(user));
            Ok(next.run(request).await)
        }
    }
}

fn record_decision(access: &Access) {
    metrics::counter!("auth_gate_decisions_total", "decision" => access.label()).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HashedPassword, Role};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingResolver {
        users: HashMap<i32, User>,
        lookups: AtomicUsize,
    }

    impl CountingResolver {
        fn with_user(user: User) -> Self {
            let mut resolver = Self::default();
            resolver.users.insert(user.id, user);
            resolver
        }

        fn lookups(&self) -> usize {
            self.lookups.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PrincipalResolver for CountingResolver {
        async fn resolve(&self, user_id: i32) -> Result<Option<User>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(self.users.get(&user_id).cloned())
        }
    }

    fn user(id: i32, username: &str, role: Role, active: bool) -> User {
        User {
            id,
            username: username.to_string(),
            email: format!("{username}@example.com"),
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

    fn session_for(user: &User) -> SessionUser {
        SessionUser {
            username: user.username.clone(),
            user_id: user.id,
            role: Some(user.role),
        }
    }

    fn gate(resolver: Arc<CountingResolver>, extra: &[&str]) -> AccessGate {
        AccessGate::new(
            resolver,
            "/auth/login",
            PublicPaths::new(extra.iter().copied()),
        )
    }

    #[test]
    fn test_pattern_matching() {
        let paths = PublicPaths::new(["/", "/static", "/assets/", "/about"]);

        assert!(paths.matches("/"));
        assert!(paths.matches("/static"));
        assert!(paths.matches("/static/app.css"));
        assert!(!paths.matches("/staticfoo"));
        assert!(paths.matches("/assets/logo.png"));
        assert!(!paths.matches("/assets"));
        assert!(paths.matches("/about"));
        assert!(!paths.matches("/aboutus"));
        assert!(!paths.matches("/dashboard"));
    }

    #[test]
    fn test_duplicate_patterns_are_collapsed() {
        let paths = PublicPaths::new(["/about", "/about", ""]);
        assert_eq!(paths.patterns(), ["/about".to_string()]);
    }

    #[tokio::test]
    async fn test_login_path_is_always_public() {
        let resolver = Arc::new(CountingResolver::default());
        let gate = gate(resolver.clone(), &[]);

        assert!(gate.is_public("/auth/login"));
        let access = gate.classify("/auth/login", None).await.unwrap();
        assert!(matches!(access, Access::Public));
    }

    #[tokio::test]
    async fn test_public_path_skips_lookup_even_with_session() {
        let alice = user(1, "alice", Role::User, true);
        let resolver = Arc::new(CountingResolver::with_user(alice.clone()));
        let gate = gate(resolver.clone(), &["/about"]);

        let access = gate
            .classify("/about", Some(&session_for(&alice)))
            .await
            .unwrap();

        assert!(matches!(access, Access::Public));
        assert_eq!(resolver.lookups(), 0);
    }

    #[tokio::test]
    async fn test_missing_session_is_unauthenticated_without_lookup() {
        let resolver = Arc::new(CountingResolver::default());
        let gate = gate(resolver.clone(), &[]);

        let access = gate.classify("/dashboard", None).await.unwrap();
        assert!(matches!(access, Access::Unauthenticated { stale: false }));
        assert_eq!(resolver.lookups(), 0);
    }

    #[tokio::test]
    async fn test_valid_session_resolves_principal() {
        let alice = user(1, "alice", Role::Manager, true);
        let resolver = Arc::new(CountingResolver::with_user(alice.clone()));
        let gate = gate(resolver.clone(), &[]);

        let access = gate
            .classify("/dashboard", Some(&session_for(&alice)))
            .await
            .unwrap();

        match access {
            Access::Authenticated(principal) => {
                assert_eq!(principal.username, "alice");
                assert_eq!(principal.role, Role::Manager);
            }
            other => panic!("expected authenticated, got {other:?}"),
        }
        assert_eq!(resolver.lookups(), 1);
    }

    #[tokio::test]
    async fn test_stale_sessions_are_rejected() {
        let inactive = user(2, "bob", Role::User, false);
        let resolver = Arc::new(CountingResolver::with_user(inactive.clone()));
        let gate = gate(resolver.clone(), &[]);

        let access = gate
            .classify("/dashboard", Some(&session_for(&inactive)))
            .await
            .unwrap();
        assert!(matches!(access, Access::Unauthenticated { stale: true }));

        let deleted = SessionUser {
            username: "ghost".to_string(),
            user_id: 99,
            role: None,
        };
        let access = gate.classify("/dashboard", Some(&deleted)).await.unwrap();
        assert!(matches!(access, Access::Unauthenticated { stale: true }));

        // id reused by a different account
        let renamed = SessionUser {
            username: "not-bob".to_string(),
            user_id: 2,
            role: None,
        };
        let access = gate.classify("/dashboard", Some(&renamed)).await.unwrap();
        assert!(matches!(access, Access::Unauthenticated { stale: true }));
    }

    #[test]
    fn test_login_redirect_carries_path_and_query() {
        let gate = gate(Arc::new(CountingResolver::default()), &[]);
        let uri: Uri = "/reports/daily?range=7d&sort=desc".parse().unwrap();

        let response = gate.login_redirect(&uri).into_response();
        assert_eq!(response.status(), axum::http::StatusCode::SEE_OTHER);

        let location = response.headers()["location"].to_str().unwrap();
        assert_eq!(
            location,
            "/auth/login?next=%2Freports%2Fdaily%3Frange%3D7d%26sort%3Ddesc"
        );
    }
}
