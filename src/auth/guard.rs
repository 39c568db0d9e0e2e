use axum::{
    extract::Request,
    response::{IntoResponse, Response},
};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::debug;

use super::current_user::CurrentUser;
use crate::api::ApiError;
use crate::models::Role;

/// Restricts a route to principals holding one of the allowed roles.
///
/// Relies on the access gate having already attached a [`CurrentUser`];
/// storage is never consulted here.
#[derive(Debug, Clone)]
pub struct RoleGuard {
    allowed: Arc<[Role]>,
}

impl RoleGuard {
    pub fn new(roles: impl IntoIterator<Item = Role>) -> Self {
        let mut allowed: Vec<Role> = roles.into_iter().collect();
        allowed.sort_unstable();
        allowed.dedup();

        Self {
            allowed: allowed.into(),
        }
    }

    #[must_use]
    pub fn admin() -> Self {
        Self::new([Role::Admin])
    }

    #[must_use]
    pub fn allowed(&self) -> &[Role] {
        &self.allowed
    }

    pub fn check(&self, principal: Option<&CurrentUser>) -> Result<(), ApiError> {
        let Some(principal) = principal else {
            return Err(ApiError::Forbidden("Authentication required".to_string()));
        };

        if principal.has_role(&self.allowed) {
            Ok(())
        } else {
            debug!(
                username = %principal.username,
                role = %principal.role,
                "Role not permitted for this route"
            );
            Err(ApiError::Forbidden("Insufficient permissions".to_string()))
        }
    }
}

impl<S> Layer<S> for RoleGuard {
    type Service = RoleGuarded<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RoleGuarded {
            inner,
            guard: self.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RoleGuarded<S> {
    inner: S,
    guard: RoleGuard,
}

impl<S> Service<Request> for RoleGuarded<S>
where
    S: Service<Request, Response = Response>,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Response, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        match self.guard.check(request.extensions().get::<CurrentUser>()) {
            Ok(()) => Box::pin(self.inner.call(request)),
            Err(denied) => {
                metrics::counter!("auth_role_denials_total").increment(1);
                let response = denied.into_response();
                Box::pin(async move { Ok(response) })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HashedPassword, User};
    use axum::{Router, body::Body, http::StatusCode, routing::get};
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    fn principal(role: Role) -> CurrentUser {
        CurrentUser(User {
            id: 1,
            username: "carol".to_string(),
            email: "carol@example.com".to_string(),
            password: HashedPassword::normalize(
                "$argon2id$v=19$m=64,t=1,p=1$c2FsdHNhbHRzYWx0$aGFzaGhhc2hoYXNoaGFzaA",
                None,
            )
            .unwrap(),
            role,
            active: true,
            created_at: String::new(),
            last_login: String::new(),
        })
    }

    #[test]
    fn test_check_membership() {
        let guard = RoleGuard::new([Role::Manager, Role::Admin]);

        assert!(guard.check(Some(&principal(Role::Admin))).is_ok());
        assert!(guard.check(Some(&principal(Role::Manager))).is_ok());
        assert!(matches!(
            guard.check(Some(&principal(Role::User))),
            Err(ApiError::Forbidden(_))
        ));
        assert!(matches!(guard.check(None), Err(ApiError::Forbidden(_))));
    }

    #[test]
    fn test_admin_guard_allows_only_admin() {
        let guard = RoleGuard::admin();
        assert_eq!(guard.allowed(), [Role::Admin]);
        assert!(guard.check(Some(&principal(Role::Manager))).is_err());
    }

    #[test]
    fn test_allowed_set_is_normalized() {
        let guard = RoleGuard::new([Role::Admin, Role::User, Role::Admin]);
        assert_eq!(guard.allowed(), [Role::User, Role::Admin]);
    }

    #[test]
    fn test_empty_set_denies_everyone() {
        let guard = RoleGuard::new([]);
        for role in Role::ALL {
            assert!(guard.check(Some(&principal(role))).is_err());
        }
    }

    #[tokio::test]
    async fn test_denied_request_never_reaches_inner_service() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        let inner = tower::service_fn(move |_req: Request| {
            counted.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, Infallible>(StatusCode::OK.into_response()) }
        });

        let service = RoleGuard::admin().layer(inner);

        let mut request = Request::new(Body::empty());
        request.extensions_mut().insert(principal(Role::User));
        let response = service.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let mut request = Request::new(Body::empty());
        request.extensions_mut().insert(principal(Role::Admin));
        let response = service.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_guard_as_route_layer() {
        let app: Router = Router::new().route(
            "/manager",
            get(|user: CurrentUser| async move { user.username.clone() })
                .route_layer(RoleGuard::new([Role::Manager, Role::Admin])),
        );

        let response = app
            .clone()
            .oneshot(Request::get("/manager").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let mut request = Request::get("/manager").body(Body::empty()).unwrap();
        request.extensions_mut().insert(principal(Role::Manager));
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
