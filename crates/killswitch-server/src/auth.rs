use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use killswitch_core::PrincipalId;

use crate::error::AppError;
use crate::state::AppState;

/// Verified caller identity, placed in request extensions by
/// [`identity_middleware`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal(pub PrincipalId);

/// Axum middleware fronting every switch and audit route.
///
/// 1. `identity.token` set and `Authorization: Bearer <token>` absent or
///    wrong → 401.
/// 2. Principal header present and non-empty → stored as [`Principal`].
/// 3. Otherwise the request continues anonymously; handlers that mutate
///    extract [`Principal`] and answer 401 themselves.
pub async fn identity_middleware(
    State(app): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    if let Some(ref token) = app.identity.token {
        let presented = req
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        if presented != Some(token.as_str()) {
            tracing::warn!(path = %req.uri().path(), "rejected request without identity proxy token");
            return AppError::unauthenticated("missing or invalid identity proxy token")
                .into_response();
        }
    }

    let principal = req
        .headers()
        .get(app.identity.header.as_str())
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(PrincipalId::new);
    if let Some(id) = principal {
        req.extensions_mut().insert(Principal(id));
    }

    next.run(req).await
}

impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .ok_or_else(|| AppError::unauthenticated("no verified principal on request"))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::{body::Body, http::Request, middleware, routing::get, Router};
    use http_body_util::BodyExt;
    use killswitch_core::audit_log::MemoryAuditLog;
    use killswitch_core::config::IdentityConfig;
    use killswitch_core::policy::AllowAll;
    use killswitch_core::store::MemoryStore;
    use killswitch_core::KillSwitchService;
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn whoami(principal: Principal) -> String {
        principal.0.to_string()
    }

    async fn open() -> &'static str {
        "ok"
    }

    fn test_app(identity: IdentityConfig) -> Router {
        let service = KillSwitchService::new(
            Arc::new(MemoryStore::new()),
            Arc::new(AllowAll),
            Arc::new(MemoryAuditLog::new()),
        );
        let state = AppState::new(service, identity, "global".into());
        Router::new()
            .route("/whoami", get(whoami))
            .route("/open", get(open))
            .layer(middleware::from_fn_with_state(
                state.clone(),
                identity_middleware,
            ))
            .with_state(state)
    }

    fn with_token(token: &str) -> IdentityConfig {
        IdentityConfig {
            token: Some(token.into()),
            ..IdentityConfig::default()
        }
    }

    async fn text(resp: Response) -> String {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn principal_header_is_extracted() {
        let resp = test_app(IdentityConfig::default())
            .oneshot(
                Request::builder()
                    .uri("/whoami")
                    .header("x-principal-id", "alice")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(text(resp).await, "alice");
    }

    #[tokio::test]
    async fn missing_principal_rejected_by_extractor() {
        let resp = test_app(IdentityConfig::default())
            .oneshot(Request::builder().uri("/whoami").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn blank_principal_is_treated_as_missing() {
        let resp = test_app(IdentityConfig::default())
            .oneshot(
                Request::builder()
                    .uri("/whoami")
                    .header("x-principal-id", "   ")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn anonymous_read_passes_without_token() {
        let resp = test_app(IdentityConfig::default())
            .oneshot(Request::builder().uri("/open").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn configured_token_required() {
        let resp = test_app(with_token("proxy-secret"))
            .oneshot(
                Request::builder()
                    .uri("/open")
                    .header("x-principal-id", "alice")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(text(resp).await.contains("Unauthorized"));
    }

    #[tokio::test]
    async fn wrong_token_rejected() {
        let resp = test_app(with_token("proxy-secret"))
            .oneshot(
                Request::builder()
                    .uri("/open")
                    .header("authorization", "Bearer guess")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn matching_token_passes_through() {
        let resp = test_app(with_token("proxy-secret"))
            .oneshot(
                Request::builder()
                    .uri("/whoami")
                    .header("authorization", "Bearer proxy-secret")
                    .header("x-principal-id", "bob")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(text(resp).await, "bob");
    }

    #[tokio::test]
    async fn custom_header_name_honoured() {
        let identity = IdentityConfig {
            header: "x-forwarded-user".into(),
            token: None,
        };
        let resp = test_app(identity)
            .oneshot(
                Request::builder()
                    .uri("/whoami")
                    .header("x-forwarded-user", "carol")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(text(resp).await, "carol");
    }
}
