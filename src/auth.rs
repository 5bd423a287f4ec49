use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{request::Parts, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};

use crate::api::responses::{ApiResponse, ErrorResponse};

/// Identity of the caller, resolved by the authentication layer and stored
/// in the request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedCaller {
    pub id: String,
}

impl AuthenticatedCaller {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedCaller
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedCaller>()
            .cloned()
            .ok_or_else(unauthorized)
    }
}

/// Configuration for [`resolve_caller`].
#[derive(Debug, Clone)]
pub struct CallerResolver {
    pub header_name: String,
}

impl CallerResolver {
    pub fn new(header_name: impl Into<String>) -> Self {
        Self {
            header_name: header_name.into(),
        }
    }
}

/// Trusts the caller id set by the upstream authentication gateway.
///
/// Requests without the header pass through anonymously; handlers that need
/// a caller reject them with 401.
pub async fn resolve_caller(
    State(resolver): State<CallerResolver>,
    mut req: Request,
    next: Next,
) -> Response {
    let caller = req
        .headers()
        .get(resolver.header_name.as_str())
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(AuthenticatedCaller::new);

    if let Some(caller) = caller {
        req.extensions_mut().insert(caller);
    }

    next.run(req).await
}

/// Rejection returned by handlers when no caller was resolved.
pub fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ApiResponse::<()>::error(ErrorResponse::new(
            "UNAUTHENTICATED",
            "An authenticated caller is required",
        ))),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, middleware, routing::get, Router};
    use tower::ServiceExt;

    fn app() -> Router {
        Router::new()
            .route("/whoami", get(|caller: AuthenticatedCaller| async move { caller.id }))
            .layer(middleware::from_fn_with_state(
                CallerResolver::new("x-authenticated-user"),
                resolve_caller,
            ))
    }

    async fn whoami(header: Option<&str>) -> (StatusCode, String) {
        let mut builder = axum::http::Request::builder().uri("/whoami");
        if let Some(value) = header {
            builder = builder.header("x-authenticated-user", value);
        }
        let response = app()
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_gateway_header_resolves_caller() {
        assert_eq!(whoami(Some(" user-1 ")).await, (StatusCode::OK, "user-1".to_string()));
    }

    #[tokio::test]
    async fn test_missing_or_blank_header_is_unauthorized() {
        assert_eq!(whoami(None).await.0, StatusCode::UNAUTHORIZED);
        assert_eq!(whoami(Some("  ")).await.0, StatusCode::UNAUTHORIZED);
    }
}
