//! Bearer authentication middleware.
//!
//! Every `/v1` route requires `Authorization: Bearer {OPR_EXECUTOR_SECRET}`.
//! The 401 body is a fixed contract, not the regular error shape.

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;

/// Extract the bearer token from the Authorization header. The scheme is
/// case-insensitive per RFC 6750.
fn extract_bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            if v.len() >= 7 && v[..7].eq_ignore_ascii_case("bearer ") {
                Some(&v[7..])
            } else {
                None
            }
        })
}

pub async fn auth_middleware(
    State(executor_secret): State<String>,
    req: Request,
    next: Next,
) -> Response {
    match extract_bearer_token(&req) {
        Some(token) if token == executor_secret => next.run(req).await,
        _ => (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"error": "Missing executor key"})),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use axum::routing::get;
    use axum::Router;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_router() -> Router {
        Router::new()
            .route("/v1/ping", get(|| async { "pong" }))
            .layer(axum::middleware::from_fn_with_state(
                "top-secret".to_string(),
                auth_middleware,
            ))
    }

    #[tokio::test]
    async fn valid_bearer_passes() {
        let response = test_router()
            .oneshot(
                HttpRequest::builder()
                    .uri("/v1/ping")
                    .header("authorization", "Bearer top-secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn scheme_is_case_insensitive() {
        let response = test_router()
            .oneshot(
                HttpRequest::builder()
                    .uri("/v1/ping")
                    .header("authorization", "bearer top-secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_header_is_rejected_with_fixed_body() {
        let response = test_router()
            .oneshot(
                HttpRequest::builder()
                    .uri("/v1/ping")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, serde_json::json!({"error": "Missing executor key"}));
    }

    #[tokio::test]
    async fn wrong_secret_is_rejected() {
        let response = test_router()
            .oneshot(
                HttpRequest::builder()
                    .uri("/v1/ping")
                    .header("authorization", "Bearer nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
