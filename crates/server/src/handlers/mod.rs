//! Route handlers.

pub mod executions;
pub mod logs;
pub mod runtimes;

use axum::response::IntoResponse;

use crate::error::ApiError;
use opr_executor_shared::ExecutorError;

/// Liveness probe; intentionally unauthenticated.
pub async fn health() -> &'static str {
    "OK"
}

/// Fallback for unknown routes.
pub async fn route_not_found() -> impl IntoResponse {
    ApiError(ExecutorError::RouteNotFound)
}

/// Parse a JSON request body, mapping failures to the bad-json error kind.
/// An empty body parses as the type's default.
pub(crate) fn parse_body<T>(body: &str) -> Result<T, ApiError>
where
    T: serde::de::DeserializeOwned + Default,
{
    if body.trim().is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(body)
        .map_err(|e| ApiError(ExecutorError::ExecutionBadJson(format!("Invalid JSON body: {e}"))))
}
