//! API error rendering.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use opr_executor_shared::ExecutorError;
use serde::Serialize;

/// Error body shape; `type` values are stable identifiers.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub code: u16,
}

/// Newtype so executor errors can render themselves as responses.
#[derive(Debug)]
pub struct ApiError(pub ExecutorError);

impl From<ExecutorError> for ApiError {
    fn from(err: ExecutorError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.0.status();
        let body = ErrorBody {
            kind: self.0.kind().to_string(),
            message: self.0.to_string(),
            code,
        };
        let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_body_shape() {
        let body = ErrorBody {
            kind: ExecutorError::RuntimeConflict("Runtime already exists".to_string())
                .kind()
                .to_string(),
            message: "Runtime already exists".to_string(),
            code: 409,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["type"], "runtime_conflict");
        assert_eq!(value["message"], "Runtime already exists");
        assert_eq!(value["code"], 409);
    }
}
