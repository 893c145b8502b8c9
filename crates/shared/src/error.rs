//! Executor error taxonomy.
//!
//! Every error that can surface through the HTTP API is one of these kinds.
//! The `kind()` string and the HTTP status are part of the external contract,
//! so variants must not be renamed casually.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("{0}")]
    GeneralUnknown(String),

    #[error("Route not found")]
    RouteNotFound,

    #[error("Missing executor key")]
    Unauthorized,

    #[error("{0}")]
    ExecutionBadRequest(String),

    #[error("{0}")]
    ExecutionTimeout(String),

    #[error("{0}")]
    ExecutionBadJson(String),

    #[error("{0}")]
    RuntimeNotFound(String),

    #[error("{0}")]
    RuntimeConflict(String),

    #[error("{0}")]
    RuntimeFailed(String),

    #[error("{0}")]
    RuntimeTimeout(String),

    #[error("{0}")]
    LogsTimeout(String),

    #[error("{0}")]
    CommandTimeout(String),

    #[error("{0}")]
    CommandFailed(String),
}

impl ExecutorError {
    /// Stable identifier rendered as the `type` field of error responses.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::GeneralUnknown(_) => "general_unknown",
            Self::RouteNotFound => "general_route_not_found",
            Self::Unauthorized => "general_unauthorized",
            Self::ExecutionBadRequest(_) => "execution_bad_request",
            Self::ExecutionTimeout(_) => "execution_timeout",
            Self::ExecutionBadJson(_) => "execution_bad_json",
            Self::RuntimeNotFound(_) => "runtime_not_found",
            Self::RuntimeConflict(_) => "runtime_conflict",
            Self::RuntimeFailed(_) => "runtime_failed",
            Self::RuntimeTimeout(_) => "runtime_timeout",
            Self::LogsTimeout(_) => "logs_timeout",
            Self::CommandTimeout(_) => "command_timeout",
            Self::CommandFailed(_) => "command_failed",
        }
    }

    /// HTTP status code the kind maps to.
    pub fn status(&self) -> u16 {
        match self {
            Self::GeneralUnknown(_) => 500,
            Self::RouteNotFound => 404,
            Self::Unauthorized => 401,
            Self::ExecutionBadRequest(_) => 400,
            Self::ExecutionTimeout(_) => 504,
            Self::ExecutionBadJson(_) => 400,
            Self::RuntimeNotFound(_) => 404,
            Self::RuntimeConflict(_) => 409,
            Self::RuntimeFailed(_) => 500,
            Self::RuntimeTimeout(_) => 504,
            Self::LogsTimeout(_) => 504,
            Self::CommandTimeout(_) => 504,
            Self::CommandFailed(_) => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, ExecutorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(ExecutorError::RuntimeConflict(String::new()).kind(), "runtime_conflict");
        assert_eq!(ExecutorError::RouteNotFound.kind(), "general_route_not_found");
        assert_eq!(ExecutorError::Unauthorized.kind(), "general_unauthorized");
        assert_eq!(ExecutorError::LogsTimeout(String::new()).kind(), "logs_timeout");
    }

    #[test]
    fn status_codes() {
        assert_eq!(ExecutorError::RuntimeConflict(String::new()).status(), 409);
        assert_eq!(ExecutorError::RuntimeTimeout(String::new()).status(), 504);
        assert_eq!(ExecutorError::RuntimeNotFound(String::new()).status(), 404);
        assert_eq!(ExecutorError::ExecutionBadRequest(String::new()).status(), 400);
        assert_eq!(ExecutorError::GeneralUnknown(String::new()).status(), 500);
    }

    #[test]
    fn unauthorized_message_is_fixed() {
        assert_eq!(ExecutorError::Unauthorized.to_string(), "Missing executor key");
    }
}
