//! Execution and command handlers.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;

use super::parse_body;
use crate::error::ApiResult;
use crate::response::render_execution;
use crate::state::AppState;
use opr_executor_application::commands::CommandRequest;
use opr_executor_application::executions::ExecutionRequest;

pub async fn execute(
    State(state): State<AppState>,
    Path(runtime_id): Path<String>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<Response> {
    let request: ExecutionRequest = parse_body(&body)?;
    let result = state.execute.execute(&runtime_id, request).await?;
    Ok(render_execution(&headers, result))
}

pub async fn command(
    State(state): State<AppState>,
    Path(runtime_id): Path<String>,
    body: String,
) -> ApiResult<Response> {
    let request: CommandRequest = parse_body(&body)?;
    let response = state.command.execute(&runtime_id, request).await?;
    Ok(Json(response).into_response())
}
