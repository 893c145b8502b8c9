//! Runtime lifecycle handlers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use super::parse_body;
use crate::error::ApiResult;
use crate::state::AppState;
use opr_executor_application::runtimes::CreateRuntimeRequest;

pub async fn create(State(state): State<AppState>, body: String) -> ApiResult<Response> {
    let request: CreateRuntimeRequest = parse_body(&body)?;
    let response = state.create.execute(request).await?;
    Ok((StatusCode::CREATED, Json(response)).into_response())
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
    #[serde(rename = "continue")]
    pub continue_token: Option<String>,
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Response> {
    let page = state
        .list
        .list(query.limit, query.continue_token.as_deref())
        .await?;

    // Header names are case-insensitive on the wire; the contract names are
    // the uppercase forms of these.
    let mut response = Json(page.runtimes).into_response();
    let headers = response.headers_mut();
    headers.insert("x-pagination-limit", page.limit.into());
    if let Some(token) = &page.continue_token {
        if let Ok(value) = token.parse() {
            headers.insert("x-pagination-continue", value);
        }
    }
    if let Some(remaining) = page.remaining {
        headers.insert("x-pagination-remaining", remaining.into());
    }

    Ok(response)
}

pub async fn describe(
    State(state): State<AppState>,
    Path(runtime_id): Path<String>,
) -> ApiResult<Response> {
    let descriptor = state.list.describe(&runtime_id).await?;
    Ok(Json(descriptor).into_response())
}

pub async fn remove(
    State(state): State<AppState>,
    Path(runtime_id): Path<String>,
) -> ApiResult<Response> {
    let result = state.delete.execute(&runtime_id).await?;
    let status = StatusCode::from_u16(result.code).unwrap_or(StatusCode::OK);
    Ok((status, Json(result)).into_response())
}
