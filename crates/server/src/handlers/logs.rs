//! Log streaming handler.

use std::convert::Infallible;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use serde::Deserialize;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::ApiResult;
use crate::state::AppState;

/// Default window a log stream stays open, in seconds.
const DEFAULT_STREAM_TIMEOUT_SECS: u64 = 600;

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub timeout: Option<u64>,
}

pub async fn stream(
    State(state): State<AppState>,
    Path(runtime_id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<Response> {
    let timeout = Duration::from_secs(query.timeout.unwrap_or(DEFAULT_STREAM_TIMEOUT_SECS));
    let rx = state.logstream.stream(&runtime_id, timeout).await?;

    let body = Body::from_stream(ReceiverStream::new(rx).map(Ok::<_, Infallible>));
    Ok((
        [(header::CONTENT_TYPE, "text/event-stream")],
        body,
    )
        .into_response())
}
