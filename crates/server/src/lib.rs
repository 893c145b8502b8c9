//! HTTP surface of the executor.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod response;
pub mod state;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::auth::auth_middleware;
use crate::state::AppState;

/// Build the application router. Everything under `/v1` requires the bearer
/// secret; `/health` is intentionally open for probes.
pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .route(
            "/v1/runtimes",
            post(handlers::runtimes::create).get(handlers::runtimes::list),
        )
        .route(
            "/v1/runtimes/{runtime_id}",
            get(handlers::runtimes::describe).delete(handlers::runtimes::remove),
        )
        .route(
            "/v1/runtimes/{runtime_id}/executions",
            post(handlers::executions::execute),
        )
        // Older callers use the singular form.
        .route(
            "/v1/runtimes/{runtime_id}/execution",
            post(handlers::executions::execute),
        )
        .route(
            "/v1/runtimes/{runtime_id}/commands",
            post(handlers::executions::command),
        )
        .route("/v1/runtimes/{runtime_id}/logs", get(handlers::logs::stream))
        .layer(middleware::from_fn_with_state(
            state.executor_secret.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .merge(api)
        .fallback(handlers::route_not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
