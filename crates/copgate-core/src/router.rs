use std::sync::Arc;

use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};

use crate::handlers;
use crate::middleware::{self, RateLimiter};
use crate::state::AppState;

#[derive(Debug, Clone, Default)]
pub struct RouterOptions {
    pub rate_limit_seconds: Option<u64>,
    pub rate_limit_wait: bool,
    pub manual_approval: bool,
}

/// Assemble the public surface. Layer order (outer to inner): access log /
/// request id, CORS, panic recovery, API-key check, rate limiter, manual
/// approval.
pub fn build_router(state: Arc<AppState>, options: RouterOptions) -> Router {
    let mut router = Router::new()
        .route("/", get(handlers::misc::health))
        .route("/token", get(handlers::misc::token))
        .route("/usage", get(handlers::misc::usage))
        .route("/stats", get(handlers::misc::stats))
        .route("/models", get(handlers::models::list))
        .route("/v1/models", get(handlers::models::list))
        .route("/chat/completions", post(handlers::chat_completions::handle))
        .route(
            "/v1/chat/completions",
            post(handlers::chat_completions::handle),
        )
        .route("/v1/messages", post(handlers::messages::handle))
        .route(
            "/v1/messages/count_tokens",
            post(handlers::count_tokens::handle),
        )
        .route("/responses", post(handlers::responses::handle))
        .route("/v1/responses", post(handlers::responses::handle))
        .route("/embeddings", post(handlers::misc::embeddings))
        .route("/v1/embeddings", post(handlers::misc::embeddings))
        .with_state(state.clone());

    if options.manual_approval {
        router = router.layer(from_fn(middleware::manual_approval));
    }
    if let Some(seconds) = options.rate_limit_seconds {
        let limiter = Arc::new(RateLimiter::new(seconds, options.rate_limit_wait));
        router = router.layer(from_fn_with_state(limiter, middleware::rate_limit));
    }

    router
        .layer(from_fn_with_state(state, middleware::require_api_key))
        .layer(CatchPanicLayer::new())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(from_fn(middleware::access_log))
}
