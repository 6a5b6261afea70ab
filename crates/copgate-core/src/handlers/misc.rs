use std::sync::Arc;

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use serde_json::json;

use crate::error::ApiError;
use crate::state::AppState;
use crate::upstream::{self, RequestHints};

const COPILOT_USAGE_URL: &str = "https://api.github.com/copilot_internal/user";

pub async fn health() -> Response {
    ([(CONTENT_TYPE, "text/plain")], "Server running").into_response()
}

pub async fn token(State(state): State<Arc<AppState>>) -> Response {
    Json(json!({ "token": state.copilot_token() })).into_response()
}

/// Quota passthrough from the GitHub Copilot user endpoint.
pub async fn usage(State(state): State<Arc<AppState>>) -> Response {
    match upstream::get_github(&state, COPILOT_USAGE_URL).await {
        Ok(response) => match response.bytes().await {
            Ok(body) => ([(CONTENT_TYPE, "application/json")], body).into_response(),
            Err(err) => ApiError::transport(err).into_response(),
        },
        Err(err) => err.into_response(),
    }
}

/// Body passthrough to the Copilot embeddings endpoint.
pub async fn embeddings(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    tracing::info!("embeddings request");
    match upstream::post_copilot(&state, "/embeddings", body, &RequestHints::default()).await {
        Ok(response) => match response.bytes().await {
            Ok(body) => ([(CONTENT_TYPE, "application/json")], body).into_response(),
            Err(err) => ApiError::transport(err).into_response(),
        },
        Err(err) => err.into_response(),
    }
}

pub async fn stats(State(state): State<Arc<AppState>>) -> Response {
    Json(state.metrics.snapshot()).into_response()
}
