use std::sync::Arc;

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use http::HeaderMap;

use copgate_protocol::claude::{CountTokensResponse, MessagesRequest};
use copgate_transform::chat;
use copgate_transform::count_tokens::estimate_tokens;

use crate::state::AppState;

/// `POST /v1/messages/count_tokens`. Translation failures and malformed
/// bodies degrade to `{input_tokens: 1}` with a 200 status.
pub async fn handle(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Ok(request) = serde_json::from_slice::<MessagesRequest>(&body) else {
        return Json(CountTokensResponse { input_tokens: 1 }).into_response();
    };

    let descriptor = state.find_model(&request.model);
    let supports = descriptor.as_ref().map(|model| &model.capabilities.supports);
    let translated = chat::request::translate_request(&request, "", supports);

    let beta_header = headers
        .get("anthropic-beta")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");

    let input_tokens = estimate_tokens(&translated, &request.model, &request.tools, beta_header);
    Json(CountTokensResponse { input_tokens }).into_response()
}
