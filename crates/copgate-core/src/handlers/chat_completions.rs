use std::sync::Arc;

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use serde_json::Value as JsonValue;

use crate::error::ApiError;
use crate::state::AppState;
use crate::upstream::{self, RequestHints};
use crate::wire;

/// `POST /chat/completions`: OpenAI-speaking clients straight through to
/// Copilot, with `max_tokens` filled in from the model catalog when absent.
pub async fn handle(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let Ok(mut payload) = serde_json::from_slice::<JsonValue>(&body) else {
        return ApiError::invalid_request("invalid request body").into_response();
    };

    let model = payload
        .get("model")
        .and_then(JsonValue::as_str)
        .unwrap_or_default()
        .to_string();
    let is_stream = payload
        .get("stream")
        .and_then(JsonValue::as_bool)
        .unwrap_or(false);

    if payload.get("max_tokens").is_none() {
        if let Some(descriptor) = state.find_model(&model) {
            let max_output = descriptor.capabilities.limits.max_output_tokens;
            if max_output > 0 {
                payload["max_tokens"] = JsonValue::from(max_output);
            }
        }
    }

    // Agent-initiated when the conversation tail is machine-produced.
    let is_agent = payload
        .get("messages")
        .and_then(JsonValue::as_array)
        .and_then(|messages| messages.last())
        .and_then(|message| message.get("role"))
        .and_then(JsonValue::as_str)
        .map(|role| role == "assistant" || role == "tool")
        .unwrap_or(false);

    tracing::info!(
        model = %model,
        stream = is_stream,
        initiator = if is_agent { "agent" } else { "user" },
        "chat completion request"
    );

    let body = match serde_json::to_vec(&payload) {
        Ok(body) => Bytes::from(body),
        Err(err) => return ApiError::internal(err.to_string()).into_response(),
    };

    let hints = RequestHints {
        is_agent,
        ..Default::default()
    };
    let response = match upstream::post_copilot(&state, "/chat/completions", body, &hints).await {
        Ok(response) => response,
        Err(err) => return err.into_response(),
    };

    if is_stream {
        wire::raw_body_response(200, "text/event-stream", response)
    } else {
        match response.bytes().await {
            Ok(body) => ([(CONTENT_TYPE, "application/json")], body).into_response(),
            Err(err) => ApiError::transport(err).into_response(),
        }
    }
}
