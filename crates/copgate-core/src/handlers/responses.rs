use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use serde_json::{json, Value as JsonValue};

use copgate_protocol::sse::encode_sse;
use copgate_transform::responses::id_sync::StreamIdSync;

use crate::error::ApiError;
use crate::metrics::RequestRecord;
use crate::state::AppState;
use crate::upstream::{self, RequestHints};
use crate::wire::{self, StepOutput};

/// `POST /responses`: direct forwarder for clients speaking the Responses
/// dialect, with tool-list rewriting and stream ID synchronization.
pub async fn handle(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let started = Instant::now();

    let Ok(mut payload) = serde_json::from_slice::<JsonValue>(&body) else {
        return ApiError::invalid_request("invalid request body").into_response();
    };

    let model = payload
        .get("model")
        .and_then(JsonValue::as_str)
        .unwrap_or_default()
        .to_string();

    let supported = state
        .find_model(&model)
        .map(|descriptor| descriptor.supports_responses())
        .unwrap_or(false);
    if !supported {
        return ApiError::invalid_request("This model does not support the responses endpoint")
            .into_response();
    }

    if let Some(tools) = payload.get("tools").and_then(JsonValue::as_array).cloned() {
        let use_function_apply_patch = state.config.read().unwrap().use_function_apply_patch;
        let mut tools = if use_function_apply_patch {
            convert_apply_patch_tools(tools)
        } else {
            tools
        };
        tools = remove_web_search_tools(tools);
        payload["tools"] = JsonValue::Array(tools);
    }

    payload["service_tier"] = JsonValue::Null;

    let is_stream = payload
        .get("stream")
        .and_then(JsonValue::as_bool)
        .unwrap_or(false);
    let vision = detect_vision(&payload);
    let is_agent = detect_agent(&payload);

    tracing::info!(
        model = %model,
        stream = is_stream,
        initiator = if is_agent { "agent" } else { "user" },
        vision,
        "responses passthrough"
    );

    let body = match serde_json::to_vec(&payload) {
        Ok(body) => Bytes::from(body),
        Err(err) => return ApiError::internal(err.to_string()).into_response(),
    };

    let hints = RequestHints {
        is_agent,
        vision,
        beta_header: None,
    };
    let upstream_response =
        match upstream::post_copilot(&state, "/responses", body, &hints).await {
            Ok(response) => response,
            Err(err) => {
                record_request(&state, &model, is_agent, vision, is_stream, started, err.status.as_u16());
                return err.into_response();
            }
        };

    record_request(&state, &model, is_agent, vision, is_stream, started, 200);

    if !is_stream {
        return match upstream_response.bytes().await {
            Ok(body) => ([(CONTENT_TYPE, "application/json")], body).into_response(),
            Err(err) => ApiError::transport(err).into_response(),
        };
    }

    let (tx, response) = wire::sse_response(16);
    tokio::spawn(async move {
        let mut sync = StreamIdSync::new();
        let result = wire::pump_sse(upstream_response, &tx, |event| {
            let event_type = event.event.as_deref().unwrap_or("");
            let data = sync.process(event_type, &event.data);
            StepOutput::frames(vec![encode_sse(event.event.as_deref(), &data)])
        })
        .await;

        if let Err(message) = result {
            tracing::error!(error = %message, "responses passthrough stream error");
            wire::send_stream_error(&tx, &message).await;
        }
    });
    response
}

fn record_request(
    state: &AppState,
    model: &str,
    is_agent: bool,
    vision: bool,
    streaming: bool,
    started: Instant,
    status_code: u16,
) {
    let mut record = RequestRecord::new("responses", model);
    record.backend = "responses".to_string();
    record.initiator = if is_agent { "agent" } else { "user" }.to_string();
    record.has_vision = vision;
    record.streaming = streaming;
    record.latency_ms = started.elapsed().as_millis() as i64;
    record.status_code = status_code;
    state.metrics.record_request(record);
}

/// `{type: "custom", name: "apply_patch"}` becomes a function tool with a
/// fixed single-string-parameter schema.
fn convert_apply_patch_tools(tools: Vec<JsonValue>) -> Vec<JsonValue> {
    tools
        .into_iter()
        .map(|tool| {
            let tool_type = tool.get("type").and_then(JsonValue::as_str);
            let name = tool.get("name").and_then(JsonValue::as_str);
            if tool_type != Some("custom") || name != Some("apply_patch") {
                return tool;
            }
            json!({
                "type": "function",
                "name": "apply_patch",
                "description": tool.get("description").cloned().unwrap_or(JsonValue::Null),
                "parameters": {
                    "type": "object",
                    "properties": {
                        "input": {
                            "type": "string",
                            "description": "The entire contents of the apply_patch command"
                        }
                    },
                    "required": ["input"]
                },
                "strict": false
            })
        })
        .collect()
}

fn remove_web_search_tools(tools: Vec<JsonValue>) -> Vec<JsonValue> {
    tools
        .into_iter()
        .filter(|tool| tool.get("type").and_then(JsonValue::as_str) != Some("web_search"))
        .collect()
}

/// `input_image` may hide inside nested content arrays; walk with an
/// explicit queue.
fn detect_vision(payload: &JsonValue) -> bool {
    let Some(input) = payload.get("input").and_then(JsonValue::as_array) else {
        return false;
    };

    let mut queue: Vec<&JsonValue> = input.iter().collect();
    while let Some(item) = queue.pop() {
        let Some(object) = item.as_object() else {
            continue;
        };
        if object.get("type").and_then(JsonValue::as_str) == Some("input_image") {
            return true;
        }
        if let Some(content) = object.get("content").and_then(JsonValue::as_array) {
            queue.extend(content.iter());
        }
    }
    false
}

/// Agent-initiated when the last input item's role is `assistant` or absent.
fn detect_agent(payload: &JsonValue) -> bool {
    let Some(last) = payload
        .get("input")
        .and_then(JsonValue::as_array)
        .and_then(|input| input.last())
    else {
        return false;
    };
    match last.get("role").and_then(JsonValue::as_str) {
        Some(role) => role == "assistant" || role.is_empty(),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_patch_custom_tool_is_rewritten() {
        let tools = vec![json!({
            "type": "custom",
            "name": "apply_patch",
            "description": "patch files"
        })];
        let rewritten = convert_apply_patch_tools(tools);
        assert_eq!(rewritten[0]["type"], "function");
        assert_eq!(rewritten[0]["parameters"]["required"][0], "input");
    }

    #[test]
    fn web_search_tools_removed() {
        let tools = vec![
            json!({"type": "web_search"}),
            json!({"type": "function", "name": "read"}),
        ];
        let filtered = remove_web_search_tools(tools);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0]["name"], "read");
    }

    #[test]
    fn vision_found_in_nested_content() {
        let payload = json!({"input": [
            {"type": "message", "role": "user", "content": [
                {"type": "message", "content": [{"type": "input_image", "url": "data:..."}]}
            ]}
        ]});
        assert!(detect_vision(&payload));
        assert!(!detect_vision(&json!({"input": [{"type": "message", "content": []}]})));
    }

    #[test]
    fn roleless_tail_counts_as_agent() {
        assert!(detect_agent(
            &json!({"input": [{"type": "function_call_output", "call_id": "c1"}]})
        ));
        assert!(!detect_agent(
            &json!({"input": [{"type": "message", "role": "user"}]})
        ));
        assert!(detect_agent(
            &json!({"input": [{"type": "message", "role": "assistant"}]})
        ));
    }
}
