//! Native Messages forwarder: Copilot hosts Anthropic's own endpoint for
//! some models, so the payload passes through as a generic mapping to keep
//! unknown fields intact. Three mutations apply: invalid-thinking filtering,
//! adaptive-thinking rewriting, and beta-header filtering.

use std::sync::Arc;
use std::time::Instant;

use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use serde_json::Value as JsonValue;

use copgate_protocol::claude::{
    ContentBlock, MessageContent, MessagesRequest, MessagesResponse, Role,
};
use copgate_protocol::copilot::ModelDescriptor;
use copgate_protocol::sse::SseEvent;
use copgate_transform::normalize::normalize_model_name;

use crate::error::ApiError;
use crate::metrics::RequestRecord;
use crate::state::AppState;
use crate::upstream::{self, RequestHints};
use crate::wire::{self, StepOutput};

const STRIPPED_BETA: &str = "claude-code-20250219";
const THINKING_BETA: &str = "interleaved-thinking-2025-05-14";

#[allow(clippy::too_many_arguments)]
pub async fn handle(
    state: Arc<AppState>,
    mut payload: JsonValue,
    request: MessagesRequest,
    descriptor: ModelDescriptor,
    beta_header: String,
    mut hints: RequestHints,
    mut record: RequestRecord,
    started: Instant,
) -> Response {
    payload["model"] = JsonValue::String(request.model.clone());
    filter_thinking_blocks(&mut payload, &request);
    apply_adaptive_thinking(&state, &mut payload, &request, &descriptor);

    let thinking_budget = request
        .thinking
        .as_ref()
        .map(|thinking| thinking.budget_tokens)
        .unwrap_or(0);
    let mut beta = filter_beta_header(&beta_header);
    if beta.is_empty() && thinking_budget > 0 {
        beta = THINKING_BETA.to_string();
    }
    hints.beta_header = Some(beta);

    tracing::info!(
        model = %request.model,
        stream = request.stream,
        vision = hints.vision,
        "messages API (native)"
    );

    let body = match serde_json::to_vec(&payload) {
        Ok(body) => Bytes::from(body),
        Err(err) => return ApiError::internal(err.to_string()).into_response(),
    };

    let upstream_response =
        match upstream::post_copilot(&state, "/v1/messages", body, &hints).await {
            Ok(response) => response,
            Err(err) => {
                record.error = Some(err.message.clone());
                record.latency_ms = started.elapsed().as_millis() as i64;
                record.status_code = err.status.as_u16();
                state.metrics.record_request(record);
                return err.into_response();
            }
        };

    if !request.stream {
        let status = upstream_response.status().as_u16();
        let body = match upstream_response.bytes().await {
            Ok(body) => body,
            Err(err) => return ApiError::transport(err).into_response(),
        };

        if let Ok(parsed) = serde_json::from_slice::<MessagesResponse>(&body) {
            record.input_tokens = parsed.usage.input_tokens;
            record.output_tokens = parsed.usage.output_tokens;
            record.cached_tokens = parsed.usage.cache_read_input_tokens;
        }
        record.latency_ms = started.elapsed().as_millis() as i64;
        record.status_code = status;
        state.metrics.record_request(record);

        let mut response = ([(CONTENT_TYPE, "application/json")], body).into_response();
        *response.status_mut() =
            http::StatusCode::from_u16(status).unwrap_or(http::StatusCode::OK);
        return response;
    }

    let (tx, response) = wire::sse_response(16);
    let state_for_task = state.clone();
    tokio::spawn(async move {
        let result = wire::pump_sse(upstream_response, &tx, |event| {
            sniff_usage(event, &mut record);
            StepOutput::frames(vec![wire::encode_raw_event(event)])
        })
        .await;

        if let Err(message) = result {
            tracing::error!(error = %message, "native messages stream error");
            wire::send_stream_error(&tx, &message).await;
        }

        record.latency_ms = started.elapsed().as_millis() as i64;
        state_for_task.metrics.record_request(record);
    });
    response
}

/// Pull token counts out of the forwarded native events for metrics.
fn sniff_usage(event: &SseEvent, record: &mut RequestRecord) {
    match event.event.as_deref() {
        Some("message_start") => {
            if let Ok(value) = serde_json::from_str::<JsonValue>(&event.data) {
                if let Some(usage) = value.pointer("/message/usage") {
                    record.input_tokens = usage
                        .get("input_tokens")
                        .and_then(JsonValue::as_i64)
                        .unwrap_or(0);
                    record.cached_tokens = usage
                        .get("cache_read_input_tokens")
                        .and_then(JsonValue::as_i64)
                        .unwrap_or(0);
                }
            }
        }
        Some("message_delta") => {
            if let Ok(value) = serde_json::from_str::<JsonValue>(&event.data) {
                if let Some(output) = value
                    .pointer("/usage/output_tokens")
                    .and_then(JsonValue::as_i64)
                {
                    record.output_tokens = output;
                }
            }
        }
        _ => {}
    }
}

/// Drop thinking blocks that would be rejected upstream: empty or
/// placeholder text, missing signature, or a Responses-API `@` identity.
/// Applies only to assistant messages whose content is an array.
fn filter_thinking_blocks(payload: &mut JsonValue, request: &MessagesRequest) {
    let Some(messages) = payload.get_mut("messages").and_then(JsonValue::as_array_mut) else {
        return;
    };

    for (position, message) in messages.iter_mut().enumerate() {
        let Some(parsed) = request.messages.get(position) else {
            continue;
        };
        if parsed.role != Role::Assistant {
            continue;
        }
        if !matches!(parsed.content, MessageContent::Blocks(_)) {
            continue;
        }

        let mut filtered: Vec<ContentBlock> = parsed
            .content
            .to_blocks()
            .into_iter()
            .filter(|block| match block {
                ContentBlock::Thinking {
                    thinking,
                    signature,
                } => {
                    !thinking.is_empty()
                        && thinking != "Thinking..."
                        && !signature.is_empty()
                        && !signature.contains('@')
                }
                _ => true,
            })
            .collect();

        if filtered.is_empty() {
            filtered.push(ContentBlock::Text {
                text: String::new(),
            });
        }

        if let Ok(content) = serde_json::to_value(&filtered) {
            message["content"] = content;
        }
    }
}

/// Models that support adaptive thinking get `{type: "adaptive"}` plus the
/// configured effort (mapped onto the Messages `output_config` scale).
fn apply_adaptive_thinking(
    state: &AppState,
    payload: &mut JsonValue,
    request: &MessagesRequest,
    descriptor: &ModelDescriptor,
) {
    if !descriptor.capabilities.supports.adaptive_thinking {
        return;
    }

    payload["thinking"] = serde_json::json!({"type": "adaptive"});

    let effort = state
        .config
        .read()
        .unwrap()
        .reasoning_effort(&normalize_model_name(&request.model));
    payload["output_config"] = serde_json::json!({"effort": map_effort(&effort)});
}

fn map_effort(effort: &str) -> String {
    match effort {
        "xhigh" => "max".to_string(),
        "none" | "minimal" => "low".to_string(),
        other => other.to_string(),
    }
}

/// Strip `claude-code-20250219` from the comma-separated beta list.
fn filter_beta_header(header: &str) -> String {
    if header.is_empty() {
        return String::new();
    }
    header
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty() && *entry != STRIPPED_BETA)
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use copgate_protocol::claude::Message;

    #[test]
    fn beta_filtering() {
        assert_eq!(filter_beta_header(""), "");
        assert_eq!(filter_beta_header("claude-code-20250219"), "");
        assert_eq!(
            filter_beta_header("claude-code-20250219, fine-grained-tool-streaming-2025-05-14"),
            "fine-grained-tool-streaming-2025-05-14"
        );
        assert_eq!(filter_beta_header("a,b"), "a,b");
    }

    #[test]
    fn effort_mapping() {
        assert_eq!(map_effort("xhigh"), "max");
        assert_eq!(map_effort("minimal"), "low");
        assert_eq!(map_effort("none"), "low");
        assert_eq!(map_effort("medium"), "medium");
    }

    #[test]
    fn invalid_thinking_blocks_are_dropped_from_payload() {
        let request = MessagesRequest {
            model: "claude-sonnet-4.5".to_string(),
            messages: vec![Message {
                role: Role::Assistant,
                content: MessageContent::Blocks(vec![
                    ContentBlock::Thinking {
                        thinking: "Thinking...".to_string(),
                        signature: "sig".to_string(),
                    },
                    ContentBlock::Thinking {
                        thinking: "kept".to_string(),
                        signature: "sig".to_string(),
                    },
                    ContentBlock::Thinking {
                        thinking: "responses identity".to_string(),
                        signature: "enc@r1".to_string(),
                    },
                ]),
            }],
            max_tokens: 128,
            system: None,
            tools: Vec::new(),
            tool_choice: None,
            stream: false,
            temperature: None,
            top_p: None,
            top_k: None,
            stop_sequences: Vec::new(),
            thinking: None,
            metadata: None,
        };
        let mut payload = serde_json::to_value(&request).unwrap();

        filter_thinking_blocks(&mut payload, &request);
        let content = payload["messages"][0]["content"].as_array().unwrap();
        assert_eq!(content.len(), 1);
        assert_eq!(content[0]["thinking"], "kept");
    }

    #[test]
    fn all_invalid_thinking_leaves_empty_text_block() {
        let request = MessagesRequest {
            model: "claude-sonnet-4.5".to_string(),
            messages: vec![Message {
                role: Role::Assistant,
                content: MessageContent::Blocks(vec![ContentBlock::Thinking {
                    thinking: String::new(),
                    signature: String::new(),
                }]),
            }],
            max_tokens: 128,
            system: None,
            tools: Vec::new(),
            tool_choice: None,
            stream: false,
            temperature: None,
            top_p: None,
            top_k: None,
            stop_sequences: Vec::new(),
            thinking: None,
            metadata: None,
        };
        let mut payload = serde_json::to_value(&request).unwrap();

        filter_thinking_blocks(&mut payload, &request);
        let content = payload["messages"][0]["content"].as_array().unwrap();
        assert_eq!(content.len(), 1);
        assert_eq!(content[0]["type"], "text");
        assert_eq!(content[0]["text"], "");
    }
}
