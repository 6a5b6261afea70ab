//! `POST /v1/messages`, the Anthropic-compatible endpoint. Normalizes the
//! request, then routes to the native Messages forwarder, the Responses
//! translator, or the Chat Completions translator based on the routed
//! model's declared endpoint support.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use http::HeaderMap;
use serde_json::Value as JsonValue;

use copgate_protocol::chat::{ChatCompletionChunk, ChatCompletionResponse};
use copgate_protocol::copilot::ModelDescriptor;
use copgate_protocol::claude::MessagesRequest;
use copgate_transform::chat;
use copgate_transform::normalize::{
    self, RerouteOptions, SubagentInfo,
};
use copgate_transform::responses::{self as responses_translate, stream::ResponsesStreamState};

use crate::error::ApiError;
use crate::metrics::{RequestRecord, SessionSnapshot, SubagentSnapshot};
use crate::state::AppState;
use crate::upstream::{self, RequestHints};
use crate::wire::{self, StepOutput};

use super::messages_native;

pub async fn handle(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let started = Instant::now();

    let Ok(raw) = serde_json::from_slice::<JsonValue>(&body) else {
        return ApiError::invalid_request("invalid request body").into_response();
    };
    let mut request: MessagesRequest = match serde_json::from_value(raw.clone()) {
        Ok(request) => request,
        Err(err) => {
            return ApiError::invalid_request(format!("invalid request body: {err}"))
                .into_response()
        }
    };

    let beta_header = headers
        .get("anthropic-beta")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
        .to_string();
    let original_model = request.model.clone();

    let request_type = if normalize::is_compact(&request) {
        "compact"
    } else if normalize::is_warmup(&request, &beta_header) {
        "warmup"
    } else {
        "normal"
    };

    let reroute = {
        let config = state.config.read().unwrap();
        RerouteOptions {
            small_model: config.small_model.clone(),
            compact_use_small_model: config.compact_use_small_model,
        }
    };
    if normalize::apply_small_model(&mut request, &beta_header, &reroute) {
        tracing::info!(model = %request.model, reason = request_type, "routed to small model");
    }

    let subagent = normalize::detect_subagent_marker(&request.messages);
    if let Some(info) = &subagent {
        tracing::debug!(agent_id = %info.agent_id, agent_type = %info.agent_type, "subagent detected");
    }
    update_session(&state, &request, &beta_header, subagent.as_ref());

    normalize::merge_tool_result_blocks(&mut request);

    let descriptor = state.find_model(&request.model);
    let force_agent = subagent.is_some();
    let is_agent = force_agent || normalize::is_initiator_agent(&request.messages);
    let vision = normalize::has_vision(&request.messages);

    let mut record = RequestRecord::new("messages", &original_model);
    record.routed_model = request.model.clone();
    record.request_type = request_type.to_string();
    record.initiator = if is_agent { "agent" } else { "user" }.to_string();
    record.has_vision = vision;
    record.streaming = request.stream;
    record.tool_count = request.tools.len();
    record.thinking_budget = request
        .thinking
        .as_ref()
        .map(|thinking| thinking.budget_tokens)
        .unwrap_or(0);

    let hints = RequestHints {
        is_agent,
        vision,
        beta_header: None,
    };

    match &descriptor {
        Some(model) if model.supports_messages() => {
            tracing::info!(model = %request.model, "routing to Messages API");
            record.backend = "messages".to_string();
            messages_native::handle(
                state,
                raw,
                request,
                descriptor.clone().unwrap(),
                beta_header,
                hints,
                record,
                started,
            )
            .await
        }
        Some(model) if model.supports_responses() => {
            tracing::info!(model = %request.model, "routing to Responses API");
            record.backend = "responses".to_string();
            responses_backend(state, request, hints, record, started).await
        }
        _ => {
            tracing::info!(model = %request.model, "routing to Chat Completions API");
            record.backend = "chat_completions".to_string();
            chat_backend(state, request, descriptor, hints, record, started).await
        }
    }
}

/// Session intelligence extracted from each Messages request.
fn update_session(
    state: &AppState,
    request: &MessagesRequest,
    beta_header: &str,
    subagent: Option<&SubagentInfo>,
) {
    let mut session = SessionSnapshot {
        beta_features: beta_header.to_string(),
        last_seen: Some(time::OffsetDateTime::now_utc()),
        ..Default::default()
    };

    for tool in &request.tools {
        if tool.name.starts_with("mcp__") {
            session.mcp_tools.push(tool.name.clone());
        } else {
            session.tools.push(tool.name.clone());
        }
    }

    if let Some(thinking) = &request.thinking {
        session.thinking_enabled =
            thinking.budget_tokens > 0 || thinking.thinking_type != "disabled";
        session.thinking_budget = thinking.budget_tokens;
        session.thinking_type = thinking.thinking_type.clone();
    }

    if let Some(info) = subagent {
        session.subagent = Some(SubagentSnapshot {
            session_id: info.session_id.clone(),
            agent_id: info.agent_id.clone(),
            agent_type: info.agent_type.clone(),
        });
    }

    if let Some(user_id) = request
        .metadata
        .as_ref()
        .and_then(|metadata| metadata.user_id.clone())
    {
        session.user_id = user_id;
    }

    state.metrics.update_session(session);
}

fn error_event(err: &impl std::fmt::Display) -> copgate_protocol::claude::StreamEvent {
    copgate_protocol::claude::StreamEvent::Error {
        error: copgate_protocol::claude::ErrorDetail::api_error(err.to_string()),
    }
}

fn finish_record(state: &AppState, mut record: RequestRecord, started: Instant, status: u16) {
    record.latency_ms = started.elapsed().as_millis() as i64;
    record.status_code = status;
    state.metrics.record_request(record);
}

// --- Chat Completions backend ---

async fn chat_backend(
    state: Arc<AppState>,
    request: MessagesRequest,
    descriptor: Option<ModelDescriptor>,
    hints: RequestHints,
    mut record: RequestRecord,
    started: Instant,
) -> Response {
    let extra_prompt = {
        let config = state.config.read().unwrap();
        config.extra_prompt(&normalize::normalize_model_name(&request.model))
    };
    let supports = descriptor
        .as_ref()
        .map(|descriptor| &descriptor.capabilities.supports);
    let translated = chat::request::translate_request(&request, &extra_prompt, supports);

    tracing::info!(
        model = %translated.model,
        stream = translated.stream,
        initiator = %record.initiator,
        vision = record.has_vision,
        "chat completions backend"
    );

    let body = match serde_json::to_vec(&translated) {
        Ok(body) => Bytes::from(body),
        Err(err) => return ApiError::internal(err.to_string()).into_response(),
    };

    let upstream_response =
        match upstream::post_copilot(&state, "/chat/completions", body, &hints).await {
            Ok(response) => response,
            Err(err) => {
                record.error = Some(err.message.clone());
                finish_record(&state, record, started, err.status.as_u16());
                return err.into_response();
            }
        };

    if !request.stream {
        let body = match upstream_response.bytes().await {
            Ok(body) => body,
            Err(err) => {
                let err = ApiError::transport(err);
                record.error = Some(err.message.clone());
                finish_record(&state, record, started, err.status.as_u16());
                return err.into_response();
            }
        };
        let parsed: ChatCompletionResponse = match serde_json::from_slice(&body) {
            Ok(parsed) => parsed,
            Err(err) => {
                let err = ApiError::internal(err.to_string());
                finish_record(&state, record, started, err.status.as_u16());
                return err.into_response();
            }
        };

        let translated = chat::response::translate_response(&parsed);
        record.input_tokens = translated.usage.input_tokens;
        record.output_tokens = translated.usage.output_tokens;
        record.cached_tokens = translated.usage.cache_read_input_tokens;
        finish_record(&state, record, started, 200);
        return Json(translated).into_response();
    }

    let (tx, response) = wire::sse_response(16);
    let model = translated.model.clone();
    let state_for_task = state.clone();
    tokio::spawn(async move {
        let mut machine = chat::stream::ChatStreamState::new(&model);

        let result = wire::pump_sse(upstream_response, &tx, |event| {
            match serde_json::from_str::<ChatCompletionChunk>(&event.data) {
                Ok(chunk) => StepOutput::frames(
                    machine
                        .translate_chunk(&chunk)
                        .iter()
                        .map(wire::encode_claude_event)
                        .collect(),
                ),
                Err(err) => {
                    tracing::error!(error = %err, "malformed chat completion chunk");
                    StepOutput::stop(vec![wire::encode_claude_event(&error_event(&err))])
                }
            }
        })
        .await;

        if let Err(message) = result {
            tracing::error!(error = %message, "chat streaming error");
            wire::send_stream_error(&tx, &message).await;
        }

        let (input, output, cached) = machine.token_counts();
        record.input_tokens = input;
        record.output_tokens = output;
        record.cached_tokens = cached;
        finish_record(&state_for_task, record, started, 200);
    });
    response
}

// --- Responses backend ---

async fn responses_backend(
    state: Arc<AppState>,
    request: MessagesRequest,
    hints: RequestHints,
    mut record: RequestRecord,
    started: Instant,
) -> Response {
    let (extra_prompt, effort) = {
        let config = state.config.read().unwrap();
        let normalized = normalize::normalize_model_name(&request.model);
        (
            config.extra_prompt(&normalized),
            config.reasoning_effort(&normalized),
        )
    };
    let payload = responses_translate::request::translate_request(&request, &extra_prompt, &effort);

    tracing::info!(
        model = %payload.model,
        stream = payload.stream,
        initiator = %record.initiator,
        vision = record.has_vision,
        "responses backend"
    );

    let body = match serde_json::to_vec(&payload) {
        Ok(body) => Bytes::from(body),
        Err(err) => return ApiError::internal(err.to_string()).into_response(),
    };

    let upstream_response = match upstream::post_copilot(&state, "/responses", body, &hints).await {
        Ok(response) => response,
        Err(err) => {
            record.error = Some(err.message.clone());
            finish_record(&state, record, started, err.status.as_u16());
            return err.into_response();
        }
    };

    if !request.stream {
        let body = match upstream_response.bytes().await {
            Ok(body) => body,
            Err(err) => {
                let err = ApiError::transport(err);
                record.error = Some(err.message.clone());
                finish_record(&state, record, started, err.status.as_u16());
                return err.into_response();
            }
        };
        let parsed = match serde_json::from_slice(&body) {
            Ok(parsed) => parsed,
            Err(err) => {
                let err = ApiError::internal(err.to_string());
                finish_record(&state, record, started, err.status.as_u16());
                return err.into_response();
            }
        };

        let translated = responses_translate::response::translate_result(&parsed);
        record.input_tokens = translated.usage.input_tokens;
        record.output_tokens = translated.usage.output_tokens;
        record.cached_tokens = translated.usage.cache_read_input_tokens;
        finish_record(&state, record, started, 200);
        return Json(translated).into_response();
    }

    let (tx, response) = wire::sse_response(16);
    let state_for_task = state.clone();
    tokio::spawn(async move {
        let mut machine = ResponsesStreamState::new();

        let result = wire::pump_sse(upstream_response, &tx, |event| {
            let event_type = event.event.as_deref().unwrap_or("");
            match machine.translate_event(event_type, &event.data) {
                Ok(events) => {
                    let frames = events.iter().map(wire::encode_claude_event).collect();
                    if machine.is_aborted() {
                        StepOutput::stop(frames)
                    } else {
                        StepOutput::frames(frames)
                    }
                }
                Err(err) => {
                    tracing::error!(event_type, error = %err, "malformed responses event");
                    StepOutput::stop(vec![wire::encode_claude_event(&error_event(&err))])
                }
            }
        })
        .await;

        if let Err(message) = result {
            tracing::error!(error = %message, "responses streaming error");
            wire::send_stream_error(&tx, &message).await;
        }

        // Clients must never hang waiting for a completion that already
        // ended upstream.
        if !machine.is_complete() {
            wire::send_stream_error(&tx, "Stream ended unexpectedly without completion event")
                .await;
        }

        let (input, output, cached) = machine.token_counts();
        record.input_tokens = input;
        record.output_tokens = output;
        record.cached_tokens = cached;
        finish_record(&state_for_task, record, started, 200);
    });
    response
}
