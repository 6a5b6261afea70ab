use serde_json::Value as JsonValue;

use copgate_protocol::claude::{ContentBlock, MessagesResponse, StopReason, Usage};
use copgate_protocol::responses::{OutputItem, OutputItemKnown, ResponsesResult, ResponsesUsage};

/// Convert a complete Responses result into an Anthropic Messages response.
pub fn translate_result(result: &ResponsesResult) -> MessagesResponse {
    let mut content = Vec::new();

    for item in &result.output {
        let OutputItem::Known(item) = item else {
            continue;
        };
        match item {
            OutputItemKnown::Reasoning {
                id,
                encrypted_content,
                summary,
            } => {
                let thinking = if summary.is_empty() {
                    "Thinking...".to_string()
                } else {
                    summary
                        .iter()
                        .map(|entry| entry.text.clone())
                        .collect::<Vec<_>>()
                        .join("\n")
                };
                let signature = if encrypted_content.is_empty() {
                    String::new()
                } else if id.is_empty() {
                    encrypted_content.clone()
                } else {
                    format!("{encrypted_content}@{id}")
                };
                content.push(ContentBlock::Thinking {
                    thinking,
                    signature,
                });
            }
            OutputItemKnown::FunctionCall {
                call_id,
                name,
                arguments,
            } => {
                content.push(ContentBlock::ToolUse {
                    id: call_id.clone(),
                    name: name.clone(),
                    input: parse_tool_input(arguments),
                });
            }
            OutputItemKnown::Message { content: entries } => {
                for entry in entries {
                    if entry.content_type == "output_text" && !entry.text.is_empty() {
                        content.push(ContentBlock::Text {
                            text: entry.text.clone(),
                        });
                    }
                }
            }
        }
    }

    if content.is_empty() {
        if let Some(text) = result.output_text.as_deref().filter(|text| !text.is_empty()) {
            content.push(ContentBlock::Text {
                text: text.to_string(),
            });
        }
    }
    if content.is_empty() {
        content.push(ContentBlock::Text {
            text: String::new(),
        });
    }

    MessagesResponse {
        id: result.id.clone(),
        response_type: "message".to_string(),
        role: "assistant".to_string(),
        content,
        model: result.model.clone(),
        stop_reason: Some(map_stop_reason(result)),
        stop_sequence: None,
        usage: map_usage(result.usage.as_ref()),
    }
}

fn map_stop_reason(result: &ResponsesResult) -> StopReason {
    let has_function_call = result.output.iter().any(|item| {
        matches!(
            item,
            OutputItem::Known(OutputItemKnown::FunctionCall { .. })
        )
    });

    if result.status == "completed" && has_function_call {
        return StopReason::ToolUse;
    }
    if result.status == "incomplete" {
        if let Some(details) = &result.incomplete_details {
            if details.reason == "max_output_tokens" {
                return StopReason::MaxTokens;
            }
        }
    }
    StopReason::EndTurn
}

pub fn map_usage(usage: Option<&ResponsesUsage>) -> Usage {
    let Some(usage) = usage else {
        return Usage::default();
    };
    let cached = usage
        .input_tokens_details
        .map(|details| details.cached_tokens)
        .unwrap_or(0);
    Usage {
        input_tokens: usage.input_tokens - cached,
        output_tokens: usage.output_tokens,
        cache_read_input_tokens: cached,
        cache_creation_input_tokens: 0,
    }
}

/// Function-call arguments arrive as a JSON string; malformed payloads and
/// bare arrays are wrapped instead of dropped.
pub fn parse_tool_input(arguments: &str) -> JsonValue {
    if arguments.is_empty() {
        return serde_json::json!({});
    }
    match serde_json::from_str::<JsonValue>(arguments) {
        Ok(value @ JsonValue::Object(_)) => value,
        Ok(value @ JsonValue::Array(_)) => serde_json::json!({ "arguments": value }),
        Ok(other) => serde_json::json!({ "arguments": other }),
        Err(_) => serde_json::json!({ "raw_arguments": arguments }),
    }
}
