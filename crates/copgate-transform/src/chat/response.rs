use serde_json::Value as JsonValue;

use copgate_protocol::chat::{ChatCompletionResponse, ChatUsage, FinishReason};
use copgate_protocol::claude::{ContentBlock, MessagesResponse, StopReason, Usage};

/// Convert a non-streaming Chat Completions response into an Anthropic
/// Messages response.
pub fn translate_response(response: &ChatCompletionResponse) -> MessagesResponse {
    let mut content = Vec::new();
    let mut stop_reason = StopReason::EndTurn;

    if let Some(choice) = response.choices.first() {
        let message = &choice.message;

        match (&message.reasoning_text, &message.reasoning_opaque) {
            (Some(text), _) if !text.is_empty() => {
                content.push(ContentBlock::Thinking {
                    thinking: text.clone(),
                    signature: String::new(),
                });
            }
            (_, Some(opaque)) if !opaque.is_empty() => {
                content.push(ContentBlock::Thinking {
                    thinking: "Thinking...".to_string(),
                    signature: opaque.clone(),
                });
            }
            _ => {}
        }

        if let Some(text) = &message.content {
            if !text.is_empty() {
                content.push(ContentBlock::Text { text: text.clone() });
            }
        }

        for call in &message.tool_calls {
            content.push(ContentBlock::ToolUse {
                id: call.id.clone(),
                name: call.function.name.clone(),
                input: parse_tool_arguments(&call.function.arguments),
            });
        }

        if let Some(reason) = choice.finish_reason {
            stop_reason = map_stop_reason(reason);
        }
    }

    if content.is_empty() {
        content.push(ContentBlock::Text {
            text: String::new(),
        });
    }

    MessagesResponse {
        id: response.id.clone(),
        response_type: "message".to_string(),
        role: "assistant".to_string(),
        content,
        model: response.model.clone(),
        stop_reason: Some(stop_reason),
        stop_sequence: None,
        usage: map_usage(response.usage.as_ref()),
    }
}

pub fn map_stop_reason(reason: FinishReason) -> StopReason {
    match reason {
        FinishReason::Stop => StopReason::EndTurn,
        FinishReason::Length => StopReason::MaxTokens,
        FinishReason::ToolCalls => StopReason::ToolUse,
        FinishReason::ContentFilter => StopReason::EndTurn,
        FinishReason::Other => StopReason::EndTurn,
    }
}

/// Cached prompt tokens are reported separately and subtracted from the
/// input count.
pub fn map_usage(usage: Option<&ChatUsage>) -> Usage {
    let Some(usage) = usage else {
        return Usage::default();
    };
    let cached = usage
        .prompt_tokens_details
        .map(|details| details.cached_tokens)
        .unwrap_or(0);
    Usage {
        input_tokens: usage.prompt_tokens - cached,
        output_tokens: usage.completion_tokens,
        cache_read_input_tokens: cached,
        cache_creation_input_tokens: 0,
    }
}

fn parse_tool_arguments(arguments: &str) -> JsonValue {
    if arguments.is_empty() {
        return serde_json::json!({});
    }
    match serde_json::from_str::<JsonValue>(arguments) {
        Ok(value @ JsonValue::Object(_)) => value,
        Ok(other) => serde_json::json!({ "arguments": other }),
        Err(_) => serde_json::json!({ "arguments": arguments }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(body: serde_json::Value) -> ChatCompletionResponse {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn blocks_emitted_in_thinking_text_tool_order() {
        let resp = response(serde_json::json!({
            "id": "chatcmpl-1",
            "model": "claude-sonnet-4",
            "choices": [{
                "message": {
                    "content": "done",
                    "reasoning_text": "figured it out",
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "Read", "arguments": "{\"path\":\"a\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        }));

        let out = translate_response(&resp);
        assert!(matches!(out.content[0], ContentBlock::Thinking { .. }));
        assert!(matches!(out.content[1], ContentBlock::Text { .. }));
        match &out.content[2] {
            ContentBlock::ToolUse { id, name, input } => {
                assert_eq!(id, "call_1");
                assert_eq!(name, "Read");
                assert_eq!(input["path"], "a");
            }
            other => panic!("unexpected block: {other:?}"),
        }
        assert_eq!(out.stop_reason, Some(StopReason::ToolUse));
    }

    #[test]
    fn opaque_only_reasoning_gets_placeholder() {
        let resp = response(serde_json::json!({
            "id": "chatcmpl-2",
            "model": "claude-sonnet-4",
            "choices": [{
                "message": {"reasoning_opaque": "OPAQUE"},
                "finish_reason": "stop"
            }]
        }));

        let out = translate_response(&resp);
        assert_eq!(
            out.content[0],
            ContentBlock::Thinking {
                thinking: "Thinking...".to_string(),
                signature: "OPAQUE".to_string(),
            }
        );
    }

    #[test]
    fn empty_response_yields_single_empty_text_block() {
        let resp = response(serde_json::json!({
            "id": "chatcmpl-3",
            "model": "gpt-5-mini",
            "choices": []
        }));
        let out = translate_response(&resp);
        assert_eq!(
            out.content,
            vec![ContentBlock::Text {
                text: String::new()
            }]
        );
    }

    #[test]
    fn cached_tokens_subtracted_from_input() {
        let resp = response(serde_json::json!({
            "id": "chatcmpl-4",
            "model": "gpt-5-mini",
            "choices": [{"message": {"content": "x"}, "finish_reason": "stop"}],
            "usage": {
                "prompt_tokens": 120,
                "completion_tokens": 8,
                "total_tokens": 128,
                "prompt_tokens_details": {"cached_tokens": 100}
            }
        }));
        let out = translate_response(&resp);
        assert_eq!(out.usage.input_tokens, 20);
        assert_eq!(out.usage.cache_read_input_tokens, 100);
        assert_eq!(out.usage.output_tokens, 8);
    }

    #[test]
    fn malformed_arguments_are_wrapped() {
        let resp = response(serde_json::json!({
            "id": "chatcmpl-5",
            "model": "gpt-5-mini",
            "choices": [{
                "message": {
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "Bash", "arguments": "{not json"}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        }));
        let out = translate_response(&resp);
        match &out.content[0] {
            ContentBlock::ToolUse { input, .. } => {
                assert_eq!(input["arguments"], "{not json");
            }
            other => panic!("unexpected block: {other:?}"),
        }
    }
}
