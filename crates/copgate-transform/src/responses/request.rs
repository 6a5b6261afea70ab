use std::sync::LazyLock;

use regex::Regex;

use copgate_protocol::chat::{ChatToolChoice, NamedFunction, NamedToolChoice};
use copgate_protocol::claude::{
    ContentBlock, Message, MessagesRequest, Role, SystemPrompt, ToolChoice, ToolDefinition,
    ToolResultContent,
};
use copgate_protocol::responses::{
    FunctionOutput, InputItem, InputMessageContent, InputPart, ReasoningConfig, ResponsesPayload,
    ResponsesTool, SummaryItem,
};

use crate::normalize::normalize_model_name;

/// The Responses backend refuses tiny output windows; requests are padded up
/// to this floor.
const MIN_OUTPUT_TOKENS: u32 = 12800;

static SAFETY_IDENTIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"user_([^_]+)_account").unwrap());
static PROMPT_CACHE_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_session_(.+)$").unwrap());

/// Convert an Anthropic Messages request into a Responses API payload.
/// `reasoning_effort` is the configured effort for the routed model.
pub fn translate_request(
    request: &MessagesRequest,
    extra_prompt: &str,
    reasoning_effort: &str,
) -> ResponsesPayload {
    let model = normalize_model_name(&request.model);

    let mut input = Vec::new();
    for message in &request.messages {
        input.extend(translate_message(message, &model));
    }

    let instructions = build_instructions(request.system.as_ref(), extra_prompt);

    let mut payload = ResponsesPayload {
        model,
        input,
        instructions,
        max_output_tokens: request.max_tokens.max(MIN_OUTPUT_TOKENS),
        temperature: Some(1.0),
        reasoning: Some(ReasoningConfig {
            effort: reasoning_effort.to_string(),
            summary: "detailed".to_string(),
        }),
        include: vec!["reasoning.encrypted_content".to_string()],
        store: Some(false),
        parallel_tool_calls: Some(true),
        stream: request.stream,
        service_tier: None,
        tools: translate_tools(&request.tools),
        tool_choice: request.tool_choice.as_ref().map(translate_tool_choice),
        safety_identifier: None,
        prompt_cache_key: None,
    };

    if let Some(user_id) = request
        .metadata
        .as_ref()
        .and_then(|metadata| metadata.user_id.as_deref())
    {
        if let Some(capture) = SAFETY_IDENTIFIER_RE.captures(user_id) {
            payload.safety_identifier = Some(capture[1].to_string());
        }
        if let Some(capture) = PROMPT_CACHE_KEY_RE.captures(user_id) {
            payload.prompt_cache_key = Some(capture[1].to_string());
        }
    }

    payload
}

/// System blocks join with a single space; the extra prompt is appended to
/// the first block before joining.
fn build_instructions(system: Option<&SystemPrompt>, extra_prompt: &str) -> Option<String> {
    let text = match system {
        Some(SystemPrompt::Text(text)) => format!("{text}{extra_prompt}"),
        Some(SystemPrompt::Blocks(blocks)) => {
            let parts: Vec<String> = blocks
                .iter()
                .enumerate()
                .map(|(position, block)| {
                    if position == 0 {
                        format!("{}{extra_prompt}", block.text)
                    } else {
                        block.text.clone()
                    }
                })
                .collect();
            if parts.is_empty() {
                extra_prompt.to_string()
            } else {
                parts.join(" ")
            }
        }
        None => extra_prompt.to_string(),
    };

    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn translate_message(message: &Message, model: &str) -> Vec<InputItem> {
    let blocks = message.content.to_blocks();
    match message.role {
        Role::User => translate_user_blocks(&blocks),
        Role::Assistant => translate_assistant_blocks(&blocks, model),
    }
}

fn translate_user_blocks(blocks: &[ContentBlock]) -> Vec<InputItem> {
    let mut items = Vec::new();
    let mut rest = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                let status = if is_error.unwrap_or(false) {
                    "incomplete"
                } else {
                    "completed"
                };
                items.push(InputItem::FunctionCallOutput {
                    call_id: tool_use_id.clone(),
                    output: tool_result_output(content.as_ref()),
                    status: status.to_string(),
                });
            }
            other => rest.push(other.clone()),
        }
    }

    if !rest.is_empty() {
        items.push(InputItem::Message {
            role: "user".to_string(),
            content: build_user_content(&rest),
            phase: None,
        });
    }

    items
}

fn build_user_content(blocks: &[ContentBlock]) -> InputMessageContent {
    let has_images = blocks
        .iter()
        .any(|block| matches!(block, ContentBlock::Image { .. }));

    if !has_images {
        let text = blocks
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.clone()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n");
        return InputMessageContent::Text(text);
    }

    let mut parts = Vec::new();
    for block in blocks {
        match block {
            ContentBlock::Text { text } => parts.push(InputPart::InputText { text: text.clone() }),
            ContentBlock::Image { source } => parts.push(InputPart::InputImage {
                url: format!("data:{};base64,{}", source.media_type, source.data),
                detail: "auto".to_string(),
            }),
            _ => {}
        }
    }
    InputMessageContent::Parts(parts)
}

/// Tool-result content keeps its array structure (text + images); plain
/// strings pass through unchanged.
fn tool_result_output(content: Option<&ToolResultContent>) -> FunctionOutput {
    match content {
        None => FunctionOutput::Text(String::new()),
        Some(ToolResultContent::Text(text)) => FunctionOutput::Text(text.clone()),
        Some(ToolResultContent::Blocks(blocks)) => {
            let mut parts = Vec::new();
            for block in blocks {
                match block {
                    ContentBlock::Text { text } => {
                        parts.push(InputPart::InputText { text: text.clone() })
                    }
                    ContentBlock::Image { source } => parts.push(InputPart::InputImage {
                        url: format!("data:{};base64,{}", source.media_type, source.data),
                        detail: "auto".to_string(),
                    }),
                    _ => {}
                }
            }
            if parts.is_empty() {
                FunctionOutput::Text(String::new())
            } else {
                FunctionOutput::Parts(parts)
            }
        }
    }
}

fn translate_assistant_blocks(blocks: &[ContentBlock], model: &str) -> Vec<InputItem> {
    let mut items = Vec::new();
    let mut text_parts = Vec::new();
    let mut has_tool_use = false;

    for block in blocks {
        match block {
            ContentBlock::Thinking {
                thinking,
                signature,
            } => {
                // A signature containing `@` encodes a Responses reasoning
                // item as `encrypted_content@id`.
                let Some((encrypted, id)) = signature.split_once('@') else {
                    continue;
                };
                let summary = if !thinking.is_empty() && thinking != "Thinking..." {
                    vec![SummaryItem::summary_text(thinking.clone())]
                } else {
                    Vec::new()
                };
                items.push(InputItem::Reasoning {
                    id: id.to_string(),
                    encrypted_content: encrypted.to_string(),
                    summary,
                });
            }
            ContentBlock::Text { text } => text_parts.push(text.clone()),
            ContentBlock::ToolUse { id, name, input } => {
                has_tool_use = true;
                items.push(InputItem::FunctionCall {
                    call_id: id.clone(),
                    name: name.clone(),
                    arguments: serde_json::to_string(input).unwrap_or_else(|_| "{}".to_string()),
                });
            }
            _ => {}
        }
    }

    if !text_parts.is_empty() {
        let phase = if model.contains("codex") && model.contains("gpt-5.3-codex") {
            Some(if has_tool_use {
                "commentary".to_string()
            } else {
                "final_answer".to_string()
            })
        } else {
            None
        };
        items.push(InputItem::Message {
            role: "assistant".to_string(),
            content: InputMessageContent::Parts(vec![InputPart::OutputText {
                text: text_parts.concat(),
            }]),
            phase,
        });
    }

    items
}

fn translate_tools(tools: &[ToolDefinition]) -> Vec<ResponsesTool> {
    tools
        .iter()
        .map(|tool| ResponsesTool {
            tool_type: "function".to_string(),
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: tool.input_schema.clone(),
        })
        .collect()
}

fn translate_tool_choice(choice: &ToolChoice) -> ChatToolChoice {
    match choice {
        ToolChoice::Auto { .. } => ChatToolChoice::Mode("auto".to_string()),
        ToolChoice::Any { .. } => ChatToolChoice::Mode("required".to_string()),
        ToolChoice::None => ChatToolChoice::Mode("none".to_string()),
        ToolChoice::Tool { name, .. } => ChatToolChoice::Named(NamedToolChoice {
            choice_type: "function".to_string(),
            function: NamedFunction { name: name.clone() },
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use copgate_protocol::claude::{MessageContent, Metadata, SystemBlock};

    fn base_request(model: &str) -> MessagesRequest {
        MessagesRequest {
            model: model.to_string(),
            messages: Vec::new(),
            max_tokens: 4096,
            system: None,
            tools: Vec::new(),
            tool_choice: None,
            stream: true,
            temperature: Some(0.2),
            top_p: None,
            top_k: None,
            stop_sequences: Vec::new(),
            thinking: None,
            metadata: None,
        }
    }

    #[test]
    fn payload_defaults() {
        let req = base_request("gpt-5.1-codex-max");
        let payload = translate_request(&req, "", "high");

        assert_eq!(payload.max_output_tokens, 12800);
        assert_eq!(payload.temperature, Some(1.0));
        assert_eq!(payload.store, Some(false));
        assert_eq!(payload.parallel_tool_calls, Some(true));
        assert_eq!(payload.include, vec!["reasoning.encrypted_content"]);
        assert!(payload.service_tier.is_none());
        let reasoning = payload.reasoning.unwrap();
        assert_eq!(reasoning.effort, "high");
        assert_eq!(reasoning.summary, "detailed");
    }

    #[test]
    fn large_max_tokens_passes_through() {
        let mut req = base_request("gpt-5.1-codex-max");
        req.max_tokens = 32000;
        assert_eq!(translate_request(&req, "", "high").max_output_tokens, 32000);
    }

    #[test]
    fn instructions_join_blocks_with_space_and_extra_on_first() {
        let mut req = base_request("gpt-5.1-codex-max");
        req.system = Some(SystemPrompt::Blocks(vec![
            SystemBlock {
                block_type: "text".to_string(),
                text: "First.".to_string(),
            },
            SystemBlock {
                block_type: "text".to_string(),
                text: "Second.".to_string(),
            },
        ]));
        let payload = translate_request(&req, " EXTRA", "high");
        assert_eq!(payload.instructions.as_deref(), Some("First. EXTRA Second."));
    }

    #[test]
    fn thinking_signature_round_trips_reasoning_identity() {
        // A prior turn emitted signature "E@r1"; it must come back apart.
        let mut req = base_request("gpt-5.1-codex-max");
        req.messages.push(Message {
            role: Role::Assistant,
            content: MessageContent::Blocks(vec![ContentBlock::Thinking {
                thinking: "why it works".to_string(),
                signature: "E@r1".to_string(),
            }]),
        });

        let payload = translate_request(&req, "", "high");
        assert_eq!(
            payload.input[0],
            InputItem::Reasoning {
                id: "r1".to_string(),
                encrypted_content: "E".to_string(),
                summary: vec![SummaryItem::summary_text("why it works")],
            }
        );
    }

    #[test]
    fn placeholder_thinking_omits_summary() {
        let mut req = base_request("gpt-5.1-codex-max");
        req.messages.push(Message {
            role: Role::Assistant,
            content: MessageContent::Blocks(vec![ContentBlock::Thinking {
                thinking: "Thinking...".to_string(),
                signature: "E@r1".to_string(),
            }]),
        });
        let payload = translate_request(&req, "", "high");
        assert_eq!(
            payload.input[0],
            InputItem::Reasoning {
                id: "r1".to_string(),
                encrypted_content: "E".to_string(),
                summary: Vec::new(),
            }
        );
    }

    #[test]
    fn plain_thinking_is_skipped_for_responses() {
        let mut req = base_request("gpt-5.1-codex-max");
        req.messages.push(Message {
            role: Role::Assistant,
            content: MessageContent::Blocks(vec![ContentBlock::Thinking {
                thinking: "chat-era thinking".to_string(),
                signature: "SIG".to_string(),
            }]),
        });
        assert!(translate_request(&req, "", "high").input.is_empty());
    }

    #[test]
    fn error_tool_result_is_incomplete() {
        let mut req = base_request("gpt-5.1-codex-max");
        req.messages.push(Message {
            role: Role::User,
            content: MessageContent::Blocks(vec![ContentBlock::ToolResult {
                tool_use_id: "t1".to_string(),
                content: Some(ToolResultContent::Text("boom".to_string())),
                is_error: Some(true),
            }]),
        });
        let payload = translate_request(&req, "", "high");
        assert_eq!(
            payload.input[0],
            InputItem::FunctionCallOutput {
                call_id: "t1".to_string(),
                output: FunctionOutput::Text("boom".to_string()),
                status: "incomplete".to_string(),
            }
        );
    }

    #[test]
    fn codex_phase_tagging() {
        let mut req = base_request("gpt-5.3-codex");
        req.messages.push(Message {
            role: Role::Assistant,
            content: MessageContent::Blocks(vec![
                ContentBlock::Text {
                    text: "working on it".to_string(),
                },
                ContentBlock::ToolUse {
                    id: "c1".to_string(),
                    name: "shell".to_string(),
                    input: serde_json::json!({}),
                },
            ]),
        });

        let payload = translate_request(&req, "", "high");
        let message = payload
            .input
            .iter()
            .find_map(|item| match item {
                InputItem::Message { phase, .. } => Some(phase.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(message.as_deref(), Some("commentary"));
    }

    #[test]
    fn metadata_user_id_parsing() {
        let mut req = base_request("gpt-5.1-codex-max");
        req.metadata = Some(Metadata {
            user_id: Some("user_abc123_account_session_sess-42".to_string()),
        });
        let payload = translate_request(&req, "", "high");
        assert_eq!(payload.safety_identifier.as_deref(), Some("abc123"));
        assert_eq!(payload.prompt_cache_key.as_deref(), Some("sess-42"));
    }
}
