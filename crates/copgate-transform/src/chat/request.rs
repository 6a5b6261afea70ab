use copgate_protocol::chat::{
    ChatCompletionRequest, ChatContent, ChatContentPart, ChatFunction, ChatMessage, ChatRole,
    ChatTool, ChatToolCall, ChatToolChoice, ImageUrl, NamedFunction, NamedToolChoice,
    ToolCallFunction,
};
use copgate_protocol::claude::{
    ContentBlock, Message, MessagesRequest, Role, ToolChoice, ToolDefinition,
};
use copgate_protocol::copilot::ModelSupports;

use crate::normalize::{is_claude, normalize_model_name, system_text, tool_result_text};

const INTERLEAVED_THINKING_PROTOCOL: &str = "
<interleaved_thinking_protocol>
You MUST think after receiving a tool result. After EVERY tool result, you MUST produce a thinking block before producing any other content. This is NON-NEGOTIABLE.
</interleaved_thinking_protocol>";

const INTERLEAVED_THINKING_REMINDER: &str =
    "<system-reminder>you MUST follow interleaved_thinking_protocol</system-reminder>";

/// Convert an Anthropic Messages request into a Chat Completions request.
/// `supports` carries the routed model's thinking-budget bounds when known.
pub fn translate_request(
    request: &MessagesRequest,
    extra_prompt: &str,
    supports: Option<&ModelSupports>,
) -> ChatCompletionRequest {
    let model = normalize_model_name(&request.model);
    let claude_model = is_claude(&model);
    let thinking_budget = request
        .thinking
        .as_ref()
        .map(|thinking| thinking.budget_tokens)
        .unwrap_or(0);
    let thinking_enabled = claude_model && thinking_budget > 0;

    let mut messages = Vec::new();

    let mut system = system_text(request.system.as_ref());
    if !extra_prompt.is_empty() {
        if system.is_empty() {
            system = extra_prompt.to_string();
        } else {
            system = format!("{system}\n\n{extra_prompt}");
        }
    }
    if thinking_enabled {
        system.push_str(INTERLEAVED_THINKING_PROTOCOL);
    }
    if !system.is_empty() {
        messages.push(ChatMessage::text(ChatRole::System, system));
    }

    let mut first_user_seen = false;
    for message in &request.messages {
        match message.role {
            Role::User => {
                let add_reminder = thinking_enabled && !first_user_seen;
                messages.extend(translate_user_message(message, add_reminder));
                first_user_seen = true;
            }
            Role::Assistant => {
                messages.push(translate_assistant_message(message, claude_model));
            }
        }
    }

    let max_tokens = if thinking_budget > 0 {
        clamp_thinking_budget(thinking_budget, request.max_tokens, supports)
    } else {
        request.max_tokens
    };

    ChatCompletionRequest {
        model,
        messages,
        stream: request.stream,
        temperature: request.temperature,
        top_p: request.top_p,
        max_tokens: Some(max_tokens),
        stop: request.stop_sequences.clone(),
        tools: translate_tools(&request.tools),
        tool_choice: request.tool_choice.as_ref().map(translate_tool_choice),
    }
}

fn translate_user_message(message: &Message, add_reminder: bool) -> Vec<ChatMessage> {
    let blocks = message.content.to_blocks();

    let mut tool_results = Vec::new();
    let mut rest = Vec::new();
    for block in blocks {
        match block {
            ContentBlock::ToolResult { .. } => tool_results.push(block),
            other => rest.push(other),
        }
    }

    let mut output = Vec::new();
    for block in &tool_results {
        let ContentBlock::ToolResult {
            tool_use_id,
            content,
            ..
        } = block
        else {
            continue;
        };
        output.push(ChatMessage {
            role: ChatRole::Tool,
            content: Some(ChatContent::Text(tool_result_text(content.as_ref()))),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_use_id.clone()),
            reasoning_text: None,
            reasoning_opaque: None,
        });
    }

    if !rest.is_empty() {
        output.push(ChatMessage {
            role: ChatRole::User,
            content: Some(build_user_content(&rest, add_reminder)),
            tool_calls: Vec::new(),
            tool_call_id: None,
            reasoning_text: None,
            reasoning_opaque: None,
        });
    } else if add_reminder && !tool_results.is_empty() {
        // Tool-result-only turn on the first user message: the reminder
        // still has to reach the model.
        output.push(ChatMessage::text(
            ChatRole::User,
            INTERLEAVED_THINKING_REMINDER,
        ));
    }

    output
}

fn build_user_content(blocks: &[ContentBlock], add_reminder: bool) -> ChatContent {
    let has_images = blocks
        .iter()
        .any(|block| matches!(block, ContentBlock::Image { .. }));

    if !has_images {
        let mut parts = Vec::new();
        if add_reminder {
            parts.push(INTERLEAVED_THINKING_REMINDER.to_string());
        }
        for block in blocks {
            if let ContentBlock::Text { text } = block {
                if !text.is_empty() {
                    parts.push(text.clone());
                }
            }
        }
        return ChatContent::Text(parts.join("\n"));
    }

    let mut parts = Vec::new();
    if add_reminder {
        parts.push(ChatContentPart::Text {
            text: INTERLEAVED_THINKING_REMINDER.to_string(),
        });
    }
    for block in blocks {
        match block {
            ContentBlock::Text { text } => parts.push(ChatContentPart::Text { text: text.clone() }),
            ContentBlock::Image { source } => parts.push(ChatContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: format!("data:{};base64,{}", source.media_type, source.data),
                },
            }),
            _ => {}
        }
    }
    ChatContent::Parts(parts)
}

fn translate_assistant_message(message: &Message, claude_model: bool) -> ChatMessage {
    let mut text_parts = Vec::new();
    let mut tool_calls = Vec::new();
    let mut reasoning_text = None;
    let mut reasoning_opaque = None;

    for block in message.content.to_blocks() {
        match block {
            ContentBlock::Text { text } => text_parts.push(text),
            ContentBlock::ToolUse { id, name, input } => {
                let arguments =
                    serde_json::to_string(&input).unwrap_or_else(|_| "{}".to_string());
                tool_calls.push(ChatToolCall {
                    id,
                    call_type: "function".to_string(),
                    function: ToolCallFunction { name, arguments },
                });
            }
            ContentBlock::Thinking {
                thinking,
                signature,
            } => {
                if claude_model {
                    // Placeholder blocks and Responses-API reasoning identities
                    // must not round-trip through this backend.
                    if thinking.is_empty() || thinking == "Thinking..." {
                        continue;
                    }
                    if signature.contains('@') {
                        continue;
                    }
                }
                if !thinking.is_empty() {
                    reasoning_text = Some(thinking);
                }
                if !signature.is_empty() {
                    reasoning_opaque = Some(signature);
                }
            }
            _ => {}
        }
    }

    ChatMessage {
        role: ChatRole::Assistant,
        content: if text_parts.is_empty() {
            None
        } else {
            Some(ChatContent::Text(text_parts.concat()))
        },
        tool_calls,
        tool_call_id: None,
        reasoning_text,
        reasoning_opaque,
    }
}

fn translate_tools(tools: &[ToolDefinition]) -> Vec<ChatTool> {
    tools
        .iter()
        .map(|tool| ChatTool {
            tool_type: "function".to_string(),
            function: ChatFunction {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: tool.input_schema.clone(),
            },
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

/// Clamp the thinking budget into the model's supported range: the floor is
/// at least 1024 and the ceiling never reaches max_tokens.
fn clamp_thinking_budget(budget: u32, max_tokens: u32, supports: Option<&ModelSupports>) -> u32 {
    let mut floor = 1024;
    let mut ceiling = max_tokens.saturating_sub(1);

    if let Some(supports) = supports {
        if supports.min_thinking_budget > 0 {
            floor = floor.max(supports.min_thinking_budget);
        }
        if supports.max_thinking_budget > 0 {
            ceiling = ceiling.min(supports.max_thinking_budget);
        }
    }

    // Floor first, ceiling last: the ceiling wins if the range is inverted.
    budget.max(floor).min(ceiling)
}

#[cfg(test)]
mod tests {
    use super::*;
    use copgate_protocol::claude::{
        ImageSource, MessageContent, Metadata, SystemPrompt, ThinkingConfig, ToolResultContent,
    };

    fn base_request(model: &str) -> MessagesRequest {
        MessagesRequest {
            model: model.to_string(),
            messages: Vec::new(),
            max_tokens: 8192,
            system: None,
            tools: Vec::new(),
            tool_choice: None,
            stream: false,
            temperature: None,
            top_p: None,
            top_k: None,
            stop_sequences: Vec::new(),
            thinking: None,
            metadata: Some(Metadata { user_id: None }),
        }
    }

    #[test]
    fn system_prompt_gains_protocol_for_claude_thinking() {
        let mut req = base_request("claude-sonnet-4-20250514");
        req.system = Some(SystemPrompt::Text("Be brief.".to_string()));
        req.thinking = Some(ThinkingConfig {
            thinking_type: "enabled".to_string(),
            budget_tokens: 2048,
        });

        let out = translate_request(&req, "", None);
        let ChatContent::Text(system) = out.messages[0].content.clone().unwrap() else {
            panic!("system content should be text");
        };
        assert!(system.starts_with("Be brief."));
        assert!(system.contains("interleaved_thinking_protocol"));
        assert_eq!(out.model, "claude-sonnet-4");
    }

    #[test]
    fn tool_results_become_tool_role_messages() {
        let mut req = base_request("gpt-5-mini");
        req.messages.push(Message {
            role: Role::User,
            content: MessageContent::Blocks(vec![
                ContentBlock::ToolResult {
                    tool_use_id: "t1".to_string(),
                    content: Some(ToolResultContent::Text("42".to_string())),
                    is_error: None,
                },
                ContentBlock::Text {
                    text: "next step".to_string(),
                },
            ]),
        });

        let out = translate_request(&req, "", None);
        assert_eq!(out.messages.len(), 2);
        assert_eq!(out.messages[0].role, ChatRole::Tool);
        assert_eq!(out.messages[0].tool_call_id.as_deref(), Some("t1"));
        assert_eq!(out.messages[1].role, ChatRole::User);
    }

    #[test]
    fn first_user_message_gets_thinking_reminder() {
        let mut req = base_request("claude-opus-4-20250514");
        req.thinking = Some(ThinkingConfig {
            thinking_type: "enabled".to_string(),
            budget_tokens: 2048,
        });
        req.messages.push(Message {
            role: Role::User,
            content: MessageContent::Text("hello".to_string()),
        });
        req.messages.push(Message {
            role: Role::User,
            content: MessageContent::Text("again".to_string()),
        });

        let out = translate_request(&req, "", None);
        let ChatContent::Text(first) = out.messages[1].content.clone().unwrap() else {
            panic!()
        };
        assert!(first.starts_with("<system-reminder>"));
        let ChatContent::Text(second) = out.messages[2].content.clone().unwrap() else {
            panic!()
        };
        assert_eq!(second, "again");
    }

    #[test]
    fn images_switch_content_to_parts() {
        let mut req = base_request("gpt-5-mini");
        req.messages.push(Message {
            role: Role::User,
            content: MessageContent::Blocks(vec![
                ContentBlock::Text {
                    text: "what is this".to_string(),
                },
                ContentBlock::Image {
                    source: ImageSource {
                        source_type: "base64".to_string(),
                        media_type: "image/png".to_string(),
                        data: "AAAA".to_string(),
                    },
                },
            ]),
        });

        let out = translate_request(&req, "", None);
        let ChatContent::Parts(parts) = out.messages[0].content.clone().unwrap() else {
            panic!("expected parts")
        };
        assert_eq!(parts.len(), 2);
        assert_eq!(
            parts[1],
            ChatContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: "data:image/png;base64,AAAA".to_string()
                }
            }
        );
    }

    #[test]
    fn assistant_thinking_with_responses_signature_is_dropped() {
        let mut req = base_request("claude-sonnet-4");
        req.messages.push(Message {
            role: Role::Assistant,
            content: MessageContent::Blocks(vec![
                ContentBlock::Thinking {
                    thinking: "reasoned".to_string(),
                    signature: "E@r1".to_string(),
                },
                ContentBlock::Text {
                    text: "answer".to_string(),
                },
            ]),
        });

        let out = translate_request(&req, "", None);
        let assistant = &out.messages[0];
        assert!(assistant.reasoning_text.is_none());
        assert!(assistant.reasoning_opaque.is_none());
    }

    #[test]
    fn valid_thinking_promotes_to_reasoning_fields() {
        let mut req = base_request("claude-sonnet-4");
        req.messages.push(Message {
            role: Role::Assistant,
            content: MessageContent::Blocks(vec![ContentBlock::Thinking {
                thinking: "step one".to_string(),
                signature: "SIG".to_string(),
            }]),
        });

        let out = translate_request(&req, "", None);
        assert_eq!(out.messages[0].reasoning_text.as_deref(), Some("step one"));
        assert_eq!(out.messages[0].reasoning_opaque.as_deref(), Some("SIG"));
    }

    #[test]
    fn thinking_budget_clamps_into_model_bounds() {
        let supports = ModelSupports {
            min_thinking_budget: 2048,
            max_thinking_budget: 6000,
            ..Default::default()
        };
        assert_eq!(clamp_thinking_budget(100, 8192, Some(&supports)), 2048);
        assert_eq!(clamp_thinking_budget(9000, 8192, Some(&supports)), 6000);
        assert_eq!(clamp_thinking_budget(100, 8192, None), 1024);
        assert_eq!(clamp_thinking_budget(9000, 8192, None), 8191);
    }

    #[test]
    fn tool_choice_mapping() {
        assert_eq!(
            translate_tool_choice(&ToolChoice::Any {
                disable_parallel_tool_use: None
            }),
            ChatToolChoice::Mode("required".to_string())
        );
        assert_eq!(
            translate_tool_choice(&ToolChoice::Tool {
                name: "Bash".to_string(),
                disable_parallel_tool_use: None
            }),
            ChatToolChoice::Named(NamedToolChoice {
                choice_type: "function".to_string(),
                function: NamedFunction {
                    name: "Bash".to_string()
                }
            })
        );
    }
}
