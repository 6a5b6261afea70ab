//! Heuristic token estimation for `/v1/messages/count_tokens`.
//!
//! Counts are chars/4 approximations with fixed per-message and per-tool
//! overheads; the overhead constants are tunables, not derived from any
//! published tokenizer.

use copgate_protocol::chat::{ChatCompletionRequest, ChatContent, ChatContentPart};
use copgate_protocol::claude::ToolDefinition;

use crate::normalize::is_claude;

const MESSAGE_OVERHEAD: i64 = 4;
const TOOL_CALL_OVERHEAD: i64 = 3;
const TOOL_DEFINITION_OVERHEAD: i64 = 5;
const CLAUDE_TOOL_SYSTEM_PROMPT: i64 = 346;
const GROK_TOOL_SYSTEM_PROMPT: i64 = 120;
const IMAGE_TOKENS: i64 = 85;
const CLAUDE_INFLATION: f64 = 1.15;

/// Estimate the input token count for a translated Chat Completions request.
/// `anthropic_tools` and `anthropic_beta` come from the original request and
/// gate the tool-system-prompt overhead.
pub fn estimate_tokens(
    request: &ChatCompletionRequest,
    model_id: &str,
    anthropic_tools: &[ToolDefinition],
    anthropic_beta: &str,
) -> i64 {
    let mut total = 0;

    for message in &request.messages {
        total += MESSAGE_OVERHEAD;
        total += content_tokens(message.content.as_ref());

        if let Some(tool_call_id) = &message.tool_call_id {
            total += string_tokens(tool_call_id);
        }
        for call in &message.tool_calls {
            total += string_tokens(&call.function.name);
            total += string_tokens(&call.function.arguments);
            total += TOOL_CALL_OVERHEAD;
        }
        if let Some(reasoning) = &message.reasoning_text {
            total += string_tokens(reasoning);
        }
    }

    if !request.tools.is_empty() {
        for tool in &request.tools {
            total += string_tokens(&tool.function.name);
            if let Some(description) = &tool.function.description {
                total += string_tokens(description);
            }
            if let Some(parameters) = &tool.function.parameters {
                if let Ok(encoded) = serde_json::to_string(parameters) {
                    total += string_tokens(&encoded);
                }
            }
            total += TOOL_DEFINITION_OVERHEAD;
        }

        if is_claude(model_id) {
            if !anthropic_beta.is_empty() && !is_tool_only(anthropic_tools) {
                total += CLAUDE_TOOL_SYSTEM_PROMPT;
            }
        } else if model_id.to_ascii_lowercase().contains("grok") {
            total += GROK_TOOL_SYSTEM_PROMPT;
        }
    }

    for message in &request.messages {
        total += image_tokens(message.content.as_ref());
    }

    if is_claude(model_id) {
        total = (total as f64 * CLAUDE_INFLATION).round() as i64;
    }

    total.max(1)
}

fn content_tokens(content: Option<&ChatContent>) -> i64 {
    match content {
        Some(ChatContent::Text(text)) => string_tokens(text),
        Some(ChatContent::Parts(parts)) => parts
            .iter()
            .map(|part| match part {
                ChatContentPart::Text { text } => string_tokens(text),
                ChatContentPart::ImageUrl { .. } => 0,
            })
            .sum(),
        None => 0,
    }
}

fn image_tokens(content: Option<&ChatContent>) -> i64 {
    match content {
        Some(ChatContent::Parts(parts)) => parts
            .iter()
            .filter(|part| matches!(part, ChatContentPart::ImageUrl { .. }))
            .count() as i64
            * IMAGE_TOKENS,
        _ => 0,
    }
}

fn string_tokens(text: &str) -> i64 {
    if text.is_empty() {
        return 0;
    }
    ((text.len() + 3) / 4) as i64
}

/// The standard tool system prompt is skipped when the tool list is a single
/// `Skill` tool or consists entirely of MCP tools.
fn is_tool_only(tools: &[ToolDefinition]) -> bool {
    if tools.is_empty() {
        return false;
    }
    if tools.len() == 1 && tools[0].name == "Skill" {
        return true;
    }
    tools.iter().all(|tool| tool.name.starts_with("mcp__"))
}
