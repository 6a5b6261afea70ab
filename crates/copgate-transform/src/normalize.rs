//! Pre-routing request normalization: quota rerouting, tool-result merging,
//! sub-agent detection, and the small helpers shared by every backend path.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use copgate_protocol::claude::{
    ContentBlock, Message, MessageContent, MessagesRequest, Role, SystemPrompt, ToolResultContent,
};

const COMPACT_PREFIX: &str =
    "You are a helpful AI assistant tasked with summarizing conversations";

const SUBAGENT_PREFIX: &str = "__SUBAGENT_MARKER__";

static SYSTEM_REMINDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<system-reminder>(.*?)</system-reminder>").unwrap());

/// Knobs the normalizer needs from the runtime configuration.
#[derive(Debug, Clone)]
pub struct RerouteOptions {
    pub small_model: String,
    pub compact_use_small_model: bool,
}

/// Reduce `system` (string or block array) to one newline-joined string.
pub fn system_text(system: Option<&SystemPrompt>) -> String {
    match system {
        Some(SystemPrompt::Text(text)) => text.clone(),
        Some(SystemPrompt::Blocks(blocks)) => blocks
            .iter()
            .filter(|block| !block.text.is_empty())
            .map(|block| block.text.clone())
            .collect::<Vec<_>>()
            .join("\n"),
        None => String::new(),
    }
}

/// A conversation-summarization call issued by a coding agent, detected by
/// its fixed system-prompt prefix.
pub fn is_compact(request: &MessagesRequest) -> bool {
    system_text(request.system.as_ref()).starts_with(COMPACT_PREFIX)
}

/// A capability probe: carries an `anthropic-beta` header but no tools.
pub fn is_warmup(request: &MessagesRequest, beta_header: &str) -> bool {
    !beta_header.is_empty() && request.tools.is_empty()
}

/// Reroute compact and warm-up requests to the configured small model.
/// Returns true when the model was replaced.
pub fn apply_small_model(
    request: &mut MessagesRequest,
    beta_header: &str,
    options: &RerouteOptions,
) -> bool {
    let compact = is_compact(request);

    if options.compact_use_small_model && compact {
        request.model = options.small_model.clone();
        return true;
    }

    if is_warmup(request, beta_header) && !compact {
        request.model = options.small_model.clone();
        return true;
    }

    false
}

/// Merge stray text blocks into their sibling tool_result blocks so the
/// upstream does not bill the turn as user-initiated. Skipped for compact
/// requests and for messages carrying any other block kind.
pub fn merge_tool_result_blocks(request: &mut MessagesRequest) {
    if is_compact(request) {
        return;
    }

    for message in &mut request.messages {
        if message.role != Role::User {
            continue;
        }

        let mut blocks = message.content.to_blocks();

        let mut tool_results = Vec::new();
        let mut texts = Vec::new();
        let mut mergeable = true;
        for (position, block) in blocks.iter().enumerate() {
            match block {
                ContentBlock::ToolResult { .. } => tool_results.push(position),
                ContentBlock::Text { .. } => texts.push(position),
                _ => mergeable = false,
            }
        }

        if !mergeable || tool_results.is_empty() || texts.is_empty() {
            continue;
        }

        if tool_results.len() == texts.len() {
            for (result_pos, text_pos) in tool_results.iter().zip(texts.iter()) {
                let text = block_text(&blocks[*text_pos]);
                merge_text_into_tool_result(&mut blocks[*result_pos], text);
            }
        } else {
            let combined = texts
                .iter()
                .map(|position| block_text(&blocks[*position]))
                .filter(|text| !text.is_empty())
                .collect::<Vec<_>>()
                .join("\n");
            if !combined.is_empty() {
                let last = *tool_results.last().unwrap();
                merge_text_into_tool_result(&mut blocks[last], combined);
            }
        }

        let filtered: Vec<ContentBlock> = blocks
            .into_iter()
            .filter(|block| !matches!(block, ContentBlock::Text { .. }))
            .collect();
        if !filtered.is_empty() {
            message.content = MessageContent::Blocks(filtered);
        }
    }
}

fn block_text(block: &ContentBlock) -> String {
    match block {
        ContentBlock::Text { text } => text.clone(),
        _ => String::new(),
    }
}

fn merge_text_into_tool_result(block: &mut ContentBlock, text: String) {
    let ContentBlock::ToolResult { content, .. } = block else {
        return;
    };

    match content {
        None => *content = Some(ToolResultContent::Text(text)),
        Some(ToolResultContent::Blocks(blocks)) => {
            blocks.push(ContentBlock::Text { text });
        }
        Some(ToolResultContent::Text(existing)) => {
            let merged = if existing.is_empty() {
                text
            } else {
                format!("{existing}\n\n{text}")
            };
            *content = Some(ToolResultContent::Text(merged));
        }
    }
}

/// Flatten a tool_result's content to plain text, joining block texts with
/// newlines.
pub fn tool_result_text(content: Option<&ToolResultContent>) -> String {
    match content {
        Some(ToolResultContent::Text(text)) => text.clone(),
        Some(ToolResultContent::Blocks(blocks)) => blocks
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } if !text.is_empty() => Some(text.clone()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
        None => String::new(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SubagentInfo {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub agent_type: String,
}

/// Scan only the first user message for a `<system-reminder>` region whose
/// trimmed content starts with the sub-agent marker, then parse the JSON
/// remainder. All three fields must be non-empty.
pub fn detect_subagent_marker(messages: &[Message]) -> Option<SubagentInfo> {
    let first_user = messages.iter().find(|message| message.role == Role::User)?;

    for block in first_user.content.to_blocks() {
        let ContentBlock::Text { text } = block else {
            continue;
        };
        if text.is_empty() {
            continue;
        }

        for capture in SYSTEM_REMINDER_RE.captures_iter(&text) {
            let inner = capture[1].trim();
            let Some(rest) = inner.strip_prefix(SUBAGENT_PREFIX) else {
                continue;
            };
            let Ok(info) = serde_json::from_str::<SubagentInfo>(rest.trim()) else {
                continue;
            };
            if !info.session_id.is_empty()
                && !info.agent_id.is_empty()
                && !info.agent_type.is_empty()
            {
                return Some(info);
            }
        }
    }

    None
}

/// Agent-initiated when the last message is not from the user, or is a user
/// message consisting solely of tool results.
pub fn is_initiator_agent(messages: &[Message]) -> bool {
    let Some(last) = messages.last() else {
        return false;
    };
    if last.role != Role::User {
        return true;
    }
    last.content
        .to_blocks()
        .iter()
        .all(|block| matches!(block, ContentBlock::ToolResult { .. }))
}

pub fn has_vision(messages: &[Message]) -> bool {
    messages.iter().any(|message| {
        message
            .content
            .to_blocks()
            .iter()
            .any(|block| matches!(block, ContentBlock::Image { .. }))
    })
}

pub fn is_claude(model: &str) -> bool {
    model.to_ascii_lowercase().contains("claude")
}

/// Strip date suffixes from Claude model names:
/// `claude-sonnet-4-20250514` becomes `claude-sonnet-4`. Non-Claude names
/// pass through unchanged.
pub fn normalize_model_name(model: &str) -> String {
    if !is_claude(model) {
        return model.to_string();
    }

    if model.starts_with("claude-sonnet-4-") {
        return "claude-sonnet-4".to_string();
    }
    if model.starts_with("claude-opus-4-") {
        return "claude-opus-4".to_string();
    }

    model
        .split('-')
        .filter(|segment| !(segment.len() >= 8 && segment.bytes().all(|b| b.is_ascii_digit())))
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;
    use copgate_protocol::claude::ThinkingConfig;

    fn request(messages: Vec<Message>) -> MessagesRequest {
        MessagesRequest {
            model: "claude-sonnet-4".to_string(),
            messages,
            max_tokens: 4096,
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
        }
    }

    fn user(blocks: Vec<ContentBlock>) -> Message {
        Message {
            role: Role::User,
            content: MessageContent::Blocks(blocks),
        }
    }

    fn text(value: &str) -> ContentBlock {
        ContentBlock::Text {
            text: value.to_string(),
        }
    }

    fn tool_result(id: &str, content: &str) -> ContentBlock {
        ContentBlock::ToolResult {
            tool_use_id: id.to_string(),
            content: Some(ToolResultContent::Text(content.to_string())),
            is_error: None,
        }
    }

    #[test]
    fn compact_detected_in_both_system_shapes() {
        let mut req = request(Vec::new());
        req.system = Some(SystemPrompt::Text(format!("{COMPACT_PREFIX} carefully.")));
        assert!(is_compact(&req));

        req.system = Some(SystemPrompt::Blocks(vec![
            copgate_protocol::claude::SystemBlock {
                block_type: "text".to_string(),
                text: format!("{COMPACT_PREFIX} carefully."),
            },
        ]));
        assert!(is_compact(&req));
    }

    #[test]
    fn warmup_reroutes_to_small_model() {
        let mut req = request(vec![user(vec![text("hi")])]);
        let options = RerouteOptions {
            small_model: "gpt-5-mini".to_string(),
            compact_use_small_model: true,
        };
        assert!(apply_small_model(&mut req, "fake-2024-01-01", &options));
        assert_eq!(req.model, "gpt-5-mini");
    }

    #[test]
    fn no_reroute_without_beta_header() {
        let mut req = request(vec![user(vec![text("hi")])]);
        let options = RerouteOptions {
            small_model: "gpt-5-mini".to_string(),
            compact_use_small_model: true,
        };
        assert!(!apply_small_model(&mut req, "", &options));
        assert_eq!(req.model, "claude-sonnet-4");
    }

    #[test]
    fn pairwise_merge_when_counts_match() {
        // Scenario: [text A, tool_result R1, text B, tool_result R2].
        let mut req = request(vec![user(vec![
            text("A"),
            tool_result("t1", "R1"),
            text("B"),
            tool_result("t2", "R2"),
        ])]);
        merge_tool_result_blocks(&mut req);

        let blocks = req.messages[0].content.to_blocks();
        assert_eq!(blocks.len(), 2);
        assert_eq!(
            blocks[0],
            tool_result("t1", "R1\n\nA"),
        );
        assert_eq!(
            blocks[1],
            tool_result("t2", "R2\n\nB"),
        );
    }

    #[test]
    fn uneven_counts_merge_into_last_tool_result() {
        let mut req = request(vec![user(vec![
            tool_result("t1", "R1"),
            tool_result("t2", "R2"),
            text("only"),
        ])]);
        merge_tool_result_blocks(&mut req);

        let blocks = req.messages[0].content.to_blocks();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0], tool_result("t1", "R1"));
        assert_eq!(blocks[1], tool_result("t2", "R2\n\nonly"));
    }

    #[test]
    fn merge_preserves_array_structured_results() {
        let mut req = request(vec![user(vec![
            ContentBlock::ToolResult {
                tool_use_id: "t1".to_string(),
                content: Some(ToolResultContent::Blocks(vec![text("out")])),
                is_error: None,
            },
            text("extra"),
        ])]);
        merge_tool_result_blocks(&mut req);

        let blocks = req.messages[0].content.to_blocks();
        match &blocks[0] {
            ContentBlock::ToolResult {
                content: Some(ToolResultContent::Blocks(inner)),
                ..
            } => {
                assert_eq!(inner.len(), 2);
                assert_eq!(inner[1], text("extra"));
            }
            other => panic!("unexpected block: {other:?}"),
        }
    }

    #[test]
    fn merge_skipped_for_compact_requests() {
        let mut req = request(vec![user(vec![text("A"), tool_result("t1", "R1")])]);
        req.system = Some(SystemPrompt::Text(COMPACT_PREFIX.to_string()));
        merge_tool_result_blocks(&mut req);
        assert_eq!(req.messages[0].content.to_blocks().len(), 2);
    }

    #[test]
    fn merge_skipped_when_other_block_kinds_present() {
        let mut req = request(vec![user(vec![
            text("A"),
            tool_result("t1", "R1"),
            ContentBlock::Image {
                source: copgate_protocol::claude::ImageSource {
                    source_type: "base64".to_string(),
                    media_type: "image/png".to_string(),
                    data: "xyz".to_string(),
                },
            },
        ])]);
        merge_tool_result_blocks(&mut req);
        assert_eq!(req.messages[0].content.to_blocks().len(), 3);
    }

    #[test]
    fn subagent_marker_requires_all_fields() {
        let marker = |json: &str| {
            vec![user(vec![text(&format!(
                "<system-reminder>__SUBAGENT_MARKER__{json}</system-reminder>"
            ))])]
        };

        let found = detect_subagent_marker(&marker(
            r#"{"session_id":"s1","agent_id":"a1","agent_type":"researcher"}"#,
        ));
        assert_eq!(
            found,
            Some(SubagentInfo {
                session_id: "s1".to_string(),
                agent_id: "a1".to_string(),
                agent_type: "researcher".to_string(),
            })
        );

        assert!(detect_subagent_marker(&marker(r#"{"session_id":"s1","agent_id":"a1"}"#)).is_none());
    }

    #[test]
    fn subagent_marker_only_in_first_user_message() {
        let messages = vec![
            user(vec![text("plain question")]),
            Message {
                role: Role::Assistant,
                content: MessageContent::Text("answer".to_string()),
            },
            user(vec![text(
                r#"<system-reminder>__SUBAGENT_MARKER__{"session_id":"s","agent_id":"a","agent_type":"t"}</system-reminder>"#,
            )]),
        ];
        assert!(detect_subagent_marker(&messages).is_none());
    }

    #[test]
    fn initiator_agent_for_tool_result_only_turn() {
        assert!(is_initiator_agent(&[user(vec![tool_result("t1", "R1")])]));
        assert!(!is_initiator_agent(&[user(vec![text("hello")])]));
        assert!(is_initiator_agent(&[Message {
            role: Role::Assistant,
            content: MessageContent::Text("half-finished".to_string()),
        }]));
    }

    #[test]
    fn model_name_normalization() {
        assert_eq!(normalize_model_name("claude-sonnet-4-20250514"), "claude-sonnet-4");
        assert_eq!(normalize_model_name("claude-opus-4-20250514"), "claude-opus-4");
        assert_eq!(normalize_model_name("claude-3-7-sonnet-20250219"), "claude-3-7-sonnet");
        assert_eq!(normalize_model_name("gpt-5-mini"), "gpt-5-mini");
        assert_eq!(normalize_model_name("o4-mini-20250101"), "o4-mini-20250101");
    }

    #[test]
    fn warmup_needs_empty_tools() {
        let mut req = request(Vec::new());
        req.tools.push(copgate_protocol::claude::ToolDefinition {
            name: "Read".to_string(),
            description: None,
            input_schema: None,
        });
        req.thinking = Some(ThinkingConfig {
            thinking_type: "enabled".to_string(),
            budget_tokens: 1024,
        });
        assert!(!is_warmup(&req, "some-beta"));
    }
}
