//! OpenAI Responses dialect: polymorphic input items, output items, and the
//! `response.*` SSE event payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::chat::ChatToolChoice;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesPayload {
    pub model: String,
    pub input: Vec<InputItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    pub max_output_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ReasoningConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_tool_calls: Option<bool>,
    #[serde(default)]
    pub stream: bool,
    /// Always serialized; the proxy forces this to null upstream.
    pub service_tier: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ResponsesTool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ChatToolChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safety_identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_cache_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningConfig {
    pub effort: String,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesTool {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputItem {
    Message {
        role: String,
        content: InputMessageContent,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        phase: Option<String>,
    },
    FunctionCall {
        call_id: String,
        name: String,
        arguments: String,
    },
    FunctionCallOutput {
        call_id: String,
        output: FunctionOutput,
        status: String,
    },
    Reasoning {
        id: String,
        encrypted_content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        summary: Vec<SummaryItem>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputMessageContent {
    Text(String),
    Parts(Vec<InputPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputPart {
    InputText { text: String },
    InputImage { url: String, detail: String },
    OutputText { text: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FunctionOutput {
    Text(String),
    Parts(Vec<InputPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryItem {
    #[serde(rename = "type")]
    pub item_type: String,
    pub text: String,
}

impl SummaryItem {
    pub fn summary_text(text: impl Into<String>) -> Self {
        Self {
            item_type: "summary_text".to_string(),
            text: text.into(),
        }
    }
}

// --- results ---

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponsesResult {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub output: Vec<OutputItem>,
    #[serde(default)]
    pub output_text: Option<String>,
    #[serde(default)]
    pub usage: Option<ResponsesUsage>,
    #[serde(default)]
    pub incomplete_details: Option<IncompleteDetails>,
}

/// Output items the translator understands; anything else is carried opaquely.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OutputItem {
    Known(OutputItemKnown),
    Unknown(JsonValue),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputItemKnown {
    Reasoning {
        #[serde(default)]
        id: String,
        #[serde(default)]
        encrypted_content: String,
        #[serde(default)]
        summary: Vec<SummaryText>,
    },
    FunctionCall {
        #[serde(default)]
        call_id: String,
        #[serde(default)]
        name: String,
        #[serde(default)]
        arguments: String,
    },
    Message {
        #[serde(default)]
        content: Vec<OutputContent>,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SummaryText {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputContent {
    #[serde(rename = "type", default)]
    pub content_type: String,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ResponsesUsage {
    #[serde(default)]
    pub input_tokens: i64,
    #[serde(default)]
    pub output_tokens: i64,
    #[serde(default)]
    pub input_tokens_details: Option<InputTokensDetails>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct InputTokensDetails {
    #[serde(default)]
    pub cached_tokens: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IncompleteDetails {
    #[serde(default)]
    pub reason: String,
}

// --- stream event payloads ---

#[derive(Debug, Clone, Deserialize)]
pub struct CreatedEvent {
    pub response: CreatedResponse,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreatedResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub usage: Option<ResponsesUsage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputItemEvent {
    #[serde(default)]
    pub output_index: i64,
    #[serde(default)]
    pub item: JsonValue,
}

/// Shallow view of an output item, enough to route `output_item.added`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemHeader {
    #[serde(rename = "type", default)]
    pub item_type: String,
    #[serde(default)]
    pub call_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SummaryTextDeltaEvent {
    #[serde(default)]
    pub output_index: i64,
    #[serde(default)]
    pub delta: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SummaryTextDoneEvent {
    #[serde(default)]
    pub output_index: i64,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputTextDeltaEvent {
    #[serde(default)]
    pub output_index: i64,
    #[serde(default)]
    pub content_index: i64,
    #[serde(default)]
    pub delta: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputTextDoneEvent {
    #[serde(default)]
    pub output_index: i64,
    #[serde(default)]
    pub content_index: i64,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FunctionArgumentsDeltaEvent {
    #[serde(default)]
    pub output_index: i64,
    #[serde(default)]
    pub delta: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FunctionArgumentsDoneEvent {
    #[serde(default)]
    pub output_index: i64,
    #[serde(default)]
    pub arguments: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompletedEvent {
    #[serde(default)]
    pub response: JsonValue,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FailedEvent {
    #[serde(default)]
    pub response: FailedResponse,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FailedResponse {
    #[serde(default)]
    pub error: FailedError,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FailedError {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamErrorEvent {
    #[serde(default)]
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_items_tag_on_type() {
        let item = InputItem::FunctionCallOutput {
            call_id: "c1".to_string(),
            output: FunctionOutput::Text("ok".to_string()),
            status: "completed".to_string(),
        };
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["type"], "function_call_output");
        assert_eq!(value["output"], "ok");
    }

    #[test]
    fn unknown_output_items_are_tolerated() {
        let result: ResponsesResult = serde_json::from_str(
            r#"{"status":"completed","output":[{"type":"web_search_call","id":"w1"}]}"#,
        )
        .unwrap();
        assert!(matches!(result.output[0], OutputItem::Unknown(_)));
    }

    #[test]
    fn reasoning_summary_omitted_when_empty() {
        let item = InputItem::Reasoning {
            id: "r1".to_string(),
            encrypted_content: "E".to_string(),
            summary: Vec::new(),
        };
        let value = serde_json::to_value(&item).unwrap();
        assert!(value.get("summary").is_none());
    }
}
