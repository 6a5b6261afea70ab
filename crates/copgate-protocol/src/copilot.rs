//! Copilot catalog and token shapes: the `/models` descriptor list and the
//! GitHub / Copilot token exchange responses.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelsResponse {
    #[serde(default)]
    pub data: Vec<ModelDescriptor>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub owned_by: String,
    #[serde(default)]
    pub capabilities: ModelCapabilities,
    #[serde(default)]
    pub supported_endpoints: Vec<String>,
}

impl ModelDescriptor {
    /// Whether the descriptor advertises Copilot's native Messages endpoint.
    pub fn supports_messages(&self) -> bool {
        self.supported_endpoints
            .iter()
            .any(|endpoint| endpoint.contains("/v1/messages"))
    }

    pub fn supports_responses(&self) -> bool {
        self.supported_endpoints
            .iter()
            .any(|endpoint| endpoint == "/responses")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelCapabilities {
    #[serde(default)]
    pub family: String,
    #[serde(default)]
    pub tokenizer: String,
    #[serde(default)]
    pub limits: ModelLimits,
    #[serde(default)]
    pub supports: ModelSupports,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ModelLimits {
    #[serde(default)]
    pub max_context_window_tokens: u32,
    #[serde(default)]
    pub max_output_tokens: u32,
    #[serde(default)]
    pub max_prompt_tokens: u32,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ModelSupports {
    #[serde(default)]
    pub streaming: bool,
    #[serde(default)]
    pub tool_calls: bool,
    #[serde(default)]
    pub parallel_tool_calls: bool,
    #[serde(default)]
    pub vision: bool,
    #[serde(default)]
    pub structured_outputs: bool,
    #[serde(default)]
    pub adaptive_thinking: bool,
    #[serde(default)]
    pub min_thinking_budget: u32,
    #[serde(default)]
    pub max_thinking_budget: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceCodeResponse {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    #[serde(default)]
    pub expires_in: u64,
    #[serde(default)]
    pub interval: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccessTokenResponse {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub error: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CopilotTokenResponse {
    pub token: String,
    #[serde(default)]
    pub expires_at: i64,
    #[serde(default)]
    pub refresh_in: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_support_checks() {
        let descriptor: ModelDescriptor = serde_json::from_str(
            r#"{"id":"claude-sonnet-4.5","supported_endpoints":["/v1/messages","/chat/completions"]}"#,
        )
        .unwrap();
        assert!(descriptor.supports_messages());
        assert!(!descriptor.supports_responses());
    }

    #[test]
    fn descriptor_tolerates_missing_capabilities() {
        let descriptor: ModelDescriptor = serde_json::from_str(r#"{"id":"gpt-5-mini"}"#).unwrap();
        assert_eq!(descriptor.capabilities.supports.min_thinking_budget, 0);
    }
}
