//! `config.json` under the app dir: inbound API keys, per-model extra
//! prompts and reasoning efforts, and quota-optimization toggles.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::paths;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub auth: AuthConfig,
    pub extra_prompts: BTreeMap<String, String>,
    pub small_model: String,
    pub model_reasoning_efforts: BTreeMap<String, String>,
    pub use_function_apply_patch: bool,
    pub compact_use_small_model: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthConfig {
    pub api_keys: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            auth: AuthConfig::default(),
            extra_prompts: BTreeMap::new(),
            small_model: "gpt-5-mini".to_string(),
            model_reasoning_efforts: BTreeMap::from([(
                "gpt-5-mini".to_string(),
                "low".to_string(),
            )]),
            use_function_apply_patch: true,
            compact_use_small_model: true,
        }
    }
}

const PARALLEL_TOOLS_PROMPT: &str = "When exploring a codebase or searching for information, batch your tool calls for efficiency. Use multi_tool_use.parallel to run multiple tool calls simultaneously when they are independent of each other.";

const CODEX_CHANNELS_PROMPT: &str = r#"You have two channels for communication:
1. "commentary" channel: Use this for thinking out loud, explaining your approach, and providing updates to the user. These messages are shown to the user in real-time.
2. "final" channel: Use this for the final, polished response or code output.

Guidelines:
- Provide frequent updates via commentary so the user knows what you're doing
- Match the user's tone and personality in your commentary
- Use the final channel only when you have a complete, ready-to-use response"#;

fn default_extra_prompts() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("gpt-5-mini".to_string(), PARALLEL_TOOLS_PROMPT.to_string()),
        (
            "gpt-5.1-codex-max".to_string(),
            PARALLEL_TOOLS_PROMPT.to_string(),
        ),
        (
            "gpt-5.3-codex".to_string(),
            CODEX_CHANNELS_PROMPT.to_string(),
        ),
    ])
}

impl Config {
    /// Load from disk, creating the default file when missing and falling
    /// back to defaults on parse failure.
    pub fn load() -> io::Result<Self> {
        let path = paths::config_path();
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> io::Result<Self> {
        match fs::read(path) {
            Ok(data) => match serde_json::from_slice::<Config>(&data) {
                Ok(config) => Ok(config),
                Err(err) => {
                    tracing::warn!(error = %err, "failed to parse config, using defaults");
                    Ok(Config::default())
                }
            },
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                let config = Config::default();
                config.save_to(path)?;
                tracing::info!(path = %path.display(), "created default config");
                Ok(config)
            }
            Err(err) => Err(err),
        }
    }

    /// Merge the built-in per-model prompts without overwriting user entries,
    /// persisting back on change.
    pub fn merge_default_prompts(&mut self, path: &Path) -> io::Result<()> {
        let mut changed = false;
        for (model, prompt) in default_extra_prompts() {
            if !self.extra_prompts.contains_key(&model) {
                self.extra_prompts.insert(model, prompt);
                changed = true;
            }
        }
        if changed {
            self.save_to(path)?;
            tracing::info!("merged default extra prompts into config");
        }
        Ok(())
    }

    pub fn save_to(&self, path: &Path) -> io::Result<()> {
        let data = serde_json::to_vec_pretty(self)?;
        fs::write(path, data)?;
        paths::set_mode(path, 0o600)
    }

    pub fn extra_prompt(&self, model: &str) -> String {
        self.extra_prompts.get(model).cloned().unwrap_or_default()
    }

    /// Configured reasoning effort for a model, defaulting to `high`.
    pub fn reasoning_effort(&self, model: &str) -> String {
        self.model_reasoning_efforts
            .get(model)
            .cloned()
            .unwrap_or_else(|| "high".to_string())
    }

    /// Trimmed, deduplicated API keys; empty set disables the check.
    pub fn api_keys(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.auth
            .api_keys
            .iter()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty() && seen.insert(key.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.small_model, "gpt-5-mini");
        assert!(config.use_function_apply_patch);
        assert!(config.compact_use_small_model);
        assert_eq!(config.reasoning_effort("gpt-5-mini"), "low");
        assert_eq!(config.reasoning_effort("unlisted"), "high");
    }

    #[test]
    fn api_keys_are_normalized() {
        let config = Config {
            auth: AuthConfig {
                api_keys: vec![
                    " key-a ".to_string(),
                    "key-a".to_string(),
                    "".to_string(),
                    "key-b".to_string(),
                ],
            },
            ..Default::default()
        };
        assert_eq!(config.api_keys(), vec!["key-a", "key-b"]);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let config: Config = serde_json::from_str(r#"{"smallModel":"gpt-4.1-mini"}"#).unwrap();
        assert_eq!(config.small_model, "gpt-4.1-mini");
        assert!(config.compact_use_small_model);
    }
}
