//! Authenticated requests to the Copilot backend with the VS Code Copilot
//! Chat impersonation header set.

use bytes::Bytes;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

pub const GITHUB_CLIENT_ID: &str = "Iv1.b507a08c87ecfe98";
pub const GITHUB_SCOPE: &str = "read:user";
pub const COPILOT_CHAT_VERSION: &str = "0.37.6";
pub const GITHUB_API_VERSION: &str = "2025-10-01";
pub const FALLBACK_VSCODE_VERSION: &str = "1.109.3";

/// Per-request additions on top of the fixed impersonation set.
#[derive(Debug, Clone, Default)]
pub struct RequestHints {
    pub is_agent: bool,
    pub vision: bool,
    /// Filtered `anthropic-beta` value for native Messages forwarding.
    pub beta_header: Option<String>,
}

pub fn apply_copilot_headers(
    builder: wreq::RequestBuilder,
    copilot_token: &str,
    vscode_version: &str,
) -> wreq::RequestBuilder {
    builder
        .header("Authorization", format!("Bearer {copilot_token}"))
        .header("Content-Type", "application/json")
        .header("Copilot-Integration-Id", "vscode-chat")
        .header("Editor-Version", format!("vscode/{vscode_version}"))
        .header(
            "Editor-Plugin-Version",
            format!("copilot-chat/{COPILOT_CHAT_VERSION}"),
        )
        .header("User-Agent", format!("GitHubCopilotChat/{COPILOT_CHAT_VERSION}"))
        .header("Openai-Intent", "conversation-agent")
        .header("X-Github-Api-Version", GITHUB_API_VERSION)
        .header("X-Request-Id", Uuid::new_v4().to_string())
        .header("X-Vscode-User-Agent-Library-Version", "electron-fetch")
}

pub fn apply_github_headers(
    builder: wreq::RequestBuilder,
    github_token: &str,
    vscode_version: &str,
) -> wreq::RequestBuilder {
    builder
        .header("Authorization", format!("token {github_token}"))
        .header("Accept", "application/json")
        .header("Content-Type", "application/json")
        .header("Editor-Version", format!("vscode/{vscode_version}"))
        .header(
            "Editor-Plugin-Version",
            format!("copilot-chat/{COPILOT_CHAT_VERSION}"),
        )
        .header("User-Agent", format!("GitHubCopilotChat/{COPILOT_CHAT_VERSION}"))
        .header("X-Github-Api-Version", GITHUB_API_VERSION)
        .header("X-Vscode-User-Agent-Library-Version", "electron-fetch")
}

/// POST a JSON body to a Copilot endpoint. Non-2xx responses are read and
/// re-encoded into an `ApiError` carrying the original status.
pub async fn post_copilot(
    state: &AppState,
    path: &str,
    body: Bytes,
    hints: &RequestHints,
) -> Result<wreq::Response, ApiError> {
    let mut builder = apply_copilot_headers(
        state.http.post(state.copilot_url(path)),
        &state.copilot_token(),
        &state.vscode_version,
    );

    builder = builder.header(
        "X-Initiator",
        if hints.is_agent { "agent" } else { "user" },
    );
    if hints.vision {
        builder = builder.header("Copilot-Vision-Request", "true");
    }
    if let Some(beta) = hints.beta_header.as_deref().filter(|beta| !beta.is_empty()) {
        builder = builder.header("Anthropic-Beta", beta);
    }

    let response = builder
        .body(body)
        .send()
        .await
        .map_err(ApiError::transport)?;

    let status = response.status().as_u16();
    if !(200..300).contains(&status) {
        let body = response.bytes().await.unwrap_or_default();
        return Err(ApiError::from_upstream(status, &body));
    }
    Ok(response)
}

/// GET a Copilot endpoint (models, usage-adjacent lookups).
pub async fn get_copilot(state: &AppState, path: &str) -> Result<wreq::Response, ApiError> {
    let response = apply_copilot_headers(
        state.http.get(state.copilot_url(path)),
        &state.copilot_token(),
        &state.vscode_version,
    )
    .send()
    .await
    .map_err(ApiError::transport)?;

    let status = response.status().as_u16();
    if !(200..300).contains(&status) {
        let body = response.bytes().await.unwrap_or_default();
        return Err(ApiError::from_upstream(status, &body));
    }
    Ok(response)
}

/// GET a github.com endpoint with the GitHub (PAT) header set.
pub async fn get_github(state: &AppState, url: &str) -> Result<wreq::Response, ApiError> {
    let response = apply_github_headers(
        state.http.get(url),
        &state.github_token(),
        &state.vscode_version,
    )
    .send()
    .await
    .map_err(ApiError::transport)?;

    let status = response.status().as_u16();
    if !(200..300).contains(&status) {
        let body = response.bytes().await.unwrap_or_default();
        return Err(ApiError::from_upstream(status, &body));
    }
    Ok(response)
}
