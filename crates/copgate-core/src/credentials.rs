//! Device-code login, PAT persistence, and the Copilot bearer refresh loop.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};

use copgate_protocol::copilot::{AccessTokenResponse, CopilotTokenResponse, DeviceCodeResponse};

use crate::paths;
use crate::state::AppState;
use crate::upstream::{self, GITHUB_CLIENT_ID, GITHUB_SCOPE};

const DEVICE_CODE_URL: &str = "https://github.com/login/device/code";
const ACCESS_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const COPILOT_TOKEN_URL: &str = "https://api.github.com/copilot_internal/v2/token";
const GITHUB_USER_URL: &str = "https://api.github.com/user";

pub async fn request_device_code(http: &wreq::Client) -> anyhow::Result<DeviceCodeResponse> {
    let body = format!(
        "client_id={}&scope={}",
        GITHUB_CLIENT_ID,
        urlencode(GITHUB_SCOPE)
    );
    let response = http
        .post(DEVICE_CODE_URL)
        .header("Content-Type", "application/x-www-form-urlencoded")
        .header("Accept", "application/json")
        .body(body)
        .send()
        .await
        .context("requesting device code")?;

    if response.status().as_u16() != 200 {
        bail!(
            "device code request failed with status {}",
            response.status().as_u16()
        );
    }
    response
        .json::<DeviceCodeResponse>()
        .await
        .context("decoding device code response")
}

/// Poll the token endpoint until the user authorizes the device code.
/// `slow_down` extends the interval by 5 seconds; `expired_token` and
/// `access_denied` are terminal.
pub async fn poll_access_token(
    http: &wreq::Client,
    device_code: &str,
    interval: u64,
) -> anyhow::Result<String> {
    let mut poll_interval = Duration::from_secs(interval + 1);

    loop {
        tokio::time::sleep(poll_interval).await;

        let body = format!(
            "client_id={GITHUB_CLIENT_ID}&device_code={device_code}&grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Adevice_code"
        );
        let response = http
            .post(ACCESS_TOKEN_URL)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .header("Accept", "application/json")
            .body(body)
            .send()
            .await
            .context("polling access token")?;

        let result: AccessTokenResponse = response
            .json()
            .await
            .context("decoding access token response")?;

        match result.error.as_str() {
            "" if !result.access_token.is_empty() => return Ok(result.access_token),
            "" | "authorization_pending" => continue,
            "slow_down" => {
                poll_interval += Duration::from_secs(5);
                continue;
            }
            "expired_token" => bail!("device code expired, please try again"),
            "access_denied" => bail!("authorization denied by user"),
            other => bail!("unexpected error: {other}"),
        }
    }
}

pub async fn fetch_copilot_token(
    http: &wreq::Client,
    github_token: &str,
    vscode_version: &str,
) -> anyhow::Result<CopilotTokenResponse> {
    let response =
        upstream::apply_github_headers(http.get(COPILOT_TOKEN_URL), github_token, vscode_version)
            .send()
            .await
            .context("fetching copilot token")?;

    let status = response.status().as_u16();
    if status != 200 {
        let body = response.text().await.unwrap_or_default();
        bail!("copilot token request failed ({status}): {body}");
    }
    response
        .json::<CopilotTokenResponse>()
        .await
        .context("decoding copilot token response")
}

pub async fn fetch_user(
    http: &wreq::Client,
    github_token: &str,
    vscode_version: &str,
) -> anyhow::Result<String> {
    #[derive(serde::Deserialize)]
    struct User {
        login: String,
    }

    let response =
        upstream::apply_github_headers(http.get(GITHUB_USER_URL), github_token, vscode_version)
            .send()
            .await
            .context("fetching user")?;
    if response.status().as_u16() != 200 {
        bail!(
            "user request failed with status {}",
            response.status().as_u16()
        );
    }
    Ok(response.json::<User>().await?.login)
}

pub fn save_token(token: &str) -> std::io::Result<()> {
    let path = paths::token_path();
    std::fs::write(&path, token)?;
    paths::set_mode(&path, 0o600)
}

pub fn load_token() -> Option<String> {
    let token = std::fs::read_to_string(paths::token_path()).ok()?;
    let token = token.trim().to_string();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

/// Full auth orchestration: provided PAT, else persisted PAT, else the
/// device-code flow. Ends with a fresh Copilot bearer in state and the
/// refresh loop running. Failure here aborts startup.
pub async fn setup(state: &Arc<AppState>, provided_token: Option<String>) -> anyhow::Result<()> {
    paths::ensure_paths().context("ensuring app paths")?;

    let mut github_token = provided_token.unwrap_or_default();

    if github_token.is_empty() {
        if let Some(loaded) = load_token() {
            github_token = loaded;
            tracing::info!("loaded GitHub token from file");
        }
    }

    if github_token.is_empty() {
        tracing::info!("no GitHub token found, starting device code flow");
        let device = request_device_code(&state.http).await?;

        println!();
        println!("  Please visit: {}", device.verification_uri);
        println!("  Enter code:   {}", device.user_code);
        println!();

        github_token = poll_access_token(&state.http, &device.device_code, device.interval).await?;
        tracing::info!("GitHub authorization successful");
    }

    if let Err(err) = save_token(&github_token) {
        tracing::warn!(error = %err, "failed to save GitHub token");
    }

    match fetch_user(&state.http, &github_token, &state.vscode_version).await {
        Ok(login) => tracing::info!(login = %login, "authenticated"),
        Err(err) => tracing::warn!(error = %err, "could not resolve GitHub login"),
    }

    if state.show_token {
        tracing::info!(token = %github_token, "GitHub token");
    }

    let copilot = fetch_copilot_token(&state.http, &github_token, &state.vscode_version).await?;
    if state.show_token {
        tracing::info!(token = %copilot.token, "Copilot token");
    }

    {
        let mut credentials = state.credentials.write().unwrap();
        credentials.github_token = github_token;
        credentials.copilot_token = copilot.token;
        credentials.copilot_expires_at = copilot.expires_at;
        credentials.refresh_in = copilot.refresh_in;
    }

    spawn_refresh_loop(state.clone(), copilot.refresh_in);
    Ok(())
}

/// Background bearer refresh: sleep `max(refresh_in - 60, 30)` seconds, then
/// refetch. Failures wait 30 seconds and retry indefinitely; the loop never
/// crashes the process.
pub fn spawn_refresh_loop(state: Arc<AppState>, initial_refresh_in: u64) {
    tokio::spawn(async move {
        let mut delay = refresh_delay(initial_refresh_in);
        loop {
            tokio::time::sleep(delay).await;

            let github_token = state.github_token();
            tracing::info!("refreshing Copilot token");
            match fetch_copilot_token(&state.http, &github_token, &state.vscode_version).await {
                Ok(copilot) => {
                    delay = refresh_delay(copilot.refresh_in);
                    let mut credentials = state.credentials.write().unwrap();
                    credentials.copilot_token = copilot.token;
                    credentials.copilot_expires_at = copilot.expires_at;
                    credentials.refresh_in = copilot.refresh_in;
                    drop(credentials);

                    if state.show_token {
                        tracing::info!(token = %state.copilot_token(), "refreshed Copilot token");
                    } else {
                        let expires_at = state.credentials.read().unwrap().copilot_expires_at;
                        tracing::info!(expires_at, "Copilot token refreshed");
                    }
                }
                Err(err) => {
                    tracing::error!(error = %err, "failed to refresh Copilot token, retrying in 30s");
                    delay = Duration::from_secs(30);
                }
            }
        }
    });
}

fn refresh_delay(refresh_in: u64) -> Duration {
    Duration::from_secs(refresh_in.saturating_sub(60).max(30))
}

fn urlencode(value: &str) -> String {
    value.replace(':', "%3A")
}
