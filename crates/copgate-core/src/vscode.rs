//! Cosmetic impersonation input: the advertised VS Code version, scraped
//! from the AUR PKGBUILD with a hard fallback.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use crate::upstream::FALLBACK_VSCODE_VERSION;

const PKGBUILD_URL: &str =
    "https://aur.archlinux.org/cgit/aur.git/plain/PKGBUILD?h=visual-studio-code-bin";

static PKGVER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"pkgver=(\d+\.\d+\.\d+)").unwrap());

pub async fn fetch_vscode_version(http: &wreq::Client) -> String {
    let fetch = async {
        let response = http.get(PKGBUILD_URL).send().await.ok()?;
        let body = response.text().await.ok()?;
        PKGVER_RE
            .captures(&body)
            .map(|capture| capture[1].to_string())
    };

    match tokio::time::timeout(Duration::from_secs(5), fetch).await {
        Ok(Some(version)) => version,
        Ok(None) => {
            tracing::warn!("failed to parse VS Code version, using fallback");
            FALLBACK_VSCODE_VERSION.to_string()
        }
        Err(_) => {
            tracing::warn!("VS Code version probe timed out, using fallback");
            FALLBACK_VSCODE_VERSION.to_string()
        }
    }
}
