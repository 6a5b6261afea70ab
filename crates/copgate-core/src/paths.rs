//! Per-user application directory: token, config, and logs.

use std::fs;
use std::io;
use std::path::PathBuf;

const APP_DIR_NAME: &str = "copilot-api";

pub fn app_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".local")
                .join("share")
        })
        .join(APP_DIR_NAME)
}

pub fn token_path() -> PathBuf {
    app_dir().join("github_token")
}

pub fn config_path() -> PathBuf {
    app_dir().join("config.json")
}

pub fn log_dir() -> PathBuf {
    app_dir().join("logs")
}

/// Create the app directory tree with owner-only permissions and make sure
/// the token file exists.
pub fn ensure_paths() -> io::Result<()> {
    let dir = app_dir();
    fs::create_dir_all(&dir)?;
    set_mode(&dir, 0o700)?;

    let logs = log_dir();
    fs::create_dir_all(&logs)?;
    set_mode(&logs, 0o700)?;

    let token = token_path();
    if !token.exists() {
        fs::write(&token, b"")?;
    }
    set_mode(&token, 0o600)?;
    Ok(())
}

#[cfg(unix)]
pub fn set_mode(path: &std::path::Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
pub fn set_mode(_path: &std::path::Path, _mode: u32) -> io::Result<()> {
    Ok(())
}
