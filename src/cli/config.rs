use std::fs;
use std::path::PathBuf;

pub const SESSION_FILE: &str = "session.json";
pub const OFFLINE_FILE: &str = "offline.json";

pub fn get_config_dir() -> anyhow::Result<PathBuf> {
    let config_dir = if let Ok(custom_dir) = std::env::var("PORTAL_CLI_CONFIG_DIR") {
        PathBuf::from(custom_dir)
    } else {
        let home = std::env::var("HOME").map_err(|_| anyhow::anyhow!("HOME environment variable not set"))?;
        PathBuf::from(home).join(".config").join("training-portal")
    };

    if !config_dir.exists() {
        fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

/// Where the remote backend keeps the signed-in session between runs
pub fn session_path() -> anyhow::Result<PathBuf> {
    Ok(get_config_dir()?.join(SESSION_FILE))
}

/// Snapshot of the in-process backend used by `--offline`
pub fn offline_state_path() -> anyhow::Result<PathBuf> {
    Ok(get_config_dir()?.join(OFFLINE_FILE))
}
