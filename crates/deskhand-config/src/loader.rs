use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::Config;

const CONFIG_FILE: &str = "config.json";
const HOME_DIR: &str = ".deskhand";

/// Expand a leading `~` in a workspace path to the home directory.
pub fn resolve_workspace(path: &str) -> PathBuf {
    let rest = match path {
        "~" => "",
        p => match p.strip_prefix("~/") {
            Some(rest) => rest,
            None => return PathBuf::from(path),
        },
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => PathBuf::from(path),
    }
}

/// `./config.json` if present, otherwise `~/.deskhand/config.json`.
///
/// The home path is returned even when it does not exist yet, so `onboard`
/// knows where to write and `load_config` falls back to defaults.
pub fn find_config_path() -> PathBuf {
    let local = PathBuf::from(CONFIG_FILE);
    if local.exists() {
        return local;
    }
    dirs::home_dir()
        .map(|home| home.join(HOME_DIR).join(CONFIG_FILE))
        .unwrap_or(local)
}

/// Load and validate configuration from a JSON file.
///
/// A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<Config> {
    let config = if path.exists() {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config '{}'", path.display()))?;
        serde_json::from_str::<Config>(&contents)
            .with_context(|| format!("failed to parse config '{}'", path.display()))?
    } else {
        Config::default()
    };
    config
        .validate()
        .with_context(|| format!("invalid config '{}'", path.display()))?;
    Ok(config)
}

/// Write configuration as pretty JSON, creating parent directories.
pub fn save_config(path: &Path, config: &Config) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create '{}'", parent.display()))?;
    }
    let contents = serde_json::to_string_pretty(config)?;
    std::fs::write(path, contents)
        .with_context(|| format!("failed to write config '{}'", path.display()))
}
