pub mod schema;

pub use schema::{
    CodeAgentConfig, DatasetAgentConfig, DatasetConfig, GrandAgentConfig, LoopConfig,
    ModelConfig, RouterConfig, SandboxConfig,
};

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Default router home directory (~/.taskrouter).
pub fn default_home_dir() -> PathBuf {
    directories::BaseDirs::new()
        .map(|d| d.home_dir().join(".taskrouter"))
        .unwrap_or_else(|| PathBuf::from(".taskrouter"))
}

/// Config file to use: the given path with `~` expanded, else
/// `router.toml` under [`default_home_dir`].
pub fn resolve_config_path(explicit: Option<&str>) -> PathBuf {
    match explicit {
        Some(path) => PathBuf::from(shellexpand::tilde(path).into_owned()),
        None => default_home_dir().join("router.toml"),
    }
}

/// Load config from the given path, or return defaults.
pub fn load_config(path: &Path) -> Result<RouterConfig> {
    if path.exists() {
        let contents =
            std::fs::read_to_string(path).context("Failed to read router config file")?;
        let config: RouterConfig =
            toml::from_str(&contents).context("Failed to parse router config (TOML)")?;
        Ok(config)
    } else {
        Ok(RouterConfig::default())
    }
}

/// Save config to the given path (TOML format).
pub fn save_config(config: &RouterConfig, path: &Path) -> Result<()> {
    let contents = toml::to_string_pretty(config).context("Failed to serialize config")?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, contents).context("Failed to write config file")?;
    Ok(())
}
