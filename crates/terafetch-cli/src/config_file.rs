//! Global CLI defaults from `~/.config/terafetch/config.toml`.
//!
//! Only defaults live here; per-invocation flags always win. The engine
//! itself never reads this file.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliConfig {
    /// Worker threads when `--threads` is not given (1..=32).
    pub default_threads: usize,
    /// Default rate limit string (e.g. "5M"); empty/absent means unlimited.
    pub rate_limit: Option<String>,
    /// Default proxy URL.
    pub proxy: Option<String>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            default_threads: 8,
            rate_limit: None,
            proxy: None,
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let dirs = xdg::BaseDirectories::with_prefix("terafetch")?;
    Ok(dirs.place_config_file("config.toml")?)
}

/// Load the config, writing a default file on first run.
pub fn load_or_init() -> Result<CliConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = CliConfig::default();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml::to_string_pretty(&default_cfg)?)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }
    let cfg: CliConfig = toml::from_str(&fs::read_to_string(&path)?)?;
    Ok(cfg)
}
