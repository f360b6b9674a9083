//! Configuration persistence
//!
//! The agent's configuration lives in `~/.tunneler/tunneler-config.json`,
//! created on first save. Loading an absent file yields the defaults.

use crate::config::AgentConfig;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

const CONFIG_DIR: &str = ".tunneler";
const CONFIG_FILE: &str = "tunneler-config.json";

/// Loads and saves the JSON configuration document
pub struct ConfigManager;

impl ConfigManager {
    /// Path of the configuration file
    pub fn config_path() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Failed to get home directory")?;
        Ok(home.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Load the configuration, or defaults when no file exists yet
    pub fn load() -> Result<AgentConfig> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<AgentConfig> {
        if !path.exists() {
            info!("No configuration file found, using defaults");
            return Ok(AgentConfig::default());
        }

        let json = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path:?}"))?;
        let config: AgentConfig = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse config file: {path:?}"))?;

        info!("Configuration loaded from: {}", path.display());
        Ok(config)
    }

    /// Save the configuration, creating the directory on first use
    pub fn save(config: &AgentConfig) -> Result<()> {
        Self::save_to(config, &Self::config_path()?)
    }

    pub fn save_to(config: &AgentConfig, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {parent:?}"))?;
        }

        let json = serde_json::to_string_pretty(config).context("Failed to serialize config")?;
        fs::write(path, json).with_context(|| format!("Failed to write config file: {path:?}"))?;

        info!("Configuration saved to: {}", path.display());
        Ok(())
    }

    /// Copy the current configuration file to `target`
    pub fn export_to(target: &Path) -> Result<()> {
        let source = Self::config_path()?;
        fs::copy(&source, target)
            .with_context(|| format!("Failed to export config to {target:?}"))?;
        Ok(())
    }

    /// Replace the configuration file with `source` and load it
    pub fn import_from(source: &Path) -> Result<AgentConfig> {
        let dest = Self::config_path()?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {parent:?}"))?;
        }
        fs::copy(source, &dest)
            .with_context(|| format!("Failed to import config from {source:?}"))?;
        Self::load()
    }
}
