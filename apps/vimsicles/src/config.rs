//! User configuration.
//!
//! Stored as TOML:
//! - Linux: `~/.config/vimsicles/config.toml`
//! - Windows: `%APPDATA%/vimsicles/config.toml`

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use vimsicles_engine::EngineConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Port used by `receive`, and by `send` when none is given.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Where received files are extracted.
    #[serde(default = "default_destination_dir")]
    pub destination_dir: PathBuf,

    /// Temporary archives in both directions.
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,

    /// Seconds an incoming request waits for a decision.
    #[serde(default = "default_approval_timeout")]
    pub approval_timeout_secs: u64,
}

fn default_port() -> u16 {
    vimsicles_data_channel::DEFAULT_PORT
}

fn default_destination_dir() -> PathBuf {
    home_dir().join("Downloads").join("vimsicles")
}

fn default_scratch_dir() -> PathBuf {
    std::env::temp_dir().join("vimsicles")
}

fn default_approval_timeout() -> u64 {
    vimsicles_engine::APPROVAL_TIMEOUT.as_secs()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            destination_dir: default_destination_dir(),
            scratch_dir: default_scratch_dir(),
            approval_timeout_secs: default_approval_timeout(),
        }
    }
}

impl Config {
    /// Loads the per-user configuration, creating it with defaults if missing.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&config_path())
    }

    /// Loads `path`, creating it with defaults if missing.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    pub fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::new(&self.destination_dir, &self.scratch_dir);
        config.approval_timeout = Duration::from_secs(self.approval_timeout_secs);
        config
    }
}

fn home_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    let var = "USERPROFILE";
    #[cfg(not(target_os = "windows"))]
    let var = "HOME";

    std::env::var_os(var)
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
}

/// Returns the platform-specific configuration file path.
fn config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata = std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(home_dir);
        appdata.join("vimsicles").join("config.toml")
    }

    #[cfg(not(target_os = "windows"))]
    {
        home_dir().join(".config").join("vimsicles").join("config.toml")
    }
}
