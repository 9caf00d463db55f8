//! Configuration loading

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use stdrone_discovery::ScannerConfig;
use stdrone_link::SessionConfig;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub session: SessionSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Advertised names to connect to
    #[serde(default = "default_target_names")]
    pub target_names: Vec<String>,
    /// Scan duration in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            target_names: default_target_names(),
            timeout_secs: default_timeout(),
        }
    }
}

fn default_target_names() -> Vec<String> {
    vec!["DRN1110".to_string(), "DRN1120".to_string()]
}

fn default_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Joystick command resend period in milliseconds
    #[serde(default = "default_command_interval")]
    pub command_interval_ms: u64,
    /// Log every joystick command sent
    #[serde(default)]
    pub verbose_commands: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            command_interval_ms: default_command_interval(),
            verbose_commands: false,
        }
    }
}

fn default_command_interval() -> u64 {
    100
}

impl Config {
    pub fn scanner_config(&self) -> ScannerConfig {
        ScannerConfig {
            target_names: self.scan.target_names.clone(),
            timeout_secs: self.scan.timeout_secs,
            stop_on_first: true,
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            // a zero period would make the tick interval panic
            command_interval: Duration::from_millis(self.session.command_interval_ms.max(1)),
            verbose_commands: self.session.verbose_commands,
        }
    }
}

/// Load configuration from file, falling back to defaults when it does not exist
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}

/// Save default configuration to file
pub fn save_default_config(path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(&Config::default())?;
    std::fs::write(path, content)?;
    info!(path = %path.display(), "Saved default configuration");
    Ok(())
}
