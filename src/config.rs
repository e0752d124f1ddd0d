//! Configuration system for the window server
//!
//! Loads configuration from TOML file at `~/.config/windowserver/config.toml`
//! Auto-generates default config file on first run if missing.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::session::{FocusOptions, FocusPolicy};

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub input: InputConfig,
    pub display: DisplayConfig,
    pub process: ProcessConfig,
}

impl Config {
    /// Load configuration from file, or use defaults if file doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            info!("Config file not found at {:?}, using defaults", config_path);
            // Auto-generate default config file
            if let Err(e) = Self::save_default(&config_path) {
                warn!("Failed to create default config file: {}", e);
            }
            return Ok(Self::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .context("Failed to read config file")?;

        let config: Config = toml::from_str(&content)
            .context("Failed to parse config file")?;

        info!("Configuration loaded from {:?}", path);
        debug!("Config: {:?}", config);

        Ok(config)
    }

    /// Get the path to the config file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("windowserver");

        Ok(config_dir.join("config.toml"))
    }

    /// Save default configuration to file
    fn save_default(path: &Path) -> Result<()> {
        // Create config directory if it doesn't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .context("Failed to create config directory")?;
        }

        let toml_string = toml::to_string_pretty(&Self::default())
            .context("Failed to serialize default config")?;

        fs::write(path, toml_string)
            .context("Failed to write default config file")?;

        info!("Created default config file at {:?}", path);
        Ok(())
    }
}

/// Service endpoint and loop configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Override for the control socket (default: `$XDG_RUNTIME_DIR/windowserver.sock`)
    pub socket_path: Option<PathBuf>,
    /// Write a readiness marker once setup completes
    pub ready_file: bool,
    /// Most events taken from one channel per wake-up
    pub max_batch: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: None,
            ready_file: true,
            max_batch: 256,
        }
    }
}

impl ServerConfig {
    pub fn socket_path(&self) -> PathBuf {
        self.socket_path
            .clone()
            .unwrap_or_else(windowserver_ipc::socket_path)
    }
}

/// Initial shell client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Command line of the shell; empty disables the launch
    pub shell: Vec<String>,
    /// Stop the server when the shell exits
    pub stop_on_shell_exit: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            shell: Vec::new(),
            stop_on_shell_exit: true,
        }
    }
}

/// Input routing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Focus mode: "click_to_focus" or "focus_follows_mouse"
    pub focus_mode: FocusPolicy,
    /// Raise window when focused
    pub raise_on_focus: bool,
    /// Give new windows focus when nothing is focused
    pub focus_new_windows: bool,
    /// Keycode that cycles focus when pressed with Alt (15 = Tab)
    pub cycle_keycode: Option<u32>,
    /// evdev device nodes to read input from
    pub devices: Vec<PathBuf>,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            focus_mode: FocusPolicy::ClickToFocus,
            raise_on_focus: true,
            focus_new_windows: false,
            cycle_keycode: Some(15),
            devices: Vec::new(),
        }
    }
}

impl InputConfig {
    pub fn focus_options(&self) -> FocusOptions {
        FocusOptions {
            raise_on_focus: self.raise_on_focus,
            focus_new_windows: self.focus_new_windows,
        }
    }
}

/// Geometry of the headless drawable surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
        }
    }
}

/// Client process monitoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    /// How often client pids that are not our children are probed (ms)
    pub probe_interval_ms: u64,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            probe_interval_ms: 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [input]
            focus_mode = "focus_follows_mouse"

            [display]
            width = 800
            height = 600
            "#,
        )
        .unwrap();

        assert_eq!(config.input.focus_mode, FocusPolicy::FocusFollowsMouse);
        assert!(config.input.raise_on_focus);
        assert_eq!(config.display.width, 800);
        assert_eq!(config.server, ServerConfig::default());
        assert_eq!(config.session, SessionConfig::default());
    }

    #[test]
    fn test_unknown_focus_mode_rejected() {
        let parsed: Result<Config, _> = toml::from_str("[input]\nfocus_mode = \"sloppy\"\n");
        assert!(parsed.is_err());
    }

    #[test]
    fn test_default_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        Config::save_default(&path).unwrap();
        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, Config::default());
    }

    #[test]
    fn test_socket_path_override() {
        let mut server = ServerConfig::default();
        assert!(server.socket_path().ends_with("windowserver.sock"));

        server.socket_path = Some(PathBuf::from("/tmp/ws-test.sock"));
        assert_eq!(server.socket_path(), PathBuf::from("/tmp/ws-test.sock"));
    }
}
