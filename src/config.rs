//! # Bridge configuration
//!
//! A single TOML file under the user's config directory. A missing file is
//! created with defaults; missing fields fall back to their defaults so older
//! files keep loading.

use color_eyre::eyre::{eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::joypad::JoypadSettings;

const CONFIG_DIR: &str = "joypad-bridge";
const CONFIG_FILE: &str = "config.toml";

/// Which native framework drives the bridge
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Gilrs,
    Virtual,
}

/// A software controller plugged at start-up with the virtual backend
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct VirtualPadConfig {
    pub name: String,
    #[serde(default)]
    pub force_feedback: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct BridgeConfig {
    pub backend: Backend,
    /// Engine frame period
    pub frame_interval_ms: u64,
    /// One of trace, debug, info, warn, error
    pub log_level: String,
    pub joypad: JoypadSettings,
    pub virtual_pads: Vec<VirtualPadConfig>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Gilrs,
            frame_interval_ms: 16,
            log_level: "info".to_string(),
            joypad: JoypadSettings::default(),
            virtual_pads: vec![VirtualPadConfig {
                name: "Virtual Joypad".to_string(),
                force_feedback: true,
            }],
        }
    }
}

impl BridgeConfig {
    /// `<config dir>/joypad-bridge/config.toml`
    pub fn default_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| {
            warn!("Could not determine config directory, using current directory");
            PathBuf::from(".")
        });
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        path
    }

    /// Loads `path`, writing the defaults there first if it does not exist
    pub async fn load_or_create(path: &Path) -> Result<Self> {
        if !tokio::fs::try_exists(path)
            .await
            .map_err(|e| eyre!("Failed to check if config file exists: {}", e))?
        {
            info!("No config at {}, writing defaults", path.display());
            let config = Self::default();
            config.save(path).await?;
            return Ok(config);
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| eyre!("Failed to read config file: {}", e))?;
        let config: Self =
            toml::from_str(&content).map_err(|e| eyre!("Failed to parse config file: {}", e))?;
        config.validate()?;
        debug!("Loaded config from {}: {:?}", path.display(), config);
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| eyre!("Failed to create config directory: {}", e))?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| eyre!("Failed to serialize config: {}", e))?;
        tokio::fs::write(path, content)
            .await
            .map_err(|e| eyre!("Failed to write config file: {}", e))?;
        info!("Config saved to {}", path.display());
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.frame_interval_ms == 0 {
            return Err(eyre!("frame_interval_ms must be greater than zero"));
        }
        if !(0.0..1.0).contains(&self.joypad.axis_deadzone) {
            return Err(eyre!(
                "joypad.axis_deadzone must be in [0, 1), got {}",
                self.joypad.axis_deadzone
            ));
        }
        if self.joypad.max_devices == 0 {
            return Err(eyre!("joypad.max_devices must be at least 1"));
        }
        self.log_level()?;
        Ok(())
    }

    pub fn log_level(&self) -> Result<tracing::Level> {
        self.log_level
            .parse()
            .map_err(|_| eyre!("Unknown log level '{}'", self.log_level))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);

        let config = BridgeConfig::load_or_create(&path).await.unwrap();
        assert_eq!(config, BridgeConfig::default());
        assert!(path.exists());

        let reloaded = BridgeConfig::load_or_create(&path).await.unwrap();
        assert_eq!(reloaded, config);
    }

    #[tokio::test]
    async fn partial_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        tokio::fs::write(
            &path,
            "backend = \"virtual\"\n\n[joypad]\naxis_deadzone = 0.2\n",
        )
        .await
        .unwrap();

        let config = BridgeConfig::load_or_create(&path).await.unwrap();
        assert_eq!(config.backend, Backend::Virtual);
        assert_eq!(config.joypad.axis_deadzone, 0.2);
        assert!(config.joypad.invert_y_axis);
        assert_eq!(config.frame_interval_ms, 16);
    }

    #[tokio::test]
    async fn invalid_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        tokio::fs::write(&path, "frame_interval_ms = 0\n").await.unwrap();
        assert!(BridgeConfig::load_or_create(&path).await.is_err());

        tokio::fs::write(&path, "log_level = \"loud\"\n").await.unwrap();
        assert!(BridgeConfig::load_or_create(&path).await.is_err());
    }

    #[test]
    fn log_level_parses() {
        let config = BridgeConfig {
            log_level: "debug".to_string(),
            ..BridgeConfig::default()
        };
        assert_eq!(config.log_level().unwrap(), tracing::Level::DEBUG);
    }

    #[test]
    fn default_path_ends_with_config_file() {
        let path = BridgeConfig::default_path();
        assert!(path.ends_with(Path::new(CONFIG_DIR).join(CONFIG_FILE)));
    }
}
