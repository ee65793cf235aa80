//! Configuration file support for uvdose.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/uvdose/config.toml`.

use crate::{Error, NotificationSound, Result, SkinClass};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub profile: ProfileConfig,

    #[serde(default)]
    pub session: SessionConfig,
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl DataConfig {
    /// Where the running session record is kept
    pub fn session_path(&self) -> PathBuf {
        self.data_dir.join("session").join("active.json")
    }

    /// Where finished sessions are journaled
    pub fn journal_path(&self) -> PathBuf {
        self.data_dir.join("journal.jsonl")
    }

    /// Lock file held by the process that owns the session
    pub fn lock_path(&self) -> PathBuf {
        self.data_dir.join("session.lock")
    }
}

/// The user's skin profile and notification preference
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProfileConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skin_class: Option<SkinClass>,

    #[serde(default = "default_protection_factor")]
    pub protection_factor: f64,

    #[serde(default)]
    pub notification_sound: NotificationSound,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            skin_class: None,
            protection_factor: default_protection_factor(),
            notification_sound: NotificationSound::default(),
        }
    }
}

/// Session timing parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Exposure time granted by one "extend" action
    #[serde(default = "default_extension_seconds")]
    pub extension_seconds: i64,

    /// How often the live surface is refreshed while ticking
    #[serde(default = "default_presentation_interval_seconds")]
    pub presentation_interval_seconds: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            extension_seconds: default_extension_seconds(),
            presentation_interval_seconds: default_presentation_interval_seconds(),
        }
    }
}

// Default value functions
fn default_data_dir() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(|| {
        std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join(".local/share"))
            .unwrap_or_else(|| PathBuf::from("."))
    });
    base.join("uvdose")
}

fn default_protection_factor() -> f64 {
    30.0
}

fn default_extension_seconds() -> i64 {
    600
}

fn default_presentation_interval_seconds() -> i64 {
    10
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        let base = dirs::config_dir().unwrap_or_else(|| {
            std::env::var_os("HOME")
                .map(|home| PathBuf::from(home).join(".config"))
                .unwrap_or_else(|| PathBuf::from("."))
        });
        base.join("uvdose").join("config.toml")
    }

    /// Reject values the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.session.extension_seconds <= 0 {
            return Err(Error::Config(format!(
                "session.extension_seconds must be positive, got {}",
                self.session.extension_seconds
            )));
        }
        if self.session.presentation_interval_seconds <= 0 {
            return Err(Error::Config(format!(
                "session.presentation_interval_seconds must be positive, got {}",
                self.session.presentation_interval_seconds
            )));
        }
        if !self.profile.protection_factor.is_finite() {
            return Err(Error::Config(
                "profile.protection_factor must be a number".into(),
            ));
        }
        Ok(())
    }

    /// Save the current configuration to the default path
    pub fn save(&self) -> Result<()> {
        let config_path = Self::default_config_path();
        self.save_to(&config_path)
    }

    /// Save the current configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }
}
