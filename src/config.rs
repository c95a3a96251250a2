use crate::playback::PlaybackConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Persistent user defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Movement speed in m/s used until a route or the user overrides it
    pub default_speed: f64,
    /// Whether routes loop back to their first waypoint
    pub loop_mode: bool,
}

impl Default for Settings {
    fn default() -> Self {
        let playback = PlaybackConfig::default();
        Self {
            default_speed: playback.speed,
            loop_mode: playback.loop_mode,
        }
    }
}

impl Settings {
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("route-sim").join("settings.json"))
    }

    /// Load from the user config directory, falling back to defaults
    pub fn load() -> Self {
        Self::config_path()
            .filter(|path| path.exists())
            .and_then(|path| Self::load_from(&path).ok())
            .unwrap_or_default()
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings: {:?}", path))?;
        let settings: Settings = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse settings: {:?}", path))?;
        Ok(settings)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path().context("No config directory on this platform")?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("Failed to write settings: {:?}", path))?;
        Ok(())
    }

    /// Engine defaults; an unusable stored speed falls back to the built-in one
    pub fn playback_config(&self) -> PlaybackConfig {
        let fallback = PlaybackConfig::default();
        let speed = if self.default_speed.is_finite() && self.default_speed > 0.0 {
            self.default_speed
        } else {
            fallback.speed
        };
        PlaybackConfig {
            speed,
            loop_mode: self.loop_mode,
        }
    }
}
