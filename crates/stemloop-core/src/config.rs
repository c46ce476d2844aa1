//! Studio configuration
//!
//! YAML config with generic load/save helpers. A missing or unparsable
//! file falls back to defaults with a logged warning; saving creates the
//! parent directory as needed.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::types::{PreviewQuality, PreviewSection};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StudioConfig {
    /// Render/catalog backend base URL
    pub backend_url: String,
    /// Starting tempo
    pub default_bpm: u32,
    /// Starting key
    pub default_key: String,
    pub preview_quality: PreviewQuality,
    pub preview_section: PreviewSection,
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:5001".to_string(),
            default_bpm: 120,
            default_key: "C Minor".to_string(),
            preview_quality: PreviewQuality::Short,
            preview_section: PreviewSection::Start,
        }
    }
}

impl StudioConfig {
    /// `<config dir>/stemloop/studio.yaml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("stemloop").join("studio.yaml"))
    }
}

/// Load configuration from a YAML file.
///
/// A missing file yields defaults; an invalid one logs a warning and
/// yields defaults too.
pub fn load_config<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    log::info!("load_config: Loading from {:?}", path);

    if !path.exists() {
        log::info!("load_config: Config file doesn't exist, using defaults");
        return T::default();
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_yaml::from_str::<T>(&contents) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("load_config: Failed to parse config: {}, using defaults", e);
                T::default()
            }
        },
        Err(e) => {
            log::warn!(
                "load_config: Failed to read config file: {}, using defaults",
                e
            );
            T::default()
        }
    }
}

/// Save configuration to a YAML file, creating parent directories first
pub fn save_config<T>(config: &T, path: &Path) -> Result<()>
where
    T: Serialize,
{
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }

    let yaml = serde_yaml::to_string(config).context("Failed to serialize config to YAML")?;
    std::fs::write(path, yaml)
        .with_context(|| format!("Failed to write config file: {:?}", path))?;

    log::info!("save_config: Saved to {:?}", path);
    Ok(())
}
