//! # Configuration Module
//!
//! This module handles configuration management and data directory setup for blend.
//! It provides platform-appropriate data storage locations and loads the optional
//! TOML configuration file.
//!
//! ## Data Storage
//!
//! blend stores its playlist database in the platform-standard data directory:
//! - Linux: `~/.local/share/blend/`
//! - macOS: `~/Library/Application Support/blend/`
//! - Windows: `%APPDATA%\blend\`
//!
//! ## Configuration File
//!
//! `<config_dir>/blend/config.toml`, every key optional:
//!
//! ```toml
//! db_path = "/srv/blend/playlists.db"
//! catalog_path = "/srv/blend/catalog.json"
//! default_description = "Made together"
//!
//! [selection]
//! tracks_per_participant = 20
//! recommendations_per_participant = 10
//! seed_size = 5
//! top_items_limit = 49
//! recommendation_pool = 50
//!
//! [scheduler]
//! tick_secs = 3600
//! ```

use anyhow::{Context, Result};
use path_absolutize::Absolutize;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "blend";

/// Returns the platform-appropriate data directory for blend, creating it if needed.
///
/// # Errors
///
/// This function will return an error if:
/// - The system data directory cannot be determined
/// - The blend subdirectory cannot be created due to permissions
pub fn get_data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
        .ok_or_else(|| anyhow::anyhow!(
            "Could not determine system data directory. Please ensure your platform supports standard data directories."
        ))?;

    let blend_dir = data_dir.join(APP_DIR);
    fs::create_dir_all(&blend_dir)
        .with_context(|| format!(
            "Failed to create blend data directory at {}. Please check file permissions.",
            blend_dir.display()
        ))?;

    Ok(blend_dir)
}

/// Returns the default playlist database path (`<data_dir>/blend/playlists.db`).
pub fn get_db_path() -> Result<PathBuf> {
    Ok(get_data_dir()?.join("playlists.db"))
}

/// Location of the optional configuration file.
#[must_use]
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.toml"))
}

/// Turn a user-supplied path into an absolute one relative to the working directory.
pub fn absolutize(path: &Path) -> Result<PathBuf> {
    Ok(path
        .absolutize()
        .with_context(|| format!("Invalid path {}", path.display()))?
        .into_owned())
}

/// Sizes used when building a tracklist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    /// Default playlist size: tracks sampled per participant.
    pub tracks_per_participant: usize,
    /// Recommendations added per participant when enabled.
    pub recommendations_per_participant: usize,
    /// Sampled tracks used to seed recommendations.
    pub seed_size: usize,
    /// Top items fetched per category and window.
    pub top_items_limit: usize,
    /// Recommendations requested before narrowing down.
    pub recommendation_pool: usize,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            tracks_per_participant: 20,
            recommendations_per_participant: 10,
            seed_size: 5,
            top_items_limit: 49,
            recommendation_pool: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between two scheduler ticks of the daemon.
    pub tick_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { tick_secs: 3600 }
    }
}

/// Application configuration loaded from the TOML config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub db_path: Option<PathBuf>,
    /// Offline catalog fixture used as the catalog client.
    pub catalog_path: Option<PathBuf>,
    pub default_description: String,
    pub selection: SelectionConfig,
    pub scheduler: SchedulerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            catalog_path: None,
            default_description: "Generated with blend".to_string(),
            selection: SelectionConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load the config file, falling back to defaults when it is missing or broken.
    #[must_use]
    pub fn load() -> Self {
        match config_path() {
            Some(path) if path.exists() => Self::load_from(&path).unwrap_or_else(|e| {
                log::warn!("{e:#}. Using defaults.");
                Self::default()
            }),
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Database path: explicit setting, else the platform default.
    pub fn resolve_db_path(&self) -> Result<PathBuf> {
        match &self.db_path {
            Some(path) => absolutize(path),
            None => get_db_path(),
        }
    }

    /// Catalog fixture path: explicit setting, else `<data_dir>/blend/catalog.json`.
    pub fn resolve_catalog_path(&self) -> Result<PathBuf> {
        match &self.catalog_path {
            Some(path) => absolutize(path),
            None => Ok(get_data_dir()?.join("catalog.json")),
        }
    }
}
