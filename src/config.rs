use anyhow::{Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_NAME: &str = "project-tree";
const CONFIG_FILE: &str = "config.json";

/// Entry storage method used when packing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    Deflated,
    Stored,
}

impl Compression {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deflated => "deflated",
            Self::Stored => "stored",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "deflated" => Some(Self::Deflated),
            "stored" => Some(Self::Stored),
            _ => None,
        }
    }

    pub(crate) fn method(&self) -> zip::CompressionMethod {
        match self {
            Self::Deflated => zip::CompressionMethod::Deflated,
            Self::Stored => zip::CompressionMethod::Stored,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    /// Pause before the threaded metadata step starts, in milliseconds.
    pub debounce_ms: u64,
    /// Compression used for packed entries.
    pub compression: Compression,
    /// Emit directory entries when packing so empty folders survive.
    pub include_directory_entries: bool,
    /// Prefix for scratch folders created by `unpack` without a target.
    pub scratch_prefix: String,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 100,
            compression: Compression::Deflated,
            include_directory_entries: true,
            scratch_prefix: "project-".to_string(),
        }
    }
}

impl TreeConfig {
    /// Load configuration from the user's config directory, then apply
    /// environment overrides.
    /// Returns defaults if the file doesn't exist or fails to parse.
    pub fn load() -> Self {
        let config = match Self::try_load() {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config, using defaults: {:#}", e);
                Self::default()
            }
        };
        config.with_env_overrides(|key| std::env::var(key).ok())
    }

    fn try_load() -> Result<Self> {
        Self::load_from(&get_config_path()?)
    }

    /// Read a config file, or the defaults if `path` does not exist.
    /// Environment overrides are not applied.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Apply `PROJECT_TREE_*` overrides. Unparseable values are ignored.
    pub fn with_env_overrides(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(ms) = var("PROJECT_TREE_DEBOUNCE_MS").and_then(|s| s.trim().parse().ok()) {
            self.debounce_ms = ms;
        }
        if let Some(method) =
            var("PROJECT_TREE_COMPRESSION").and_then(|s| Compression::from_str(s.trim()))
        {
            self.compression = method;
        }
        self
    }

    /// Save to the user's config directory.
    pub fn save(&self) -> Result<()> {
        self.save_to(&get_config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

fn get_config_path() -> Result<PathBuf> {
    let mut path =
        config_dir().ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
    path.push(APP_NAME);
    path.push(CONFIG_FILE);
    Ok(path)
}
