//! Engine configuration and the sound manifest.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::types::{AutoplayPolicy, PreloadProfile, SoundKey};
use crate::{Error, Result};

/// File name looked up in the platform config directory.
pub const CONFIG_FILE_NAME: &str = "chime.json";

/// Largest allowed element pool per sound.
pub const MAX_ELEMENT_POOL: usize = 3;

/// Where a single sound asset lives, relative to the asset base.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetEntry {
    pub path: String,
    /// Approximate size in bytes, used for memory budgeting before fetching.
    #[serde(default)]
    pub size_hint: Option<u64>,
}

impl AssetEntry {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            size_hint: None,
        }
    }

    #[must_use]
    pub const fn with_size_hint(mut self, bytes: u64) -> Self {
        self.size_hint = Some(bytes);
        self
    }
}

/// Static map from sound key to asset location.
pub type SoundManifest = BTreeMap<SoundKey, AssetEntry>;

/// Manifest pointing every key at `sounds/<key>.wav`.
pub fn default_manifest() -> SoundManifest {
    SoundKey::ALL
        .into_iter()
        .map(|key| (key, AssetEntry::new(format!("sounds/{key}.wav"))))
        .collect()
}

/// Root that manifest paths are resolved against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetBase {
    Directory(PathBuf),
    Url(String),
}

impl Default for AssetBase {
    fn default() -> Self {
        Self::Directory(PathBuf::from("assets"))
    }
}

/// Fully resolved asset location handed to a fetcher.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AssetLocation {
    File(PathBuf),
    Url(String),
}

impl std::fmt::Display for AssetLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Url(url) => f.write_str(url),
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChimeConfig {
    pub sounds: SoundManifest,
    pub asset_base: AssetBase,
    pub initial_volume: f32,
    pub start_muted: bool,
    /// Forces a preload profile instead of deriving it from the network.
    pub preload_profile: Option<PreloadProfile>,
    /// Overrides the probed autoplay policy.
    pub autoplay_policy: Option<AutoplayPolicy>,
    /// Strategy names that must never be activated.
    pub disabled_strategies: Vec<String>,
    /// Lifetime of a visual feedback indicator.
    pub visual_indicator_ms: u64,
    pub element_pool_size: usize,
}

impl Default for ChimeConfig {
    fn default() -> Self {
        Self {
            sounds: default_manifest(),
            asset_base: AssetBase::default(),
            initial_volume: 0.7,
            start_muted: false,
            preload_profile: None,
            autoplay_policy: None,
            disabled_strategies: Vec::new(),
            visual_indicator_ms: 600,
            element_pool_size: MAX_ELEMENT_POOL,
        }
    }
}

impl ChimeConfig {
    /// Load and validate a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load from the platform config directory, falling back to defaults.
    pub fn load_default() -> Self {
        let Some(path) = Self::default_path() else {
            return Self::default();
        };

        if !path.exists() {
            return Self::default();
        }

        match Self::load(&path) {
            Ok(config) => {
                info!("Using config {}", path.display());
                config
            }
            Err(e) => {
                warn!("Ignoring invalid config {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// `<config dir>/chime.json` for the current platform.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("dev", "chime", "chime").map(|d| d.config_dir().join(CONFIG_FILE_NAME))
    }

    /// Write the config as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(missing) = SoundKey::ALL
            .into_iter()
            .find(|key| !self.sounds.contains_key(key))
        {
            return Err(Error::InvalidArgument(format!(
                "Sound manifest has no entry for {missing}"
            )));
        }

        if !(0.0..=1.0).contains(&self.initial_volume) {
            return Err(Error::InvalidArgument(format!(
                "initial_volume must be within 0..=1, got {}",
                self.initial_volume
            )));
        }

        if self.visual_indicator_ms == 0 {
            return Err(Error::InvalidArgument(
                "visual_indicator_ms must be positive".to_string(),
            ));
        }

        if let AssetBase::Url(base) = &self.asset_base {
            url::Url::parse(base)
                .map_err(|e| Error::InvalidArgument(format!("Invalid asset base URL {base}: {e}")))?;
        }

        Ok(())
    }

    /// Pool size clamped to `1..=MAX_ELEMENT_POOL`.
    pub fn element_pool_size(&self) -> usize {
        self.element_pool_size.clamp(1, MAX_ELEMENT_POOL)
    }

    /// Resolve the asset location of a key.
    pub fn location(&self, key: SoundKey) -> Option<AssetLocation> {
        let entry = self.sounds.get(&key)?;
        Some(match &self.asset_base {
            AssetBase::Directory(dir) => AssetLocation::File(dir.join(&entry.path)),
            AssetBase::Url(base) => AssetLocation::Url(format!(
                "{}/{}",
                base.trim_end_matches('/'),
                entry.path.trim_start_matches('/')
            )),
        })
    }

    pub fn is_strategy_disabled(&self, name: &str) -> bool {
        self.disabled_strategies
            .iter()
            .any(|disabled| disabled.eq_ignore_ascii_case(name))
    }
}
