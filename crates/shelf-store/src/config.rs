use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use shelf_broadcast::DEFAULT_CHANNEL_CAPACITY;
use shelf_engine::{SyncMode, DEFAULT_EXTENSION};

use crate::error::{StoreError, StoreResult};

/// Store settings, usually loaded from a TOML file:
///
/// ```toml
/// root = "/var/lib/app/shelf"
/// extension = "db"
/// sync = "every-write"
/// channel_capacity = 256
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding one file per bucket.
    pub root: PathBuf,
    /// Bucket file extension (without the dot).
    pub extension: String,
    /// When bucket logs are fsynced.
    pub sync: SyncMode,
    /// Events a subscriber may fall behind before it starts losing them.
    pub channel_capacity: usize,
    /// Create `root` on open if it does not exist.
    pub create_root: bool,
}

impl StoreConfig {
    /// Default settings rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Parse settings from TOML text. Missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> StoreResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| StoreError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read settings from a TOML file.
    pub fn load(path: &Path) -> StoreResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Check invariants the store relies on.
    pub fn validate(&self) -> StoreResult<()> {
        if self.channel_capacity == 0 {
            return Err(StoreError::Config("channel_capacity must be at least 1".into()));
        }
        if self.extension.starts_with('.')
            || self.extension.contains(['/', '\\'])
            || self.extension.contains(char::is_whitespace)
        {
            return Err(StoreError::Config(format!(
                "invalid bucket file extension {:?}",
                self.extension
            )));
        }
        Ok(())
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            extension: DEFAULT_EXTENSION.to_string(),
            sync: SyncMode::default(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            create_root: true,
        }
    }
}
