//! On-disk configuration layout.
//!
//! ```text
//! <config_dir>/config.json                       top-level settings
//! <config_dir>/presets/<group>/<preset>.json     mapping records
//! <config_dir>/xmodmap.json                      symbol-name overrides
//! ```
//!
//! Preset files are read-only during injection; editors publish new
//! versions atomically and injections pick them up on restart.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::preset::{Mapping, Preset};

/// Schema version of `config.json`.
pub const CONFIG_VERSION: u32 = 2;

/// Top-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopLevelConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    /// Group key -> preset name, started together on `Autoload`.
    #[serde(default)]
    pub autoload: BTreeMap<String, String>,
}

fn default_version() -> u32 {
    CONFIG_VERSION
}

impl Default for TopLevelConfig {
    fn default() -> Self {
        TopLevelConfig {
            version: CONFIG_VERSION,
            autoload: BTreeMap::new(),
        }
    }
}

/// Handle to a config directory; all reads go through here.
#[derive(Debug, Clone)]
pub struct ConfigDir {
    root: PathBuf,
}

impl ConfigDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        ConfigDir { root: root.into() }
    }

    /// `$XDG_CONFIG_HOME/remapd`, falling back to `~/.config/remapd`.
    pub fn default_path() -> PathBuf {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            if !xdg.is_empty() {
                return PathBuf::from(xdg).join("remapd");
            }
        }
        let home = std::env::var("HOME").unwrap_or_else(|_| "/root".into());
        PathBuf::from(home).join(".config").join("remapd")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Loads `config.json`; a missing file is an empty default.
    pub fn load(&self) -> Result<TopLevelConfig, Error> {
        let path = self.root.join("config.json");
        if !path.exists() {
            return Ok(TopLevelConfig::default());
        }
        let text = std::fs::read_to_string(&path)?;
        serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    pub fn preset_path(&self, group_key: &str, preset_name: &str) -> PathBuf {
        self.root
            .join("presets")
            .join(group_key)
            .join(format!("{preset_name}.json"))
    }

    /// Loads one preset file: an ordered array of mapping records.
    pub fn load_preset(&self, group_key: &str, preset_name: &str) -> Result<Preset, Error> {
        let path = self.preset_path(group_key, preset_name);
        let text = std::fs::read_to_string(&path).map_err(|e| {
            Error::Config(format!("cannot read preset {}: {e}", path.display()))
        })?;
        let mappings: Vec<Mapping> = serde_json::from_str(&text).map_err(|e| {
            Error::InvalidPreset {
                preset: preset_name.to_string(),
                index: None,
                reason: format!("malformed JSON: {e}"),
            }
        })?;
        Ok(Preset::with_mappings(preset_name, group_key, mappings))
    }

    /// `xmodmap.json`: symbol-name overrides harvested from the host
    /// keyboard layout. Missing file means no overrides.
    pub fn load_xmodmap(&self) -> Result<HashMap<String, String>, Error> {
        let path = self.root.join("xmodmap.json");
        if !path.exists() {
            return Ok(HashMap::new());
        }
        let text = std::fs::read_to_string(&path)?;
        serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    /// The configured `(group_key, preset_name)` autoload pairs.
    pub fn autoload_pairs(&self) -> Result<Vec<(String, String)>, Error> {
        Ok(self.load()?.autoload.into_iter().collect())
    }
}
