//! # Configuration
//!
//! kvtree configuration is managed by [`confique`], layered in priority order:
//! 1. **Environment variables**: `KVTREE_YEAR_PIVOT`, `KVTREE_DATA_FILE`.
//! 2. **Config file**: `kvtree.toml`, either given explicitly or found in the
//!    OS config directory (via the `directories` crate).
//! 3. **Compiled defaults**: `#[config(default = ...)]`.
//!
//! ## Available Settings
//!
//! | Key | Default | Description |
//! |-----|---------|-------------|
//! | `two_digit_year_pivot` | `68` | `yy <= pivot` is `20yy`, otherwise `19yy`; 0 to 99 |
//! | `data_file` | `kvtree.json` | Where [`crate::tree::json::JsonTreeStore`] keeps the tree |

use crate::error::{KvError, Result};
use crate::kv::ValueOptions;
use confique::Config;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "kvtree.toml";
const MAX_YEAR_PIVOT: u8 = 99;

#[derive(Config, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct KvConfig {
    /// Largest two digit year read as 20yy; larger ones are read as 19yy.
    #[config(env = "KVTREE_YEAR_PIVOT", default = 68)]
    pub two_digit_year_pivot: u8,

    /// JSON file holding the node tree and its metadata.
    #[config(env = "KVTREE_DATA_FILE", default = "kvtree.json")]
    pub data_file: PathBuf,
}

impl Default for KvConfig {
    fn default() -> Self {
        Self {
            two_digit_year_pivot: 68,
            data_file: PathBuf::from("kvtree.json"),
        }
    }
}

impl KvConfig {
    /// Loads the configuration from the environment, then `path` (or the
    /// default location when `None`), then defaults. Missing files are fine.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = path.map(Path::to_path_buf).or_else(Self::default_path);
        let mut builder = Self::builder().env();
        if let Some(file) = &file {
            builder = builder.file(file);
        }
        let config = builder
            .load()
            .map_err(|e| KvError::Config(e.to_string()))?;
        config.validate()?;

        tracing::debug!(
            target = "kvtree::config",
            file = ?file,
            pivot = config.two_digit_year_pivot,
            "configuration loaded"
        );
        Ok(config)
    }

    /// Rejects values the loader accepts but the engine cannot use.
    pub fn validate(&self) -> Result<()> {
        if self.two_digit_year_pivot > MAX_YEAR_PIVOT {
            return Err(KvError::Config(format!(
                "two_digit_year_pivot must be between 0 and {MAX_YEAR_PIVOT}, got {}",
                self.two_digit_year_pivot
            )));
        }
        Ok(())
    }

    /// `kvtree.toml` inside the OS config directory, if one can be determined.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "kvtree").map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    /// A commented sample `kvtree.toml`.
    pub fn template() -> String {
        confique::toml::template::<Self>(confique::toml::FormatOptions::default())
    }

    pub fn value_options(&self) -> ValueOptions {
        ValueOptions {
            year_pivot: self.two_digit_year_pivot,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_default_config() {
        let config = KvConfig::default();
        assert_eq!(config.two_digit_year_pivot, 68);
        assert_eq!(config.data_file, PathBuf::from("kvtree.json"));
        assert_eq!(config.value_options(), ValueOptions::default());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let written = KvConfig {
            two_digit_year_pivot: 30,
            data_file: PathBuf::from("/var/lib/kvtree/tree.json"),
        };
        fs::write(&path, toml::to_string(&written).unwrap()).unwrap();

        let loaded = KvConfig::load(Some(&path)).unwrap();
        assert_eq!(loaded.two_digit_year_pivot, 30);
        assert_eq!(loaded.value_options().year_pivot, 30);
    }

    #[test]
    fn test_pivot_above_two_digits_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "two_digit_year_pivot = 120\n").unwrap();

        let err = KvConfig::load(Some(&path)).unwrap_err();
        assert!(matches!(err, KvError::Config(msg) if msg.contains("two_digit_year_pivot")));
    }

    #[test]
    fn test_pivot_bounds() {
        let with_pivot = |two_digit_year_pivot| KvConfig {
            two_digit_year_pivot,
            ..KvConfig::default()
        };
        assert!(with_pivot(0).validate().is_ok());
        assert!(with_pivot(99).validate().is_ok());
        assert!(with_pivot(100).validate().is_err());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = KvConfig::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(loaded.data_file, PathBuf::from("kvtree.json"));
    }

    #[test]
    fn test_template_mentions_settings() {
        let template = KvConfig::template();
        assert!(template.contains("two_digit_year_pivot"));
        assert!(template.contains("data_file"));
    }
}
