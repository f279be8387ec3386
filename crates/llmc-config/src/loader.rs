//! Configuration loader with inheritance support.
//!
//! Loads configuration from multiple sources and merges them:
//! 1. Global config: `~/.llmc/config.toml`
//! 2. Local config: `<repo>/.llmc/config.toml`
//! 3. CLI overrides
//!
//! Later sources override earlier ones. Merging is table-wise: a local
//! file only needs to name the keys it changes.

use crate::error::ConfigError;
use crate::{ConfigOverrides, LlmcConfig};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Configuration directory name, both global (under `$HOME`) and local
/// (under the repo root).
const CONFIG_DIR: &str = ".llmc";

/// Configuration loader with caching and inheritance support.
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    /// Global config directory (e.g., `~/.llmc`)
    global_config_dir: Option<PathBuf>,

    /// Cached global config
    global_config: Option<LlmcConfig>,
}

impl ConfigLoader {
    /// Create a new configuration loader.
    ///
    /// Automatically detects the global config directory (`~/.llmc`).
    pub fn new() -> Self {
        let global_config_dir = dirs::home_dir().map(|h| h.join(CONFIG_DIR));

        Self {
            global_config_dir,
            global_config: None,
        }
    }

    /// Create a loader with a custom global config directory.
    ///
    /// Useful for testing.
    pub fn with_global_dir(global_dir: impl Into<PathBuf>) -> Self {
        Self {
            global_config_dir: Some(global_dir.into()),
            global_config: None,
        }
    }

    /// Get the global config file path.
    pub fn global_config_path(&self) -> Option<PathBuf> {
        self.global_config_dir
            .as_ref()
            .map(|d| d.join(CONFIG_FILE_NAME))
    }

    /// Get the local config file path for a repo.
    pub fn local_config_path(&self, repo_root: &Path) -> PathBuf {
        repo_root.join(CONFIG_DIR).join(CONFIG_FILE_NAME)
    }

    /// Load configuration for a repo with optional CLI overrides.
    ///
    /// Merges config in order: global → local → overrides, then validates
    /// the result.
    pub fn load(
        &mut self,
        repo_root: &Path,
        overrides: Option<&ConfigOverrides>,
    ) -> Result<LlmcConfig, ConfigError> {
        let mut merged = toml::Table::new();

        if let Some(global) = self.load_global_table()? {
            merge_tables(&mut merged, global);
        }

        let local_path = self.local_config_path(repo_root);
        if local_path.exists() {
            debug!("loading local config from {:?}", local_path);
            merge_tables(&mut merged, read_table(&local_path)?);
        } else {
            trace!("local config not found at {:?}", local_path);
        }

        let mut config: LlmcConfig = toml::Table::try_into(merged)
            .map_err(|e| ConfigError::parse_toml(repo_root.join(CONFIG_DIR), e))?;

        if let Some(ovr) = overrides {
            config.apply_overrides(ovr);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load only the global configuration table, cached across calls.
    fn load_global_table(&mut self) -> Result<Option<toml::Table>, ConfigError> {
        let Some(global_path) = self.global_config_path() else {
            debug!("no home directory found, skipping global config");
            return Ok(None);
        };

        if !global_path.exists() {
            trace!("global config not found at {:?}", global_path);
            return Ok(None);
        }

        debug!("loading global config from {:?}", global_path);
        let table = read_table(&global_path)?;

        // Cache the parsed form for `global()` readers.
        if self.global_config.is_none() {
            if let Ok(config) = table.clone().try_into() {
                self.global_config = Some(config);
            }
        }

        Ok(Some(table))
    }

    /// Save configuration to the global config file.
    pub fn save_global(&self, config: &LlmcConfig) -> Result<(), ConfigError> {
        let Some(ref global_dir) = self.global_config_dir else {
            return Err(ConfigError::NoHomeDir);
        };

        std::fs::create_dir_all(global_dir)
            .map_err(|e| ConfigError::write_file(global_dir.clone(), e))?;

        let global_path = global_dir.join(CONFIG_FILE_NAME);
        let text = toml::to_string_pretty(config)?;
        std::fs::write(&global_path, text).map_err(|e| ConfigError::write_file(global_path, e))
    }
}

/// Read and parse a TOML file into a raw table.
fn read_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
    text.parse::<toml::Table>()
        .map_err(|e| ConfigError::parse_toml(path, e))
}

/// Recursively merge `overlay` into `base`. Tables merge key-wise; any
/// other value in the overlay replaces the base value.
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(base_tbl)), toml::Value::Table(overlay_tbl)) => {
                merge_tables(base_tbl, overlay_tbl);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_load_defaults_when_no_files() {
        let tmp = tempfile::tempdir().unwrap();
        let mut loader = ConfigLoader::with_global_dir(tmp.path().join("global"));
        let config = loader.load(tmp.path(), None).unwrap();
        assert_eq!(config.daemon.tick_seconds, 180);
    }

    #[test]
    fn test_local_overrides_global() {
        let tmp = tempfile::tempdir().unwrap();
        let global_dir = tmp.path().join("home/.llmc");
        write_config(
            &global_dir,
            "config.toml",
            "[daemon]\ntick_seconds = 60\nnice_level = 5\n",
        );
        let repo = tmp.path().join("repo");
        write_config(&repo.join(".llmc"), "config.toml", "[daemon]\ntick_seconds = 90\n");

        let mut loader = ConfigLoader::with_global_dir(global_dir);
        let config = loader.load(&repo, None).unwrap();

        // Local wins on the key it names; global survives elsewhere.
        assert_eq!(config.daemon.tick_seconds, 90);
        assert_eq!(config.daemon.nice_level, 5);
    }

    #[test]
    fn test_overrides_win_over_files() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = tmp.path().join("repo");
        write_config(&repo.join(".llmc"), "config.toml", "[daemon]\ntick_seconds = 90\n");

        let mut loader = ConfigLoader::with_global_dir(tmp.path().join("none"));
        let config = loader
            .load(
                &repo,
                Some(&ConfigOverrides {
                    daemon_tick_seconds: Some(30),
                    ..Default::default()
                }),
            )
            .unwrap();
        assert_eq!(config.daemon.tick_seconds, 30);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = tmp.path().join("repo");
        write_config(
            &repo.join(".llmc"),
            "config.toml",
            "[enrichment]\ncascade = [\"no_such_backend\"]\n",
        );

        let mut loader = ConfigLoader::with_global_dir(tmp.path().join("none"));
        let err = loader.load(&repo, None).unwrap_err();
        assert!(err.to_string().contains("no_such_backend"));
    }
}
