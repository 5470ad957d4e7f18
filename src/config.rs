//! Configuration file handling.
//!
//! Settings live in a TOML file (by default `nilm-disagg.toml` in the
//! working directory). Every field has a default, so a partial or missing
//! file is fine.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Default config file name looked up by [`Config::load_or_default`].
pub const DEFAULT_CONFIG_FILE: &str = "nilm-disagg.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Input data settings.
    #[serde(default)]
    pub data: DataConfig,

    /// Output store settings.
    #[serde(default)]
    pub output: OutputConfig,
}

/// How meter files are read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Rows per chunk pulled from a meter file.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Name of the timestamp column.
    #[serde(default = "default_index_column")]
    pub index_column: String,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            index_column: default_index_column(),
        }
    }
}

fn default_chunk_size() -> usize {
    100_000
}

fn default_index_column() -> String {
    "timestamp".to_string()
}

/// Where disaggregated chunks go.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Key prefix for each appliance, e.g. `/elec` gives `/elec/fridge_1`.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
        }
    }
}

fn default_key_prefix() -> String {
    crate::store::DEFAULT_KEY_PREFIX.to_string()
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        if config.data.chunk_size == 0 {
            anyhow::bail!("{}: data.chunk_size must be at least 1", path.display());
        }
        Ok(config)
    }

    /// Load `path` if given, else [`DEFAULT_CONFIG_FILE`] if it exists, else
    /// the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        let default_path = Path::new(DEFAULT_CONFIG_FILE);
        if default_path.exists() {
            Self::load(default_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Default configuration rendered as TOML.
    pub fn default_toml() -> Result<String> {
        toml::to_string_pretty(&Config::default()).context("Failed to render default config")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.data.chunk_size, 100_000);
        assert_eq!(config.data.index_column, "timestamp");
        assert_eq!(config.output.key_prefix, "/elec");
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_content = r#"
[data]
chunk_size = 512
"#;
        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.data.chunk_size, 512);
        assert_eq!(config.data.index_column, "timestamp");
        assert_eq!(config.output.key_prefix, "/elec");
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml().unwrap();
        assert!(toml_str.contains("[data]"));
        assert!(toml_str.contains("[output]"));
        let back: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(back.data.chunk_size, 100_000);
    }

    #[test]
    fn test_load_rejects_zero_chunk_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.toml");
        std::fs::write(&path, "[data]\nchunk_size = 0\n").unwrap();
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.toml");
        std::fs::write(&path, "[output]\nkey_prefix = \"/building1/elec\"\n").unwrap();
        let config = Config::load_or_default(Some(&path)).unwrap();
        assert_eq!(config.output.key_prefix, "/building1/elec");
    }
}
