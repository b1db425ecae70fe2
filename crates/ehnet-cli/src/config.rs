//! Configuration management for the CLI
//!
//! This module handles loading configuration from:
//! - Default values
//! - Configuration files (YAML, TOML or JSON)
//! - Environment variables (see `logging`)
//!
//! The `transport` section is passed to the library unchanged.

use crate::error::{Error, Result};
use ehnet_core::TransportConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Transport settings
    pub transport: TransportConfig,

    /// Logging settings
    pub logging: LoggingSettings,

    /// Path settings
    pub paths: PathConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level used when no -v flag is given (trace, debug, info, warn, error)
    pub level: Option<String>,

    /// Log format (compact, full, json)
    pub format: Option<String>,

    /// Log file path
    pub file: Option<PathBuf>,
}

/// Path configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    /// Cache directory
    pub cache_dir: PathBuf,

    /// Cookie jar file; `<cache_dir>/cookies.json` when unset
    pub cookie_jar: Option<PathBuf>,
}

impl Default for PathConfig {
    fn default() -> Self {
        let home_dir = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            cache_dir: dirs::cache_dir()
                .map(|d| d.join("ehnet"))
                .unwrap_or_else(|| home_dir.join(".cache").join("ehnet")),
            cookie_jar: None,
        }
    }
}

impl PathConfig {
    /// Where the cookie jar lives
    pub fn cookie_jar_path(&self) -> PathBuf {
        self.cookie_jar
            .clone()
            .unwrap_or_else(|| self.cache_dir.join("cookies.json"))
    }
}

/// File formats understood by [`Config::from_file`] and [`Config::save`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileFormat {
    Yaml,
    Toml,
    Json,
}

impl FileFormat {
    fn of(path: &Path) -> Self {
        match path.extension().and_then(|s| s.to_str()) {
            Some("yaml") | Some("yml") => FileFormat::Yaml,
            Some("toml") => FileFormat::Toml,
            _ => FileFormat::Json,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content, FileFormat::of(path))
    }

    fn parse(content: &str, format: FileFormat) -> Result<Self> {
        let config: Config = match format {
            FileFormat::Yaml => serde_yaml::from_str(content)?,
            FileFormat::Toml => toml::from_str(content)?,
            FileFormat::Json => serde_json::from_str(content)?,
        };
        config
            .transport
            .validate()
            .map_err(|e| Error::config(e.to_string()))?;
        Ok(config)
    }

    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        for path in Self::default_config_paths() {
            if path.exists() {
                match Self::from_file(&path) {
                    Ok(config) => {
                        tracing::debug!(path = %path.display(), "loaded configuration");
                        return Ok(config);
                    }
                    Err(e) => {
                        eprintln!("Warning: Failed to load config from {}: {}", path.display(), e);
                    }
                }
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file or default locations
    pub fn load_with_file(file: Option<&Path>) -> Result<Self> {
        match file {
            Some(path) => Self::from_file(path),
            None => Self::load(),
        }
    }

    /// The per-user configuration file
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("ehnet").join("config.yaml"))
    }

    /// Get default configuration file paths to check
    fn default_config_paths() -> Vec<PathBuf> {
        let mut paths = vec![
            PathBuf::from(".ehnet.yaml"),
            PathBuf::from(".ehnet.toml"),
            PathBuf::from(".ehnet.json"),
        ];

        if let Some(config_dir) = dirs::config_dir() {
            let ehnet_dir = config_dir.join("ehnet");
            paths.push(ehnet_dir.join("config.yaml"));
            paths.push(ehnet_dir.join("config.toml"));
            paths.push(ehnet_dir.join("config.json"));
        }

        paths
    }

    /// Serialize in the format implied by `path`'s extension
    pub fn to_string_for(&self, path: &Path) -> Result<String> {
        Ok(match FileFormat::of(path) {
            FileFormat::Yaml => serde_yaml::to_string(self)?,
            FileFormat::Toml => toml::to_string_pretty(self)?,
            FileFormat::Json => serde_json::to_string_pretty(self)?,
        })
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = self.to_string_for(path)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }
}
