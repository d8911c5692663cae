//! Configuration loading

use crate::error::{Error, Result};
use crate::identity::DEFAULT_PREFIX;
use crate::renumber::RenumberEngine;
use crate::store::DEFAULT_MARKER_KIND;
use crate::table_sync::{TableSync, DEFAULT_HEADINGS};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Name of the apply history file kept in the document directory
pub const DEFAULT_HISTORY_FILE: &str = ".xing-history.json";

/// Reconciliation configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Prefix for newly assigned crossing codes
    pub default_prefix: String,
    /// Entity kind recognized as a crossing marker
    pub marker_kind: String,
    /// Heading phrases marking the crossing column of a table
    pub table_headings: Vec<String>,
    /// History file name, relative to the document directory
    pub history_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_prefix: DEFAULT_PREFIX.to_string(),
            marker_kind: DEFAULT_MARKER_KIND.to_string(),
            table_headings: DEFAULT_HEADINGS.iter().map(|h| h.to_string()).collect(),
            history_file: PathBuf::from(DEFAULT_HISTORY_FILE),
        }
    }
}

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self> {
        let mut config = Self::default();

        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            config = Self::from_file(&path)?;
        }

        if let Ok(prefix) = std::env::var("XING_DEFAULT_PREFIX") {
            config.default_prefix = prefix;
        }
        if let Ok(kind) = std::env::var("XING_MARKER_KIND") {
            config.marker_kind = kind;
        }

        Ok(config)
    }

    /// Parse a YAML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_yaml(&contents, path)
    }

    fn from_yaml(contents: &str, path: &Path) -> Result<Self> {
        serde_yaml::from_str(contents).map_err(|e| Error::Config {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Default config file path: ~/.config/xing/config.yaml
    pub fn default_config_path() -> PathBuf {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home)
            .join(".config")
            .join("xing")
            .join("config.yaml")
    }

    pub fn renumber_engine(&self) -> RenumberEngine {
        RenumberEngine::new(self.default_prefix.clone())
    }

    pub fn table_sync(&self) -> TableSync {
        TableSync::new(self.table_headings.clone())
    }
}
