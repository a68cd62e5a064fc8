//! Bundle configuration.
//!
//! Values come from an optional `cribo.toml` (project directory first, then
//! the user configuration directory) with command-line flags layered on top.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use indexmap::IndexSet;
use log::debug;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// First-party source roots, searched in order.
    pub src: Vec<PathBuf>,
    /// Module names always classified as first-party.
    pub known_first_party: IndexSet<String>,
    /// Module names always classified as third-party.
    pub known_third_party: IndexSet<String>,
    /// Target interpreter version, e.g. `py310`; selects the stdlib table.
    pub target_version: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            src: vec![PathBuf::from(".")],
            known_first_party: IndexSet::new(),
            known_third_party: IndexSet::new(),
            target_version: "py310".to_owned(),
        }
    }
}

impl Config {
    /// Parse `target_version` into the minor version consumed by the stdlib
    /// classifier (`py38` -> 8, `py312` -> 12).
    pub fn python_version(&self) -> Result<u8> {
        let digits = self
            .target_version
            .strip_prefix("py3")
            .ok_or_else(|| anyhow!("invalid target version: {}", self.target_version))?;
        digits
            .parse::<u8>()
            .with_context(|| format!("invalid target version: {}", self.target_version))
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load the first `cribo.toml` found by the directory discovery rules, or
    /// the defaults when none exists.
    pub fn discover() -> Result<Self> {
        match crate::dirs::find_config_file() {
            Some(path) => Self::from_file(&path),
            None => Ok(Self::default()),
        }
    }
}
