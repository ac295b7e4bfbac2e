//! Launcher configuration
//!
//! Optional TOML file describing where the `co` binary lives and which
//! home directory to inspect. Every field has a default, so a missing file
//! is equivalent to an empty one.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::CoHome;

/// Default program name resolved through PATH
pub const DEFAULT_PROGRAM: &str = "co";
/// Shell used for the environment dump when `SHELL` is unset
pub const DEFAULT_SHELL: &str = "/bin/zsh";

/// Errors that can occur during config operations
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("No home directory could be determined")]
    NoHome,
}

/// Launcher configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LauncherConfig {
    /// Program name looked up through PATH when no bundled binary is usable
    #[serde(default = "default_program")]
    pub program: String,
    /// Binary shipped alongside the application
    #[serde(default)]
    pub bundled_binary: Option<PathBuf>,
    /// Shell to run when `SHELL` is not set
    #[serde(default = "default_shell")]
    pub fallback_shell: String,
    /// Home directory override
    #[serde(default)]
    pub home: Option<PathBuf>,
}

fn default_program() -> String {
    DEFAULT_PROGRAM.to_string()
}

fn default_shell() -> String {
    DEFAULT_SHELL.to_string()
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            bundled_binary: None,
            fallback_shell: default_shell(),
            home: None,
        }
    }
}

impl LauncherConfig {
    /// Load configuration from a TOML file, falling back to defaults if absent
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: LauncherConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// The home directory to inspect for `.co`
    pub fn co_home(&self) -> Result<CoHome, ConfigError> {
        match &self.home {
            Some(path) => Ok(CoHome::new(path)),
            None => CoHome::discover().ok_or(ConfigError::NoHome),
        }
    }
}
