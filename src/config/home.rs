//! The `~/.co` layout
//!
//! `co init` creates `~/.co`; `co auth` writes the API key into `~/.co/keys.env`.
//! The supervisor only ever reads these facts, it never writes them.

use std::path::{Path, PathBuf};

/// Directory created by `co init`
pub const CONFIG_DIR: &str = ".co";
/// Secrets file written by `co auth`
pub const KEYS_FILE: &str = "keys.env";
/// Credential variable looked up in the environment and in `keys.env`
pub const API_KEY_VAR: &str = "OPENONION_API_KEY";

/// A user's home directory as seen by the `co` CLI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoHome {
    root: PathBuf,
}

impl CoHome {
    /// Use an explicit home directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Use the current user's home directory
    pub fn discover() -> Option<Self> {
        dirs::home_dir().map(Self::new)
    }

    /// The home directory itself
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<home>/.co`
    pub fn config_dir(&self) -> PathBuf {
        self.root.join(CONFIG_DIR)
    }

    /// `<home>/.co/keys.env`
    pub fn keys_file(&self) -> PathBuf {
        self.config_dir().join(KEYS_FILE)
    }

    /// True once `co init` has created the config directory
    pub fn is_initialized(&self) -> bool {
        self.config_dir().is_dir()
    }

    /// True if `keys.env` mentions the API key.
    ///
    /// The file format belongs to `co`; only the `KEY=` substring is checked.
    pub fn has_stored_key(&self) -> bool {
        match std::fs::read_to_string(self.keys_file()) {
            Ok(content) => content.contains(&format!("{API_KEY_VAR}=")),
            Err(_) => false,
        }
    }
}
