//! Login-shell environment resolution
//!
//! An app started from the desktop inherits a minimal environment: nothing
//! exported from `.zprofile`/`.bash_profile` is visible, which is where API
//! keys usually live. The resolver asks the user's login shell for its
//! environment once and merges it over our own.

use std::collections::HashMap;
use std::process::{Command, Stdio};
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tracing::{debug, warn};

/// Variable name to value
pub type Environment = HashMap<String, String>;

/// Errors from running the login shell
#[derive(Debug, Error)]
pub enum EnvError {
    #[error("Failed to run login shell {shell}: {source}")]
    Spawn {
        shell: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Login shell output is not UTF-8")]
    Decode(#[from] std::string::FromUtf8Error),
}

/// Source of a `KEY=VALUE` environment dump
pub trait ShellDump: Send + Sync {
    /// Run `shell` in login mode and return what it prints for `env`
    fn dump(&self, shell: &str) -> Result<String, EnvError>;
}

/// Runs `<shell> -l -c env` and blocks until it exits
#[derive(Debug, Default, Clone, Copy)]
pub struct LoginShell;

impl ShellDump for LoginShell {
    fn dump(&self, shell: &str) -> Result<String, EnvError> {
        let output = Command::new(shell)
            .args(["-l", "-c", "env"])
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .map_err(|source| EnvError::Spawn {
                shell: shell.to_string(),
                source,
            })?;

        Ok(String::from_utf8(output.stdout)?)
    }
}

/// Computes the effective environment once and hands out the cached snapshot
pub struct EnvironmentResolver {
    base: Environment,
    fallback_shell: String,
    source: Box<dyn ShellDump>,
    cached: OnceLock<Arc<Environment>>,
}

impl EnvironmentResolver {
    /// Resolver over this process's environment, using the real login shell
    pub fn new(fallback_shell: impl Into<String>) -> Self {
        Self::with_source(std::env::vars().collect(), fallback_shell, LoginShell)
    }

    /// Resolver over an explicit base environment and dump source
    pub fn with_source(
        base: Environment,
        fallback_shell: impl Into<String>,
        source: impl ShellDump + 'static,
    ) -> Self {
        Self {
            base,
            fallback_shell: fallback_shell.into(),
            source: Box::new(source),
            cached: OnceLock::new(),
        }
    }

    /// The shell that will be asked for its environment
    pub fn shell(&self) -> &str {
        self.base
            .get("SHELL")
            .map(String::as_str)
            .unwrap_or(self.fallback_shell.as_str())
    }

    /// Return the snapshot, running the login shell on first use.
    ///
    /// Blocks the calling thread until the shell exits. Concurrent first
    /// callers wait for the same computation.
    pub fn snapshot(&self) -> Arc<Environment> {
        Arc::clone(self.cached.get_or_init(|| Arc::new(self.compute())))
    }

    /// Like [`snapshot`](Self::snapshot), but runs the first computation on
    /// the blocking pool.
    pub async fn resolve(self: &Arc<Self>) -> Arc<Environment> {
        if let Some(env) = self.cached.get() {
            return Arc::clone(env);
        }

        let this = Arc::clone(self);
        match tokio::task::spawn_blocking(move || this.snapshot()).await {
            Ok(env) => env,
            Err(e) => {
                warn!("Environment resolution task failed: {}", e);
                self.snapshot()
            }
        }
    }

    fn compute(&self) -> Environment {
        let shell = self.shell().to_string();
        match self.source.dump(&shell) {
            Ok(output) => {
                let pairs = parse_env_dump(&output);
                debug!("Login shell {} reported {} variables", shell, pairs.len());
                merge_env(&self.base, pairs)
            }
            Err(e) => {
                warn!("Using inherited environment: {}", e);
                self.base.clone()
            }
        }
    }
}

/// Parse `KEY=VALUE` lines, splitting at the first `=`.
///
/// Lines without `=` and lines with an empty key are skipped.
pub fn parse_env_dump(output: &str) -> Vec<(String, String)> {
    output
        .lines()
        .filter_map(|line| line.split_once('='))
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

/// Overlay `pairs` on a copy of `base`; later values win
pub fn merge_env(base: &Environment, pairs: Vec<(String, String)>) -> Environment {
    let mut env = base.clone();
    env.extend(pairs);
    env
}
