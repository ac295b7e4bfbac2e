//! First-run bootstrap
//!
//! Before `co ai` can run, `co init` must have created `~/.co` and an API key
//! must be reachable. The state is never stored: it is re-derived from the
//! filesystem and the resolved environment on every start.

use serde::Serialize;

use crate::config::{CoHome, API_KEY_VAR};
use crate::env::Environment;

/// The `co` subcommands the supervisor runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentCommand {
    /// `co init -y`
    Init,
    /// `co auth`
    Auth,
    /// `co ai`, the long-running interactive agent
    Ai,
}

impl AgentCommand {
    /// Arguments passed to `co`
    pub fn args(self) -> &'static [&'static str] {
        match self {
            AgentCommand::Init => &["init", "-y"],
            AgentCommand::Auth => &["auth"],
            AgentCommand::Ai => &["ai"],
        }
    }

    /// Subcommand name
    pub fn name(self) -> &'static str {
        self.args()[0]
    }
}

/// Where the user is in first-run setup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    /// `~/.co` does not exist
    Uninitialized,
    /// Initialized, but no API key anywhere
    Unauthenticated,
    /// Ready to run `co ai`
    Ready,
}

impl BootstrapState {
    pub fn evaluate(home: &CoHome, env: &Environment) -> Self {
        if !home.is_initialized() {
            BootstrapState::Uninitialized
        } else if !is_authenticated(home, env) {
            BootstrapState::Unauthenticated
        } else {
            BootstrapState::Ready
        }
    }

    /// The setup step to run before `co ai`, if any
    pub fn setup_step(self) -> Option<SetupStep> {
        match self {
            BootstrapState::Uninitialized => Some(SetupStep::Initialize),
            BootstrapState::Unauthenticated => Some(SetupStep::Authenticate),
            BootstrapState::Ready => None,
        }
    }
}

/// An API key is set in the environment or stored in `~/.co/keys.env`
pub fn is_authenticated(home: &CoHome, env: &Environment) -> bool {
    env.contains_key(API_KEY_VAR) || home.has_stored_key()
}

/// A setup command run to completion before `co ai`.
///
/// When its process exits, authentication is checked again and either
/// `co ai` starts or the supervisor returns to idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStep {
    Initialize,
    Authenticate,
}

impl SetupStep {
    pub fn command(self) -> AgentCommand {
        match self {
            SetupStep::Initialize => AgentCommand::Init,
            SetupStep::Authenticate => AgentCommand::Auth,
        }
    }

    /// Shown before the step runs
    pub fn start_notice(self) -> &'static str {
        match self {
            SetupStep::Initialize => "[First time setup — running `co init`...]\n\n",
            SetupStep::Authenticate => "[No API key found — running `co auth` first...]\n\n",
        }
    }

    /// Shown when the step left an API key behind
    pub fn success_notice(self) -> &'static str {
        match self {
            SetupStep::Initialize => "\n[Setup complete. Starting co ai...]\n\n",
            SetupStep::Authenticate => "\n[Authenticated. Starting co ai...]\n\n",
        }
    }

    /// Shown when it did not
    pub fn failure_notice(self) -> &'static str {
        match self {
            SetupStep::Initialize => "\n[Setup incomplete. Start again to retry.]\n",
            SetupStep::Authenticate => "\n[Auth cancelled or failed. Start again to retry.]\n",
        }
    }
}
