//! Agent session state
//!
//! At most one `co` process is alive at a time. Its handle, its stdin and the
//! step to run after it exits live together in [`ActiveProcess`], so there is
//! no way to hold an input channel without a process or vice versa.

use serde::Serialize;
use tracing::trace;
use uuid::Uuid;

use super::{AgentCommand, SetupStep};
use crate::pty::ProcessHandle;

/// Notifications for the presentation layer, in order of occurrence
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Decoded text from the agent or a supervisor notice; no line framing
    Output { text: String },
    /// Running state may have flipped
    StateChanged { running: bool },
}

/// A snapshot of the supervisor for status queries
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SupervisorStatus {
    pub running: bool,
    /// Command of the live process, if any
    pub command: Option<AgentCommand>,
}

/// The live process
pub struct ActiveProcess {
    /// Identifier carried by this process's events
    pub id: Uuid,
    pub command: AgentCommand,
    /// Child and stdin
    pub handle: Box<dyn ProcessHandle>,
    /// Runs instead of the "exited" notice when the process ends
    pub continuation: Option<SetupStep>,
}

/// Whether a process is live
#[derive(Default)]
pub enum SessionState {
    #[default]
    Idle,
    Running(ActiveProcess),
}

impl SessionState {
    pub fn is_running(&self) -> bool {
        matches!(self, SessionState::Running(_))
    }

    /// The live process, if its id matches
    pub fn active(&mut self, id: Uuid) -> Option<&mut ActiveProcess> {
        match self {
            SessionState::Running(active) if active.id == id => Some(active),
            _ => None,
        }
    }

    /// Reset to idle, returning the process if `id` was the live one
    pub fn finish(&mut self, id: Uuid) -> Option<ActiveProcess> {
        match std::mem::take(self) {
            SessionState::Running(active) if active.id == id => Some(active),
            other => {
                *self = other;
                None
            }
        }
    }

    pub fn status(&self) -> SupervisorStatus {
        match self {
            SessionState::Idle => SupervisorStatus {
                running: false,
                command: None,
            },
            SessionState::Running(active) => SupervisorStatus {
                running: true,
                command: Some(active.command),
            },
        }
    }
}

/// Decode an output chunk; invalid UTF-8 drops the whole chunk
pub fn decode_chunk(data: Vec<u8>) -> Option<String> {
    match String::from_utf8(data) {
        Ok(text) if !text.is_empty() => Some(text),
        Ok(_) => None,
        Err(e) => {
            trace!("Dropping {} bytes of non-UTF-8 output", e.as_bytes().len());
            None
        }
    }
}
