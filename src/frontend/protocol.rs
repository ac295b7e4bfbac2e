//! Console protocol
//!
//! Lines typed on stdin are either console commands (`/start`, `/stop`,
//! `/status`, `/quit`) or input for the agent. Events go to stdout either
//! verbatim or as one JSON object per line.

use crate::agent::AgentEvent;

/// What a line of console input means
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Start,
    Stop,
    Status,
    Quit,
    /// Forward to the agent's stdin
    Send(String),
}

impl ConsoleCommand {
    /// Interpret one line (without its newline).
    ///
    /// Unknown `/...` lines go to the agent, which has slash commands of its
    /// own; `//` escapes a leading slash.
    pub fn parse(line: &str) -> Self {
        let line = line.strip_suffix('\r').unwrap_or(line);
        match line.trim() {
            "/start" => ConsoleCommand::Start,
            "/stop" => ConsoleCommand::Stop,
            "/status" => ConsoleCommand::Status,
            "/quit" | "/exit" => ConsoleCommand::Quit,
            _ => match line.strip_prefix("//") {
                Some(rest) => ConsoleCommand::Send(format!("/{rest}")),
                None => ConsoleCommand::Send(line.to_string()),
            },
        }
    }
}

/// How events are written to stdout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Agent output verbatim; state changes only in the log
    Plain,
    /// Every event as a JSON line
    Json,
}

/// Text to write for `event`, if any
pub fn render(event: &AgentEvent, mode: OutputMode) -> Result<Option<String>, serde_json::Error> {
    match (mode, event) {
        (OutputMode::Plain, AgentEvent::Output { text }) => Ok(Some(text.clone())),
        (OutputMode::Plain, AgentEvent::StateChanged { .. }) => Ok(None),
        (OutputMode::Json, event) => {
            let mut line = serde_json::to_string(event)?;
            line.push('\n');
            Ok(Some(line))
        }
    }
}
