//! Console front end
//!
//! Stands in for the menu-bar popover: reads commands and agent input line
//! by line, and writes agent output as it arrives. Generic over its streams
//! so it can be driven from stdin/stdout or from buffers.

use std::future::Future;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{render, ConsoleCommand, OutputMode};
use crate::agent::{AgentEvent, Supervisor};

/// How long to wait for the agent to exit when the console closes
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Console session around a supervisor
pub struct Console {
    supervisor: Supervisor,
    mode: OutputMode,
    auto_start: bool,
}

impl Console {
    pub fn new(supervisor: Supervisor, mode: OutputMode) -> Self {
        Self {
            supervisor,
            mode,
            auto_start: false,
        }
    }

    /// Start the agent as soon as the console is listening
    pub fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    /// Run until `/quit`, end of input, or `shutdown` resolves.
    ///
    /// Stops the agent before returning and hands back `output` once every
    /// event has been written.
    pub async fn run<R, W, S>(self, input: R, output: W, shutdown: S) -> anyhow::Result<W>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
        S: Future<Output = ()>,
    {
        let renderer = tokio::spawn(render_loop(self.supervisor.subscribe(), output, self.mode));

        if self.auto_start {
            self.supervisor.start();
        }

        let mut lines = input.lines();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if !self.dispatch(ConsoleCommand::parse(&line)).await {
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!("Console input closed");
                        break;
                    }
                    Err(e) => {
                        warn!("Failed to read console input: {}", e);
                        break;
                    }
                },
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
            }
        }

        self.close().await;
        let output = renderer.await??;
        Ok(output)
    }

    /// Handle one command; false means quit
    async fn dispatch(&self, command: ConsoleCommand) -> bool {
        match command {
            ConsoleCommand::Start => self.supervisor.start(),
            ConsoleCommand::Stop => self.supervisor.stop(),
            ConsoleCommand::Send(text) => {
                if !self.supervisor.is_running() {
                    debug!("Agent is not running; input may be dropped");
                }
                self.supervisor.send(text);
            }
            ConsoleCommand::Status => match self.supervisor.status().await {
                Some(status) => match status.command {
                    Some(command) => info!("Running: co {}", command.name()),
                    None => info!("Idle"),
                },
                None => warn!("Supervisor is not responding"),
            },
            ConsoleCommand::Quit => return false,
        }
        true
    }

    /// Stop the agent, then release the supervisor so the event stream ends
    async fn close(self) {
        let running = self
            .supervisor
            .status()
            .await
            .is_some_and(|status| status.running);

        if running {
            info!("Stopping agent");
            self.supervisor.stop();
            if !self.supervisor.wait_idle(STOP_TIMEOUT).await {
                warn!("Agent did not exit within {:?}", STOP_TIMEOUT);
            }
        }
    }
}

/// Write events to `output` until the supervisor is gone
async fn render_loop<W>(
    mut events: mpsc::UnboundedReceiver<AgentEvent>,
    mut output: W,
    mode: OutputMode,
) -> std::io::Result<W>
where
    W: AsyncWrite + Unpin,
{
    while let Some(event) = events.recv().await {
        if let AgentEvent::StateChanged { running } = event {
            info!("Agent {}", if running { "running" } else { "stopped" });
        }
        match render(&event, mode) {
            Ok(Some(text)) => {
                output.write_all(text.as_bytes()).await?;
                output.flush().await?;
            }
            Ok(None) => {}
            Err(e) => warn!("Failed to encode event: {}", e),
        }
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{SupervisorOptions, EXITED_NOTICE};
    use crate::config::CoHome;
    use crate::env::{EnvError, EnvironmentResolver, ShellDump};
    use crate::pty::fake::FakeLauncher;
    use std::fs;
    use std::sync::Arc;
    use tempfile::{tempdir, TempDir};

    struct NoShell;

    impl ShellDump for NoShell {
        fn dump(&self, _shell: &str) -> Result<String, EnvError> {
            Ok(String::new())
        }
    }

    fn ready_supervisor(launcher: FakeLauncher) -> (Supervisor, TempDir) {
        let dir = tempdir().unwrap();
        let home = CoHome::new(dir.path());
        fs::create_dir_all(home.config_dir()).unwrap();
        fs::write(home.keys_file(), "OPENONION_API_KEY=sk-test\n").unwrap();

        let resolver = Arc::new(EnvironmentResolver::with_source(
            Default::default(),
            "/bin/sh",
            NoShell,
        ));
        let supervisor = Supervisor::spawn(
            launcher,
            resolver,
            SupervisorOptions {
                home,
                program: "co".to_string(),
                bundled_binary: None,
            },
        );
        (supervisor, dir)
    }

    async fn run_console(console: Console, input: &'static [u8]) -> String {
        let output = tokio::time::timeout(
            Duration::from_secs(5),
            console.run(input, Vec::new(), std::future::pending()),
        )
        .await
        .expect("console did not finish")
        .unwrap();
        String::from_utf8(output).unwrap()
    }

    #[tokio::test]
    async fn test_json_session() {
        let launcher = FakeLauncher::default();
        let (supervisor, _dir) = ready_supervisor(launcher.clone());
        let console = Console::new(supervisor, OutputMode::Json);

        let text = run_console(console, b"/start\nhello agent\n/status\n/quit\nignored\n").await;

        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                r#"{"type":"state_changed","running":true}"#,
                r#"{"type":"output","text":"\n[co ai exited]\n"}"#,
                r#"{"type":"state_changed","running":false}"#,
            ]
        );
        assert_eq!(launcher.count(), 1);
        launcher.with(0, |l| {
            assert_eq!(l.input(), b"hello agent\n".to_vec());
            assert_eq!(l.terminate_count(), 1);
        });
    }

    #[tokio::test]
    async fn test_plain_session_with_auto_start() {
        let launcher = FakeLauncher::default();
        let (supervisor, _dir) = ready_supervisor(launcher.clone());
        let console = Console::new(supervisor, OutputMode::Plain).with_auto_start(true);

        // End of input closes the console
        let text = run_console(console, b"").await;
        assert_eq!(text, EXITED_NOTICE);
        assert_eq!(launcher.count(), 1);
    }

    #[tokio::test]
    async fn test_quit_while_idle() {
        let launcher = FakeLauncher::default();
        let (supervisor, _dir) = ready_supervisor(launcher.clone());
        let console = Console::new(supervisor, OutputMode::Plain);

        let text = run_console(console, b"just text\n/stop\n/quit\n").await;
        assert!(text.is_empty());
        assert_eq!(launcher.count(), 0);
    }

    #[tokio::test]
    async fn test_plain_session_keeps_long_output() {
        let launcher = FakeLauncher::default();
        let (supervisor, _dir) = ready_supervisor(launcher.clone());
        let console = Console::new(supervisor.clone(), OutputMode::Plain).with_auto_start(true);

        // A tiny pipe keeps the renderer blocked on its writer
        let (writer, mut reader) = tokio::io::duplex(16);
        let (_input, input) = tokio::io::duplex(64);
        let session = tokio::spawn(async move {
            // Dropping the returned writer ends the reader's stream
            console
                .run(
                    tokio::io::BufReader::new(input),
                    writer,
                    tokio::time::sleep(Duration::from_millis(300)),
                )
                .await
                .map(drop)
        });

        // The console subscribes before it auto-starts
        while launcher.count() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        launcher.with(0, |l| {
            for i in 0..2000 {
                l.output(format!("{i}\n").as_bytes());
            }
        });
        drop(supervisor);

        let mut text = String::new();
        tokio::time::timeout(
            Duration::from_secs(5),
            tokio::io::AsyncReadExt::read_to_string(&mut reader, &mut text),
        )
        .await
        .expect("console did not finish")
        .unwrap();
        session.await.unwrap().unwrap();

        let expected: String = (0..2000).map(|i| format!("{i}\n")).collect();
        assert_eq!(text, format!("{expected}{EXITED_NOTICE}"));
    }

    #[tokio::test]
    async fn test_shutdown_future_ends_session() {
        let launcher = FakeLauncher::default();
        let (supervisor, _dir) = ready_supervisor(launcher.clone());
        let console = Console::new(supervisor, OutputMode::Json).with_auto_start(true);

        // Input that never ends
        let (_writer, reader) = tokio::io::duplex(64);
        let output = console
            .run(
                tokio::io::BufReader::new(reader),
                Vec::new(),
                tokio::time::sleep(Duration::from_millis(100)),
            )
            .await
            .unwrap();

        let text = String::from_utf8(output).unwrap();
        assert!(text.ends_with("{\"type\":\"state_changed\",\"running\":false}\n"));
        launcher.with(0, |l| assert_eq!(l.terminate_count(), 1));
    }
}
