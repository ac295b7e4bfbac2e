//! PTY process management
//!
//! Runs a child on a pseudo-terminal, which gives a single combined
//! stdout/stderr stream and a writable stdin. Three threads serve each child:
//! - reader: blocking reads from the PTY master
//! - waiter: blocks on the child's exit status
//! - pump: forwards both to the event channel, output first, exit last

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
#[cfg(not(unix))]
use portable_pty::ChildKiller;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};
use uuid::Uuid;

use super::{
    ExitReason, LaunchRequest, ProcessEvent, ProcessEventKind, ProcessEventSender, ProcessExit,
    ProcessHandle, ProcessLauncher, PtyError, PtyResult,
};

/// How long output may trail the exit status before it is abandoned.
///
/// A grandchild that inherited the terminal can keep the master open after
/// the direct child is gone.
const DRAIN_GRACE: Duration = Duration::from_millis(100);

/// Terminal size configuration
#[derive(Debug, Clone, Copy)]
pub struct TerminalSize {
    pub cols: u16,
    pub rows: u16,
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

impl TerminalSize {
    /// Create a new terminal size
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }

    /// Convert to portable-pty PtySize
    fn to_pty_size(self) -> PtySize {
        PtySize {
            rows: self.rows,
            cols: self.cols,
            pixel_width: 0,
            pixel_height: 0,
        }
    }
}

/// What the reader and waiter threads hand to the pump
enum Pump {
    Chunk(Vec<u8>),
    Exited(ProcessExit),
}

/// Handle to a running PTY process
pub struct PtyProcess {
    /// Unique identifier
    id: Uuid,
    /// Kept alive so the child's terminal stays open
    _master: Box<dyn MasterPty + Send>,
    /// Writer for sending input
    writer: Box<dyn Write + Send>,
    /// Set by the waiter thread once the child has been reaped
    reaped: Arc<AtomicBool>,
    /// OS process id, used for SIGTERM
    #[cfg(unix)]
    pid: Option<u32>,
    #[cfg(not(unix))]
    killer: Box<dyn ChildKiller + Send + Sync>,
}

impl PtyProcess {
    /// Spawn a new process on a PTY.
    ///
    /// Output and exit are reported on `events` tagged with `request.id`.
    pub fn spawn(
        request: LaunchRequest,
        size: TerminalSize,
        events: ProcessEventSender,
    ) -> PtyResult<Self> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(size.to_pty_size())
            .map_err(|e| PtyError::OpenFailed(e.to_string()))?;

        #[cfg(unix)]
        disable_echo(&*pair.master)?;

        let mut cmd = CommandBuilder::new(&request.target.program);
        cmd.args(&request.target.args);
        cmd.cwd(&request.cwd);

        // The resolved snapshot replaces the launcher's environment entirely
        cmd.env_clear();
        for (key, value) in request.env.iter() {
            cmd.env(key, value);
        }
        if !request.env.contains_key("TERM") {
            cmd.env("TERM", "xterm-256color");
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| PtyError::SpawnFailed(e.to_string()))?;

        // Only the child holds the slave now, so EOF follows its exit
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| PtyError::SystemError(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| PtyError::SystemError(e.to_string()))?;

        #[cfg(unix)]
        let pid = child.process_id();
        #[cfg(not(unix))]
        let killer = child.clone_killer();

        let (pump_tx, pump_rx) = std_mpsc::channel();
        let waiter_tx = pump_tx.clone();
        let id = request.id;
        let reaped = Arc::new(AtomicBool::new(false));
        let waiter_reaped = Arc::clone(&reaped);

        std::thread::spawn(move || Self::reader_loop(reader, pump_tx));
        std::thread::spawn(move || Self::wait_loop(child, waiter_reaped, waiter_tx));
        std::thread::spawn(move || Self::pump_loop(id, pump_rx, events));

        debug!("Spawned process {} ({:?})", id, request.target.program);

        Ok(Self {
            id,
            _master: pair.master,
            writer,
            reaped,
            #[cfg(unix)]
            pid,
            #[cfg(not(unix))]
            killer,
        })
    }

    /// Blocking reads from the master until EOF or error
    fn reader_loop(mut reader: Box<dyn Read + Send>, pump: std_mpsc::Sender<Pump>) {
        let mut buffer = [0u8; 4096];

        loop {
            match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => {
                    if pump.send(Pump::Chunk(buffer[..n].to_vec())).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                // EIO once the child side is closed
                Err(_) => break,
            }
        }
    }

    fn wait_loop(
        mut child: Box<dyn Child + Send + Sync>,
        reaped: Arc<AtomicBool>,
        pump: std_mpsc::Sender<Pump>,
    ) {
        let status = child.wait();
        // The pid may be reused from here on
        reaped.store(true, Ordering::SeqCst);

        let exit = match status {
            Ok(status) => ProcessExit {
                exit_code: Some(status.exit_code() as i32),
                reason: ExitReason::Normal,
            },
            Err(_) => ProcessExit {
                exit_code: None,
                reason: ExitReason::Unknown,
            },
        };
        let _ = pump.send(Pump::Exited(exit));
    }

    /// Forward chunks as they arrive; on exit, drain trailing output then
    /// report the exit exactly once.
    fn pump_loop(id: Uuid, pump: std_mpsc::Receiver<Pump>, events: ProcessEventSender) {
        let forward = |data: Vec<u8>| {
            let _ = events.send(ProcessEvent {
                id,
                kind: ProcessEventKind::Output(data),
            });
        };

        let exit = loop {
            match pump.recv() {
                Ok(Pump::Chunk(data)) => forward(data),
                Ok(Pump::Exited(exit)) => break exit,
                Err(_) => {
                    break ProcessExit {
                        exit_code: None,
                        reason: ExitReason::Unknown,
                    }
                }
            }
        };

        while let Ok(msg) = pump.recv_timeout(DRAIN_GRACE) {
            if let Pump::Chunk(data) = msg {
                forward(data);
            }
        }

        trace!("Process {} exited: {:?}", id, exit);
        let _ = events.send(ProcessEvent {
            id,
            kind: ProcessEventKind::Exited(exit),
        });
    }
}

impl ProcessHandle for PtyProcess {
    fn write(&mut self, data: &[u8]) -> PtyResult<()> {
        self.writer
            .write_all(data)
            .map_err(|e| PtyError::WriteFailed(e.to_string()))?;
        self.writer
            .flush()
            .map_err(|e| PtyError::WriteFailed(e.to_string()))?;
        Ok(())
    }

    #[cfg(unix)]
    fn terminate(&mut self) -> PtyResult<()> {
        if self.reaped.load(Ordering::SeqCst) {
            return Err(PtyError::ProcessExited);
        }
        let pid = self.pid.ok_or(PtyError::ProcessExited)?;
        debug!("Sending SIGTERM to process {} (pid {})", self.id, pid);
        // SAFETY: kill(2) has no memory-safety preconditions
        let result = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if result != 0 {
            return Err(PtyError::SignalFailed(
                std::io::Error::last_os_error().to_string(),
            ));
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn terminate(&mut self) -> PtyResult<()> {
        if self.reaped.load(Ordering::SeqCst) {
            return Err(PtyError::ProcessExited);
        }
        debug!("Killing process {}", self.id);
        self.killer
            .kill()
            .map_err(|e| PtyError::SignalFailed(e.to_string()))
    }
}

/// Pass the child's output through untouched.
///
/// The default line discipline echoes input back and turns `\n` into
/// `\r\n`; the child shares these settings with the master.
#[cfg(unix)]
fn disable_echo(master: &(dyn MasterPty + Send)) -> PtyResult<()> {
    let fd = master
        .as_raw_fd()
        .ok_or_else(|| PtyError::SystemError("PTY master has no file descriptor".to_string()))?;

    // SAFETY: termios is plain data and is filled by tcgetattr before use
    let mut termios: libc::termios = unsafe { std::mem::zeroed() };
    if unsafe { libc::tcgetattr(fd, &mut termios) } != 0 {
        return Err(PtyError::SystemError(
            std::io::Error::last_os_error().to_string(),
        ));
    }

    termios.c_lflag &= !(libc::ECHO | libc::ECHONL);
    termios.c_oflag &= !libc::ONLCR;

    if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &termios) } != 0 {
        return Err(PtyError::SystemError(
            std::io::Error::last_os_error().to_string(),
        ));
    }
    Ok(())
}

/// Launches every process on its own PTY
#[derive(Debug, Default, Clone, Copy)]
pub struct PtyLauncher {
    size: TerminalSize,
}

impl PtyLauncher {
    pub fn new(size: TerminalSize) -> Self {
        Self { size }
    }
}

impl ProcessLauncher for PtyLauncher {
    fn launch(
        &self,
        request: LaunchRequest,
        events: ProcessEventSender,
    ) -> PtyResult<Box<dyn ProcessHandle>> {
        Ok(Box::new(PtyProcess::spawn(request, self.size, events)?))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::env::Environment;
    use crate::pty::LaunchTarget;
    use std::path::PathBuf;
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn request(program: &str, args: &[&str], env: Environment) -> LaunchRequest {
        LaunchRequest {
            id: Uuid::new_v4(),
            target: LaunchTarget {
                program: PathBuf::from(program),
                args: args.iter().map(|a| a.to_string()).collect(),
            },
            env: Arc::new(env),
            cwd: PathBuf::from("/tmp"),
        }
    }

    fn path_env() -> Environment {
        Environment::from([("PATH".to_string(), "/usr/bin:/bin".to_string())])
    }

    /// Collect output until the exit event; returns (text, exit)
    async fn collect(rx: &mut mpsc::UnboundedReceiver<ProcessEvent>) -> (String, ProcessExit) {
        let mut text = String::new();
        loop {
            let event = timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out waiting for process event")
                .expect("event channel closed");
            match event.kind {
                ProcessEventKind::Output(data) => text.push_str(&String::from_utf8_lossy(&data)),
                ProcessEventKind::Exited(exit) => return (text, exit),
            }
        }
    }

    #[test]
    fn test_terminal_size_default() {
        let size = TerminalSize::default();
        assert_eq!(size.cols, 80);
        assert_eq!(size.rows, 24);
    }

    #[tokio::test]
    async fn test_spawn_process() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let req = request("echo", &["hello"], path_env());
        let id = req.id;
        let _process = PtyProcess::spawn(req, TerminalSize::default(), tx).unwrap();

        let first = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        assert_eq!(first.id, id);
        let mut text = match first.kind {
            ProcessEventKind::Output(data) => String::from_utf8_lossy(&data).into_owned(),
            ProcessEventKind::Exited(_) => panic!("exit before output"),
        };
        let (rest, exit) = collect(&mut rx).await;
        text.push_str(&rest);
        assert!(text.contains("hello"));
        assert_eq!(exit.exit_code, Some(0));
        assert_eq!(exit.reason, ExitReason::Normal);
    }

    #[tokio::test]
    async fn test_exit_code_reported() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _process =
            PtyProcess::spawn(request("sh", &["-c", "exit 3"], path_env()), TerminalSize::default(), tx)
                .unwrap();

        let (_, exit) = collect(&mut rx).await;
        assert_eq!(exit.exit_code, Some(3));
    }

    #[tokio::test]
    async fn test_environment_is_replaced() {
        std::env::set_var("CO_MENUBAR_LEAK_CHECK", "leaked");
        let mut env = path_env();
        env.insert("FOO".to_string(), "bar".to_string());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _process = PtyProcess::spawn(
            request("sh", &["-c", "echo \"[$FOO|$CO_MENUBAR_LEAK_CHECK]\""], env),
            TerminalSize::default(),
            tx,
        )
        .unwrap();

        let (text, _) = collect(&mut rx).await;
        assert!(text.contains("[bar|]"));
    }

    #[tokio::test]
    async fn test_process_write_and_terminate() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut process =
            PtyProcess::spawn(request("cat", &[], path_env()), TerminalSize::default(), tx).unwrap();

        process.write(b"ping\n").unwrap();

        let mut text = String::new();
        while !text.contains("ping") {
            let event = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
            if let ProcessEventKind::Output(data) = event.kind {
                text.push_str(&String::from_utf8_lossy(&data));
            }
        }

        process.terminate().unwrap();
        let (_, exit) = collect(&mut rx).await;
        assert_eq!(exit.reason, ExitReason::Normal);
    }

    #[tokio::test]
    async fn test_output_is_not_rewritten() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut process = PtyProcess::spawn(
            request("sh", &["-c", "read x; printf 'got:%s\\n' \"$x\""], path_env()),
            TerminalSize::default(),
            tx,
        )
        .unwrap();

        process.write(b"secret\n").unwrap();

        let (text, exit) = collect(&mut rx).await;
        assert_eq!(text, "got:secret\n");
        assert_eq!(exit.exit_code, Some(0));
    }

    #[tokio::test]
    async fn test_terminate_after_exit() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut process =
            PtyProcess::spawn(request("sh", &["-c", "exit 0"], path_env()), TerminalSize::default(), tx)
                .unwrap();

        // The exit event is only sent after the child has been reaped
        collect(&mut rx).await;
        assert!(matches!(process.terminate(), Err(PtyError::ProcessExited)));
    }

    #[tokio::test]
    async fn test_spawn_missing_program() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = PtyProcess::spawn(
            request("definitely-not-a-real-co-binary", &[], path_env()),
            TerminalSize::default(),
            tx,
        );
        assert!(matches!(result, Err(PtyError::SpawnFailed(_))));
    }

    #[tokio::test]
    async fn test_launcher_returns_handle() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let launcher = PtyLauncher::new(TerminalSize::new(120, 40));
        let _handle = launcher
            .launch(request("sh", &["-c", "stty size"], path_env()), tx)
            .unwrap();

        let (text, _) = collect(&mut rx).await;
        assert!(text.contains("40 120"));
    }
}
