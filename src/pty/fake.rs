//! Test launcher
//!
//! Records every launch request instead of spawning, and lets tests emit
//! output and exit events for the recorded processes by hand.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use super::{
    ExitReason, LaunchRequest, ProcessEvent, ProcessEventKind, ProcessEventSender, ProcessExit,
    ProcessHandle, ProcessLauncher, PtyError, PtyResult,
};

/// A recorded launch
pub struct Launched {
    pub id: Uuid,
    pub request: LaunchRequest,
    pub events: ProcessEventSender,
    pub input: Arc<Mutex<Vec<u8>>>,
    pub terminated: Arc<AtomicUsize>,
}

impl Launched {
    pub fn args(&self) -> Vec<&str> {
        self.request.target.args.iter().map(String::as_str).collect()
    }

    /// Emit an output chunk
    pub fn output(&self, data: &[u8]) {
        self.events
            .send(ProcessEvent {
                id: self.id,
                kind: ProcessEventKind::Output(data.to_vec()),
            })
            .unwrap();
    }

    /// Emit the exit event
    pub fn exit(&self, code: i32) {
        send_exit(&self.events, self.id, code);
    }

    /// Everything written to stdin so far
    pub fn input(&self) -> Vec<u8> {
        self.input.lock().unwrap().clone()
    }

    pub fn terminate_count(&self) -> usize {
        self.terminated.load(Ordering::SeqCst)
    }
}

pub fn send_exit(events: &ProcessEventSender, id: Uuid, code: i32) {
    // The receiver is gone once the supervisor task has finished
    let _ = events.send(ProcessEvent {
        id,
        kind: ProcessEventKind::Exited(ProcessExit {
            exit_code: Some(code),
            reason: ExitReason::Normal,
        }),
    });
}

struct FakeHandle {
    id: Uuid,
    events: ProcessEventSender,
    input: Arc<Mutex<Vec<u8>>>,
    terminated: Arc<AtomicUsize>,
}

impl ProcessHandle for FakeHandle {
    fn write(&mut self, data: &[u8]) -> PtyResult<()> {
        self.input.lock().unwrap().extend_from_slice(data);
        Ok(())
    }

    /// Exits on SIGTERM like a well-behaved child
    fn terminate(&mut self) -> PtyResult<()> {
        self.terminated.fetch_add(1, Ordering::SeqCst);
        send_exit(&self.events, self.id, 143);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct FakeLauncher {
    pub launches: Arc<Mutex<Vec<Launched>>>,
    /// Reject every launch as if `co` were missing
    pub fail: bool,
}

impl FakeLauncher {
    pub fn failing() -> Self {
        Self {
            launches: Arc::default(),
            fail: true,
        }
    }

    pub fn count(&self) -> usize {
        self.launches.lock().unwrap().len()
    }

    /// Run `f` against the `index`th launch
    pub fn with<R>(&self, index: usize, f: impl FnOnce(&Launched) -> R) -> R {
        f(&self.launches.lock().unwrap()[index])
    }
}

impl ProcessLauncher for FakeLauncher {
    fn launch(
        &self,
        request: LaunchRequest,
        events: ProcessEventSender,
    ) -> PtyResult<Box<dyn ProcessHandle>> {
        if self.fail {
            return Err(PtyError::SpawnFailed("co: not found".to_string()));
        }

        let input = Arc::new(Mutex::new(Vec::new()));
        let terminated = Arc::new(AtomicUsize::new(0));
        let handle = FakeHandle {
            id: request.id,
            events: events.clone(),
            input: Arc::clone(&input),
            terminated: Arc::clone(&terminated),
        };
        self.launches.lock().unwrap().push(Launched {
            id: request.id,
            request,
            events,
            input,
            terminated,
        });
        Ok(Box::new(handle))
    }
}
