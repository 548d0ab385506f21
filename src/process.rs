//! Host process facility.
//!
//! A [`Process`] wraps a [`Command`] with piped stdin and stdout. Once started,
//! a reader thread forwards stdout bytes, end of stream and the exit status to
//! the owning thread through the host channel; the runtime loop turns them
//! into signal firings there:
//!
//! | signal                  | payload                  |
//! |-------------------------|--------------------------|
//! | `started`               | none                     |
//! | `ready_read`            | none                     |
//! | `read_channel_finished` | none                     |
//! | `finished`              | exit code, crashed flag  |
//! | `error_occurred`        | message                  |
//!
//! The exit code is `-1` when the process was ended by a signal.

use crate::error::{Error, Result};
use crate::runtime::context;
use crate::runtime::host::HostEvent;
use crate::signal::{Callback, Connection, EventQueue, EventSource, Signal, SourceId, Value};
use crate::stream::ReadableSource;

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::io::{self, Read, Write};
use std::process::{ChildStdin, Command, Stdio};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::thread;

use tracing::{debug, warn};

static NEXT_PROCESS_KEY: AtomicU64 = AtomicU64::new(1);

const READ_CHUNK: usize = 4096;

thread_local! {
    static PROCESSES: RefCell<HashMap<u64, Weak<ProcessInner>>> = RefCell::new(HashMap::new());
}

/// How a process ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExitStatus {
    /// Exit code; `None` when the process was ended by a signal.
    pub code: Option<i32>,
    pub crashed: bool,
}

impl ExitStatus {
    /// True for a normal exit with code 0.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        Self {
            code: status.code(),
            crashed: status.code().is_none(),
        }
    }
}

/// What a reader thread reports about its child.
#[derive(Debug)]
pub(crate) enum ProcessEvent {
    Output(Vec<u8>),
    Eof,
    Exited(ExitStatus),
    Failed(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessState {
    NotRunning,
    Running,
    Finished,
}

struct Signals {
    started: Signal,
    ready_read: Signal,
    read_channel_finished: Signal,
    finished: Signal,
    error_occurred: Signal,
}

impl Signals {
    fn new(sender: SourceId) -> Self {
        Self {
            started: Signal::with_sender(sender, "started"),
            ready_read: Signal::with_sender(sender, "ready_read"),
            read_channel_finished: Signal::with_sender(sender, "read_channel_finished"),
            finished: Signal::with_sender(sender, "finished"),
            error_occurred: Signal::with_sender(sender, "error_occurred"),
        }
    }

    fn all(&self) -> [&Signal; 5] {
        [
            &self.started,
            &self.ready_read,
            &self.read_channel_finished,
            &self.finished,
            &self.error_occurred,
        ]
    }
}

struct ProcessInner {
    key: u64,
    program: String,
    command: RefCell<Option<Command>>,
    pid: Cell<Option<u32>>,
    stdin: RefCell<Option<ChildStdin>>,
    stdout: RefCell<Vec<u8>>,
    read_finished: Cell<bool>,
    state: Cell<ProcessState>,
    exit: Cell<Option<ExitStatus>>,
    signals: Signals,
}

impl Drop for ProcessInner {
    fn drop(&mut self) {
        let key = self.key;
        let _ = PROCESSES.try_with(|processes| processes.borrow_mut().remove(&key));

        if self.state.get() == ProcessState::Running {
            if let Some(pid) = self.pid.get() {
                debug!(program = %self.program, pid, "killing process dropped while running");
                let _ = send_signal(pid, Kill::Force);
            }
        }

        for signal in self.signals.all() {
            signal.close();
        }
    }
}

/// A child process whose lifecycle is reported through signals.
///
/// Cheap to clone; clones refer to the same process. The child is killed
/// when the last clone is dropped while it is still running.
#[derive(Clone)]
pub struct Process {
    inner: Rc<ProcessInner>,
}

impl Process {
    /// Wraps `command`; stdin and stdout are replaced by pipes on `start`.
    pub fn new(command: Command) -> Self {
        let program = command.get_program().to_string_lossy().into_owned();

        Self {
            inner: Rc::new(ProcessInner {
                key: NEXT_PROCESS_KEY.fetch_add(1, Ordering::Relaxed),
                program,
                command: RefCell::new(Some(command)),
                pid: Cell::new(None),
                stdin: RefCell::new(None),
                stdout: RefCell::new(Vec::new()),
                read_finished: Cell::new(false),
                state: Cell::new(ProcessState::NotRunning),
                exit: Cell::new(None),
                signals: Signals::new(SourceId::new()),
            }),
        }
    }

    /// Spawns the child and its reader thread, then fires `started`.
    ///
    /// # Errors
    /// [`Error::Process`] if the process was already started or cannot be
    /// spawned; `error_occurred` fires as well in the latter case.
    pub fn start(&self) -> Result<()> {
        let Some(mut command) = self.inner.command.borrow_mut().take() else {
            return Err(self.failure("process can only be started once"));
        };

        let mut child = match command.stdin(Stdio::piped()).stdout(Stdio::piped()).spawn() {
            Ok(child) => child,
            Err(error) => {
                let message = format!("failed to start: {error}");
                warn!(program = %self.inner.program, %error, "process failed to start");
                self.inner.state.set(ProcessState::Finished);
                self.inner.signals.error_occurred.emit([Value::from(message.as_str())]);
                return Err(self.failure(message));
            }
        };

        let key = self.inner.key;
        let pid = child.id();
        self.inner.pid.set(Some(pid));
        *self.inner.stdin.borrow_mut() = child.stdin.take();
        self.inner.state.set(ProcessState::Running);
        PROCESSES.with(|processes| {
            processes
                .borrow_mut()
                .insert(key, Rc::downgrade(&self.inner))
        });

        let sender = context::with_host(|host| host.sender());
        let stdout = child.stdout.take();
        let spawned = thread::Builder::new()
            .name(format!("sigbridge-process-{key}"))
            .spawn(move || {
                if let Some(stdout) = stdout {
                    forward_output(key, stdout, &sender);
                }

                let event = match child.wait() {
                    Ok(status) => ProcessEvent::Exited(status.into()),
                    Err(error) => ProcessEvent::Failed(format!("failed to wait: {error}")),
                };
                let _ = sender.send(HostEvent::Process { key, event });
            });

        if let Err(error) = spawned {
            let _ = send_signal(pid, Kill::Force);
            self.inner.state.set(ProcessState::Finished);
            return Err(error.into());
        }

        debug!(program = %self.inner.program, pid, "process started");
        self.inner.signals.started.emit([]);

        Ok(())
    }

    /// Program name the process was created with.
    pub fn program(&self) -> &str {
        &self.inner.program
    }

    /// Lifecycle state, updated as host events are dispatched.
    pub fn state(&self) -> ProcessState {
        self.inner.state.get()
    }

    /// OS process id, once started.
    pub fn id(&self) -> Option<u32> {
        self.inner.pid.get()
    }

    /// How the child exited.
    ///
    /// # Returns
    /// `None` until `finished` has fired.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.inner.exit.get()
    }

    /// Sender identity shared by all of this process's signals.
    pub fn source_id(&self) -> SourceId {
        self.inner.signals.finished.sender()
    }

    /// Asks the process to exit (SIGTERM).
    pub fn terminate(&self) -> Result<()> {
        self.signal_running(Kill::Graceful)
    }

    /// Ends the process immediately (SIGKILL).
    pub fn kill(&self) -> Result<()> {
        self.signal_running(Kill::Force)
    }

    fn signal_running(&self, kill: Kill) -> Result<()> {
        match (self.inner.state.get(), self.inner.pid.get()) {
            (ProcessState::Running, Some(pid)) => {
                debug!(program = %self.inner.program, pid, ?kill, "signalling process");
                send_signal(pid, kill).map_err(Error::from)
            }
            _ => Ok(()),
        }
    }

    /// Writes to the child's stdin.
    pub fn write_stdin(&self, data: &[u8]) -> Result<()> {
        let mut stdin = self.inner.stdin.borrow_mut();
        let Some(pipe) = stdin.as_mut() else {
            return Err(self.failure("stdin is not open"));
        };
        pipe.write_all(data)?;
        pipe.flush()?;

        Ok(())
    }

    /// Closes stdin, signalling end of input to the child.
    pub fn close_stdin(&self) {
        self.inner.stdin.borrow_mut().take();
    }

    /// Takes everything buffered from stdout so far.
    pub fn read_all_stdout(&self) -> Vec<u8> {
        std::mem::take(&mut *self.inner.stdout.borrow_mut())
    }

    /// Fires once the child has been spawned.
    pub fn started(&self) -> &Signal {
        &self.inner.signals.started
    }

    /// Fires whenever new stdout bytes are buffered.
    pub fn ready_read(&self) -> &Signal {
        &self.inner.signals.ready_read
    }

    /// Fires once stdout reaches end of stream.
    pub fn read_channel_finished(&self) -> &Signal {
        &self.inner.signals.read_channel_finished
    }

    /// Fires with `(exit_code, crashed)` once the child has exited.
    pub fn finished(&self) -> &Signal {
        &self.inner.signals.finished
    }

    /// Fires with a message when the child cannot be started or waited for.
    pub fn error_occurred(&self) -> &Signal {
        &self.inner.signals.error_occurred
    }

    fn failure(&self, message: impl Into<String>) -> Error {
        Error::Process {
            program: self.inner.program.clone(),
            message: message.into(),
        }
    }

    fn on_event(&self, event: ProcessEvent) {
        let inner = &self.inner;
        match event {
            ProcessEvent::Output(bytes) => {
                inner.stdout.borrow_mut().extend_from_slice(&bytes);
                inner.signals.ready_read.emit([]);
            }
            ProcessEvent::Eof => {
                inner.read_finished.set(true);
                inner.signals.read_channel_finished.emit([]);
            }
            ProcessEvent::Exited(status) => {
                debug!(program = %inner.program, ?status, "process finished");
                inner.state.set(ProcessState::Finished);
                inner.exit.set(Some(status));
                inner.stdin.borrow_mut().take();
                inner.signals.finished.emit([
                    Value::from(i64::from(status.code.unwrap_or(-1))),
                    Value::from(status.crashed),
                ]);
            }
            ProcessEvent::Failed(message) => {
                warn!(program = %inner.program, %message, "process failed");
                inner.state.set(ProcessState::Finished);
                inner.signals.error_occurred.emit([Value::from(message)]);
            }
        }
    }
}

impl EventSource for Process {
    /// Subscribes to `finished`, the event most waits are about.
    fn register_callback(&self, callback: Callback) -> Result<Connection> {
        self.inner.signals.finished.register_callback(callback)
    }
}

impl ReadableSource for Process {
    fn read_available(&self, max: usize) -> Vec<u8> {
        let mut stdout = self.inner.stdout.borrow_mut();
        let take = if max == 0 { stdout.len() } else { max.min(stdout.len()) };
        stdout.drain(..take).collect()
    }

    fn is_read_finished(&self) -> bool {
        self.inner.read_finished.get()
    }

    fn ready_read(&self) -> &Signal {
        &self.inner.signals.ready_read
    }

    fn read_finished(&self) -> &Signal {
        &self.inner.signals.read_channel_finished
    }
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process")
            .field("program", &self.inner.program)
            .field("pid", &self.inner.pid.get())
            .field("state", &self.inner.state.get())
            .field("exit", &self.inner.exit.get())
            .finish()
    }
}

fn forward_output(key: u64, mut stdout: impl Read, sender: &Sender<HostEvent>) {
    let mut buf = [0u8; READ_CHUNK];
    loop {
        let event = match stdout.read(&mut buf) {
            Ok(0) => ProcessEvent::Eof,
            Ok(n) => ProcessEvent::Output(buf[..n].to_vec()),
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(error) => {
                warn!(key, %error, "stdout read failed; treating as end of stream");
                ProcessEvent::Eof
            }
        };
        let last = matches!(event, ProcessEvent::Eof);
        if sender.send(HostEvent::Process { key, event }).is_err() || last {
            return;
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum Kill {
    Graceful,
    Force,
}

#[cfg(unix)]
fn send_signal(pid: u32, kill: Kill) -> io::Result<()> {
    let signal = match kill {
        Kill::Graceful => libc::SIGTERM,
        Kill::Force => libc::SIGKILL,
    };

    let rc = unsafe { libc::kill(pid as libc::pid_t, signal) };
    if rc == -1 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

#[cfg(not(unix))]
fn send_signal(_pid: u32, _kill: Kill) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "process signals are only supported on unix",
    ))
}

/// Delivers a reader-thread event to its process, if it still exists.
pub(crate) fn dispatch(key: u64, event: ProcessEvent) {
    let process = PROCESSES.with(|processes| processes.borrow().get(&key).and_then(Weak::upgrade));

    match process {
        Some(inner) => Process { inner }.on_event(event),
        None => debug!(key, ?event, "event for a dropped process ignored"),
    }
}

/// Number of started processes on this thread that have not finished.
pub(crate) fn live_count() -> usize {
    PROCESSES.with(|processes| {
        processes
            .borrow()
            .values()
            .filter_map(Weak::upgrade)
            .filter(|inner| inner.state.get() == ProcessState::Running)
            .count()
    })
}

/// Starts `process` and suspends until it finishes.
///
/// If the waiting computation is cancelled, the process is killed before the
/// cancellation propagates.
///
/// # Errors
/// [`Error::Process`] when the process cannot be started or waited for.
///
/// # Example
/// ```ignore
/// let mut command = Command::new("sh");
/// command.args(["-c", "echo 42"]);
/// let process = Process::new(command);
/// let status = run_process(&process).await?;
/// assert!(status.success());
/// assert_eq!(process.read_all_stdout(), b"42\n");
/// ```
pub async fn run_process(process: &Process) -> Result<ExitStatus> {
    let queue = EventQueue::new();
    queue.attach(process.finished());
    queue.attach(process.error_occurred());
    process.start()?;

    match queue.wait().await {
        Ok(notification) if notification.kind() == "finished" => process
            .exit_status()
            .ok_or_else(|| process.failure("finished without an exit status")),
        Ok(notification) => {
            let message = notification
                .get(0)
                .and_then(Value::as_text)
                .unwrap_or("unknown error")
                .to_owned();
            Err(process.failure(message))
        }
        Err(error) => {
            if error.is_cancelled() {
                debug!(program = %process.program(), "cancelled; killing process");
                if let Err(kill_error) = process.kill() {
                    warn!(program = %process.program(), %kill_error, "failed to kill process");
                }
            }
            Err(error)
        }
    }
}
