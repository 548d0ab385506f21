//! Host event channel: the only way other threads reach a scheduler.
//!
//! Process reader threads and foreign wakers never touch computations
//! directly. They post a [`HostEvent`] to the owning thread's channel and the
//! runtime loop dispatches it on that thread, between steps.

use crate::process::{self, ProcessEvent};
use crate::runtime::context;
use crate::runtime::scheduler::Resume;
use crate::task::TaskId;

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use tracing::trace;

/// Something that happened off-thread and must be handled on the owning one.
#[derive(Debug)]
pub(crate) enum HostEvent {
    /// A waker created for this computation was woken.
    Wake(TaskId),
    /// Output, end of stream or exit of a child process.
    Process { key: u64, event: ProcessEvent },
}

pub(crate) struct Host {
    sender: Sender<HostEvent>,
    receiver: Receiver<HostEvent>,
    /// One clone per live waker; see [`Host::outstanding_wakers`].
    wake_token: Arc<()>,
}

impl Host {
    pub(crate) fn new() -> Self {
        let (sender, receiver) = mpsc::channel();

        Self {
            sender,
            receiver,
            wake_token: Arc::new(()),
        }
    }

    pub(crate) fn sender(&self) -> Sender<HostEvent> {
        self.sender.clone()
    }

    pub(crate) fn wake_token(&self) -> Arc<()> {
        self.wake_token.clone()
    }

    /// Wakers that are still alive somewhere and may post a wake later.
    pub(crate) fn outstanding_wakers(&self) -> usize {
        Arc::strong_count(&self.wake_token) - 1
    }

    pub(crate) fn try_next(&self) -> Option<HostEvent> {
        self.receiver.try_recv().ok()
    }

    /// Blocks for the next event, for at most `timeout` (forever if `None`).
    pub(crate) fn next_timeout(&self, timeout: Option<Duration>) -> Option<HostEvent> {
        match timeout {
            Some(timeout) => match self.receiver.recv_timeout(timeout) {
                Ok(event) => Some(event),
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
            },
            // The host keeps a sender itself, so this only returns on an event.
            None => self.receiver.recv().ok(),
        }
    }
}

/// Handles one host event on the owning thread.
pub(crate) fn dispatch(event: HostEvent) {
    trace!(?event, "dispatching host event");

    match event {
        HostEvent::Wake(task) => {
            // The computation may have finished since the waker fired.
            let _ = context::scheduler().resume(task, Resume::Wake);
        }
        HostEvent::Process { key, event } => process::dispatch(key, event),
    }
}

/// Dispatches every event already queued; returns how many there were.
pub(crate) fn dispatch_pending() -> usize {
    let mut dispatched = 0;
    while let Some(event) = context::with_host(Host::try_next) {
        dispatch(event);
        dispatched += 1;
    }

    dispatched
}
