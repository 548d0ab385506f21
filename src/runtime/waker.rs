//! Waker implementation for computations.
//!
//! Suspension points of this crate never use the waker: queues and races
//! resume computations through the scheduler directly. The waker exists so
//! foreign futures (channels, `futures` combinators) can be awaited inside a
//! computation. Waking posts [`HostEvent::Wake`] to the owning thread, which
//! makes it safe to wake from any thread.

use crate::runtime::context;
use crate::runtime::host::HostEvent;
use crate::task::TaskId;

use std::sync::Arc;
use std::sync::mpsc::Sender;
use std::task::{RawWaker, RawWakerVTable, Waker};

/// Waker that re-schedules one computation through the host channel.
pub(crate) struct TaskWaker {
    task: TaskId,
    sender: Sender<HostEvent>,
    /// Keeps the host's outstanding-waker count up while this waker lives.
    _token: Arc<()>,
}

impl TaskWaker {
    fn new(task: TaskId) -> Arc<Self> {
        context::with_host(|host| {
            Arc::new(Self {
                task,
                sender: host.sender(),
                _token: host.wake_token(),
            })
        })
    }

    fn wake(self: &Arc<Self>) {
        // The owning thread is gone when the send fails; nothing to resume.
        let _ = self.sender.send(HostEvent::Wake(self.task));
    }

    fn clone_raw(ptr: *const ()) -> RawWaker {
        unsafe {
            let arc = Arc::<TaskWaker>::from_raw(ptr as *const TaskWaker);
            let cloned = arc.clone();
            std::mem::forget(arc);
            RawWaker::new(Arc::into_raw(cloned) as *const (), &Self::VTABLE)
        }
    }

    fn wake_raw(ptr: *const ()) {
        unsafe {
            let arc = Arc::<TaskWaker>::from_raw(ptr as *const TaskWaker);
            arc.wake();
        }
    }

    fn wake_by_ref_raw(ptr: *const ()) {
        unsafe {
            let arc = Arc::<TaskWaker>::from_raw(ptr as *const TaskWaker);
            arc.wake();
            let _ = Arc::into_raw(arc);
        }
    }

    fn drop_raw(ptr: *const ()) {
        unsafe {
            drop(Arc::<TaskWaker>::from_raw(ptr as *const TaskWaker));
        }
    }

    const VTABLE: RawWakerVTable = RawWakerVTable::new(
        Self::clone_raw,
        Self::wake_raw,
        Self::wake_by_ref_raw,
        Self::drop_raw,
    );
}

/// Creates the waker handed to `task` while it is being polled.
pub(crate) fn make_waker(task: TaskId) -> Waker {
    let w = TaskWaker::new(task);
    let raw = RawWaker::new(Arc::into_raw(w) as *const (), &TaskWaker::VTABLE);
    unsafe { Waker::from_raw(raw) }
}
