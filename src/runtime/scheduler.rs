//! Per-thread scheduler: owns suspended computations and steps them forward.
//!
//! Every computation is a boxed future stored in a slab slot together with
//! its wait set (the queues and computations it is registered on), a one-slot
//! inbox for a delivered notification or result, and a pending injected
//! failure.
//!
//! Resumption is synchronous and re-entrant: delivering a notification or
//! finishing a computation steps the affected waiter before the triggering
//! call returns. A computation is never stepped while it is already running;
//! such resumptions, and any beyond the configured depth, go to a FIFO run
//! queue that is drained once the outermost step unwinds.

use crate::error::{Error, Result};
use crate::race::{Input, Outcome};
use crate::runtime::waker::make_waker;
use crate::signal::Notification;
use crate::task::{TaskHeader, TaskId, TaskRef};
use crate::utils::slab::Slab;

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use futures::future::LocalBoxFuture;
use tracing::{debug, error, trace, warn};

/// Default bound on nested synchronous resumptions.
pub(crate) const DEFAULT_MAX_RESUME_DEPTH: usize = 64;

static NEXT_SCHEDULER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one thread's scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct SchedulerId(u64);

/// Hook called for every failure nothing else observed.
pub(crate) type UnhandledHook = Rc<dyn Fn(TaskId, &Error)>;

/// A value or failure handed to a suspended computation.
pub(crate) struct Delivery {
    pub(crate) from: Input,
    pub(crate) outcome: Result<Outcome>,
}

/// Why a computation is being stepped.
pub(crate) enum Resume {
    Start,
    /// Re-poll with nothing delivered (foreign wakers, `yield_now`).
    Wake,
    Deliver(Delivery),
    /// Raise a failure at the computation's current suspension point.
    Throw(Error),
}

impl Resume {
    /// Recovers the notification carried by an undeliverable resumption.
    pub(crate) fn into_notification(self) -> Option<Notification> {
        match self {
            Resume::Deliver(Delivery {
                outcome: Ok(Outcome::Notification(notification)),
                ..
            }) => Some(notification),
            _ => None,
        }
    }
}

struct TaskSlot {
    header: Arc<TaskHeader>,
    /// `None` while the computation is being polled.
    future: Option<LocalBoxFuture<'static, Result<()>>>,
    wait_set: Vec<Input>,
    inbox: Option<Delivery>,
    thrown: Option<Error>,
}

struct Inner {
    id: SchedulerId,
    tasks: RefCell<Slab<TaskSlot>>,
    current: Cell<Option<TaskId>>,
    depth: Cell<usize>,
    max_depth: Cell<usize>,
    deferred: RefCell<VecDeque<(TaskId, Resume)>>,
    draining: Cell<bool>,
    unhandled: RefCell<Option<UnhandledHook>>,
}

/// Handle to the calling thread's scheduler; see [`context::scheduler`].
///
/// [`context::scheduler`]: crate::runtime::context::scheduler
#[derive(Clone)]
pub(crate) struct Scheduler {
    inner: Rc<Inner>,
}

impl Scheduler {
    pub(crate) fn new() -> Self {
        Self {
            inner: Rc::new(Inner {
                id: SchedulerId(NEXT_SCHEDULER_ID.fetch_add(1, Ordering::Relaxed)),
                tasks: RefCell::new(Slab::new()),
                current: Cell::new(None),
                depth: Cell::new(0),
                max_depth: Cell::new(DEFAULT_MAX_RESUME_DEPTH),
                deferred: RefCell::new(VecDeque::new()),
                draining: Cell::new(false),
                unhandled: RefCell::new(None),
            }),
        }
    }

    pub(crate) fn id(&self) -> SchedulerId {
        self.inner.id
    }

    pub(crate) fn configure(&self, max_depth: usize, hook: Option<UnhandledHook>) {
        self.inner.max_depth.set(max_depth.max(1));
        *self.inner.unhandled.borrow_mut() = hook;
    }

    /// The computation being polled right now, if any.
    pub(crate) fn current(&self) -> Option<TaskId> {
        self.inner.current.get()
    }

    /// Number of computations that have not finished.
    pub(crate) fn task_count(&self) -> usize {
        self.inner.tasks.borrow().len()
    }

    /// Number of resumptions waiting in the run queue.
    pub(crate) fn deferred_count(&self) -> usize {
        self.inner.deferred.borrow().len()
    }

    /// Registers a computation and runs it to its first suspension point.
    pub(crate) fn start(
        &self,
        name: Option<String>,
        future: LocalBoxFuture<'static, Result<()>>,
    ) -> Arc<TaskHeader> {
        let scheduler = self.id();
        let mut header = None;
        self.inner.tasks.borrow_mut().insert_with(|key| {
            let shared = Arc::new(TaskHeader::new(TaskId::from_key(key), scheduler, name));
            header = Some(shared.clone());
            TaskSlot {
                header: shared,
                future: Some(future),
                wait_set: Vec::new(),
                inbox: None,
                thrown: None,
            }
        });
        let Some(header) = header else {
            unreachable!("insert_with always runs its constructor")
        };

        debug!(task = %header.id(), name = ?header.name(), "computation started");
        let _ = self.resume(header.id(), Resume::Start);

        header
    }

    /// Resumes `id` with `resume`, synchronously unless it is already running
    /// or the depth bound is reached.
    ///
    /// The previous wait set is torn down first. Returns the resumption back
    /// when `id` no longer exists so the caller can hand it elsewhere.
    pub(crate) fn resume(&self, id: TaskId, resume: Resume) -> std::result::Result<(), Resume> {
        let running = match self.inner.tasks.borrow().get(id.key()) {
            Some(slot) => slot.future.is_none(),
            None => return Err(resume),
        };

        self.teardown(id);

        let depth = self.inner.depth.get();
        if running || depth >= self.inner.max_depth.get() {
            if running {
                trace!(task = %id, "computation is running; resumption queued");
            } else {
                warn!(task = %id, depth, "resume depth limit reached; resumption queued");
            }
            self.inner.deferred.borrow_mut().push_back((id, resume));
            return Ok(());
        }

        self.step(id, resume);

        if self.inner.depth.get() == 0 && !self.inner.draining.get() {
            self.drain_deferred();
        }

        Ok(())
    }

    /// Injects `error` at the current suspension point of `id`.
    ///
    /// Returns `false` when the computation has already finished.
    pub(crate) fn throw(&self, id: TaskId, error: Error) -> bool {
        debug!(task = %id, %error, "injecting failure");
        self.resume(id, Resume::Throw(error)).is_ok()
    }

    fn drain_deferred(&self) {
        self.inner.draining.set(true);
        loop {
            let next = self.inner.deferred.borrow_mut().pop_front();
            let Some((id, resume)) = next else {
                break;
            };

            if let Err(resume) = self.resume(id, resume) {
                self.requeue(resume);
            }
        }
        self.inner.draining.set(false);
    }

    /// Returns an undelivered notification to the queue it came from.
    fn requeue(&self, resume: Resume) {
        if let Resume::Deliver(Delivery {
            from: Input::Queue(queue),
            outcome: Ok(Outcome::Notification(notification)),
        }) = resume
        {
            warn!(queue = queue.id(), "notification was not consumed; requeued");
            queue.restore(notification);
        }
    }

    fn step(&self, id: TaskId, resume: Resume) {
        let future = {
            let mut tasks = self.inner.tasks.borrow_mut();
            let Some(slot) = tasks.get_mut(id.key()) else {
                return;
            };

            match resume {
                Resume::Start | Resume::Wake => {}
                Resume::Deliver(delivery) => slot.inbox = Some(delivery),
                Resume::Throw(error) => slot.thrown = Some(error),
            }

            slot.future.take()
        };

        let Some(mut future) = future else {
            return;
        };

        trace!(task = %id, depth = self.inner.depth.get(), "stepping computation");

        let previous = self.inner.current.replace(Some(id));
        self.inner.depth.set(self.inner.depth.get() + 1);

        let waker = make_waker(id);
        let mut cx = Context::from_waker(&waker);
        let poll = future.as_mut().poll(&mut cx);

        self.inner.depth.set(self.inner.depth.get() - 1);
        self.inner.current.set(previous);

        let leftover = self
            .inner
            .tasks
            .borrow_mut()
            .get_mut(id.key())
            .and_then(|slot| slot.inbox.take());

        match poll {
            Poll::Pending => {
                if let Some(slot) = self.inner.tasks.borrow_mut().get_mut(id.key()) {
                    slot.future = Some(future);
                }
            }
            Poll::Ready(result) => {
                drop(future);
                self.finish(id, result);
            }
        }

        if let Some(delivery) = leftover {
            self.requeue(Resume::Deliver(delivery));
        }
    }

    fn finish(&self, id: TaskId, result: Result<()>) {
        let slot = self.inner.tasks.borrow_mut().remove(id.key());
        let Some(slot) = slot else {
            return;
        };

        for input in &slot.wait_set {
            input.remove_waiter(id);
        }

        let header = slot.header;
        let awaiters = header.finish(result.clone());

        match &result {
            Ok(()) => debug!(task = %id, "computation finished"),
            Err(error) if !awaiters.is_empty() => {
                header.mark_observed();
                debug!(task = %id, %error, awaiters = awaiters.len(), "propagating failure");
            }
            Err(error) if header.handle_alive() => {
                debug!(task = %id, %error, "failure kept for its handle");
            }
            Err(error) => {
                header.mark_observed();
                self.report_unhandled(id, header.name(), error);
            }
        }

        let from = Input::Task(TaskRef::new(header));
        for waiter in awaiters {
            let delivery = Delivery {
                from: from.clone(),
                outcome: result.clone().map(|()| Outcome::Finished),
            };
            let _ = self.resume(waiter, Resume::Deliver(delivery));
        }
    }

    /// Reports a failure that no awaiter or handle observed.
    pub(crate) fn report_unhandled(&self, id: TaskId, name: Option<&str>, error: &Error) {
        error!(task = %id, name = ?name, %error, "unhandled failure in computation");

        let hook = self.inner.unhandled.borrow().clone();
        if let Some(hook) = hook {
            hook(id, error);
        }
    }

    fn teardown(&self, id: TaskId) {
        let wait_set = match self.inner.tasks.borrow_mut().get_mut(id.key()) {
            Some(slot) => std::mem::take(&mut slot.wait_set),
            None => return,
        };

        for input in &wait_set {
            input.remove_waiter(id);
        }
    }

    /// Adds `input` to the wait set of `id` and registers `id` on it.
    pub(crate) fn register(&self, id: TaskId, input: &Input) {
        {
            let mut tasks = self.inner.tasks.borrow_mut();
            let Some(slot) = tasks.get_mut(id.key()) else {
                return;
            };
            if slot.wait_set.iter().any(|member| member.same(input)) {
                return;
            }
            slot.wait_set.push(input.clone());
        }

        input.add_waiter(id);
    }

    /// Takes the pending delivery of `id` if `position` recognizes its origin.
    pub(crate) fn take_delivery<F>(&self, id: TaskId, position: F) -> Option<(usize, Result<Outcome>)>
    where
        F: FnOnce(&Input) -> Option<usize>,
    {
        let mut tasks = self.inner.tasks.borrow_mut();
        let slot = tasks.get_mut(id.key())?;
        let index = position(&slot.inbox.as_ref()?.from)?;
        let delivery = slot.inbox.take()?;

        Some((index, delivery.outcome))
    }

    /// Takes the failure injected into `id`, if any.
    pub(crate) fn take_thrown(&self, id: TaskId) -> Option<Error> {
        self.inner
            .tasks
            .borrow_mut()
            .get_mut(id.key())
            .and_then(|slot| slot.thrown.take())
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("id", &self.inner.id)
            .field("tasks", &self.task_count())
            .field("current", &self.inner.current.get())
            .field("deferred", &self.deferred_count())
            .finish()
    }
}
