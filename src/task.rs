//! Computations and the handles used to await them.
//!
//! A computation is any `Future<Output = Result<T>>`. [`Task::start`]
//! registers it with the calling thread's scheduler and runs it to its first
//! suspension point before returning:
//!
//! ```ignore
//! use sigbridge::{Task, sleep};
//! use std::time::Duration;
//!
//! async fn example() -> sigbridge::Result<i32> {
//!     let handle = Task::start(async {
//!         sleep(Duration::from_millis(10)).await?;
//!         Ok(42)
//!     });
//!     handle.await
//! }
//! ```
//!
//! # Failures
//!
//! A computation that fails is never dropped silently:
//!
//! - if other computations await it, the failure is raised in each of them;
//! - otherwise, if its [`TaskHandle`] is still alive, the failure waits there
//!   and is reported if the handle is dropped without looking at it;
//! - otherwise it is reported immediately as unhandled (an `error!` event plus
//!   the hook installed with [`RuntimeBuilder::on_unhandled`]).
//!
//! [`RuntimeBuilder::on_unhandled`]: crate::RuntimeBuilder::on_unhandled

use crate::error::{Error, Result};
use crate::race::{Race, Settled, race};
use crate::runtime::context;
use crate::runtime::scheduler::{Scheduler, SchedulerId};
use crate::utils::slab::Key;

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use futures::FutureExt;

/// Identity of one computation, unique among the live computations of its
/// scheduler and never reused for a later one.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(Key);

impl TaskId {
    pub(crate) fn from_key(key: Key) -> Self {
        Self(key)
    }

    pub(crate) fn key(self) -> Key {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}.{}", self.0.index, self.0.generation)
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared bookkeeping of one computation.
///
/// Lives as long as anything refers to the computation, so its outcome stays
/// readable after the scheduler has dropped the future.
pub(crate) struct TaskHeader {
    id: TaskId,
    scheduler: SchedulerId,
    name: Option<String>,
    outcome: Mutex<Option<Result<()>>>,
    awaiters: Mutex<Vec<TaskId>>,
    handle_alive: AtomicBool,
    observed: AtomicBool,
}

impl TaskHeader {
    pub(crate) fn new(id: TaskId, scheduler: SchedulerId, name: Option<String>) -> Self {
        Self {
            id,
            scheduler,
            name,
            outcome: Mutex::new(None),
            awaiters: Mutex::new(Vec::new()),
            handle_alive: AtomicBool::new(true),
            observed: AtomicBool::new(false),
        }
    }

    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub(crate) fn belongs_to(&self, scheduler: &Scheduler) -> bool {
        self.scheduler == scheduler.id()
    }

    pub(crate) fn outcome(&self) -> Option<Result<()>> {
        lock(&self.outcome).clone()
    }

    /// Records the outcome and hands back everything that was awaiting it.
    pub(crate) fn finish(&self, outcome: Result<()>) -> Vec<TaskId> {
        *lock(&self.outcome) = Some(outcome);
        std::mem::take(&mut *lock(&self.awaiters))
    }

    pub(crate) fn add_awaiter(&self, waiter: TaskId) {
        let mut awaiters = lock(&self.awaiters);
        if !awaiters.contains(&waiter) {
            awaiters.push(waiter);
        }
    }

    pub(crate) fn remove_awaiter(&self, waiter: TaskId) {
        lock(&self.awaiters).retain(|w| *w != waiter);
    }

    pub(crate) fn handle_alive(&self) -> bool {
        self.handle_alive.load(Ordering::Acquire)
    }

    /// Marks a failure as seen by someone, so it is not reported again.
    pub(crate) fn mark_observed(&self) {
        self.observed.store(true, Ordering::Release);
    }

    fn release_handle(&self) {
        self.handle_alive.store(false, Ordering::Release);
    }

    /// Marks the failure observed and returns it, unless someone already did.
    fn take_unobserved_failure(&self) -> Option<Error> {
        match self.outcome() {
            Some(Err(error)) if !self.observed.swap(true, Ordering::AcqRel) => Some(error),
            _ => None,
        }
    }
}

/// Type-erased reference to a computation, usable as a race input.
///
/// Cheap to clone and `Send`, but only meaningful on the thread whose
/// scheduler started the computation; racing it anywhere else fails with
/// [`Error::TypeMismatch`].
#[derive(Clone)]
pub struct TaskRef {
    header: Arc<TaskHeader>,
}

impl TaskRef {
    pub(crate) fn new(header: Arc<TaskHeader>) -> Self {
        Self { header }
    }

    pub(crate) fn header(&self) -> &TaskHeader {
        &self.header
    }

    /// Identity of the computation.
    pub fn id(&self) -> TaskId {
        self.header.id
    }

    /// Name given to [`Task::start_named`], if any.
    pub fn name(&self) -> Option<&str> {
        self.header.name()
    }

    /// True once the computation has run to completion or failed.
    pub fn is_finished(&self) -> bool {
        lock(&self.header.outcome).is_some()
    }

    /// `Ok(())` on success, the failure otherwise, `None` while running.
    pub fn outcome(&self) -> Option<Result<()>> {
        self.header.outcome()
    }

    /// Injects the cancellation signal at the computation's current
    /// suspension point.
    ///
    /// Returns `false` if it already finished. Cancellation is cooperative:
    /// the computation may catch [`Error::Cancelled`] and clean up.
    pub fn cancel(&self) -> bool {
        match context::try_scheduler() {
            Some(scheduler) if self.header.belongs_to(&scheduler) => {
                scheduler.throw(self.id(), Error::Cancelled)
            }
            _ => false,
        }
    }
}

impl PartialEq for TaskRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.header, &other.header)
    }
}

impl Eq for TaskRef {}

impl fmt::Debug for TaskRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRef")
            .field("id", &self.header.id)
            .field("name", &self.header.name)
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Entry point for starting computations.
pub struct Task;

impl Task {
    /// Starts `future` as a new computation on the calling thread's scheduler.
    ///
    /// The computation runs synchronously up to its first suspension point
    /// (or to completion) before this returns.
    ///
    /// # Example
    /// ```ignore
    /// let handle = Task::start(async { Ok(1 + 1) });
    /// assert!(handle.is_finished());
    /// ```
    pub fn start<F, T>(future: F) -> TaskHandle<T>
    where
        F: Future<Output = Result<T>> + 'static,
        T: 'static,
    {
        Self::spawn_inner(None, future)
    }

    /// Like [`Task::start`], with a name that shows up in logs and reports.
    pub fn start_named<F, T>(name: impl Into<String>, future: F) -> TaskHandle<T>
    where
        F: Future<Output = Result<T>> + 'static,
        T: 'static,
    {
        Self::spawn_inner(Some(name.into()), future)
    }

    fn spawn_inner<F, T>(name: Option<String>, future: F) -> TaskHandle<T>
    where
        F: Future<Output = Result<T>> + 'static,
        T: 'static,
    {
        let value = Rc::new(RefCell::new(None));
        let slot = value.clone();
        let erased = async move {
            let output = future.await?;
            *slot.borrow_mut() = Some(output);
            Ok(())
        }
        .boxed_local();

        let header = context::scheduler().start(name, erased);

        TaskHandle {
            task: TaskRef::new(header),
            value,
            join: None,
        }
    }
}

/// Shorthand for [`Task::start`].
pub fn start<F, T>(future: F) -> TaskHandle<T>
where
    F: Future<Output = Result<T>> + 'static,
    T: 'static,
{
    Task::start(future)
}

/// Owning handle to a computation; await it for the result.
///
/// Awaiting is only possible from inside another computation. Dropping the
/// handle detaches the computation, which keeps running.
pub struct TaskHandle<T> {
    task: TaskRef,
    value: Rc<RefCell<Option<T>>>,
    join: Option<Race>,
}

impl<T> TaskHandle<T> {
    /// Identity of the computation behind this handle.
    pub fn id(&self) -> TaskId {
        self.task.id()
    }

    /// Type-erased reference, e.g. for [`race`](crate::race()).
    pub fn task(&self) -> TaskRef {
        self.task.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// See [`TaskRef::cancel`].
    pub fn cancel(&self) -> bool {
        self.task.cancel()
    }

    /// Takes the result if the computation has finished.
    ///
    /// The value can be taken once; a failure can be read repeatedly.
    pub fn try_result(&mut self) -> Option<Result<T>> {
        match self.task.outcome()? {
            Ok(()) => Some(self.take_value()),
            Err(error) => {
                self.task.header().mark_observed();
                Some(Err(error))
            }
        }
    }

    fn take_value(&self) -> Result<T> {
        self.value
            .borrow_mut()
            .take()
            .ok_or_else(|| Error::ResultTaken {
                task: self.task.id().to_string(),
            })
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        let task = this.task.clone();
        let join = this.join.get_or_insert_with(|| race([task]));

        match join.poll_settled() {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Settled::Won(_)) => {
                this.join = None;
                Poll::Ready(this.take_value())
            }
            Poll::Ready(Settled::Failed(error)) => {
                this.join = None;
                Poll::Ready(Err(error))
            }
            Poll::Ready(Settled::Thrown(error)) | Poll::Ready(Settled::Invalid(error)) => {
                this.join = None;
                Poll::Ready(Err(error))
            }
        }
    }
}

impl<T> Drop for TaskHandle<T> {
    fn drop(&mut self) {
        let header = self.task.header();
        header.release_handle();

        if let Some(error) = header.take_unobserved_failure() {
            match context::try_scheduler() {
                Some(scheduler) => scheduler.report_unhandled(header.id(), header.name(), &error),
                None => tracing::error!(task = %header.id(), %error, "unhandled failure in computation"),
            }
        }
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle").field("task", &self.task).finish()
    }
}
