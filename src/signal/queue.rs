//! Event queue: buffers notifications and hands them to suspended computations.
//!
//! An [`EventQueue`] subscribes to one or more event sources. Each
//! notification either goes straight to the oldest registered waiter, which is
//! resumed synchronously before the source's `emit` returns, or is appended to
//! the queue's buffer for a later [`EventQueue::wait`].
//!
//! Buffers are unbounded by default. [`EventQueue::bounded`] keeps at most `k`
//! notifications, evicting the oldest to make room for the newest. The backlog
//! is never discarded implicitly; call [`EventQueue::drain`] for that.
//!
//! # Example
//!
//! ```ignore
//! use sigbridge::signal::{EventQueue, Signal};
//!
//! async fn next_click(clicked: &Signal) -> sigbridge::Result<()> {
//!     let queue = EventQueue::new();
//!     queue.subscribe(clicked)?;
//!     let notification = queue.wait().await?;
//!     println!("clicked by {}", notification.sender());
//!     Ok(())
//! }
//! ```

use crate::error::{Error, Result};
use crate::race::{Input, Outcome, Race, Settled, race};
use crate::runtime::context;
use crate::runtime::scheduler::{Delivery, Resume};
use crate::signal::{Callback, Connection, EventSource, Notification, Signal};
use crate::task::TaskId;

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use tracing::trace;

static NEXT_QUEUE_ID: AtomicU64 = AtomicU64::new(1);

struct QueueState {
    buffer: VecDeque<Notification>,
    capacity: Option<usize>,
    waiters: VecDeque<TaskId>,
    connections: Vec<Connection>,
}

pub(crate) struct QueueInner {
    id: u64,
    state: RefCell<QueueState>,
}

impl Drop for QueueInner {
    fn drop(&mut self) {
        // Subscriptions become inert with the queue.
        for connection in self.state.get_mut().connections.drain(..) {
            connection.disconnect();
        }
    }
}

/// Buffers notifications from its sources and dispatches them to at most one
/// waiter each.
#[derive(Clone)]
pub struct EventQueue {
    inner: Rc<QueueInner>,
}

impl EventQueue {
    /// Creates an unbounded queue with no sources.
    pub fn new() -> Self {
        Self::with_capacity(None)
    }

    /// Creates a queue that keeps at most `capacity` buffered notifications.
    pub fn bounded(capacity: usize) -> Self {
        Self::with_capacity(Some(capacity))
    }

    /// Creates an unbounded queue subscribed to every source in `sources`.
    pub fn with_sources(sources: &[&dyn EventSource]) -> Result<Self> {
        let queue = Self::new();
        for source in sources {
            queue.subscribe(*source)?;
        }

        Ok(queue)
    }

    fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            inner: Rc::new(QueueInner {
                id: NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed),
                state: RefCell::new(QueueState {
                    buffer: VecDeque::new(),
                    capacity,
                    waiters: VecDeque::new(),
                    connections: Vec::new(),
                }),
            }),
        }
    }

    /// Routes every future notification of `source` through this queue.
    pub fn subscribe<S>(&self, source: &S) -> Result<()>
    where
        S: EventSource + ?Sized,
    {
        let connection = source.register_callback(self.callback())?;
        self.inner.state.borrow_mut().connections.push(connection);

        Ok(())
    }

    /// Subscribes to a signal owned by this crate, which cannot be closed
    /// while its owner is borrowed.
    pub(crate) fn attach(&self, signal: &Signal) {
        let connection = signal.attach(self.callback());
        self.inner.state.borrow_mut().connections.push(connection);
    }

    fn callback(&self) -> Callback {
        let weak = Rc::downgrade(&self.inner);
        Rc::new(move |notification: &Notification| {
            if let Some(inner) = weak.upgrade() {
                EventQueue { inner }.on_notification(notification.clone());
            }
        })
    }

    /// Suspends until the next notification, or returns a buffered one
    /// without suspending.
    pub fn wait(&self) -> Next {
        Next {
            race: race([self.clone()]),
        }
    }

    /// Pops the oldest buffered notification without suspending.
    pub fn try_next(&self) -> Option<Notification> {
        self.inner.state.borrow_mut().buffer.pop_front()
    }

    /// Returns a copy of the oldest buffered notification.
    pub fn peek(&self) -> Option<Notification> {
        self.inner.state.borrow().buffer.front().cloned()
    }

    /// Discards the backlog; registered waiters are untouched.
    ///
    /// Returns how many notifications were dropped.
    pub fn drain(&self) -> usize {
        let mut state = self.inner.state.borrow_mut();
        let dropped = state.buffer.len();
        state.buffer.clear();

        dropped
    }

    pub fn len(&self) -> usize {
        self.inner.state.borrow().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.state.borrow().buffer.is_empty()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.inner.state.borrow().capacity
    }

    /// Number of computations currently suspended on this queue.
    pub fn waiter_count(&self) -> usize {
        self.inner.state.borrow().waiters.len()
    }

    pub(crate) fn id(&self) -> u64 {
        self.inner.id
    }

    pub(crate) fn ptr_eq(&self, other: &EventQueue) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn add_waiter(&self, task: TaskId) {
        let mut state = self.inner.state.borrow_mut();
        if !state.waiters.contains(&task) {
            state.waiters.push_back(task);
        }
    }

    pub(crate) fn remove_waiter(&self, task: TaskId) {
        self.inner
            .state
            .borrow_mut()
            .waiters
            .retain(|waiter| *waiter != task);
    }

    /// Hands a notification that was delivered but never consumed back to the
    /// queue, ahead of anything buffered since.
    pub(crate) fn restore(&self, notification: Notification) {
        self.dispatch(notification, true);
    }

    pub(crate) fn on_notification(&self, notification: Notification) {
        self.dispatch(notification, false);
    }

    fn dispatch(&self, notification: Notification, front: bool) {
        let scheduler = context::scheduler();
        let mut resume = Resume::Deliver(Delivery {
            from: Input::Queue(self.clone()),
            outcome: Ok(Outcome::Notification(notification)),
        });

        loop {
            // Oldest registered waiter first. Stale waiters (finished tasks)
            // hand the notification back and the next one is tried.
            let waiter = self.inner.state.borrow_mut().waiters.pop_front();
            let Some(task) = waiter else {
                break;
            };

            trace!(queue = self.inner.id, %task, "delivering notification");
            match scheduler.resume(task, resume) {
                Ok(()) => return,
                Err(returned) => resume = returned,
            }
        }

        if let Some(notification) = resume.into_notification() {
            self.buffer(notification, front);
        }
    }

    fn buffer(&self, notification: Notification, front: bool) {
        let mut state = self.inner.state.borrow_mut();

        if let Some(capacity) = state.capacity {
            if capacity == 0 {
                return;
            }
            while state.buffer.len() >= capacity {
                if front {
                    // The restored notification is the oldest; it loses.
                    return;
                }
                state.buffer.pop_front();
                trace!(queue = self.inner.id, "evicted oldest buffered notification");
            }
        }

        if front {
            state.buffer.push_front(notification);
        } else {
            state.buffer.push_back(notification);
        }
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("EventQueue")
            .field("id", &self.inner.id)
            .field("buffered", &state.buffer.len())
            .field("capacity", &state.capacity)
            .field("waiters", &state.waiters.len())
            .finish()
    }
}

/// Future returned by [`EventQueue::wait`].
pub struct Next {
    race: Race,
}

impl Next {
    pub(crate) fn poll_wait(&mut self) -> Poll<Result<Notification>> {
        match self.race.poll_settled() {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Settled::Won(won)) => match won.outcome {
                Outcome::Notification(notification) => Poll::Ready(Ok(notification)),
                Outcome::Finished => Poll::Ready(Err(Error::TypeMismatch {
                    detail: "event queue resolved without a notification".into(),
                })),
            },
            Poll::Ready(Settled::Failed(error))
            | Poll::Ready(Settled::Thrown(error))
            | Poll::Ready(Settled::Invalid(error)) => Poll::Ready(Err(error)),
        }
    }
}

impl Future for Next {
    type Output = Result<Notification>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.poll_wait()
    }
}
