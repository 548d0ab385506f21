//! Deadline for a waitable, with cooperative cancellation of the loser.
//!
//! [`with_timeout`] races its target against a single-shot timer:
//!
//! - if the target resolves first, the timer is stopped and the target's
//!   result is returned;
//! - if the timer fires first, [`Error::Cancelled`] is injected into the
//!   target (when it is a computation), the wrapper waits for it to unwind and
//!   then fails with [`Error::TimeoutExpired`]. A different failure raised by
//!   the target while unwinding wins over the timeout.
//!
//! # Example
//!
//! ```ignore
//! use sigbridge::{Task, sleep, with_timeout};
//! use std::time::Duration;
//!
//! async fn bounded() -> sigbridge::Result<i32> {
//!     let slow = Task::start(async {
//!         sleep(Duration::from_secs(10)).await?;
//!         Ok(1)
//!     });
//!     with_timeout(slow, Duration::from_millis(100)).await
//! }
//! ```

use crate::error::{Error, Result};
use crate::race::{Outcome, Waitable, Won, race};
use crate::runtime::context;
use crate::signal::{EventQueue, Notification};
use crate::task::TaskHandle;
use crate::time::timer::Timer;

use std::time::Duration;

use futures::FutureExt;
use futures::future::LocalBoxFuture;
use tracing::{debug, warn};

/// Something [`with_timeout`] can put a deadline on.
pub trait Awaitable {
    type Output;

    /// The race input representing this target.
    fn waitable(&self) -> Waitable;

    /// Converts the target's winning outcome into its result.
    fn settle(&mut self, outcome: Outcome) -> Result<Self::Output>;

    /// The result, if the target already resolved without being observed.
    fn poll_ready(&mut self) -> Option<Result<Self::Output>>;

    /// Cancels the target and waits for it to unwind.
    ///
    /// Resolves to the failure the target raised instead of accepting the
    /// cancellation, if any.
    fn unwind(self) -> LocalBoxFuture<'static, Option<Error>>;
}

impl Awaitable for EventQueue {
    type Output = Notification;

    fn waitable(&self) -> Waitable {
        Waitable::Queue(self.clone())
    }

    fn settle(&mut self, outcome: Outcome) -> Result<Notification> {
        outcome.into_notification().ok_or_else(|| Error::TypeMismatch {
            detail: "event queue resolved without a notification".into(),
        })
    }

    fn poll_ready(&mut self) -> Option<Result<Notification>> {
        None
    }

    // No computation behind a bare queue.
    fn unwind(self) -> LocalBoxFuture<'static, Option<Error>> {
        async { None }.boxed_local()
    }
}

impl<T: 'static> Awaitable for TaskHandle<T> {
    type Output = T;

    fn waitable(&self) -> Waitable {
        Waitable::Task(self.task())
    }

    fn settle(&mut self, _outcome: Outcome) -> Result<T> {
        self.try_result().unwrap_or_else(|| {
            Err(Error::TypeMismatch {
                detail: format!("{} resolved before finishing", self.id()),
            })
        })
    }

    fn poll_ready(&mut self) -> Option<Result<T>> {
        self.try_result()
    }

    fn unwind(self) -> LocalBoxFuture<'static, Option<Error>> {
        async move {
            self.task().cancel();
            match self.await {
                Ok(_) => None,
                Err(error) if error.is_cancelled() => None,
                Err(error) => Some(error),
            }
        }
        .boxed_local()
    }
}

/// Resolves `target`, or fails once `timeout` elapses.
///
/// The timer is stopped on every exit path, so a completed wait never leaves
/// a late firing behind.
///
/// # Errors
/// [`Error::TimeoutExpired`] after the deadline, unless the target replaced
/// the cancellation with a failure of its own; the target's own failures
/// otherwise.
pub async fn with_timeout<A>(mut target: A, timeout: Duration) -> Result<A::Output>
where
    A: Awaitable,
{
    let timer = Timer::single_shot(timeout);
    let expired = EventQueue::bounded(1);
    expired.attach(timer.timeout());
    timer.start();

    let won = race([target.waitable(), Waitable::from(&expired)]).await;
    timer.stop();

    match won {
        Ok(Won { index: 0, outcome }) => target.settle(outcome),
        Ok(_) => {
            // Inputs are checked in order, so a target that finished before
            // the race stepped wins at index 0. This only catches a target
            // that finished after the timer's delivery was queued for us.
            if let Some(result) = target.poll_ready() {
                return result;
            }

            debug!(timeout_ms = timeout.as_millis() as u64, "deadline elapsed; cancelling target");
            match target.unwind().await {
                Some(error) => Err(error),
                None => Err(Error::TimeoutExpired { timeout }),
            }
        }
        Err(error) if error.is_cancelled() => {
            // Cancelled from outside while waiting: pass it on. The waiter
            // returns `Cancelled`, so a cleanup failure of the target is only
            // visible as unhandled.
            if let Some(other) = target.unwind().await {
                let scheduler = context::scheduler();
                match scheduler.current() {
                    Some(me) => scheduler.report_unhandled(me, None, &other),
                    None => warn!(%other, "target failed while unwinding a cancelled timeout"),
                }
            }
            Err(error)
        }
        Err(error) => Err(error),
    }
}
