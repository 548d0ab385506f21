//! Host event loop driving the bridge.
//!
//! The runtime owns no computations itself: those live in the thread's
//! scheduler and move only when something resumes them. The loop supplies
//! the "something": it fires expired timers and dispatches host events
//! (process output, foreign wakes), each of which resumes computations
//! synchronously.

use crate::builder::RuntimeBuilder;
use crate::error::{Error, Result};
use crate::process;
use crate::runtime::context;
use crate::runtime::host::{self, Host};
use crate::task::{Task, TaskHandle};
use crate::time::timer;

use std::future::Future;
use std::marker::PhantomData;
use std::rc::Rc;
use std::time::Duration;

use tracing::{debug, warn};

/// Event loop for the calling thread.
///
/// Not `Send`: a runtime drives the scheduler of the thread that built it.
pub struct Runtime {
    detect_stalls: bool,
    _not_send: PhantomData<Rc<()>>,
}

impl Runtime {
    /// Creates a runtime with default settings, resetting any configuration
    /// a previous builder applied to this thread.
    ///
    /// # Example
    /// ```ignore
    /// let mut rt = Runtime::new();
    /// ```
    pub fn new() -> Self {
        RuntimeBuilder::new().build()
    }

    pub(crate) fn with_config(detect_stalls: bool) -> Self {
        Self {
            detect_stalls,
            _not_send: PhantomData,
        }
    }

    /// Starts a top-level computation; see [`Task::start`].
    pub fn start<F, T>(&self, future: F) -> TaskHandle<T>
    where
        F: Future<Output = Result<T>> + 'static,
        T: 'static,
    {
        Task::start(future)
    }

    /// Runs `future` as a top-level computation and turns the loop until it
    /// finishes.
    ///
    /// Other computations keep running while the loop turns; the ones still
    /// suspended when this returns stay parked on the thread's scheduler.
    ///
    /// # Errors
    /// Returns the computation's failure, or [`Error::Stalled`] when stall
    /// detection is on and nothing left could ever resume it. A stalled
    /// computation is cancelled first; a different failure it raises while
    /// unwinding is returned instead of [`Error::Stalled`].
    ///
    /// # Panics
    /// Panics when called from inside a computation.
    ///
    /// # Example
    /// ```ignore
    /// let value = rt.block_on(async {
    ///     sleep(Duration::from_millis(10)).await?;
    ///     Ok(42)
    /// })?;
    /// assert_eq!(value, 42);
    /// ```
    pub fn block_on<F, T>(&mut self, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + 'static,
        T: 'static,
    {
        assert!(
            context::scheduler().current().is_none(),
            "Runtime::block_on() called from inside a computation"
        );

        let mut handle = Task::start_named("block_on", future);

        loop {
            if let Some(result) = handle.try_result() {
                return result;
            }

            if host::dispatch_pending() > 0 {
                continue;
            }

            if self.detect_stalls && self.is_idle() {
                warn!(task = %handle.id(), "no event source left that could resume the computation");
                handle.cancel();
                return match handle.try_result() {
                    Some(Err(error)) if error.is_cancelled() => Err(Error::Stalled),
                    Some(result) => result,
                    None => Err(Error::Stalled),
                };
            }

            self.turn(None);
        }
    }

    /// Runs one loop iteration.
    ///
    /// Fires expired timers and dispatches queued host events. If neither
    /// produced anything, blocks for the next host event, at most until the
    /// next timer deadline and at most `max_wait` (unbounded if `None`).
    ///
    /// Returns `true` if anything was dispatched.
    pub fn turn(&mut self, max_wait: Option<Duration>) -> bool {
        let fired = timer::fire_expired();
        let dispatched = host::dispatch_pending();
        if fired + dispatched > 0 {
            return true;
        }

        let wait = match (timer::next_remaining(), max_wait) {
            (Some(next), Some(max)) => Some(next.min(max)),
            (next, max) => next.or(max),
        };

        match context::with_host(|host| host.next_timeout(wait)) {
            Some(event) => {
                host::dispatch(event);
                true
            }
            None => timer::fire_expired() > 0,
        }
    }

    /// Turns the loop until no timer is armed, no process is running and no
    /// host event or foreign waker is outstanding.
    pub fn run(&mut self) {
        loop {
            host::dispatch_pending();
            if self.is_idle() {
                break;
            }
            self.turn(None);
        }
        debug!("runtime idle");
    }

    /// Number of armed timers on this thread.
    pub fn armed_timers(&self) -> usize {
        timer::armed_count()
    }

    /// Number of computations on this thread that have not finished.
    pub fn task_count(&self) -> usize {
        context::scheduler().task_count()
    }

    fn is_idle(&self) -> bool {
        timer::armed_count() == 0
            && process::live_count() == 0
            && context::with_host(Host::outstanding_wakers) == 0
            && context::scheduler().deferred_count() == 0
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}
