//! Thread-local runtime context.
//!
//! Each thread lazily owns exactly one [`Scheduler`] and one [`Host`]
//! channel. Suspension points, event queues and timers look them up here
//! instead of carrying a runtime reference around, which is what lets
//! `Task::start` and `EventQueue::wait` work without an explicit handle.
//!
//! Nothing in this module is shared across threads: computations, queues and
//! timers of one thread are invisible to every other thread. The only
//! cross-thread path is [`Host::sender`].

use crate::runtime::host::Host;
use crate::runtime::scheduler::Scheduler;

thread_local! {
    /// The calling thread's scheduler.
    static SCHEDULER: Scheduler = Scheduler::new();

    /// The calling thread's host event channel.
    static HOST: Host = Host::new();
}

/// Returns the calling thread's scheduler, creating it on first use.
///
/// # Panics
/// Panics if called while the thread's locals are being destroyed.
pub(crate) fn scheduler() -> Scheduler {
    SCHEDULER.with(Scheduler::clone)
}

/// Like [`scheduler`], but `None` during thread teardown.
pub(crate) fn try_scheduler() -> Option<Scheduler> {
    SCHEDULER.try_with(Scheduler::clone).ok()
}

/// Runs `function` with the calling thread's host channel.
pub(crate) fn with_host<F, R>(function: F) -> R
where
    F: FnOnce(&Host) -> R,
{
    HOST.with(function)
}
