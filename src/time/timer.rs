//! Host timer facility and the thread-local timer driver.
//!
//! A [`Timer`] is an event source: when its interval elapses it fires its
//! `"timeout"` signal with an empty payload. The driver never runs on its own;
//! the runtime loop calls [`fire_expired`] every turn and sleeps until
//! [`next_remaining`] when there is nothing else to do.

use crate::error::Result;
use crate::signal::{Callback, Connection, EventSource, Signal, SourceId};

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

// Global timer driver (single-threaded, safe to use with RefCell)
thread_local! {
    static TIMER_DRIVER: RefCell<TimerDriver> = RefCell::new(TimerDriver::new());
}

struct Entry {
    deadline: Instant,
    /// Arm generation of the timer when this entry was created.
    generation: u64,
    timer: Weak<TimerInner>,
}

/// Armed timers of one thread, at most one entry per timer.
struct TimerDriver {
    timers: Vec<Entry>,
}

impl TimerDriver {
    fn new() -> Self {
        Self { timers: Vec::new() }
    }

    fn arm(&mut self, deadline: Instant, generation: u64, timer: Weak<TimerInner>) {
        self.disarm(timer.as_ptr());
        self.timers.push(Entry {
            deadline,
            generation,
            timer,
        });
    }

    fn disarm(&mut self, timer: *const TimerInner) {
        self.timers.retain(|entry| entry.timer.as_ptr() != timer);
    }

    /// Removes and returns every entry due at `now`, earliest first.
    fn take_expired(&mut self, now: Instant) -> Vec<Entry> {
        let mut expired = Vec::new();
        let mut i = 0;
        while i < self.timers.len() {
            if self.timers[i].deadline <= now {
                expired.push(self.timers.swap_remove(i));
            } else {
                i += 1;
            }
        }
        expired.sort_by_key(|entry| entry.deadline);

        expired
    }

    fn next_remaining(&self) -> Option<Duration> {
        let now = Instant::now();
        self.timers
            .iter()
            .map(|entry| entry.deadline.saturating_duration_since(now))
            .min()
    }
}

struct TimerInner {
    interval: Cell<Duration>,
    repeating: bool,
    active: Cell<bool>,
    generation: Cell<u64>,
    timeout: Signal,
}

impl TimerInner {
    fn next_generation(&self) -> u64 {
        let generation = self.generation.get() + 1;
        self.generation.set(generation);
        generation
    }
}

impl Drop for TimerInner {
    fn drop(&mut self) {
        let me = self as *const TimerInner;
        let _ = TIMER_DRIVER.try_with(|driver| driver.borrow_mut().disarm(me));
        self.timeout.close();
    }
}

/// Single-shot or repeating timer.
///
/// Dropping a timer disarms it; its signal stops accepting subscribers.
///
/// # Example
/// ```ignore
/// let timer = Timer::single_shot(Duration::from_millis(50));
/// let queue = EventQueue::new();
/// queue.subscribe(&timer)?;
/// timer.start();
/// queue.wait().await?;
/// ```
pub struct Timer {
    inner: Rc<TimerInner>,
}

impl Timer {
    /// Creates a stopped timer that fires once per `start`.
    pub fn single_shot(interval: Duration) -> Self {
        Self::new(interval, false)
    }

    /// Creates a stopped timer that fires every `interval` once started.
    pub fn repeating(interval: Duration) -> Self {
        Self::new(interval, true)
    }

    fn new(interval: Duration, repeating: bool) -> Self {
        Self {
            inner: Rc::new(TimerInner {
                interval: Cell::new(interval),
                repeating,
                active: Cell::new(false),
                generation: Cell::new(0),
                timeout: Signal::with_sender(SourceId::new(), "timeout"),
            }),
        }
    }

    /// Arms the timer one interval from now, re-arming it if already active.
    pub fn start(&self) {
        let deadline = Instant::now() + self.inner.interval.get();
        arm(&self.inner, deadline);
        debug!(
            timer = %self.source_id(),
            interval_ms = self.inner.interval.get().as_millis() as u64,
            repeating = self.inner.repeating,
            "timer started"
        );
    }

    /// Disarms the timer; a stopped timer never fires late.
    pub fn stop(&self) {
        if !self.inner.active.replace(false) {
            return;
        }
        self.inner.next_generation();
        let me = Rc::as_ptr(&self.inner);
        TIMER_DRIVER.with(|driver| driver.borrow_mut().disarm(me));
        debug!(timer = %self.source_id(), "timer stopped");
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.get()
    }

    pub fn is_repeating(&self) -> bool {
        self.inner.repeating
    }

    pub fn interval(&self) -> Duration {
        self.inner.interval.get()
    }

    /// Changes the interval; takes effect at the next `start`.
    pub fn set_interval(&self, interval: Duration) {
        self.inner.interval.set(interval);
    }

    pub fn source_id(&self) -> SourceId {
        self.inner.timeout.sender()
    }

    /// The `"timeout"` signal, fired with an empty payload.
    pub fn timeout(&self) -> &Signal {
        &self.inner.timeout
    }
}

impl EventSource for Timer {
    fn register_callback(&self, callback: Callback) -> Result<Connection> {
        self.inner.timeout.register_callback(callback)
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("source", &self.source_id())
            .field("interval", &self.inner.interval.get())
            .field("repeating", &self.inner.repeating)
            .field("active", &self.inner.active.get())
            .finish()
    }
}

fn arm(inner: &Rc<TimerInner>, deadline: Instant) {
    let generation = inner.next_generation();
    inner.active.set(true);
    TIMER_DRIVER.with(|driver| {
        driver
            .borrow_mut()
            .arm(deadline, generation, Rc::downgrade(inner))
    });
}

/// Fires every timer whose deadline has passed, earliest first.
///
/// Repeating timers are re-armed from their previous deadline, or from now
/// if the loop fell behind by more than one interval. Returns the number of
/// timers fired.
pub(crate) fn fire_expired() -> usize {
    let now = Instant::now();
    let expired = TIMER_DRIVER.with(|driver| driver.borrow_mut().take_expired(now));

    let mut fired = 0;
    for entry in expired {
        let Some(inner) = entry.timer.upgrade() else {
            continue;
        };
        // Stopped or restarted by a callback fired earlier in this pass.
        if inner.generation.get() != entry.generation {
            continue;
        }

        if inner.repeating {
            let interval = inner.interval.get();
            let mut next = entry.deadline + interval;
            if next <= now {
                next = now + interval;
            }
            arm(&inner, next);
        } else {
            inner.active.set(false);
        }

        trace!(timer = %inner.timeout.sender(), "timer fired");
        fired += 1;
        inner.timeout.emit([]);
    }

    fired
}

/// Time until the next armed deadline, zero if one is already due.
pub(crate) fn next_remaining() -> Option<Duration> {
    TIMER_DRIVER.with(|driver| driver.borrow().next_remaining())
}

/// Number of armed timers on this thread.
pub(crate) fn armed_count() -> usize {
    TIMER_DRIVER.with(|driver| driver.borrow().timers.len())
}
