//! Fluent configuration of the thread's scheduler.
//!
//! A runtime is only a loop over thread-local state, so building one means
//! configuring the calling thread's scheduler: resume depth, the
//! unhandled-failure hook and stall detection.

use crate::error::Error;
use crate::runtime::Runtime;
use crate::runtime::context;
use crate::runtime::scheduler::{DEFAULT_MAX_RESUME_DEPTH, UnhandledHook};
use crate::task::TaskId;

use std::fmt;
use std::rc::Rc;

/// Builder for [`Runtime`] with a fluent API.
///
/// # Example
/// ```ignore
/// let rt = RuntimeBuilder::new()
///     .max_resume_depth(16)
///     .on_unhandled(|task, error| eprintln!("{task} failed: {error}"))
///     .build();
/// ```
pub struct RuntimeBuilder {
    max_resume_depth: usize,
    on_unhandled: Option<UnhandledHook>,
    detect_stalls: bool,
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeBuilder {
    /// Default settings: depth 64, no hook, stall detection on.
    pub fn new() -> Self {
        Self {
            max_resume_depth: DEFAULT_MAX_RESUME_DEPTH,
            on_unhandled: None,
            detect_stalls: true,
        }
    }

    /// Bounds how deeply resumptions may nest synchronously.
    ///
    /// A notification or completion that would resume a computation deeper
    /// than `depth` is queued instead and runs once the outermost step
    /// returns, in the order it was queued. Values below 1 count as 1.
    pub fn max_resume_depth(mut self, depth: usize) -> Self {
        self.max_resume_depth = depth;
        self
    }

    /// Installs a callback for failures nothing awaited.
    ///
    /// The failure is logged either way; the callback is an extra channel,
    /// useful in tests and for embedding applications.
    pub fn on_unhandled<F>(mut self, hook: F) -> Self
    where
        F: Fn(TaskId, &Error) + 'static,
    {
        self.on_unhandled = Some(Rc::new(hook));
        self
    }

    /// Whether `block_on` fails with [`Error::Stalled`] instead of blocking
    /// forever once nothing could resume its computation. Defaults to `true`.
    pub fn detect_stalls(mut self, enabled: bool) -> Self {
        self.detect_stalls = enabled;
        self
    }

    /// Applies the settings to the calling thread and returns its runtime.
    pub fn build(self) -> Runtime {
        context::scheduler().configure(self.max_resume_depth, self.on_unhandled);
        Runtime::with_config(self.detect_stalls)
    }
}

impl fmt::Debug for RuntimeBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeBuilder")
            .field("max_resume_depth", &self.max_resume_depth)
            .field("on_unhandled", &self.on_unhandled.is_some())
            .field("detect_stalls", &self.detect_stalls)
            .finish()
    }
}
