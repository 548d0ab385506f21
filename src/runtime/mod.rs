//! Runtime subsystem: per-thread scheduler, host channel and event loop.

pub(crate) mod context;
mod core;
pub(crate) mod host;
pub(crate) mod scheduler;
pub(crate) mod waker;
pub mod yield_now;

pub use self::core::Runtime;
pub use yield_now::yield_now;
