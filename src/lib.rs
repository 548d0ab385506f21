//! Cooperative bridge between callback-driven event sources and sequential
//! async code, on a single thread.
//!
//! Computations are ordinary futures returning [`Result<T>`]. They suspend on
//! event queues, other computations or races of both, and are resumed
//! synchronously when a notification or completion arrives.
//!
//! # Architecture
//!
//! - **Signal**: an event source firing immutable notifications
//! - **EventQueue**: buffers notifications and hands each to at most one waiter
//! - **Scheduler**: one per thread; owns suspended computations and steps them
//! - **race**: resolves with whichever of several waitables is ready first
//! - **with_timeout**: deadline with cooperative cancellation of the target
//! - **stream_chunks / stream_text**: incremental consumption of byte sources
//! - **Runtime**: host loop firing timers and dispatching process/waker events
//! - **RuntimeBuilder**: fluent configuration of the thread's scheduler
//!
//! # Example
//!
//! ```ignore
//! use sigbridge::{Runtime, Task, sleep};
//! use std::time::Duration;
//!
//! let mut rt = Runtime::new();
//! let value = rt.block_on(async {
//!     let child = Task::start(async {
//!         sleep(Duration::from_millis(10)).await?;
//!         Ok(21)
//!     });
//!     Ok(child.await? * 2)
//! })?;
//! assert_eq!(value, 42);
//! ```

mod builder;
pub mod error;
pub mod process;
pub mod race;
pub mod runtime;
pub mod signal;
pub mod stream;
pub mod task;
pub mod time;
mod utils;

pub use builder::RuntimeBuilder;
pub use error::{Error, Result};
pub use process::{ExitStatus, Process, ProcessState, run_process};
pub use race::{Outcome, Race, Waitable, Won, race};
pub use runtime::{Runtime, yield_now};
pub use signal::{
    Connection, EventQueue, EventSource, Notification, Signal, SourceId, Value, connect_async,
};
pub use stream::{Encoding, Pipe, ReadableSource, stream_chunks, stream_text};
pub use task::{Task, TaskHandle, TaskId, TaskRef, start};
pub use time::{Awaitable, Sleep, Ticks, Timer, sleep, sleep_loop, with_timeout};
