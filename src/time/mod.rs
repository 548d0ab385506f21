//! Time utilities: host timers, sleeps, periodic ticks and timeouts.
//!
//! - [`Timer`] is the host timer facility: an event source firing `"timeout"`
//! - [`sleep`] suspends the current computation for a duration
//! - [`sleep_loop`] yields periodic ticks, discarding any backlog
//! - [`with_timeout`] puts a deadline on a computation or event queue
//!
//! # Example: Sleep
//!
//! ```ignore
//! use sigbridge::time::sleep;
//! use std::time::Duration;
//!
//! async fn wait() -> sigbridge::Result<()> {
//!     sleep(Duration::from_secs(1)).await
//! }
//! ```
//!
//! # Example: Timeout
//!
//! ```ignore
//! use sigbridge::time::{sleep, with_timeout};
//! use sigbridge::{Error, Task};
//! use std::time::Duration;
//!
//! async fn run_with_timeout() -> sigbridge::Result<()> {
//!     let late = Task::start(async {
//!         sleep(Duration::from_millis(100)).await?;
//!         Ok("late")
//!     });
//!     let result = with_timeout(late, Duration::from_millis(10)).await;
//!     assert!(matches!(result, Err(Error::TimeoutExpired { .. })));
//!     Ok(())
//! }
//! ```

pub mod sleep;
pub mod timeout;
pub mod timer;

pub use sleep::{Sleep, Ticks, sleep, sleep_loop};
pub use timeout::{Awaitable, with_timeout};
pub use timer::Timer;
