//! Failure taxonomy shared by every suspension point.
//!
//! Computations are futures returning [`Result<T>`]. "Raising inside a
//! computation" means the await it is suspended on resolves to `Err`, so
//! failures travel with `?` like any other Rust error. [`Error`] is cheap to
//! clone because one failure may be handed to several awaiters.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Every failure a computation can observe.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// A waitable that cannot be awaited from the current computation.
    ///
    /// Raised before any suspension takes place.
    #[error("unsupported waitable: {detail}")]
    TypeMismatch { detail: String },

    /// A race over nothing would suspend forever.
    #[error("race requires at least one waitable")]
    EmptyRace,

    /// Cancellation injected by [`with_timeout`](crate::time::with_timeout)
    /// or [`TaskRef::cancel`](crate::task::TaskRef::cancel).
    #[error("computation cancelled")]
    Cancelled,

    /// The deadline elapsed and the wrapped computation unwound.
    #[error("timeout expired ({} ms)", .timeout.as_millis())]
    TimeoutExpired { timeout: Duration },

    /// Bytes that cannot be decoded with the requested encoding.
    #[error("invalid {encoding} sequence at byte {offset}")]
    Decode {
        encoding: &'static str,
        offset: usize,
    },

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),

    /// A process failed to run to completion.
    #[error("process `{program}` failed: {message}")]
    Process { program: String, message: String },

    /// The event source has been destroyed and accepts no new subscribers.
    #[error("event source `{kind}` is closed")]
    SourceClosed { kind: &'static str },

    /// A suspension point was polled by something other than the scheduler.
    #[error("awaited outside of a scheduled computation")]
    OutsideComputation,

    /// The successful value of a computation was already taken through its
    /// handle.
    #[error("result of {task} was already taken")]
    ResultTaken { task: String },

    /// Nothing left that could ever resume the blocked computation.
    #[error("runtime stalled: no timer, process or waker can resume the computation")]
    Stalled,

    /// Application-level failure.
    #[error("{0}")]
    Custom(Arc<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Wraps any application error.
    pub fn custom<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Custom(Arc::new(error))
    }

    /// Builds an application error from a message.
    pub fn msg(message: impl fmt::Display) -> Self {
        Error::Custom(Arc::new(Message(message.to_string())))
    }

    /// True for injected cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// True when a deadline elapsed.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::TimeoutExpired { .. })
    }
}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Self {
        Error::Io(Arc::new(error))
    }
}

#[derive(Debug)]
struct Message(String);

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for Message {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_carries_duration() {
        let err = Error::TimeoutExpired {
            timeout: Duration::from_millis(250),
        };
        assert_eq!(err.to_string(), "timeout expired (250 ms)");
        assert!(err.is_timeout());
        assert!(!err.is_cancelled());
    }

    #[test]
    fn test_custom_message_is_displayed_verbatim() {
        let err = Error::msg("boom");
        assert_eq!(err.to_string(), "boom");
        assert!(matches!(err.clone(), Error::Custom(_)));
    }
}
