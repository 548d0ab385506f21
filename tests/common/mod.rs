#![allow(dead_code)]
//! Shared integration test utilities.
//!
//! Import with:
//! ```ignore
//! mod common;
//! use common::*;
//! ```

use sigbridge::{Error, Runtime, RuntimeBuilder, TaskId};

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Once;

static INIT_LOGGING: Once = Once::new();

/// Routes `tracing` output through the test harness, once per process.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .with_ansi(false)
            .try_init();
    });
}

/// Failures handed to the unhandled-failure hook, as display strings.
pub type Unhandled = Rc<RefCell<Vec<(TaskId, String)>>>;

/// Builds a runtime whose unhandled failures are recorded instead of only
/// logged.
pub fn recording_runtime() -> (Runtime, Unhandled) {
    init_test_logging();

    let seen: Unhandled = Rc::default();
    let sink = seen.clone();
    let rt = RuntimeBuilder::new()
        .on_unhandled(move |task, error: &Error| {
            sink.borrow_mut().push((task, error.to_string()));
        })
        .build();

    (rt, seen)
}
