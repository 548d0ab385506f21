mod common;

use sigbridge::{Error, EventQueue, Runtime, RuntimeBuilder, Signal, Task};
use std::cell::Cell;
use std::rc::Rc;

#[test]
fn test_builder_creation() {
    let rt = RuntimeBuilder::new().build();
    drop(rt);
}

#[test]
fn test_builder_simple_future() {
    let mut rt = RuntimeBuilder::new().build();
    let completed = Rc::new(Cell::new(false));
    let completed_clone = completed.clone();

    let future = async move {
        completed_clone.set(true);
        Ok(())
    };

    rt.block_on(future).unwrap();
    assert!(completed.get(), "Future should have completed");
}

#[test]
fn test_builder_immediate_result() {
    let mut rt = RuntimeBuilder::new().build();
    let value = 42;

    let result = rt.block_on(async move { Ok(value) }).unwrap();

    assert_eq!(result, 42, "Future should return correct value");
}

#[test]
fn test_builder_multiple_instances() {
    let mut rt1 = RuntimeBuilder::new().build();
    let mut rt2 = RuntimeBuilder::new().build();

    let result1 = rt1.block_on(async { Ok(10) }).unwrap();
    let result2 = rt2.block_on(async { Ok(20) }).unwrap();

    assert_eq!(result1, 10);
    assert_eq!(result2, 20);
}

#[test]
fn test_builder_with_async_function() {
    let mut rt = RuntimeBuilder::new().build();
    let counter = Rc::new(Cell::new(0));

    async fn increment_counter(counter: Rc<Cell<i32>>) -> sigbridge::Result<i32> {
        counter.set(counter.get() + 1);
        Ok(counter.get())
    }

    let result = rt.block_on(increment_counter(counter.clone())).unwrap();

    assert_eq!(result, 1);
    assert_eq!(counter.get(), 1);
}

#[test]
fn test_block_on_returns_failure() {
    let mut rt = Runtime::new();

    let result: sigbridge::Result<()> = rt.block_on(async { Err(Error::msg("boom")) });

    assert_eq!(result.unwrap_err().to_string(), "boom");
}

#[test]
fn test_stalled_computation_is_detected() {
    common::init_test_logging();
    let mut rt = Runtime::new();
    let signal = Signal::new("never");
    let queue = EventQueue::new();
    queue.subscribe(&signal).unwrap();

    let result = rt.block_on(async move {
        queue.wait().await?;
        Ok(())
    });

    assert!(
        matches!(result, Err(Error::Stalled)),
        "Nothing can fire the signal, so the loop must give up: {result:?}"
    );
    assert_eq!(rt.task_count(), 0, "The stalled computation is cancelled");
}

#[test]
fn test_run_returns_when_idle() {
    let mut rt = Runtime::new();
    let done = Rc::new(Cell::new(false));
    let flag = done.clone();

    let handle = rt.start(async move {
        sigbridge::sleep(std::time::Duration::from_millis(10)).await?;
        flag.set(true);
        Ok(())
    });
    assert!(!handle.is_finished());

    rt.run();

    assert!(done.get(), "run() must keep turning until the timer fired");
    assert!(handle.is_finished());
}

#[test]
fn test_start_runs_to_first_suspension_synchronously() {
    let mut rt = Runtime::new();
    let steps = Rc::new(Cell::new(0));
    let s = steps.clone();

    rt.block_on(async move {
        let inner = s.clone();
        let handle = Task::start(async move {
            inner.set(inner.get() + 1);
            Ok(())
        });

        assert!(handle.is_finished(), "A computation with no suspension finishes inside start()");
        assert_eq!(s.get(), 1);
        Ok(())
    })
    .unwrap();

    assert_eq!(steps.get(), 1);
}

#[test]
fn test_failure_raised_while_unwinding_a_stall_is_returned() {
    let (mut rt, unhandled) = common::recording_runtime();
    let signal = Signal::new("never");
    let queue = EventQueue::new();
    queue.subscribe(&signal).unwrap();

    let result: sigbridge::Result<()> = rt.block_on(async move {
        match queue.wait().await {
            Err(error) if error.is_cancelled() => Err(Error::msg("cleanup failed")),
            other => other.map(|_| ()),
        }
    });

    assert_eq!(
        result.unwrap_err().to_string(),
        "cleanup failed",
        "The cleanup failure must not be swallowed by the stall"
    );
    assert!(unhandled.borrow().is_empty(), "The failure was returned, not reported");
}

#[test]
fn test_stalled_computation_that_swallows_cancellation_returns_its_value() {
    common::init_test_logging();
    let mut rt = Runtime::new();
    let signal = Signal::new("never");
    let queue = EventQueue::new();
    queue.subscribe(&signal).unwrap();

    let result = rt.block_on(async move {
        match queue.wait().await {
            Err(error) if error.is_cancelled() => Ok(-1),
            other => other.map(|_| 1),
        }
    });

    assert_eq!(result.unwrap(), -1);
}
