mod common;

use sigbridge::{Error, Runtime, RuntimeBuilder, Task, TaskHandle, sleep, start, yield_now};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

#[test]
fn test_start_basic() {
    let mut rt = Runtime::new();
    let completed = Rc::new(Cell::new(false));
    let completed_clone = completed.clone();

    rt.block_on(async move {
        Task::start(async move {
            completed_clone.set(true);
            Ok(())
        });
        Ok(())
    })
    .unwrap();

    assert!(completed.get(), "Started computation should have completed");
}

#[test]
fn test_start_nested() {
    let mut rt = Runtime::new();
    let values = Rc::new(RefCell::new(Vec::new()));

    let v0 = values.clone();
    let v1 = values.clone();
    let v2 = values.clone();
    let v3 = values.clone();

    rt.block_on(async move {
        v0.borrow_mut().push(1);

        Task::start(async move {
            v1.borrow_mut().push(2);

            Task::start(async move {
                v2.borrow_mut().push(3);
                Ok(())
            });
            Ok(())
        });

        Task::start(async move {
            v3.borrow_mut().push(4);
            Ok(())
        });
        Ok(())
    })
    .unwrap();

    assert_eq!(
        *values.borrow(),
        vec![1, 2, 3, 4],
        "Computations run synchronously up to their first suspension"
    );
}

#[test]
fn test_start_with_return_values() {
    let mut rt = Runtime::new();

    let total = rt
        .block_on(async {
            let a = start(async { Ok(compute_value(5)) });
            let b = start(async {
                sleep(Duration::from_millis(5)).await?;
                Ok(compute_value(10))
            });
            Ok(a.await? + b.await?)
        })
        .unwrap();

    assert_eq!(total, 125, "Computed values should be correct");
}

fn compute_value(x: i32) -> i32 {
    x * x
}

#[test]
fn test_start_outside_runtime_still_runs() {
    let mut handle = Task::start(async { Ok("done") });

    assert!(handle.is_finished());
    assert_eq!(handle.try_result().unwrap().unwrap(), "done");
}

#[test]
fn test_failure_propagates_to_awaiter() {
    let (mut rt, unhandled) = common::recording_runtime();

    let result = rt.block_on(async {
        let child = Task::start_named("child", async {
            sleep(Duration::from_millis(5)).await?;
            Err::<i32, _>(Error::msg("child failed"))
        });
        match child.await {
            Err(error) => Ok(error.to_string()),
            Ok(value) => Ok(format!("unexpected {value}")),
        }
    });

    assert_eq!(result.unwrap(), "child failed");
    assert!(unhandled.borrow().is_empty(), "An awaited failure is not unhandled");
}

#[test]
fn test_unawaited_failure_is_reported() {
    let (mut rt, unhandled) = common::recording_runtime();
    let survivor = Rc::new(Cell::new(false));
    let flag = survivor.clone();

    rt.block_on(async move {
        drop(Task::start(async {
            sleep(Duration::from_millis(5)).await?;
            Err::<(), _>(Error::msg("nobody listens"))
        }));

        sleep(Duration::from_millis(20)).await?;
        flag.set(true);
        Ok(())
    })
    .unwrap();

    assert!(survivor.get(), "Other computations keep running");
    let unhandled = unhandled.borrow();
    assert_eq!(unhandled.len(), 1);
    assert_eq!(unhandled[0].1, "nobody listens");
}

#[test]
fn test_failure_reported_when_handle_dropped_unobserved() {
    let (mut rt, unhandled) = common::recording_runtime();
    let kept: Rc<RefCell<Option<TaskHandle<()>>>> = Rc::default();
    let slot = kept.clone();

    rt.block_on(async move {
        *slot.borrow_mut() = Some(Task::start(async { Err(Error::msg("late report")) }));
        Ok(())
    })
    .unwrap();

    assert!(
        unhandled.borrow().is_empty(),
        "Nothing is reported while the handle could still observe the failure"
    );

    drop(kept.take());

    assert_eq!(unhandled.borrow().len(), 1);
    assert_eq!(unhandled.borrow()[0].1, "late report");
}

#[test]
fn test_observed_failure_is_not_reported_on_drop() {
    let (_rt, unhandled) = common::recording_runtime();

    let mut handle: TaskHandle<()> = Task::start(async { Err(Error::msg("seen")) });
    assert!(handle.try_result().unwrap().is_err());
    drop(handle);

    assert!(unhandled.borrow().is_empty());
}

#[test]
fn test_completion_resumes_awaiters_in_order() {
    let mut rt = Runtime::new();

    let order = rt
        .block_on(async {
            let order = Rc::new(RefCell::new(Vec::new()));
            let target = Task::start(async {
                sleep(Duration::from_millis(5)).await?;
                Ok(())
            });

            let awaiters: Vec<_> = (0..3)
                .map(|i| {
                    let target = target.task();
                    let order = order.clone();
                    Task::start(async move {
                        sigbridge::race([target]).await?;
                        order.borrow_mut().push(i);
                        Ok(())
                    })
                })
                .collect();

            target.await?;
            for awaiter in awaiters {
                awaiter.await?;
            }
            Ok(order.take())
        })
        .unwrap();

    assert_eq!(order, vec![0, 1, 2]);
}

#[test]
fn test_cancel_injects_failure_at_suspension_point() {
    let mut rt = Runtime::new();

    let (result, elapsed_ok) = rt
        .block_on(async {
            let started = std::time::Instant::now();
            let sleeper = Task::start(async {
                sleep(Duration::from_secs(10)).await?;
                Ok(())
            });

            yield_now().await?;
            assert!(sleeper.cancel(), "A suspended computation can be cancelled");

            let result = sleeper.await;
            Ok((result, started.elapsed() < Duration::from_secs(1)))
        })
        .unwrap();

    assert!(result.is_err_and(|error| error.is_cancelled()));
    assert!(elapsed_ok);
    assert_eq!(rt.armed_timers(), 0);
}

#[test]
fn test_cancel_finished_computation_is_a_no_op() {
    let _rt = Runtime::new();

    let handle = Task::start(async { Ok(1) });

    assert!(!handle.cancel());
}

#[test]
fn test_deep_resumption_chain_completes_with_small_depth() {
    common::init_test_logging();
    let mut rt = RuntimeBuilder::new().max_resume_depth(4).build();
    const LINKS: usize = 50;

    let signals: Vec<sigbridge::Signal> = (0..=LINKS).map(|_| sigbridge::Signal::new("link")).collect();
    let reached = Rc::new(Cell::new(0));

    rt.block_on({
        let signals = signals.clone();
        let reached = reached.clone();
        async move {
            let mut links = Vec::new();
            for i in 0..LINKS {
                let queue = sigbridge::EventQueue::new();
                queue.subscribe(&signals[i])?;
                let next = signals[i + 1].clone();
                let reached = reached.clone();
                links.push(Task::start(async move {
                    queue.wait().await?;
                    reached.set(reached.get() + 1);
                    next.emit([]);
                    Ok(())
                }));
            }

            let tail = sigbridge::EventQueue::new();
            tail.subscribe(&signals[LINKS])?;
            signals[0].emit([]);
            tail.wait().await?;

            for link in links {
                link.await?;
            }
            Ok(())
        }
    })
    .unwrap();

    assert_eq!(reached.get(), LINKS, "Every link ran despite the depth bound");
}

#[test]
fn test_foreign_waker_resumes_computation() {
    let mut rt = Runtime::new();

    let value = rt
        .block_on(async {
            let (sender, receiver) = futures::channel::oneshot::channel();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(10));
                let _ = sender.send(99);
            });

            receiver.await.map_err(Error::custom)
        })
        .unwrap();

    assert_eq!(value, 99);
}

#[test]
fn test_value_can_be_taken_only_once() {
    let mut rt = Runtime::new();

    rt.block_on(async {
        let mut handle = Task::start(async { Ok(7) });

        assert_eq!(handle.try_result().unwrap().unwrap(), 7);

        let again = handle.try_result().unwrap();
        assert!(
            matches!(again, Err(Error::ResultTaken { .. })),
            "A taken value cannot be read twice: {again:?}"
        );
        assert!(
            matches!(handle.await, Err(Error::ResultTaken { .. })),
            "Awaiting after taking the value reports the same failure"
        );
        Ok(())
    })
    .unwrap();
}
