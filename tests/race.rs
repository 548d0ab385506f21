use sigbridge::{
    Error, EventQueue, Outcome, Runtime, Signal, Task, TaskRef, Value, Waitable, race, sleep,
    yield_now,
};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

fn queue_on(signal: &Signal) -> EventQueue {
    let queue = EventQueue::new();
    queue.subscribe(signal).unwrap();
    queue
}

#[test]
fn test_ready_input_wins_without_suspending() {
    let mut rt = Runtime::new();
    let a = Signal::new("a");
    let b = Signal::new("b");
    let qa = queue_on(&a);
    let qb = queue_on(&b);
    b.emit([Value::from(2)]);

    let won = rt
        .block_on({
            let (qa, qb) = (qa.clone(), qb.clone());
            async move { race([&qa, &qb]).await }
        })
        .unwrap();

    assert_eq!(won.index, 1);
    assert_eq!(won.outcome.notification().unwrap()[0], Value::Int(2));
    assert!(qa.is_empty() && qb.is_empty());
}

#[test]
fn test_earliest_listed_input_wins_ties() {
    let mut rt = Runtime::new();
    let a = Signal::new("a");
    let b = Signal::new("b");
    let qa = queue_on(&a);
    let qb = queue_on(&b);
    a.emit([]);
    b.emit([]);

    let won = rt
        .block_on({
            let (qa, qb) = (qa.clone(), qb.clone());
            async move { race([&qa, &qb]).await }
        })
        .unwrap();

    assert_eq!(won.index, 0);
    assert_eq!(qb.len(), 1, "The losing queue keeps its notification");
    assert!(qa.is_empty());
}

#[test]
fn test_loser_keeps_notifications_that_arrive_later() {
    let mut rt = Runtime::new();
    let a = Signal::new("a");
    let b = Signal::new("b");
    let qa = queue_on(&a);
    let qb = queue_on(&b);

    let received = rt
        .block_on({
            let (qa, qb) = (qa.clone(), qb.clone());
            async move {
                let emitter = Task::start(async move {
                    sleep(Duration::from_millis(5)).await?;
                    a.emit([Value::from("a")]);
                    b.emit([Value::from("b")]);
                    Ok(())
                });

                let won = race([&qa, &qb]).await?;
                let first = won.outcome.into_notification().unwrap();
                let second = qb.wait().await?;
                emitter.await?;

                Ok(vec![
                    (won.index, first.kind()),
                    (1, second.kind()),
                ])
            }
        })
        .unwrap();

    assert_eq!(received, vec![(0, "a"), (1, "b")]);
    assert!(qa.is_empty() && qb.is_empty(), "Nothing lost or duplicated");
}

#[test]
fn test_race_between_task_and_queue() {
    let mut rt = Runtime::new();
    let never = Signal::new("never");
    let queue = queue_on(&never);

    let won = rt
        .block_on(async move {
            let worker = Task::start(async {
                sleep(Duration::from_millis(5)).await?;
                Ok(())
            });
            let won = race([Waitable::from(&queue), Waitable::from(&worker)]).await?;
            assert_eq!(queue.waiter_count(), 0, "The loser forgot the waiter");
            Ok(won)
        })
        .unwrap();

    assert_eq!(won.index, 1);
    assert_eq!(won.outcome, Outcome::Finished);
}

#[test]
fn test_nested_races_are_flattened() {
    let mut rt = Runtime::new();
    let signals: Vec<Signal> = ["a", "b", "c"].into_iter().map(Signal::new).collect();
    let queues: Vec<EventQueue> = signals.iter().map(queue_on).collect();
    signals[2].emit([]);

    let won = rt
        .block_on({
            let queues = queues.clone();
            async move {
                let inner = race([&queues[0], &queues[1]]);
                assert_eq!(inner.len(), 2);
                race([Waitable::from(inner), Waitable::from(&queues[2])]).await
            }
        })
        .unwrap();

    assert_eq!(won.index, 2);
}

#[test]
fn test_failed_input_propagates_its_failure() {
    let mut rt = Runtime::new();

    let result = rt.block_on(async {
        let failing = Task::start(async {
            sleep(Duration::from_millis(5)).await?;
            Err::<(), _>(Error::msg("worker failed"))
        });
        race([&failing]).await
    });

    assert_eq!(result.unwrap_err().to_string(), "worker failed");
}

#[test]
fn test_empty_race_fails() {
    let mut rt = Runtime::new();

    let result = rt.block_on(async { race(Vec::<Waitable>::new()).await });

    assert!(matches!(result, Err(Error::EmptyRace)), "got {result:?}");
}

#[test]
fn test_waiting_on_self_is_rejected() {
    let mut rt = Runtime::new();
    let me: Rc<RefCell<Option<TaskRef>>> = Rc::default();
    let slot = me.clone();

    let result = rt.block_on(async move {
        let handle = Task::start(async move {
            yield_now().await?;
            let me = slot.borrow().clone().expect("handle stored before first resume");
            race([me]).await.map(drop)
        });
        *me.borrow_mut() = Some(handle.task());
        handle.await
    });

    assert!(matches!(result, Err(Error::TypeMismatch { .. })), "got {result:?}");
}

#[test]
fn test_task_of_another_thread_is_rejected() {
    let foreign = std::thread::spawn(|| {
        let handle = Task::start(async { Ok(()) });
        handle.task()
    })
    .join()
    .unwrap();

    let mut rt = Runtime::new();
    let result = rt.block_on(async move { race([foreign]).await });

    assert!(matches!(result, Err(Error::TypeMismatch { .. })), "got {result:?}");
}

#[test]
fn test_race_outside_computation_fails() {
    let a = Signal::new("a");
    let queue = queue_on(&a);

    let result = futures::executor::block_on(race([&queue]));

    assert!(matches!(result, Err(Error::OutsideComputation)));
}
