//! "Wait for the first of several" combinator.
//!
//! [`race`] turns an ordered list of waitables (event queues, computations, or
//! other races, which are flattened) into a single future that resolves as
//! soon as any input is ready.
//!
//! - If an input is already ready when the race is evaluated, it resolves
//!   without suspending; inputs are checked in order, so the earliest-listed
//!   input wins ties.
//! - Otherwise the calling computation is registered on every input at once.
//!   Whichever input fires first is delivered; the scheduler unregisters the
//!   computation from all the others before resuming it, so losing inputs
//!   keep their own pending notifications.
//!
//! # Example
//!
//! ```ignore
//! use sigbridge::{race, sleep};
//!
//! async fn first_of(a: EventQueue, b: EventQueue) -> sigbridge::Result<usize> {
//!     let won = race([&a, &b]).await?;
//!     Ok(won.index)
//! }
//! ```

use crate::error::{Error, Result};
use crate::runtime::context;
use crate::signal::{EventQueue, Notification};
use crate::task::{TaskHandle, TaskId, TaskRef};

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Anything a computation can suspend on.
#[derive(Clone, Debug)]
pub enum Waitable {
    Queue(EventQueue),
    Task(TaskRef),
    Race(Vec<Waitable>),
}

impl From<EventQueue> for Waitable {
    fn from(queue: EventQueue) -> Self {
        Waitable::Queue(queue)
    }
}

impl From<&EventQueue> for Waitable {
    fn from(queue: &EventQueue) -> Self {
        Waitable::Queue(queue.clone())
    }
}

impl From<TaskRef> for Waitable {
    fn from(task: TaskRef) -> Self {
        Waitable::Task(task)
    }
}

impl From<&TaskRef> for Waitable {
    fn from(task: &TaskRef) -> Self {
        Waitable::Task(task.clone())
    }
}

impl<T> From<&TaskHandle<T>> for Waitable {
    fn from(handle: &TaskHandle<T>) -> Self {
        Waitable::Task(handle.task())
    }
}

impl From<Race> for Waitable {
    fn from(race: Race) -> Self {
        Waitable::Race(race.inputs.into_iter().map(Input::into_waitable).collect())
    }
}

/// A flattened race input; the variants a wait set can hold.
#[derive(Clone)]
pub(crate) enum Input {
    Queue(EventQueue),
    Task(TaskRef),
}

impl Input {
    fn flatten(waitable: Waitable, out: &mut Vec<Input>) {
        match waitable {
            Waitable::Queue(queue) => out.push(Input::Queue(queue)),
            Waitable::Task(task) => out.push(Input::Task(task)),
            Waitable::Race(inner) => {
                for waitable in inner {
                    Input::flatten(waitable, out);
                }
            }
        }
    }

    fn into_waitable(self) -> Waitable {
        match self {
            Input::Queue(queue) => Waitable::Queue(queue),
            Input::Task(task) => Waitable::Task(task),
        }
    }

    pub(crate) fn same(&self, other: &Input) -> bool {
        match (self, other) {
            (Input::Queue(a), Input::Queue(b)) => a.ptr_eq(b),
            (Input::Task(a), Input::Task(b)) => a == b,
            _ => false,
        }
    }

    /// Takes a ready result without suspending, consuming a buffered
    /// notification. A finished computation stays ready.
    fn try_take(&self) -> Option<Result<Outcome>> {
        match self {
            Input::Queue(queue) => queue.try_next().map(|n| Ok(Outcome::Notification(n))),
            Input::Task(task) => task.outcome().map(|outcome| {
                if outcome.is_err() {
                    task.header().mark_observed();
                }
                outcome.map(|()| Outcome::Finished)
            }),
        }
    }

    pub(crate) fn add_waiter(&self, waiter: TaskId) {
        match self {
            Input::Queue(queue) => queue.add_waiter(waiter),
            Input::Task(task) => task.header().add_awaiter(waiter),
        }
    }

    pub(crate) fn remove_waiter(&self, waiter: TaskId) {
        match self {
            Input::Queue(queue) => queue.remove_waiter(waiter),
            Input::Task(task) => task.header().remove_awaiter(waiter),
        }
    }
}

impl fmt::Debug for Input {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Input::Queue(queue) => write!(f, "queue#{}", queue.id()),
            Input::Task(task) => write!(f, "{}", task.id()),
        }
    }
}

/// What the winning input delivered.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    /// An event queue produced a notification.
    Notification(Notification),
    /// A computation completed normally; its value is read from its handle.
    Finished,
}

impl Outcome {
    pub fn notification(&self) -> Option<&Notification> {
        match self {
            Outcome::Notification(n) => Some(n),
            Outcome::Finished => None,
        }
    }

    pub fn into_notification(self) -> Option<Notification> {
        match self {
            Outcome::Notification(n) => Some(n),
            Outcome::Finished => None,
        }
    }
}

/// Result of a race: the flattened position of the winner and its outcome.
#[derive(Clone, Debug, PartialEq)]
pub struct Won {
    pub index: usize,
    pub outcome: Outcome,
}

/// How a race settled, keeping injected failures apart from input failures.
pub(crate) enum Settled {
    Won(Won),
    /// A raced computation failed; its failure propagates.
    Failed(Error),
    /// A failure was injected into the waiting computation.
    Thrown(Error),
    /// The race could not be evaluated at all.
    Invalid(Error),
}

impl Settled {
    fn into_result(self) -> Result<Won> {
        match self {
            Settled::Won(won) => Ok(won),
            Settled::Failed(error) | Settled::Thrown(error) | Settled::Invalid(error) => {
                Err(error)
            }
        }
    }
}

/// Future returned by [`race`].
pub struct Race {
    inputs: Vec<Input>,
    validated: bool,
}

/// Races `waitables`, flattening nested races into one flat list.
pub fn race<I>(waitables: I) -> Race
where
    I: IntoIterator,
    I::Item: Into<Waitable>,
{
    let mut inputs = Vec::new();
    for waitable in waitables {
        Input::flatten(waitable.into(), &mut inputs);
    }

    Race {
        inputs,
        validated: false,
    }
}

impl Race {
    /// Number of flattened inputs.
    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    fn position(&self, from: &Input) -> Option<usize> {
        self.inputs.iter().position(|input| input.same(from))
    }

    fn validate(&self, me: TaskId) -> Result<()> {
        if self.inputs.is_empty() {
            return Err(Error::EmptyRace);
        }

        let scheduler = context::scheduler();
        for input in &self.inputs {
            if let Input::Task(task) = input {
                if !task.header().belongs_to(&scheduler) {
                    return Err(Error::TypeMismatch {
                        detail: format!("{} belongs to another thread's scheduler", task.id()),
                    });
                }
                if task.id() == me {
                    return Err(Error::TypeMismatch {
                        detail: format!("{me} cannot wait for its own completion"),
                    });
                }
            }
        }

        Ok(())
    }

    pub(crate) fn poll_settled(&mut self) -> Poll<Settled> {
        let scheduler = context::scheduler();
        let Some(me) = scheduler.current() else {
            return Poll::Ready(Settled::Invalid(Error::OutsideComputation));
        };

        if !self.validated {
            if let Err(error) = self.validate(me) {
                return Poll::Ready(Settled::Invalid(error));
            }
            self.validated = true;
        }

        if let Some(error) = scheduler.take_thrown(me) {
            return Poll::Ready(Settled::Thrown(error));
        }

        if let Some((index, outcome)) = scheduler.take_delivery(me, |from| self.position(from)) {
            return Poll::Ready(settle(index, outcome));
        }

        for (index, input) in self.inputs.iter().enumerate() {
            if let Some(outcome) = input.try_take() {
                return Poll::Ready(settle(index, outcome));
            }
        }

        for input in &self.inputs {
            scheduler.register(me, input);
        }

        Poll::Pending
    }
}

fn settle(index: usize, outcome: Result<Outcome>) -> Settled {
    match outcome {
        Ok(outcome) => Settled::Won(Won { index, outcome }),
        Err(error) => Settled::Failed(error),
    }
}

impl Future for Race {
    type Output = Result<Won>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.poll_settled().map(Settled::into_result)
    }
}

impl fmt::Debug for Race {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(&self.inputs).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_races_flatten_in_order() {
        let a = EventQueue::new();
        let b = EventQueue::new();
        let c = EventQueue::new();

        let inner = race([&b, &c]);
        let outer = race([Waitable::from(&a), Waitable::from(inner)]);

        assert_eq!(outer.len(), 3);
        assert!(outer.inputs[0].same(&Input::Queue(a)));
        assert!(outer.inputs[1].same(&Input::Queue(b)));
        assert!(outer.inputs[2].same(&Input::Queue(c)));
    }

    #[test]
    fn test_polled_outside_computation_is_rejected() {
        let queue = EventQueue::new();
        let mut race = race([&queue]);

        let settled = race.poll_settled();
        assert!(matches!(
            settled,
            Poll::Ready(Settled::Invalid(Error::OutsideComputation))
        ));
    }
}
