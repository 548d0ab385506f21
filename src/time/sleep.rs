//! Timer-backed suspension: one-off sleeps and periodic ticks.

use crate::error::Result;
use crate::race::Waitable;
use crate::signal::{EventQueue, Next};
use crate::time::timer::Timer;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;

/// A single-shot timer together with the queue it fires into.
struct Alarm {
    timer: Timer,
    queue: EventQueue,
    wait: Option<Next>,
}

impl Alarm {
    fn new(timer: Timer) -> Self {
        let queue = EventQueue::bounded(1);
        queue.attach(timer.timeout());
        timer.start();

        Self {
            timer,
            queue,
            wait: None,
        }
    }

    fn poll_fired(&mut self) -> Poll<Result<()>> {
        let queue = &self.queue;
        let wait = self.wait.get_or_insert_with(|| queue.wait());

        match wait.poll_wait() {
            Poll::Pending => Poll::Pending,
            Poll::Ready(result) => {
                self.wait = None;
                Poll::Ready(result.map(drop))
            }
        }
    }
}

/// Future returned by [`sleep`].
///
/// The deadline is fixed when the sleep is created. A `&Sleep` can also be
/// raced against other waitables.
pub struct Sleep {
    alarm: Alarm,
    duration: Duration,
}

/// Suspends the current computation for at least `duration`.
///
/// # Example
/// ```ignore
/// use sigbridge::sleep;
/// use std::time::Duration;
///
/// async fn wait() -> sigbridge::Result<()> {
///     sleep(Duration::from_millis(100)).await?;
///     Ok(())
/// }
/// ```
pub fn sleep(duration: Duration) -> Sleep {
    Sleep {
        alarm: Alarm::new(Timer::single_shot(duration)),
        duration,
    }
}

impl Sleep {
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// True once the deadline has passed and the loop fired the timer.
    pub fn is_elapsed(&self) -> bool {
        !self.alarm.timer.is_active()
    }
}

impl Future for Sleep {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.alarm.poll_fired()
    }
}

impl From<&Sleep> for Waitable {
    fn from(sleep: &Sleep) -> Self {
        Waitable::Queue(sleep.alarm.queue.clone())
    }
}

impl fmt::Debug for Sleep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sleep")
            .field("duration", &self.duration)
            .field("elapsed", &self.is_elapsed())
            .finish()
    }
}

/// Stream returned by [`sleep_loop`].
pub struct Ticks {
    alarm: Alarm,
}

/// Yields once per `period`, forever.
///
/// After every tick the backlog is discarded, so a consumer slower than the
/// period sees one tick per wake-up rather than a burst of stale ones.
///
/// # Example
/// ```ignore
/// use futures::StreamExt;
///
/// let mut ticks = sleep_loop(Duration::from_millis(100));
/// while let Some(tick) = ticks.next().await {
///     tick?;
///     refresh();
/// }
/// ```
pub fn sleep_loop(period: Duration) -> Ticks {
    let timer = Timer::repeating(period);
    Ticks {
        alarm: Alarm::new(timer),
    }
}

impl Ticks {
    pub fn period(&self) -> Duration {
        self.alarm.timer.interval()
    }
}

impl Stream for Ticks {
    type Item = Result<()>;

    fn poll_next(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.alarm.poll_fired() {
            Poll::Pending => Poll::Pending,
            Poll::Ready(result) => {
                self.alarm.queue.drain();
                Poll::Ready(Some(result))
            }
        }
    }
}

impl fmt::Debug for Ticks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ticks").field("period", &self.period()).finish()
    }
}
