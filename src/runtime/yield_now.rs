use crate::error::Result;

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Cooperative yield: suspends the current computation once.
///
/// The first poll wakes its own waker and returns `Pending`; the wake is
/// queued on the host channel, so every other pending host event and expired
/// timer gets a chance to run before this computation continues on the next
/// loop turn.
pub async fn yield_now() -> Result<()> {
    struct YieldOnce(bool);

    impl Future for YieldOnce {
        type Output = ();

        fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
            if !self.0 {
                self.0 = true;
                cx.waker().wake_by_ref();
                return Poll::Pending;
            }
            Poll::Ready(())
        }
    }

    YieldOnce(false).await;
    Ok(())
}
