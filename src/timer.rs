use chrono::{DateTime, Utc};
use pin_project::pin_project;
use tokio::sync::{mpsc::UnboundedReceiver, oneshot};

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
    task::{Context, Poll},
    time::Duration,
};

use crate::mock::MockState;

/// Undoes a timer registration, whichever source created it.
pub(crate) enum StopHandle {
    Real {
        task: tokio::task::JoinHandle<()>,
        fired: Arc<AtomicBool>,
    },
    /// A repeating task has no single fire point; aborting it is all a stop
    /// can do.
    RealTicker {
        task: tokio::task::JoinHandle<()>,
    },
    Mock {
        state: Weak<MockState>,
        id: u64,
    },
}

impl StopHandle {
    fn stop(&mut self) -> bool {
        match self {
            StopHandle::Real { task, fired } => {
                let was_pending = !fired.load(Ordering::Acquire);
                task.abort();
                was_pending
            }
            StopHandle::RealTicker { task } => {
                let was_ticking = !task.is_finished();
                task.abort();
                was_ticking
            }
            StopHandle::Mock { state, id } => state
                .upgrade()
                .map(|state| state.unregister(*id))
                .unwrap_or(false),
        }
    }
}

/// A one-shot timer created by [`TimeSource::timer`](crate::TimeSource::timer)
/// or [`TimeSource::after_func`](crate::TimeSource::after_func).
pub struct Timer {
    deadline: DateTime<Utc>,
    rx: Option<oneshot::Receiver<DateTime<Utc>>>,
    stop: StopHandle,
}

impl Timer {
    pub(crate) fn new(
        deadline: DateTime<Utc>,
        rx: Option<oneshot::Receiver<DateTime<Utc>>>,
        stop: StopHandle,
    ) -> Self {
        Self { deadline, rx, stop }
    }

    /// The instant this timer is due to fire.
    pub fn deadline(&self) -> DateTime<Utc> {
        self.deadline
    }

    /// Stops the timer. Returns `true` if it was still pending.
    ///
    /// `false` means the timer already fired; on the real clock the delivery
    /// (or callback) may still be completing on the runtime.
    pub fn stop(&mut self) -> bool {
        self.stop.stop()
    }

    /// Waits for the timer to fire and returns the fire time.
    ///
    /// Returns `None` if the timer was stopped, has already been consumed, or
    /// was created by `after_func` (which delivers through its callback).
    pub async fn fired(&mut self) -> Option<DateTime<Utc>> {
        match self.rx.take() {
            Some(rx) => rx.await.ok(),
            None => None,
        }
    }

    pub(crate) fn into_after(mut self) -> After {
        After {
            deadline: self.deadline,
            rx: self.rx.take(),
        }
    }

    pub(crate) fn into_sleep(self) -> Sleep {
        Sleep {
            inner: SleepInner::Chan(self.into_after()),
        }
    }
}

impl std::fmt::Debug for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timer")
            .field("deadline", &self.deadline)
            .finish()
    }
}

/// A repeating timer created by [`TimeSource::ticker`](crate::TimeSource::ticker).
pub struct Ticker {
    rx: UnboundedReceiver<DateTime<Utc>>,
    stop: StopHandle,
}

impl Ticker {
    pub(crate) fn new(rx: UnboundedReceiver<DateTime<Utc>>, stop: StopHandle) -> Self {
        Self { rx, stop }
    }

    /// Receives the next tick. Returns `None` once the ticker is stopped and
    /// all delivered ticks are drained.
    pub async fn recv(&mut self) -> Option<DateTime<Utc>> {
        self.rx.recv().await
    }

    /// Stops the ticker. Ticks already delivered remain receivable.
    pub fn stop(&mut self) {
        self.stop.stop();
    }

    pub(crate) fn into_receiver(self) -> UnboundedReceiver<DateTime<Utc>> {
        self.rx
    }
}

/// A future resolving with the fire time once its duration has elapsed.
///
/// Created by [`TimeSource::after`](crate::TimeSource::after). If the backing
/// source goes away before firing, the future resolves with the deadline it
/// was registered for.
#[pin_project]
pub struct After {
    deadline: DateTime<Utc>,
    #[pin]
    rx: Option<oneshot::Receiver<DateTime<Utc>>>,
}

impl Future for After {
    type Output = DateTime<Utc>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        match this.rx.as_pin_mut() {
            Some(rx) => match rx.poll(cx) {
                Poll::Ready(Ok(fired_at)) => Poll::Ready(fired_at),
                Poll::Ready(Err(_)) => Poll::Ready(*this.deadline),
                Poll::Pending => Poll::Pending,
            },
            None => Poll::Ready(*this.deadline),
        }
    }
}

/// A future resolving once its duration has elapsed on the clock.
///
/// Created by [`TimeSource::sleep`](crate::TimeSource::sleep).
#[pin_project]
pub struct Sleep {
    #[pin]
    inner: SleepInner,
}

#[pin_project(project = SleepInnerProj)]
enum SleepInner {
    Real(#[pin] tokio::time::Sleep),
    Chan(#[pin] After),
}

impl Sleep {
    pub(crate) fn real(duration: Duration) -> Self {
        Self {
            inner: SleepInner::Real(tokio::time::sleep(duration)),
        }
    }
}

impl Future for Sleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        match self.project().inner.project() {
            SleepInnerProj::Real(sleep) => sleep.poll(cx),
            SleepInnerProj::Chan(after) => after.poll(cx).map(|_| ()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTimeSource;
    use crate::source::TimeSource;
    use chrono::TimeZone;
    use futures::task::noop_waker;

    #[test]
    fn after_falls_back_to_its_deadline_when_the_source_is_gone() {
        let start = Utc.with_ymd_and_hms(2019, 9, 30, 14, 30, 0).unwrap();
        let mock = MockTimeSource::new(start);
        let after = mock.after(Duration::from_secs(10));
        let mut timer = mock.timer(Duration::from_secs(10));
        drop(mock);

        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        let mut after = Box::pin(after);
        match after.as_mut().poll(&mut cx) {
            Poll::Ready(fired_at) => {
                assert_eq!(fired_at, start + chrono::Duration::seconds(10))
            }
            Poll::Pending => panic!("after should resolve once its source is gone"),
        }

        // Stop handles into a dropped mock report nothing pending.
        assert!(!timer.stop());
    }
}
