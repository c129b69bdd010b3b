use chrono::{DateTime, Utc};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

use std::sync::Arc;
use std::time::Duration;

use crate::deadline::CancelHandle;
use crate::timer::{After, Sleep, Ticker, Timer};

/// Callback invoked when an [`after_func`](TimeSource::after_func) timer fires.
pub type Callback = Box<dyn FnOnce() + Send + 'static>;

/// A time source shared behind the registry.
pub(crate) type SharedSource = Arc<dyn TimeSource>;

/// Add a duration to an instant, saturating at the end of representable time.
pub(crate) fn checked_add(instant: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|d| instant.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// The capability set behind every time operation in this crate.
///
/// Two implementations ship with the crate: [`RealTimeSource`](crate::RealTimeSource)
/// backed by the system clock and tokio timers, and
/// [`MockTimeSource`](crate::MockTimeSource) holding a frozen instant that tests
/// advance explicitly. Callers may install their own implementation via
/// [`ClockRegistry::set`](crate::ClockRegistry::set).
///
/// Only `now`, `timer`, `after_func` and `ticker` must be provided; the
/// remaining operations are derived from them.
pub trait TimeSource: Send + Sync + 'static {
    /// The current time according to this source.
    fn now(&self) -> DateTime<Utc>;

    /// A cancellable timer that delivers the fire time on its channel after
    /// at least `duration`.
    fn timer(&self, duration: Duration) -> Timer;

    /// Invokes `f` once `duration` has elapsed. The returned timer carries no
    /// channel; it can only be stopped.
    fn after_func(&self, duration: Duration, f: Callback) -> Timer;

    /// A repeating timer delivering the time every `period`.
    ///
    /// # Panics
    ///
    /// Panics if `period` is zero.
    fn ticker(&self, period: Duration) -> Ticker;

    /// Time elapsed since `earlier`. Negative if `earlier` is in the future.
    fn since(&self, earlier: DateTime<Utc>) -> chrono::Duration {
        self.now() - earlier
    }

    /// Time until `later`. Negative if `later` has already passed.
    fn until(&self, later: DateTime<Utc>) -> chrono::Duration {
        later - self.now()
    }

    /// A future resolving with the fire time once `duration` has elapsed.
    fn after(&self, duration: Duration) -> After {
        self.timer(duration).into_after()
    }

    /// A future resolving once `duration` has elapsed.
    fn sleep(&self, duration: Duration) -> Sleep {
        self.timer(duration).into_sleep()
    }

    /// Convenience wrapper for [`ticker`](Self::ticker) exposing only the
    /// receiving side. The underlying ticker cannot be stopped.
    ///
    /// # Panics
    ///
    /// Panics if `period` is zero.
    fn tick(&self, period: Duration) -> UnboundedReceiver<DateTime<Utc>> {
        self.ticker(period).into_receiver()
    }

    /// Derives a child token from `parent` that is cancelled at `deadline`.
    ///
    /// A deadline at or before the current time yields an already-cancelled
    /// token. The returned [`CancelHandle`] cancels the token early; calling
    /// it is idempotent.
    fn with_deadline(
        &self,
        parent: &CancellationToken,
        deadline: DateTime<Utc>,
    ) -> (CancellationToken, CancelHandle) {
        let child = parent.child_token();
        let remaining = deadline - self.now();
        if remaining <= chrono::Duration::zero() {
            child.cancel();
            return (child.clone(), CancelHandle::new(child, None));
        }
        let wait = remaining.to_std().unwrap_or(Duration::ZERO);
        let token = child.clone();
        let timer = self.after_func(wait, Box::new(move || token.cancel()));
        (child.clone(), CancelHandle::new(child, Some(timer)))
    }

    /// Derives a child token from `parent` that is cancelled once `duration`
    /// has elapsed.
    fn with_timeout(
        &self,
        parent: &CancellationToken,
        duration: Duration,
    ) -> (CancellationToken, CancelHandle) {
        self.with_deadline(parent, checked_add(self.now(), duration))
    }
}
