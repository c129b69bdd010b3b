use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use crate::source::{checked_add, Callback, TimeSource};
use crate::timer::{Sleep, StopHandle, Ticker, Timer};

/// Time source backed by the system clock and tokio timers.
///
/// `now`, `since` and `until` never touch the runtime; the waiting operations
/// (`timer`, `after_func`, `ticker` and everything derived from them) spawn a
/// tokio task and must be called within a runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealTimeSource;

impl RealTimeSource {
    pub fn new() -> Self {
        Self
    }
}

impl TimeSource for RealTimeSource {
    #[inline]
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn timer(&self, duration: Duration) -> Timer {
        let deadline = checked_add(Utc::now(), duration);
        let (tx, rx) = oneshot::channel();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let task = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            flag.store(true, Ordering::Release);
            let _ = tx.send(Utc::now());
        });
        Timer::new(deadline, Some(rx), StopHandle::Real { task, fired })
    }

    fn after_func(&self, duration: Duration, f: Callback) -> Timer {
        let deadline = checked_add(Utc::now(), duration);
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let task = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            flag.store(true, Ordering::Release);
            f();
        });
        Timer::new(deadline, None, StopHandle::Real { task, fired })
    }

    fn ticker(&self, period: Duration) -> Ticker {
        assert!(!period.is_zero(), "ticker period must be non-zero");
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            loop {
                interval.tick().await;
                if tx.send(Utc::now()).is_err() {
                    break;
                }
            }
        });
        Ticker::new(rx, StopHandle::RealTicker { task })
    }

    fn sleep(&self, duration: Duration) -> Sleep {
        Sleep::real(duration)
    }
}
