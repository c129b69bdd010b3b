use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use crate::source::{checked_add, Callback, TimeSource};
use crate::timer::{StopHandle, Ticker, Timer};

/// Shared state behind a [`MockTimeSource`] and its timers' stop handles.
pub(crate) struct MockState {
    now: Mutex<DateTime<Utc>>,
    registrations: Mutex<Vec<Registration>>,
    next_id: AtomicU64,
}

struct Registration {
    id: u64,
    deadline: DateTime<Utc>,
    kind: FireKind,
}

enum FireKind {
    Send(oneshot::Sender<DateTime<Utc>>),
    Call(Callback),
    Tick {
        period: Duration,
        tx: mpsc::UnboundedSender<DateTime<Utc>>,
    },
}

impl MockState {
    fn register(&self, deadline: DateTime<Utc>, kind: FireKind) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.registrations
            .lock()
            .push(Registration { id, deadline, kind });
        id
    }

    fn reregister(&self, id: u64, deadline: DateTime<Utc>, kind: FireKind) {
        self.registrations
            .lock()
            .push(Registration { id, deadline, kind });
    }

    pub(crate) fn unregister(&self, id: u64) -> bool {
        let mut registrations = self.registrations.lock();
        let before = registrations.len();
        registrations.retain(|r| r.id != id);
        registrations.len() != before
    }

    /// Removes and returns the next registration due at or before `target`:
    /// earliest deadline first, ties broken by registration id.
    fn pop_due(&self, target: DateTime<Utc>) -> Option<Registration> {
        let mut registrations = self.registrations.lock();
        let mut best: Option<usize> = None;
        for (i, reg) in registrations.iter().enumerate() {
            if reg.deadline > target {
                continue;
            }
            match best {
                Some(b) => {
                    let current = &registrations[b];
                    if (reg.deadline, reg.id) < (current.deadline, current.id) {
                        best = Some(i);
                    }
                }
                None => best = Some(i),
            }
        }
        best.map(|i| registrations.remove(i))
    }
}

/// A time source frozen at a fixed instant, advanced explicitly by the caller.
///
/// Cloning is cheap and every clone shares the same state, so the value
/// returned by [`ClockRegistry::mock`](crate::ClockRegistry::mock) doubles as
/// the control handle for the installed source.
///
/// Advancing fires due timers and tickers synchronously, earliest deadline
/// first, ties broken by registration order. None of the mock's operations
/// require a tokio runtime.
#[derive(Clone)]
pub struct MockTimeSource {
    state: Arc<MockState>,
}

impl MockTimeSource {
    /// Creates a mock frozen at `now`.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            state: Arc::new(MockState {
                now: Mutex::new(now),
                registrations: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// The frozen instant.
    pub fn now(&self) -> DateTime<Utc> {
        *self.state.now.lock()
    }

    /// Moves time forward by `duration`, firing everything that falls due.
    /// Returns the number of registrations fired.
    ///
    /// Each registration observes the frozen instant at its own deadline
    /// while it fires. Callbacks run inline and may register further timers,
    /// which are honored within the same advance when due.
    pub fn advance(&self, duration: Duration) -> usize {
        let target = checked_add(self.now(), duration);
        self.advance_to(target)
    }

    /// Sets the frozen instant directly.
    ///
    /// Moving forward fires due registrations exactly like
    /// [`advance`](Self::advance); moving backward fires nothing. Returns the
    /// number of registrations fired.
    pub fn set_time(&self, time: DateTime<Utc>) -> usize {
        if time <= self.now() {
            *self.state.now.lock() = time;
            return 0;
        }
        self.advance_to(time)
    }

    /// Number of timer/ticker registrations waiting to fire.
    pub fn pending_count(&self) -> usize {
        self.state.registrations.lock().len()
    }

    fn advance_to(&self, target: DateTime<Utc>) -> usize {
        let mut fired = 0;
        // The registration list is unlocked while firing so that callbacks
        // may call back into the mock.
        while let Some(registration) = self.state.pop_due(target) {
            *self.state.now.lock() = registration.deadline;
            match registration.kind {
                FireKind::Send(tx) => {
                    let _ = tx.send(registration.deadline);
                }
                FireKind::Call(f) => f(),
                FireKind::Tick { period, tx } => {
                    // A dropped receiver retires the ticker.
                    if tx.send(registration.deadline).is_ok() {
                        let next = checked_add(registration.deadline, period);
                        self.state
                            .reregister(registration.id, next, FireKind::Tick { period, tx });
                    }
                }
            }
            fired += 1;
        }
        *self.state.now.lock() = target;
        tracing::trace!(fired, "advanced mock time source");
        fired
    }
}

impl TimeSource for MockTimeSource {
    fn now(&self) -> DateTime<Utc> {
        MockTimeSource::now(self)
    }

    fn timer(&self, duration: Duration) -> Timer {
        let deadline = checked_add(self.now(), duration);
        let (tx, rx) = oneshot::channel();
        let id = self.state.register(deadline, FireKind::Send(tx));
        Timer::new(
            deadline,
            Some(rx),
            StopHandle::Mock {
                state: Arc::downgrade(&self.state),
                id,
            },
        )
    }

    fn after_func(&self, duration: Duration, f: Callback) -> Timer {
        let deadline = checked_add(self.now(), duration);
        let id = self.state.register(deadline, FireKind::Call(f));
        Timer::new(
            deadline,
            None,
            StopHandle::Mock {
                state: Arc::downgrade(&self.state),
                id,
            },
        )
    }

    fn ticker(&self, period: Duration) -> Ticker {
        assert!(!period.is_zero(), "ticker period must be non-zero");
        let (tx, rx) = mpsc::unbounded_channel();
        let deadline = checked_add(self.now(), period);
        let id = self.state.register(deadline, FireKind::Tick { period, tx });
        Ticker::new(
            rx,
            StopHandle::Mock {
                state: Arc::downgrade(&self.state),
                id,
            },
        )
    }
}

impl std::fmt::Debug for MockTimeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTimeSource")
            .field("now", &self.now())
            .field("pending", &self.pending_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2019, 9, 30, 14, 30, 0).unwrap()
    }

    #[test]
    fn time_stands_still() {
        let mock = MockTimeSource::new(start());
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(mock.now(), start());
    }

    #[test]
    fn advance_moves_the_frozen_instant() {
        let mock = MockTimeSource::new(start());
        mock.advance(Duration::from_secs(1));
        assert_eq!(mock.now(), start() + chrono::Duration::seconds(1));
    }

    #[test]
    fn callbacks_fire_in_deadline_then_registration_order() {
        let mock = MockTimeSource::new(start());
        let order = Arc::new(Mutex::new(Vec::new()));

        for (label, secs) in [('a', 30u64), ('b', 10), ('c', 20), ('d', 10)] {
            let order = Arc::clone(&order);
            // Dropping the handle detaches the timer without stopping it.
            let timer = mock.after_func(
                Duration::from_secs(secs),
                Box::new(move || order.lock().push(label)),
            );
            assert!(timer.deadline() > start());
        }
        let fired = mock.advance(Duration::from_secs(60));
        assert_eq!(fired, 4);
        let order = order.lock();
        assert_eq!(*order, vec!['b', 'd', 'c', 'a']);
    }

    #[test]
    fn set_time_forward_fires_in_order() {
        let mock = MockTimeSource::new(start());
        let order = Arc::new(Mutex::new(Vec::new()));
        for (label, secs) in [('x', 20u64), ('y', 10)] {
            let order = Arc::clone(&order);
            let timer = mock.after_func(
                Duration::from_secs(secs),
                Box::new(move || order.lock().push(label)),
            );
            drop(timer);
        }
        let fired = mock.set_time(start() + chrono::Duration::seconds(15));
        assert_eq!(fired, 1);
        assert_eq!(*order.lock(), vec!['y']);
        assert_eq!(mock.now(), start() + chrono::Duration::seconds(15));
    }

    #[test]
    fn set_time_backward_fires_nothing() {
        let mock = MockTimeSource::new(start());
        let _timer = mock.timer(Duration::from_secs(10));
        let fired = mock.set_time(start() - chrono::Duration::hours(1));
        assert_eq!(fired, 0);
        assert_eq!(mock.pending_count(), 1);
    }

    #[test]
    fn stopped_timer_does_not_fire() {
        let mock = MockTimeSource::new(start());
        let mut timer = mock.timer(Duration::from_secs(10));
        assert_eq!(mock.pending_count(), 1);
        assert!(timer.stop());
        assert_eq!(mock.pending_count(), 0);
        assert_eq!(mock.advance(Duration::from_secs(60)), 0);
        assert!(!timer.stop());
    }

    #[test]
    fn ticker_reregisters_until_dropped() {
        let mock = MockTimeSource::new(start());
        let mut ticker = TimeSource::ticker(&mock, Duration::from_secs(10));
        let fired = mock.advance(Duration::from_secs(35));
        assert_eq!(fired, 3);
        assert_eq!(mock.pending_count(), 1);
        ticker.stop();
        assert_eq!(mock.pending_count(), 0);
        assert_eq!(mock.advance(Duration::from_secs(60)), 0);
    }

    #[test]
    fn callback_registered_during_advance_is_honored() {
        let mock = MockTimeSource::new(start());
        let fired_at = Arc::new(Mutex::new(None));
        let inner_fired_at = Arc::clone(&fired_at);
        let inner_mock = mock.clone();
        let timer = mock.after_func(
            Duration::from_secs(10),
            Box::new(move || {
                let capture = Arc::clone(&inner_fired_at);
                let chained = inner_mock.after_func(
                    Duration::from_secs(10),
                    Box::new(move || *capture.lock() = Some(())),
                );
                drop(chained);
            }),
        );
        drop(timer);
        let fired = mock.advance(Duration::from_secs(30));
        assert_eq!(fired, 2);
        assert!(fired_at.lock().is_some());
    }
}
