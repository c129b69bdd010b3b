use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use crate::config::TimeConfig;
use crate::deadline::CancelHandle;
use crate::mock::MockTimeSource;
use crate::realtime::RealTimeSource;
use crate::source::{SharedSource, TimeSource};
use crate::timer::{After, Sleep, Ticker, Timer};

/// Holder of the active [`TimeSource`].
///
/// Every time operation captures the active source — under the guard, unless
/// [`no_lock`](Self::no_lock) is in effect — and then delegates outside the
/// critical section, so a long `sleep` never blocks a concurrent
/// [`set`](Self::set).
///
/// A process-wide registry backs the crate's free functions; constructing
/// registries directly and passing them through call sites is the preferred
/// way to make new code testable.
pub struct ClockRegistry {
    guard: RwLock<()>,
    active: ArcSwap<SharedSource>,
    guarded: AtomicBool,
}

impl ClockRegistry {
    /// A guarded registry holding a [`RealTimeSource`].
    pub fn new() -> Self {
        Self::with_source(Arc::new(RealTimeSource))
    }

    /// A guarded registry holding the source the config selects.
    pub fn from_config(config: TimeConfig) -> Self {
        let registry = Self::new();
        if !config.realtime {
            registry.mock(config.start_at.unwrap_or_else(Utc::now));
        }
        registry
    }

    /// A guarded registry holding the given source.
    pub fn with_source(source: Arc<dyn TimeSource>) -> Self {
        Self {
            guard: RwLock::new(()),
            active: ArcSwap::from_pointee(source),
            guarded: AtomicBool::new(true),
        }
    }

    /// Captures the active source, then releases the guard before the caller
    /// delegates to it.
    fn capture(&self) -> SharedSource {
        let snapshot = if self.guarded.load(Ordering::Acquire) {
            let _guard = self.guard.read();
            self.active.load_full()
        } else {
            self.active.load_full()
        };
        (*snapshot).clone()
    }

    /// Replaces the active source.
    pub fn set(&self, source: impl TimeSource) {
        self.set_shared(Arc::new(source));
    }

    /// Replaces the active source with an already-shared one.
    pub fn set_shared(&self, source: Arc<dyn TimeSource>) {
        let _guard = self.guard.write();
        self.active.store(Arc::new(source));
        tracing::debug!("replaced active time source");
    }

    /// Installs a [`MockTimeSource`] frozen at `now` and returns its handle.
    ///
    /// The handle is the only sanctioned way to move the installed mock's
    /// time forward.
    pub fn mock(&self, now: DateTime<Utc>) -> MockTimeSource {
        let mock = MockTimeSource::new(now);
        self.set_shared(Arc::new(mock.clone()));
        tracing::debug!(%now, "installed mock time source");
        mock
    }

    /// Reinstalls a fresh [`RealTimeSource`]. Idempotent.
    pub fn restore(&self) {
        self.set_shared(Arc::new(RealTimeSource));
        tracing::debug!("restored real time source");
    }

    /// Re-enables the guard on reads. This is the default mode.
    pub fn use_lock(&self) {
        let _guard = self.guard.write();
        self.guarded.store(true, Ordering::Release);
    }

    /// Disables the guard on reads.
    ///
    /// Unguarded reads are a single lock-free atomic load: still memory-safe
    /// and never torn, but no longer ordered with respect to concurrent
    /// [`set`](Self::set)/[`mock`](Self::mock)/[`restore`](Self::restore)
    /// calls — a read racing a swap may observe either source. Only opt in on
    /// hot paths where the active source is known to be stable. Writes keep
    /// taking the guard regardless of mode, as does this toggle itself.
    pub fn no_lock(&self) {
        let _guard = self.guard.write();
        self.guarded.store(false, Ordering::Release);
    }

    /// Whether reads currently take the guard.
    pub fn is_guarded(&self) -> bool {
        self.guarded.load(Ordering::Acquire)
    }

    /// The current time according to the active source.
    pub fn now(&self) -> DateTime<Utc> {
        self.capture().now()
    }

    /// Time elapsed since `earlier`.
    pub fn since(&self, earlier: DateTime<Utc>) -> chrono::Duration {
        self.capture().since(earlier)
    }

    /// Time until `later`.
    pub fn until(&self, later: DateTime<Utc>) -> chrono::Duration {
        self.capture().until(later)
    }

    /// A future resolving once `duration` has elapsed on the active source.
    pub fn sleep(&self, duration: Duration) -> Sleep {
        self.capture().sleep(duration)
    }

    /// A future resolving with the fire time once `duration` has elapsed.
    pub fn after(&self, duration: Duration) -> After {
        self.capture().after(duration)
    }

    /// Invokes `f` once `duration` has elapsed.
    pub fn after_func(&self, duration: Duration, f: impl FnOnce() + Send + 'static) -> Timer {
        self.capture().after_func(duration, Box::new(f))
    }

    /// A cancellable one-shot timer.
    pub fn timer(&self, duration: Duration) -> Timer {
        self.capture().timer(duration)
    }

    /// The receiving side of a repeating timer.
    pub fn tick(&self, period: Duration) -> UnboundedReceiver<DateTime<Utc>> {
        self.capture().tick(period)
    }

    /// A stoppable repeating timer.
    pub fn ticker(&self, period: Duration) -> Ticker {
        self.capture().ticker(period)
    }

    /// A child of `parent` cancelled at `deadline`.
    pub fn with_deadline(
        &self,
        parent: &CancellationToken,
        deadline: DateTime<Utc>,
    ) -> (CancellationToken, CancelHandle) {
        self.capture().with_deadline(parent, deadline)
    }

    /// A child of `parent` cancelled once `duration` has elapsed.
    pub fn with_timeout(
        &self,
        parent: &CancellationToken,
        duration: Duration,
    ) -> (CancellationToken, CancelHandle) {
        self.capture().with_timeout(parent, duration)
    }
}

impl Default for ClockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ClockRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClockRegistry")
            .field("guarded", &self.is_guarded())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn guarded_by_default() {
        let registry = ClockRegistry::new();
        assert!(registry.is_guarded());
    }

    #[test]
    fn lock_mode_toggles() {
        let registry = ClockRegistry::new();
        registry.no_lock();
        assert!(!registry.is_guarded());
        // Reads keep working unguarded.
        let frozen = Utc.with_ymd_and_hms(2021, 3, 15, 13, 20, 0).unwrap();
        registry.mock(frozen);
        assert_eq!(registry.now(), frozen);
        registry.use_lock();
        assert!(registry.is_guarded());
    }

    #[test]
    fn from_config_installs_a_frozen_mock() {
        let start = Utc.with_ymd_and_hms(2021, 3, 15, 13, 20, 0).unwrap();
        let registry = ClockRegistry::from_config(TimeConfig {
            realtime: false,
            start_at: Some(start),
        });
        assert_eq!(registry.now(), start);
    }

    #[test]
    fn from_config_defaults_to_the_system_clock() {
        let registry = ClockRegistry::from_config(TimeConfig::default());
        let lower = Utc::now();
        assert!(registry.now() >= lower);
    }

    #[test]
    fn restore_is_idempotent() {
        let registry = ClockRegistry::new();
        let frozen = Utc.with_ymd_and_hms(2021, 3, 15, 13, 20, 0).unwrap();
        registry.mock(frozen);
        registry.restore();
        registry.restore();
        assert_ne!(registry.now(), frozen);
    }
}
