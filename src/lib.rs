//! Process-wide swappable time source with a mockable clock.
//!
//! Production code reads time through this crate unconditionally; tests swap
//! the backing source for a frozen mock, advance it explicitly, and restore
//! the real clock afterwards.
//!
//! # Overview
//!
//! - [`TimeSource`] — the capability set: now, sleep, timers, tickers and
//!   deadline/timeout cancellation contexts. Ships with [`RealTimeSource`]
//!   (system clock + tokio timers) and [`MockTimeSource`] (frozen instant,
//!   advanced explicitly).
//! - [`ClockRegistry`] — holds the active source and delegates every
//!   operation to it. A lazily-initialized global registry backs the free
//!   functions below; constructing registries directly and passing them
//!   through call sites is the preferred design for new code.
//! - [`DayElapsed`] — elapsed time since a daily reset boundary with a
//!   shiftable reset time of day.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use chrono::{TimeZone, Utc};
//!
//! let start = Utc.with_ymd_and_hms(2021, 3, 15, 13, 20, 0).unwrap();
//!
//! // Freeze time for a test.
//! let mock = timesource::mock(start);
//! assert_eq!(timesource::now(), start);
//!
//! mock.advance(Duration::from_secs(60));
//! assert_eq!(timesource::now(), start + chrono::Duration::seconds(60));
//!
//! // Back to the system clock.
//! timesource::restore();
//! assert_ne!(timesource::now(), start);
//! ```
//!
//! # Locking
//!
//! Reads capture the active source under a guard and delegate outside of it,
//! so swapping sources is linearizable with respect to reads while a pending
//! `sleep` never blocks a swap. [`no_lock`] elides the guard on hot read
//! paths that are known to run while the active source is stable; guarded is
//! the default.

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![cfg_attr(feature = "fail-on-warnings", deny(clippy::all))]
#![forbid(unsafe_code)]

mod config;
mod deadline;
mod elapsed;
mod mock;
mod realtime;
mod registry;
mod source;
mod timer;

pub use config::TimeConfig;
pub use deadline::CancelHandle;
pub use elapsed::{DayElapsed, DAY, WEEK};
pub use mock::MockTimeSource;
pub use realtime::RealTimeSource;
pub use registry::ClockRegistry;
pub use source::{Callback, TimeSource};
pub use timer::{After, Sleep, Ticker, Timer};

pub use tokio_util::sync::CancellationToken;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::UnboundedReceiver;

use std::sync::OnceLock;
use std::time::Duration;

static REGISTRY: OnceLock<ClockRegistry> = OnceLock::new();

fn registry() -> &'static ClockRegistry {
    REGISTRY.get_or_init(ClockRegistry::new)
}

/// Initializes the global registry from a [`TimeConfig`].
///
/// The first call wins: later calls, and any earlier use of the free
/// functions, leave the registry untouched. A `realtime` config keeps the
/// system clock.
pub fn init(config: TimeConfig) {
    REGISTRY.get_or_init(|| ClockRegistry::from_config(config));
}

/// Returns the current time on the active source.
pub fn now() -> DateTime<Utc> {
    registry().now()
}

/// Returns the time elapsed since `earlier`.
pub fn since(earlier: DateTime<Utc>) -> chrono::Duration {
    registry().since(earlier)
}

/// Returns the time until `later`.
pub fn until(later: DateTime<Utc>) -> chrono::Duration {
    registry().until(later)
}

/// Waits for at least `duration` on the active source.
pub fn sleep(duration: Duration) -> Sleep {
    registry().sleep(duration)
}

/// Resolves with the fire time once `duration` has elapsed.
pub fn after(duration: Duration) -> After {
    registry().after(duration)
}

/// Invokes `f` once `duration` has elapsed.
pub fn after_func(duration: Duration, f: impl FnOnce() + Send + 'static) -> Timer {
    registry().after_func(duration, f)
}

/// Creates a cancellable timer that delivers the fire time after `duration`.
pub fn timer(duration: Duration) -> Timer {
    registry().timer(duration)
}

/// Convenience wrapper for [`ticker`] exposing the ticking channel only.
pub fn tick(period: Duration) -> UnboundedReceiver<DateTime<Utc>> {
    registry().tick(period)
}

/// Creates a stoppable repeating timer ticking every `period`.
pub fn ticker(period: Duration) -> Ticker {
    registry().ticker(period)
}

/// Derives a child of `parent` that is cancelled at `deadline`.
pub fn with_deadline(
    parent: &CancellationToken,
    deadline: DateTime<Utc>,
) -> (CancellationToken, CancelHandle) {
    registry().with_deadline(parent, deadline)
}

/// Derives a child of `parent` that is cancelled once `duration` has elapsed.
pub fn with_timeout(
    parent: &CancellationToken,
    duration: Duration,
) -> (CancellationToken, CancelHandle) {
    registry().with_timeout(parent, duration)
}

/// Installs a mock frozen at `now` on the global registry and returns its
/// handle.
pub fn mock(now: DateTime<Utc>) -> MockTimeSource {
    registry().mock(now)
}

/// Replaces the global registry's active source.
pub fn set(source: impl TimeSource) {
    registry().set(source)
}

/// Restores the real clock on the global registry. Idempotent.
pub fn restore() {
    registry().restore()
}

/// Re-enables the read guard on the global registry. This is the default.
pub fn use_lock() {
    registry().use_lock()
}

/// Disables the read guard on the global registry.
///
/// See [`ClockRegistry::no_lock`] for what this trades away.
pub fn no_lock() {
    registry().no_lock()
}
